//! The SQL backend adapter over DataFusion.
//!
//! Metrics are compiled to SQL text and executed against a table registered
//! in a [`SessionContext`]. Every plain aggregate of a batch is folded into
//! the select list of one combined query, so a whole dependency layer costs
//! a single round trip. Uniqueness checks need a windowed subquery and
//! samples need row-level output, so those run as their own statements.
//!
//! SQL comparison semantics are already three-valued; predicates are
//! rendered directly and `CASE WHEN ... THEN 1 END` counts only rows where
//! the condition is definitely true.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, instrument};

use arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, LargeStringArray, StringArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow::record_batch::RecordBatch;
use datafusion::datasource::MemTable;
use datafusion::prelude::SessionContext;

use crate::backend::{BackendAdapter, BackendKind, MetricBatch};
use crate::error::{AssayError, MetricError, Result};
use crate::metrics::condition::{Predicate, RowFilter};
use crate::metrics::id::{MetricId, Scalar};
use crate::metrics::provider::{AggregateFunction, SampleSpec, SampleTarget, ScanRequest};
use crate::metrics::value::{ResolvedMetric, ResolvedValue, RowSample};

const SQL_BACKEND: &str = "sql";

/// Alias of the per-group row count exposed by windowed subqueries.
const GROUP_SIZE: &str = "__assay_group_size";

/// Backend adapter executing metrics as SQL against a DataFusion table.
///
/// Row samples need a way to identify rows in SQL output. Configure a key
/// column with [`SqlAdapter::with_key_column`] to enable them; the key also
/// orders samples so repeated runs return the same rows.
pub struct SqlAdapter {
    ctx: SessionContext,
    table: String,
    key_column: Option<String>,
}

impl SqlAdapter {
    /// Creates an adapter over a table already registered in `ctx`.
    pub fn new(ctx: SessionContext, table: impl Into<String>) -> Self {
        Self {
            ctx,
            table: table.into(),
            key_column: None,
        }
    }

    /// Registers a record batch as `table` in a fresh session and returns an
    /// adapter over it.
    pub fn from_record_batch(table: impl Into<String>, batch: RecordBatch) -> Result<Self> {
        let table = table.into();
        let ctx = SessionContext::new();
        let schema = batch.schema();
        let mem_table = MemTable::try_new(schema, vec![vec![batch]])?;
        let _ = ctx.register_table(table.as_str(), Arc::new(mem_table))?;
        Ok(Self {
            ctx,
            table,
            key_column: None,
        })
    }

    /// Declares a column whose values identify rows.
    ///
    /// Enables row samples and makes sample output deterministic via
    /// `ORDER BY` on the key.
    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = Some(column.into());
        self
    }

    /// The session the adapter queries.
    pub fn session(&self) -> &SessionContext {
        &self.ctx
    }

    async fn single_row(&self, sql: &str) -> Result<RecordBatch> {
        let df = self.ctx.sql(sql).await?;
        let batches = df.collect().await?;
        batches
            .into_iter()
            .find(|batch| batch.num_rows() > 0)
            .ok_or_else(|| AssayError::backend(SQL_BACKEND, "aggregate query returned no rows"))
    }

    /// Runs one uniqueness count over a windowed subquery.
    async fn windowed_count(
        &self,
        table: &str,
        where_sql: &str,
        id: &MetricId,
        function: &AggregateFunction,
    ) -> Result<ResolvedValue> {
        let AggregateFunction::MatchCount(predicate) = function else {
            return Err(AssayError::Internal(format!(
                "aggregate {function:?} does not use a windowed scan"
            )));
        };
        let columns = domain_columns(id)?;
        let source = windowed_source(table, where_sql, &columns)?;
        let clause = predicate_sql(predicate, &columns, Some(GROUP_SIZE))?;
        let sql = format!("SELECT COUNT(CASE WHEN ({clause}) THEN 1 END) AS m0 FROM {source}");
        debug!(query = %sql, "executing windowed count");
        let row = self.single_row(&sql).await?;
        Ok(ResolvedValue::from(extract_count(&row, 0)?))
    }

    async fn sample(
        &self,
        table: &str,
        filter_clause: Option<&str>,
        where_sql: &str,
        id: &MetricId,
        spec: &SampleSpec,
    ) -> Result<ResolvedValue> {
        let columns = domain_columns(id)?;
        if columns.is_empty() {
            return Err(AssayError::backend(
                SQL_BACKEND,
                "samples require a column domain",
            ));
        }
        let select_list = match spec.target {
            SampleTarget::Values => columns.join(", "),
            SampleTarget::RowKeys => match &self.key_column {
                Some(key) => quote_ident(key)?,
                None => {
                    return Err(AssayError::backend(
                        SQL_BACKEND,
                        "row samples need a key column; configure one with with_key_column",
                    ))
                }
            },
        };
        let order_sql = match &self.key_column {
            Some(key) => format!(" ORDER BY {}", quote_ident(key)?),
            None => String::new(),
        };

        let sql = if spec.predicate.needs_domain_counts() {
            let source = windowed_source(table, where_sql, &columns)?;
            let clause = predicate_sql(&spec.predicate, &columns, Some(GROUP_SIZE))?;
            format!(
                "SELECT {select_list} FROM {source} WHERE ({clause}){order_sql} LIMIT {}",
                spec.limit
            )
        } else {
            let clause = predicate_sql(&spec.predicate, &columns, None)?;
            let full_clause = match filter_clause {
                Some(filter) => format!("({clause}) AND ({filter})"),
                None => clause,
            };
            format!(
                "SELECT {select_list} FROM {table} WHERE {full_clause}{order_sql} LIMIT {}",
                spec.limit
            )
        };
        debug!(query = %sql, target = ?spec.target, "executing sample query");
        let batches = self.ctx.sql(&sql).await?.collect().await?;

        match spec.target {
            SampleTarget::Values => {
                let mut values = Vec::new();
                for batch in &batches {
                    for row in 0..batch.num_rows() {
                        values.push(row_value(batch, row)?);
                    }
                }
                Ok(ResolvedValue::Values(values))
            }
            SampleTarget::RowKeys => {
                let mut rows = Vec::new();
                for batch in &batches {
                    let keys = batch.column(0);
                    for row in 0..batch.num_rows() {
                        rows.push(RowSample::Key(scalar_at(keys.as_ref(), row)?));
                    }
                }
                Ok(ResolvedValue::Rows(rows))
            }
        }
    }
}

#[async_trait]
impl BackendAdapter for SqlAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn supports_row_keys(&self) -> bool {
        self.key_column.is_some()
    }

    #[instrument(skip(self, batch), fields(table = %self.table, batch.requests = batch.len()))]
    async fn execute_batch(&self, batch: &MetricBatch) -> Result<Vec<ResolvedMetric>> {
        // A table name that cannot be rendered is a configuration problem;
        // nothing in the batch can be computed.
        let table = quote_table(&self.table)?;

        let filter_clause = match &batch.filter {
            Some(filter) => match filter_sql(filter) {
                Ok(clause) => Some(clause),
                Err(e) => {
                    let error = MetricError::computation(SQL_BACKEND, e.to_string());
                    return Ok(batch
                        .requests
                        .iter()
                        .map(|r| ResolvedMetric::failed(r.id.clone(), error.clone()))
                        .collect());
                }
            },
            None => None,
        };
        let where_sql = filter_clause
            .as_ref()
            .map(|clause| format!(" WHERE {clause}"))
            .unwrap_or_default();

        let mut outcomes: Vec<Option<ResolvedMetric>> =
            (0..batch.requests.len()).map(|_| None).collect();

        // Fold every plain aggregate into one select list.
        let mut combined: Vec<(usize, &AggregateFunction, String)> = Vec::new();
        for (index, request) in batch.requests.iter().enumerate() {
            let ScanRequest::Aggregate(function) = &request.request else {
                continue;
            };
            if needs_window(function) {
                continue;
            }
            match aggregate_expr(&request.id, function) {
                Ok(expr) => combined.push((index, function, expr)),
                Err(e) => outcomes[index] = Some(failed_metric(&request.id, &e)),
            }
        }

        if !combined.is_empty() {
            let mut select_list = String::new();
            for (slot, (_, _, expr)) in combined.iter().enumerate() {
                if slot > 0 {
                    select_list.push_str(", ");
                }
                let _ = write!(select_list, "{expr} AS m{slot}");
            }
            let sql = format!("SELECT {select_list} FROM {table}{where_sql}");
            debug!(query = %sql, metrics = combined.len(), "executing combined aggregate query");
            match self.single_row(&sql).await {
                Ok(row) => {
                    for (slot, (index, function, _)) in combined.iter().enumerate() {
                        let id = &batch.requests[*index].id;
                        outcomes[*index] = Some(match extract_aggregate(&row, slot, function) {
                            Ok(value) => ResolvedMetric::ok(id.clone(), value),
                            Err(e) => failed_metric(id, &e),
                        });
                    }
                }
                Err(e) => {
                    // One malformed expression fails the whole combined
                    // statement. Retry each expression alone so unrelated
                    // metrics still resolve.
                    debug!(error = %e, "combined aggregate query failed; retrying each expression alone");
                    for (index, function, expr) in &combined {
                        let id = &batch.requests[*index].id;
                        let sql = format!("SELECT {expr} AS m0 FROM {table}{where_sql}");
                        let outcome = match self.single_row(&sql).await {
                            Ok(row) => match extract_aggregate(&row, 0, function) {
                                Ok(value) => ResolvedMetric::ok(id.clone(), value),
                                Err(err) => failed_metric(id, &err),
                            },
                            Err(err) => failed_metric(id, &err),
                        };
                        outcomes[*index] = Some(outcome);
                    }
                }
            }
        }

        // Uniqueness counts and samples run one statement each.
        for (index, request) in batch.requests.iter().enumerate() {
            if outcomes[index].is_some() {
                continue;
            }
            let resolved = match &request.request {
                ScanRequest::Aggregate(function) => {
                    self.windowed_count(&table, &where_sql, &request.id, function)
                        .await
                }
                ScanRequest::Sample(spec) => {
                    self.sample(
                        &table,
                        filter_clause.as_deref(),
                        &where_sql,
                        &request.id,
                        spec,
                    )
                    .await
                }
            };
            outcomes[index] = Some(match resolved {
                Ok(value) => ResolvedMetric::ok(request.id.clone(), value),
                Err(e) => failed_metric(&request.id, &e),
            });
        }

        let mut results = Vec::with_capacity(outcomes.len());
        for (outcome, request) in outcomes.into_iter().zip(&batch.requests) {
            results.push(outcome.unwrap_or_else(|| {
                failed_metric(
                    &request.id,
                    &AssayError::Internal("request fell through batch dispatch".to_string()),
                )
            }));
        }
        debug!(
            produced = results.len(),
            failed = results.iter().filter(|r| !r.is_ok()).count(),
            "resolved sql batch"
        );
        Ok(results)
    }
}

fn failed_metric(id: &MetricId, error: &AssayError) -> ResolvedMetric {
    ResolvedMetric::failed(
        id.clone(),
        MetricError::computation(SQL_BACKEND, error.to_string()),
    )
}

fn needs_window(function: &AggregateFunction) -> bool {
    matches!(function, AggregateFunction::MatchCount(predicate) if predicate.needs_domain_counts())
}

/// Validates and quotes one SQL identifier.
fn quote_ident(identifier: &str) -> Result<String> {
    static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("hard-coded identifier pattern is valid")
    });
    if identifier.is_empty() || identifier.len() > 128 {
        return Err(AssayError::backend(
            SQL_BACKEND,
            format!("'{identifier}' is not a usable SQL identifier"),
        ));
    }
    if !IDENTIFIER.is_match(identifier) {
        return Err(AssayError::backend(
            SQL_BACKEND,
            format!("identifier '{identifier}' contains characters outside [A-Za-z0-9_]"),
        ));
    }
    Ok(format!("\"{identifier}\""))
}

/// Quotes a possibly schema-qualified table name part by part.
fn quote_table(name: &str) -> Result<String> {
    let parts = name
        .split('.')
        .map(quote_ident)
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("."))
}

fn domain_columns(id: &MetricId) -> Result<Vec<String>> {
    id.domain.columns().into_iter().map(quote_ident).collect()
}

fn single_column(columns: &[String]) -> Result<&str> {
    match columns {
        [column] => Ok(column.as_str()),
        _ => Err(AssayError::backend(
            SQL_BACKEND,
            "this aggregate requires a single-column domain",
        )),
    }
}

fn pair_columns(columns: &[String]) -> Result<(&str, &str)> {
    match columns {
        [left, right] => Ok((left.as_str(), right.as_str())),
        _ => Err(AssayError::backend(
            SQL_BACKEND,
            "pair predicates require a column-pair domain",
        )),
    }
}

fn any_null_check(columns: &[String]) -> Result<String> {
    if columns.is_empty() {
        return Err(AssayError::backend(
            SQL_BACKEND,
            "null checks require a column domain",
        ));
    }
    Ok(columns
        .iter()
        .map(|c| format!("{c} IS NULL"))
        .collect::<Vec<_>>()
        .join(" OR "))
}

fn no_null_check(columns: &[String]) -> Result<String> {
    if columns.is_empty() {
        return Err(AssayError::backend(
            SQL_BACKEND,
            "null checks require a column domain",
        ));
    }
    Ok(columns
        .iter()
        .map(|c| format!("{c} IS NOT NULL"))
        .collect::<Vec<_>>()
        .join(" AND "))
}

/// Renders one aggregate as a select-list expression over the batch scope.
fn aggregate_expr(id: &MetricId, function: &AggregateFunction) -> Result<String> {
    let columns = domain_columns(id)?;
    match function {
        AggregateFunction::RowCount => Ok("COUNT(*)".to_string()),
        AggregateFunction::NullCount => {
            let clause = any_null_check(&columns)?;
            Ok(format!("COUNT(CASE WHEN {clause} THEN 1 END)"))
        }
        AggregateFunction::MatchCount(predicate) => {
            let clause = predicate_sql(predicate, &columns, None)?;
            Ok(format!("COUNT(CASE WHEN ({clause}) THEN 1 END)"))
        }
        AggregateFunction::Mean => Ok(format!("AVG({})", single_column(&columns)?)),
        AggregateFunction::Min => Ok(format!("MIN({})", single_column(&columns)?)),
        AggregateFunction::Max => Ok(format!("MAX({})", single_column(&columns)?)),
        AggregateFunction::DistinctCount => {
            Ok(format!("COUNT(DISTINCT {})", single_column(&columns)?))
        }
    }
}

/// Subquery exposing the base columns plus a per-group row count, used by
/// uniqueness predicates. The batch filter is applied inside so group sizes
/// only count kept rows.
fn windowed_source(table: &str, where_sql: &str, columns: &[String]) -> Result<String> {
    if columns.is_empty() {
        return Err(AssayError::backend(
            SQL_BACKEND,
            "uniqueness checks require a column domain",
        ));
    }
    Ok(format!(
        "(SELECT *, COUNT(*) OVER (PARTITION BY {}) AS {GROUP_SIZE} FROM {table}{where_sql}) AS windowed",
        columns.join(", ")
    ))
}

/// Renders a predicate as a boolean SQL expression over the given (already
/// quoted) domain columns.
///
/// `group_size` names the windowed per-group count when the caller evaluates
/// inside a windowed subquery; without it uniqueness predicates cannot be
/// rendered.
fn predicate_sql(
    predicate: &Predicate,
    columns: &[String],
    group_size: Option<&str>,
) -> Result<String> {
    match predicate {
        Predicate::IsNull => any_null_check(columns),
        Predicate::NotNull => no_null_check(columns),
        Predicate::InSet { values } => {
            let column = single_column(columns)?;
            if values.is_empty() {
                return Err(AssayError::backend(
                    SQL_BACKEND,
                    "membership sets cannot be empty",
                ));
            }
            let rendered = values
                .iter()
                .map(scalar_literal)
                .collect::<Result<Vec<_>>>()?;
            Ok(format!("{column} IN ({})", rendered.join(", ")))
        }
        Predicate::Between {
            min,
            max,
            strict_min,
            strict_max,
        } => {
            let column = single_column(columns)?;
            let mut parts = Vec::new();
            if let Some(min) = min {
                let op = if *strict_min { ">" } else { ">=" };
                parts.push(format!("{column} {op} {}", scalar_literal(min)?));
            }
            if let Some(max) = max {
                let op = if *strict_max { "<" } else { "<=" };
                parts.push(format!("{column} {op} {}", scalar_literal(max)?));
            }
            if parts.is_empty() {
                return Err(AssayError::backend(
                    SQL_BACKEND,
                    "a range predicate needs at least one bound",
                ));
            }
            Ok(parts.join(" AND "))
        }
        Predicate::MatchesRegex { pattern } => {
            let column = single_column(columns)?;
            Ok(format!("{column} ~ '{}'", escape_text(pattern)))
        }
        Predicate::Duplicated => match group_size {
            Some(group_size) => {
                // Window partitions put all nulls in one group; keep null
                // rows unknown instead of counting them as duplicates.
                let nulls = any_null_check(columns)?;
                Ok(format!(
                    "CASE WHEN {nulls} THEN CAST(NULL AS BOOLEAN) ELSE {group_size} > 1 END"
                ))
            }
            None => Err(AssayError::backend(
                SQL_BACKEND,
                "uniqueness predicates need a windowed scan",
            )),
        },
        Predicate::PairEqual => {
            let (left, right) = pair_columns(columns)?;
            Ok(format!("{left} = {right}"))
        }
        Predicate::PairGreaterThan { or_equal } => {
            let (left, right) = pair_columns(columns)?;
            let op = if *or_equal { ">=" } else { ">" };
            Ok(format!("{left} {op} {right}"))
        }
        Predicate::Not { inner } => {
            Ok(format!("NOT ({})", predicate_sql(inner, columns, group_size)?))
        }
    }
}

fn filter_sql(filter: &RowFilter) -> Result<String> {
    let column = quote_ident(&filter.column)?;
    predicate_sql(&filter.predicate, &[column], None)
}

fn escape_text(value: &str) -> String {
    value.replace('\'', "''")
}

fn scalar_literal(value: &Scalar) -> Result<String> {
    match value {
        Scalar::Null => Ok("NULL".to_string()),
        Scalar::Bool(v) => Ok(if *v { "TRUE" } else { "FALSE" }.to_string()),
        Scalar::Int(v) => Ok(v.to_string()),
        Scalar::Float(v) => {
            if v.is_finite() {
                Ok(format!("{v:?}"))
            } else {
                Err(AssayError::backend(
                    SQL_BACKEND,
                    "non-finite floats cannot be rendered as SQL literals",
                ))
            }
        }
        Scalar::Text(v) => Ok(format!("'{}'", escape_text(v))),
    }
}

macro_rules! typed_scalar {
    ($array:expr, $row:expr, $ty:ty, $into:expr) => {{
        let typed = $array.as_any().downcast_ref::<$ty>().ok_or_else(|| {
            AssayError::Internal("arrow array type did not match its declared data type".to_string())
        })?;
        $into(typed.value($row))
    }};
}

/// Converts one cell of query output into a [`Scalar`].
fn scalar_at(array: &dyn Array, row: usize) -> Result<Scalar> {
    use arrow::datatypes::DataType;

    if array.is_null(row) {
        return Ok(Scalar::Null);
    }
    let value = match array.data_type() {
        DataType::Int8 => typed_scalar!(array, row, Int8Array, |v| Scalar::Int(i64::from(v))),
        DataType::Int16 => typed_scalar!(array, row, Int16Array, |v| Scalar::Int(i64::from(v))),
        DataType::Int32 => typed_scalar!(array, row, Int32Array, |v| Scalar::Int(i64::from(v))),
        DataType::Int64 => typed_scalar!(array, row, Int64Array, Scalar::Int),
        DataType::UInt8 => typed_scalar!(array, row, UInt8Array, |v| Scalar::Int(i64::from(v))),
        DataType::UInt16 => typed_scalar!(array, row, UInt16Array, |v| Scalar::Int(i64::from(v))),
        DataType::UInt32 => typed_scalar!(array, row, UInt32Array, |v| Scalar::Int(i64::from(v))),
        DataType::UInt64 => typed_scalar!(array, row, UInt64Array, |v| Scalar::Float(v as f64)),
        DataType::Float32 => typed_scalar!(array, row, Float32Array, |v| Scalar::Float(f64::from(v))),
        DataType::Float64 => typed_scalar!(array, row, Float64Array, Scalar::Float),
        DataType::Boolean => typed_scalar!(array, row, BooleanArray, Scalar::Bool),
        DataType::Utf8 => typed_scalar!(array, row, StringArray, |v: &str| Scalar::Text(
            v.to_string()
        )),
        DataType::LargeUtf8 => typed_scalar!(array, row, LargeStringArray, |v: &str| Scalar::Text(
            v.to_string()
        )),
        other => {
            return Err(AssayError::NotSupported(format!(
                "column type {other} cannot be read back from query output"
            )))
        }
    };
    Ok(value)
}

fn extract_count(row: &RecordBatch, index: usize) -> Result<i64> {
    let counts = row
        .column(index)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| {
            AssayError::Internal("count expression did not produce an Int64 column".to_string())
        })?;
    Ok(counts.value(0))
}

fn extract_aggregate(
    row: &RecordBatch,
    index: usize,
    function: &AggregateFunction,
) -> Result<ResolvedValue> {
    match function {
        AggregateFunction::RowCount
        | AggregateFunction::NullCount
        | AggregateFunction::MatchCount(_)
        | AggregateFunction::DistinctCount => Ok(ResolvedValue::from(extract_count(row, index)?)),
        AggregateFunction::Mean | AggregateFunction::Min | AggregateFunction::Max => {
            let scalar = scalar_at(row.column(index).as_ref(), 0)?;
            Ok(ResolvedValue::Scalar(scalar.into()))
        }
    }
}

fn row_value(batch: &RecordBatch, row: usize) -> Result<Scalar> {
    if batch.num_columns() == 1 {
        return scalar_at(batch.column(0).as_ref(), row);
    }
    let mut parts = Vec::with_capacity(batch.num_columns());
    for column in batch.columns() {
        parts.push(scalar_at(column.as_ref(), row)?.to_string());
    }
    Ok(Scalar::Text(format!("({})", parts.join(", "))))
}

//! The in-memory backend adapter over Arrow record batches.
//!
//! This adapter evaluates everything in process. Columns the batch touches
//! are materialized once into typed [`Scalar`] vectors, each distinct
//! `(domain, predicate)` pair is evaluated into one three-valued mask, and
//! every aggregate and sample of the batch is served from those masks. Row
//! identifiers are zero-based positions, so row samples are always
//! available here.
//!
//! Predicate evaluation follows SQL comparison semantics: a value predicate
//! applied to a null cell is unknown, negation keeps unknown unknown, and
//! only definitely-true rows count as matches.

use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};

use arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, LargeStringArray, StringArray, UInt16Array, UInt32Array, UInt64Array, UInt8Array,
};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use crate::backend::{BackendAdapter, BackendKind, MetricBatch};
use crate::error::{AssayError, MetricError, Result};
use crate::metrics::condition::{Predicate, RowFilter};
use crate::metrics::id::{MetricDomain, MetricId, Scalar};
use crate::metrics::provider::{
    AggregateFunction, SampleSpec, SampleTarget, ScanRequest,
};
use crate::metrics::value::{MetricValue, ResolvedMetric, ResolvedValue, RowSample};

/// Backend adapter computing metrics from one Arrow [`RecordBatch`].
pub struct MemoryAdapter {
    batch: RecordBatch,
    name: String,
}

impl MemoryAdapter {
    /// Creates an adapter over the record batch, named `in_memory`.
    pub fn new(batch: RecordBatch) -> Self {
        Self {
            batch,
            name: "in_memory".to_string(),
        }
    }

    /// Sets the table name used in logs and run summaries.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of rows in the underlying batch.
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

#[async_trait]
impl BackendAdapter for MemoryAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn table_name(&self) -> &str {
        &self.name
    }

    fn supports_row_keys(&self) -> bool {
        true
    }

    #[instrument(skip(self, batch), fields(table = %self.name, batch.requests = batch.len()))]
    async fn execute_batch(&self, batch: &MetricBatch) -> Result<Vec<ResolvedMetric>> {
        use crate::metrics::value::ResolvedMetric;

        let mut eval = Evaluation::new(&self.batch);
        let keep = match &batch.filter {
            Some(filter) => match eval.filter_mask(filter) {
                Ok(mask) => Some(mask),
                // A broken filter poisons every request of the batch, but it
                // is a data-shape problem, not a transport failure.
                Err(e) => {
                    let error = MetricError::computation("memory", e.to_string());
                    return Ok(batch
                        .requests
                        .iter()
                        .map(|r| ResolvedMetric::failed(r.id.clone(), error.clone()))
                        .collect());
                }
            },
            None => None,
        };

        let mut results = Vec::with_capacity(batch.requests.len());
        for scan in &batch.requests {
            let outcome = resolve_request(&mut eval, keep.as_deref(), &scan.id, &scan.request);
            results.push(match outcome {
                Ok(value) => ResolvedMetric::ok(scan.id.clone(), value),
                Err(e) => ResolvedMetric::failed(
                    scan.id.clone(),
                    MetricError::computation("memory", e.to_string()),
                ),
            });
        }

        debug!(
            produced = results.len(),
            failed = results.iter().filter(|r| !r.is_ok()).count(),
            "resolved in-memory batch"
        );
        Ok(results)
    }
}

fn resolve_request(
    eval: &mut Evaluation<'_>,
    keep: Option<&[bool]>,
    id: &MetricId,
    request: &ScanRequest,
) -> Result<ResolvedValue> {
    match request {
        ScanRequest::Aggregate(function) => resolve_aggregate(eval, keep, id, function),
        ScanRequest::Sample(spec) => resolve_sample(eval, keep, id, spec),
    }
}

fn resolve_aggregate(
    eval: &mut Evaluation<'_>,
    keep: Option<&[bool]>,
    id: &MetricId,
    function: &AggregateFunction,
) -> Result<ResolvedValue> {
    match function {
        AggregateFunction::RowCount => {
            let count = match keep {
                Some(mask) => mask.iter().filter(|&&k| k).count(),
                None => eval.rows(),
            };
            Ok((count as i64).into())
        }
        AggregateFunction::NullCount => {
            let columns = eval.domain_columns(&id.domain)?;
            let count = (0..eval.rows())
                .filter(|&row| kept(keep, row) && columns.iter().any(|c| c[row].is_null()))
                .count();
            Ok((count as i64).into())
        }
        AggregateFunction::MatchCount(predicate) => {
            let mask = eval.predicate_mask(&id.domain, predicate, keep)?;
            let count = (0..eval.rows())
                .filter(|&row| kept(keep, row) && mask[row] == Some(true))
                .count();
            Ok((count as i64).into())
        }
        AggregateFunction::Mean => {
            let column = eval.single_column(&id.domain)?;
            let mut sum = 0.0;
            let mut count = 0usize;
            for (row, value) in column.iter().enumerate() {
                if !kept(keep, row) || value.is_null() {
                    continue;
                }
                let v = value.as_f64().ok_or_else(|| {
                    AssayError::NotSupported(format!(
                        "mean over non-numeric value in '{id}'"
                    ))
                })?;
                sum += v;
                count += 1;
            }
            if count == 0 {
                Ok(ResolvedValue::Scalar(MetricValue::Null))
            } else {
                Ok((sum / count as f64).into())
            }
        }
        AggregateFunction::Min => extreme(eval, keep, id, std::cmp::Ordering::Less),
        AggregateFunction::Max => extreme(eval, keep, id, std::cmp::Ordering::Greater),
        AggregateFunction::DistinctCount => {
            let column = eval.single_column(&id.domain)?;
            let mut seen: HashSet<&Scalar> = HashSet::new();
            for (row, value) in column.iter().enumerate() {
                if kept(keep, row) && !value.is_null() {
                    seen.insert(value);
                }
            }
            Ok((seen.len() as i64).into())
        }
    }
}

fn extreme(
    eval: &mut Evaluation<'_>,
    keep: Option<&[bool]>,
    id: &MetricId,
    wanted: std::cmp::Ordering,
) -> Result<ResolvedValue> {
    let column = eval.single_column(&id.domain)?;
    let mut best: Option<&Scalar> = None;
    for (row, value) in column.iter().enumerate() {
        if !kept(keep, row) || value.is_null() {
            continue;
        }
        best = Some(match best {
            None => value,
            Some(current) => {
                let ordering = compare_scalars(value, current).ok_or_else(|| {
                    AssayError::NotSupported(format!(
                        "mixed incomparable values in '{id}'"
                    ))
                })?;
                if ordering == wanted {
                    value
                } else {
                    current
                }
            }
        });
    }
    Ok(ResolvedValue::Scalar(
        best.cloned().map_or(MetricValue::Null, MetricValue::from),
    ))
}

fn resolve_sample(
    eval: &mut Evaluation<'_>,
    keep: Option<&[bool]>,
    id: &MetricId,
    spec: &SampleSpec,
) -> Result<ResolvedValue> {
    let mask = eval.predicate_mask(&id.domain, &spec.predicate, keep)?;
    let columns = eval.domain_columns(&id.domain)?;

    match spec.target {
        SampleTarget::Values => {
            let mut values = Vec::new();
            for row in 0..eval.rows() {
                if values.len() >= spec.limit {
                    break;
                }
                if kept(keep, row) && mask[row] == Some(true) {
                    values.push(domain_value(&columns, row));
                }
            }
            Ok(ResolvedValue::Values(values))
        }
        SampleTarget::RowKeys => {
            let mut rows = Vec::new();
            for row in 0..eval.rows() {
                if rows.len() >= spec.limit {
                    break;
                }
                if kept(keep, row) && mask[row] == Some(true) {
                    rows.push(RowSample::Position(row as u64));
                }
            }
            Ok(ResolvedValue::Rows(rows))
        }
    }
}

/// The sampled value of one row: the cell for single-column domains, a
/// rendered tuple for pair and multi-column domains.
fn domain_value(columns: &[Arc<Vec<Scalar>>], row: usize) -> Scalar {
    if columns.len() == 1 {
        columns[0][row].clone()
    } else {
        let parts: Vec<String> = columns.iter().map(|c| c[row].to_string()).collect();
        Scalar::Text(format!("({})", parts.join(", ")))
    }
}

fn kept(keep: Option<&[bool]>, row: usize) -> bool {
    keep.map_or(true, |mask| mask[row])
}

/// Per-batch working state: materialized columns and memoized masks.
struct Evaluation<'a> {
    batch: &'a RecordBatch,
    columns: HashMap<String, Arc<Vec<Scalar>>>,
    masks: HashMap<(MetricDomain, Predicate), Arc<Vec<Option<bool>>>>,
    regexes: HashMap<String, Regex>,
}

impl<'a> Evaluation<'a> {
    fn new(batch: &'a RecordBatch) -> Self {
        Self {
            batch,
            columns: HashMap::new(),
            masks: HashMap::new(),
            regexes: HashMap::new(),
        }
    }

    fn rows(&self) -> usize {
        self.batch.num_rows()
    }

    fn column(&mut self, name: &str) -> Result<Arc<Vec<Scalar>>> {
        if let Some(column) = self.columns.get(name) {
            return Ok(Arc::clone(column));
        }
        let index = self
            .batch
            .schema()
            .index_of(name)
            .map_err(|_| AssayError::ColumnNotFound {
                column: name.to_string(),
            })?;
        let values = Arc::new(materialize(self.batch.column(index).as_ref(), name)?);
        self.columns.insert(name.to_string(), Arc::clone(&values));
        Ok(values)
    }

    fn domain_columns(&mut self, domain: &MetricDomain) -> Result<Vec<Arc<Vec<Scalar>>>> {
        let names: Vec<String> = domain.columns().iter().map(|c| c.to_string()).collect();
        if names.is_empty() {
            return Err(AssayError::Internal(
                "a column-bearing domain is required here".to_string(),
            ));
        }
        names.iter().map(|name| self.column(name)).collect()
    }

    fn single_column(&mut self, domain: &MetricDomain) -> Result<Arc<Vec<Scalar>>> {
        let name = domain.column_name().ok_or_else(|| {
            AssayError::Internal("a single-column domain is required here".to_string())
        })?;
        self.column(name)
    }

    /// Rows definitely satisfying the filter. Unknown rows are excluded.
    fn filter_mask(&mut self, filter: &RowFilter) -> Result<Vec<bool>> {
        let column = self.column(&filter.column)?;
        let mut mask = Vec::with_capacity(column.len());
        for value in column.iter() {
            let verdict = eval_value_predicate(&filter.predicate, value, &mut self.regexes)?;
            mask.push(verdict == Some(true));
        }
        Ok(mask)
    }

    /// Three-valued mask of the predicate over the domain, memoized per
    /// `(domain, predicate)`. Uniqueness counting is restricted to kept rows.
    fn predicate_mask(
        &mut self,
        domain: &MetricDomain,
        predicate: &Predicate,
        keep: Option<&[bool]>,
    ) -> Result<Arc<Vec<Option<bool>>>> {
        let key = (domain.clone(), predicate.clone());
        if let Some(mask) = self.masks.get(&key) {
            return Ok(Arc::clone(mask));
        }

        let columns = self.domain_columns(domain)?;
        let duplicates = if predicate.needs_domain_counts() {
            Some(tuple_counts(&columns, keep, self.rows()))
        } else {
            None
        };

        let mut mask = Vec::with_capacity(self.rows());
        for row in 0..self.rows() {
            mask.push(eval_at(
                predicate,
                &columns,
                row,
                duplicates.as_ref(),
                &mut self.regexes,
            )?);
        }

        let mask = Arc::new(mask);
        self.masks.insert(key, Arc::clone(&mask));
        Ok(mask)
    }
}

/// Occurrences of each fully non-null domain tuple among kept rows.
fn tuple_counts(
    columns: &[Arc<Vec<Scalar>>],
    keep: Option<&[bool]>,
    rows: usize,
) -> HashMap<Vec<Scalar>, usize> {
    let mut counts: HashMap<Vec<Scalar>, usize> = HashMap::new();
    for row in 0..rows {
        if !kept(keep, row) {
            continue;
        }
        if columns.iter().any(|c| c[row].is_null()) {
            continue;
        }
        let key: Vec<Scalar> = columns.iter().map(|c| c[row].clone()).collect();
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

fn eval_at(
    predicate: &Predicate,
    columns: &[Arc<Vec<Scalar>>],
    row: usize,
    duplicates: Option<&HashMap<Vec<Scalar>, usize>>,
    regexes: &mut HashMap<String, Regex>,
) -> Result<Option<bool>> {
    match predicate {
        Predicate::Not { inner } => {
            Ok(eval_at(inner, columns, row, duplicates, regexes)?.map(|b| !b))
        }
        Predicate::IsNull => Ok(Some(columns.iter().any(|c| c[row].is_null()))),
        Predicate::NotNull => Ok(Some(!columns.iter().any(|c| c[row].is_null()))),
        Predicate::Duplicated => {
            if columns.iter().any(|c| c[row].is_null()) {
                return Ok(None);
            }
            let key: Vec<Scalar> = columns.iter().map(|c| c[row].clone()).collect();
            let count = duplicates
                .ok_or_else(|| {
                    AssayError::Internal("duplicate counts were not prepared".to_string())
                })?
                .get(&key)
                .copied()
                .unwrap_or(0);
            Ok(Some(count > 1))
        }
        Predicate::PairEqual | Predicate::PairGreaterThan { .. } => {
            if columns.len() != 2 {
                return Err(AssayError::Internal(
                    "pair predicates need a column-pair domain".to_string(),
                ));
            }
            let left = &columns[0][row];
            let right = &columns[1][row];
            if left.is_null() || right.is_null() {
                return Ok(None);
            }
            match predicate {
                Predicate::PairEqual => Ok(Some(scalar_eq(left, right))),
                Predicate::PairGreaterThan { or_equal } => {
                    let ordering = compare_scalars(left, right).ok_or_else(|| {
                        AssayError::NotSupported(format!(
                            "cannot order values {left} and {right}"
                        ))
                    })?;
                    Ok(Some(
                        ordering == std::cmp::Ordering::Greater
                            || (*or_equal && ordering == std::cmp::Ordering::Equal),
                    ))
                }
                _ => unreachable!(),
            }
        }
        value_predicate => {
            if columns.len() != 1 {
                return Err(AssayError::Internal(
                    "value predicates need a single-column domain".to_string(),
                ));
            }
            eval_value_predicate(value_predicate, &columns[0][row], regexes)
        }
    }
}

/// Evaluates a row-local value predicate against one cell.
fn eval_value_predicate(
    predicate: &Predicate,
    value: &Scalar,
    regexes: &mut HashMap<String, Regex>,
) -> Result<Option<bool>> {
    match predicate {
        Predicate::Not { inner } => Ok(eval_value_predicate(inner, value, regexes)?.map(|b| !b)),
        Predicate::IsNull => Ok(Some(value.is_null())),
        Predicate::NotNull => Ok(Some(!value.is_null())),
        Predicate::InSet { values } => {
            if value.is_null() {
                return Ok(None);
            }
            Ok(Some(values.iter().any(|v| scalar_eq(v, value))))
        }
        Predicate::Between {
            min,
            max,
            strict_min,
            strict_max,
        } => {
            if value.is_null() {
                return Ok(None);
            }
            let mut within = true;
            if let Some(lo) = min {
                let ordering = compare_scalars(value, lo).ok_or_else(|| {
                    AssayError::NotSupported(format!("cannot order value {value} against {lo}"))
                })?;
                within &= if *strict_min {
                    ordering == std::cmp::Ordering::Greater
                } else {
                    ordering != std::cmp::Ordering::Less
                };
            }
            if let Some(hi) = max {
                let ordering = compare_scalars(value, hi).ok_or_else(|| {
                    AssayError::NotSupported(format!("cannot order value {value} against {hi}"))
                })?;
                within &= if *strict_max {
                    ordering == std::cmp::Ordering::Less
                } else {
                    ordering != std::cmp::Ordering::Greater
                };
            }
            Ok(Some(within))
        }
        Predicate::MatchesRegex { pattern } => {
            if value.is_null() {
                return Ok(None);
            }
            let text = match value {
                Scalar::Text(s) => s,
                other => {
                    return Err(AssayError::NotSupported(format!(
                        "regex match over non-string value {other}"
                    )))
                }
            };
            if !regexes.contains_key(pattern) {
                let compiled = Regex::new(pattern).map_err(|e| {
                    AssayError::NotSupported(format!("invalid regex '{pattern}': {e}"))
                })?;
                regexes.insert(pattern.clone(), compiled);
            }
            let regex = &regexes[pattern];
            Ok(Some(regex.is_match(text)))
        }
        Predicate::Duplicated | Predicate::PairEqual | Predicate::PairGreaterThan { .. } => {
            Err(AssayError::Internal(
                "domain-level predicate used as a value predicate".to_string(),
            ))
        }
    }
}

/// Equality with numeric widening, so `1` equals `1.0` the way SQL says.
fn scalar_eq(a: &Scalar, b: &Scalar) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering with numeric widening. Returns `None` for incomparable kinds.
fn compare_scalars(a: &Scalar, b: &Scalar) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Scalar::Text(x), Scalar::Text(y)) => Some(x.cmp(y)),
        (Scalar::Bool(x), Scalar::Bool(y)) => Some(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

macro_rules! materialize_primitive {
    ($array:expr, $arrow_type:ty, $variant:ident, $cast:ty) => {{
        let typed = $array
            .as_any()
            .downcast_ref::<$arrow_type>()
            .ok_or_else(|| AssayError::Internal("array downcast mismatch".to_string()))?;
        (0..typed.len())
            .map(|i| {
                if typed.is_null(i) {
                    Scalar::Null
                } else {
                    Scalar::$variant(typed.value(i) as $cast)
                }
            })
            .collect()
    }};
}

/// Materializes an Arrow array into typed scalars, nulls included.
fn materialize(array: &dyn Array, column: &str) -> Result<Vec<Scalar>> {
    let values: Vec<Scalar> = match array.data_type() {
        DataType::Int8 => materialize_primitive!(array, Int8Array, Int, i64),
        DataType::Int16 => materialize_primitive!(array, Int16Array, Int, i64),
        DataType::Int32 => materialize_primitive!(array, Int32Array, Int, i64),
        DataType::Int64 => materialize_primitive!(array, Int64Array, Int, i64),
        DataType::UInt8 => materialize_primitive!(array, UInt8Array, Int, i64),
        DataType::UInt16 => materialize_primitive!(array, UInt16Array, Int, i64),
        DataType::UInt32 => materialize_primitive!(array, UInt32Array, Int, i64),
        DataType::UInt64 => materialize_primitive!(array, UInt64Array, Float, f64),
        DataType::Float32 => materialize_primitive!(array, Float32Array, Float, f64),
        DataType::Float64 => materialize_primitive!(array, Float64Array, Float, f64),
        DataType::Boolean => {
            let typed = array
                .as_any()
                .downcast_ref::<BooleanArray>()
                .ok_or_else(|| AssayError::Internal("array downcast mismatch".to_string()))?;
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        Scalar::Null
                    } else {
                        Scalar::Bool(typed.value(i))
                    }
                })
                .collect()
        }
        DataType::Utf8 => {
            let typed = array
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| AssayError::Internal("array downcast mismatch".to_string()))?;
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        Scalar::Null
                    } else {
                        Scalar::Text(typed.value(i).to_string())
                    }
                })
                .collect()
        }
        DataType::LargeUtf8 => {
            let typed = array
                .as_any()
                .downcast_ref::<LargeStringArray>()
                .ok_or_else(|| AssayError::Internal("array downcast mismatch".to_string()))?;
            (0..typed.len())
                .map(|i| {
                    if typed.is_null(i) {
                        Scalar::Null
                    } else {
                        Scalar::Text(typed.value(i).to_string())
                    }
                })
                .collect()
        }
        DataType::Null => vec![Scalar::Null; array.len()],
        other => {
            return Err(AssayError::NotSupported(format!(
                "column '{column}' has unsupported type {other}"
            )))
        }
    };
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{group_into_batches, ScanMetric};
    use crate::metrics::builtin::{names, params};
    use arrow::array::ArrayRef;
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc as StdArc;

    fn people_batch() -> RecordBatch {
        let schema = StdArc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("age", DataType::Int64, true),
            Field::new("status", DataType::Utf8, true),
            Field::new("low", DataType::Int64, true),
            Field::new("high", DataType::Int64, true),
        ]));
        let id: ArrayRef = StdArc::new(Int64Array::from(vec![1, 2, 3, 4, 5, 6]));
        let age: ArrayRef = StdArc::new(Int64Array::from(vec![
            Some(20),
            Some(35),
            None,
            Some(150),
            Some(40),
            None,
        ]));
        let status: ArrayRef = StdArc::new(StringArray::from(vec![
            Some("active"),
            Some("trial"),
            Some("active"),
            Some("unknown"),
            None,
            Some("active"),
        ]));
        let low: ArrayRef = StdArc::new(Int64Array::from(vec![
            Some(1),
            Some(5),
            Some(3),
            None,
            Some(9),
            Some(2),
        ]));
        let high: ArrayRef = StdArc::new(Int64Array::from(vec![
            Some(2),
            Some(5),
            Some(1),
            Some(7),
            None,
            Some(8),
        ]));
        RecordBatch::try_new(schema, vec![id, age, status, low, high]).unwrap()
    }

    fn aggregate(id: MetricId, function: AggregateFunction) -> ScanMetric {
        ScanMetric {
            id,
            request: ScanRequest::Aggregate(function),
        }
    }

    async fn run_single(adapter: &MemoryAdapter, scan: ScanMetric) -> ResolvedValue {
        let batches = group_into_batches(vec![scan]);
        let results = adapter.execute_batch(&batches[0]).await.unwrap();
        results.into_iter().next().unwrap().result.unwrap()
    }

    #[tokio::test]
    async fn test_row_count_and_null_count() {
        let adapter = MemoryAdapter::new(people_batch());

        let rows = run_single(
            &adapter,
            aggregate(
                MetricId::new(names::ROW_COUNT, MetricDomain::table()),
                AggregateFunction::RowCount,
            ),
        )
        .await;
        assert_eq!(rows.as_i64(), Some(6));

        let nulls = run_single(
            &adapter,
            aggregate(
                MetricId::new(names::NULL_COUNT, MetricDomain::column("age")),
                AggregateFunction::NullCount,
            ),
        )
        .await;
        assert_eq!(nulls.as_i64(), Some(2));
    }

    #[tokio::test]
    async fn test_filtered_row_count() {
        let adapter = MemoryAdapter::new(people_batch());
        let filter = RowFilter::new(
            "status",
            Predicate::InSet {
                values: vec![Scalar::from("active")],
            },
        );
        let count = run_single(
            &adapter,
            aggregate(
                MetricId::new(
                    names::ROW_COUNT,
                    MetricDomain::table().with_filter(filter),
                ),
                AggregateFunction::RowCount,
            ),
        )
        .await;
        // row 5's null status is unknown, not a match
        assert_eq!(count.as_i64(), Some(3));
    }

    #[tokio::test]
    async fn test_in_set_match_count_skips_nulls() {
        let adapter = MemoryAdapter::new(people_batch());
        let predicate = Predicate::InSet {
            values: vec![Scalar::from("active"), Scalar::from("trial")],
        }
        .negated();
        let count = run_single(
            &adapter,
            aggregate(
                MetricId::new(
                    names::unexpected_count(names::IN_SET),
                    MetricDomain::column("status"),
                ),
                AggregateFunction::MatchCount(predicate),
            ),
        )
        .await;
        // only "unknown"; the null row is neither expected nor unexpected
        assert_eq!(count.as_i64(), Some(1));
    }

    #[tokio::test]
    async fn test_between_bounds_are_inclusive_unless_strict() {
        let adapter = MemoryAdapter::new(people_batch());
        let outside = |strict_max| {
            Predicate::Between {
                min: Some(Scalar::Int(20)),
                max: Some(Scalar::Int(40)),
                strict_min: false,
                strict_max,
            }
            .negated()
        };

        let inclusive = run_single(
            &adapter,
            aggregate(
                MetricId::new(
                    names::unexpected_count(names::BETWEEN),
                    MetricDomain::column("age"),
                ),
                AggregateFunction::MatchCount(outside(false)),
            ),
        )
        .await;
        // ages 20, 35, 40 pass; 150 fails; nulls unknown
        assert_eq!(inclusive.as_i64(), Some(1));

        let strict = run_single(
            &adapter,
            aggregate(
                MetricId::new(
                    names::unexpected_count(names::BETWEEN),
                    MetricDomain::column("age"),
                )
                .with_param(params::STRICT_MAX, true),
                AggregateFunction::MatchCount(outside(true)),
            ),
        )
        .await;
        // 40 now falls outside too
        assert_eq!(strict.as_i64(), Some(2));
    }

    #[tokio::test]
    async fn test_duplicated_respects_filter() {
        let adapter = MemoryAdapter::new(people_batch());
        let unfiltered = run_single(
            &adapter,
            aggregate(
                MetricId::new(
                    names::unexpected_count(names::UNIQUE),
                    MetricDomain::column("status"),
                ),
                AggregateFunction::MatchCount(Predicate::Duplicated),
            ),
        )
        .await;
        // "active" appears three times
        assert_eq!(unfiltered.as_i64(), Some(3));

        let filter = RowFilter::new(
            "age",
            Predicate::Between {
                min: Some(Scalar::Int(0)),
                max: Some(Scalar::Int(100)),
                strict_min: false,
                strict_max: false,
            },
        );
        let filtered = run_single(
            &adapter,
            aggregate(
                MetricId::new(
                    names::unexpected_count(names::UNIQUE),
                    MetricDomain::column("status").with_filter(filter),
                ),
                AggregateFunction::MatchCount(Predicate::Duplicated),
            ),
        )
        .await;
        // within ages 20/35/40 the statuses are active/trial/null: no dupes
        assert_eq!(filtered.as_i64(), Some(0));
    }

    #[tokio::test]
    async fn test_pair_greater_than_skips_null_pairs() {
        let adapter = MemoryAdapter::new(people_batch());
        let count = run_single(
            &adapter,
            aggregate(
                MetricId::new(
                    names::unexpected_count(names::PAIR_A_GREATER_THAN_B),
                    MetricDomain::column_pair("low", "high"),
                ),
                AggregateFunction::MatchCount(
                    Predicate::PairGreaterThan { or_equal: true }.negated(),
                ),
            ),
        )
        .await;
        // (1,2) and (2,8) violate low >= high; (5,5) passes; null pairs skip
        assert_eq!(count.as_i64(), Some(2));
    }

    #[tokio::test]
    async fn test_samples_are_bounded_and_positional() {
        let adapter = MemoryAdapter::new(people_batch());
        let predicate = Predicate::Between {
            min: Some(Scalar::Int(0)),
            max: Some(Scalar::Int(100)),
            strict_min: false,
            strict_max: false,
        }
        .negated();

        let batches = group_into_batches(vec![
            ScanMetric {
                id: MetricId::new(
                    names::unexpected_values(names::BETWEEN),
                    MetricDomain::column("age"),
                ),
                request: ScanRequest::Sample(SampleSpec {
                    predicate: predicate.clone(),
                    limit: 20,
                    target: SampleTarget::Values,
                }),
            },
            ScanMetric {
                id: MetricId::new(
                    names::unexpected_rows(names::BETWEEN),
                    MetricDomain::column("age"),
                ),
                request: ScanRequest::Sample(SampleSpec {
                    predicate,
                    limit: 20,
                    target: SampleTarget::RowKeys,
                }),
            },
        ]);
        let results = adapter.execute_batch(&batches[0]).await.unwrap();

        let values = results[0].result.clone().unwrap();
        assert_eq!(values.as_values().unwrap(), &[Scalar::Int(150)]);

        let rows = results[1].result.clone().unwrap();
        assert_eq!(rows.as_rows().unwrap(), &[RowSample::Position(3)]);
    }

    #[tokio::test]
    async fn test_sample_limit_truncates() {
        let schema = StdArc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]));
        let values: ArrayRef = StdArc::new(Int64Array::from((0..100).collect::<Vec<i64>>()));
        let batch = RecordBatch::try_new(schema, vec![values]).unwrap();
        let adapter = MemoryAdapter::new(batch);

        let sample = run_single(
            &adapter,
            ScanMetric {
                id: MetricId::new(
                    names::unexpected_values(names::BETWEEN),
                    MetricDomain::column("v"),
                ),
                request: ScanRequest::Sample(SampleSpec {
                    predicate: Predicate::Between {
                        min: Some(Scalar::Int(1000)),
                        max: None,
                        strict_min: false,
                        strict_max: false,
                    }
                    .negated(),
                    limit: 7,
                    target: SampleTarget::Values,
                }),
            },
        )
        .await;
        assert_eq!(sample.as_values().unwrap().len(), 7);
        assert_eq!(sample.as_values().unwrap()[0], Scalar::Int(0));
    }

    #[tokio::test]
    async fn test_aggregate_statistics() {
        let adapter = MemoryAdapter::new(people_batch());

        let mean = run_single(
            &adapter,
            aggregate(
                MetricId::new(names::COLUMN_MEAN, MetricDomain::column("age")),
                AggregateFunction::Mean,
            ),
        )
        .await;
        assert_eq!(mean.as_f64(), Some((20.0 + 35.0 + 150.0 + 40.0) / 4.0));

        let min = run_single(
            &adapter,
            aggregate(
                MetricId::new(names::COLUMN_MIN, MetricDomain::column("age")),
                AggregateFunction::Min,
            ),
        )
        .await;
        assert_eq!(min.as_i64(), Some(20));

        let distinct = run_single(
            &adapter,
            aggregate(
                MetricId::new(names::COLUMN_DISTINCT_COUNT, MetricDomain::column("status")),
                AggregateFunction::DistinctCount,
            ),
        )
        .await;
        assert_eq!(distinct.as_i64(), Some(3));
    }

    #[tokio::test]
    async fn test_type_errors_fail_only_their_metric() {
        let adapter = MemoryAdapter::new(people_batch());
        let batches = group_into_batches(vec![
            aggregate(
                MetricId::new(
                    names::unexpected_count(names::MATCH_REGEX),
                    MetricDomain::column("age"),
                ),
                AggregateFunction::MatchCount(
                    Predicate::MatchesRegex {
                        pattern: "^a".to_string(),
                    }
                    .negated(),
                ),
            ),
            aggregate(
                MetricId::new(names::ROW_COUNT, MetricDomain::table()),
                AggregateFunction::RowCount,
            ),
        ]);

        let results = adapter.execute_batch(&batches[0]).await.unwrap();
        assert!(results[0].result.is_err());
        assert_eq!(results[1].result.clone().unwrap().as_i64(), Some(6));
    }

    #[tokio::test]
    async fn test_missing_column_fails_only_its_metric() {
        let adapter = MemoryAdapter::new(people_batch());
        let batches = group_into_batches(vec![aggregate(
            MetricId::new(names::NULL_COUNT, MetricDomain::column("missing")),
            AggregateFunction::NullCount,
        )]);
        let results = adapter.execute_batch(&batches[0]).await.unwrap();
        match &results[0].result {
            Err(MetricError::Computation { message, .. }) => {
                assert!(message.contains("missing"));
            }
            other => panic!("expected a computation failure, got {other:?}"),
        }
    }
}

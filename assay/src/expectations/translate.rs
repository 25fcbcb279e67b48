//! Lowering expectation specs to metric identities.
//!
//! Translation is pure configuration work: it consults no data and issues
//! no backend calls, so every rejection here surfaces before the first
//! round trip. A row-level expectation lowers to its condition family's
//! derived metrics (unexpected count, domain row count, null count, and
//! optional samples); an aggregate expectation lowers to one observed
//! metric plus the bounds it is judged against.
//!
//! Identities leave here in canonical form: boolean parameters are only
//! present when true and bounds only when given, so two specs describing
//! the same check translate to identical fingerprints and share every
//! cached metric between them.

use std::cmp::Ordering;

use regex::Regex;

use crate::error::{AssayError, Result};
use crate::expectations::{ExpectationSpec, PolicyKind};
use crate::metrics::builtin::{names, params, DEFAULT_SAMPLE_LIMIT};
use crate::metrics::id::{DomainKind, DomainScope, MetricId, ParamValue, Scalar};

/// Expectation type strings accepted by [`translate`].
pub mod types {
    /// No value of the column may be null.
    pub const VALUES_NOT_NULL: &str = "expect_column_values_to_not_be_null";
    /// Every value of the column belongs to a set.
    pub const VALUES_IN_SET: &str = "expect_column_values_to_be_in_set";
    /// No value of the column belongs to a set.
    pub const VALUES_NOT_IN_SET: &str = "expect_column_values_to_not_be_in_set";
    /// Every value of the column lies in a range.
    pub const VALUES_BETWEEN: &str = "expect_column_values_to_be_between";
    /// Every value of the column matches a regular expression.
    pub const VALUES_MATCH_REGEX: &str = "expect_column_values_to_match_regex";
    /// Every value of the column occurs exactly once.
    pub const VALUES_UNIQUE: &str = "expect_column_values_to_be_unique";
    /// Both columns of a pair hold equal values, row by row.
    pub const PAIR_VALUES_EQUAL: &str = "expect_column_pair_values_to_be_equal";
    /// The left column of a pair exceeds the right one, row by row.
    pub const PAIR_VALUES_A_GREATER_THAN_B: &str =
        "expect_column_pair_values_a_to_be_greater_than_b";
    /// Every tuple over a column list occurs exactly once.
    pub const COMPOUND_COLUMNS_UNIQUE: &str = "expect_compound_columns_to_be_unique";
    /// The (filtered) table's row count lies in a range.
    pub const ROW_COUNT_BETWEEN: &str = "expect_table_row_count_to_be_between";
    /// The column's mean lies in a range.
    pub const MEAN_BETWEEN: &str = "expect_column_mean_to_be_between";
    /// The column's minimum lies in a range.
    pub const MIN_BETWEEN: &str = "expect_column_min_to_be_between";
    /// The column's maximum lies in a range.
    pub const MAX_BETWEEN: &str = "expect_column_max_to_be_between";
    /// The column's distinct non-null value count lies in a range.
    pub const UNIQUE_VALUE_COUNT_BETWEEN: &str =
        "expect_column_unique_value_count_to_be_between";
}

/// Backend facts the translator needs before any adapter exists at run
/// time.
#[derive(Debug, Clone)]
pub struct TranslationContext {
    /// Cap on sampled unexpected values and row keys. Zero disables
    /// sampling entirely.
    pub sample_limit: usize,
    /// Whether the backend can name violating rows.
    pub supports_row_keys: bool,
}

impl Default for TranslationContext {
    fn default() -> Self {
        Self {
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            supports_row_keys: false,
        }
    }
}

/// Metrics deciding a row-level expectation.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPlan {
    /// Count of rows definitely violating the condition.
    pub unexpected_count: MetricId,
    /// Row count of the (filtered) domain.
    pub element_count: MetricId,
    /// Count of rows whose domain value is null.
    pub null_count: MetricId,
    /// Sample of violating values, absent when sampling is disabled.
    pub values_sample: Option<MetricId>,
    /// Sample of violating row keys, absent when the backend cannot name
    /// rows or sampling is disabled.
    pub rows_sample: Option<MetricId>,
}

/// Metric and bounds deciding an aggregate expectation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePlan {
    /// The observed aggregate.
    pub observed: MetricId,
    /// Lower bound, open side when absent.
    pub min: Option<Scalar>,
    /// Upper bound, open side when absent.
    pub max: Option<Scalar>,
    /// Excludes the lower boundary itself.
    pub strict_min: bool,
    /// Excludes the upper boundary itself.
    pub strict_max: bool,
}

/// Shape of the metric work behind one expectation.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanKind {
    /// Row-level counting check.
    Map(MapPlan),
    /// Single observed aggregate against bounds.
    Aggregate(AggregatePlan),
}

/// A translated expectation: the spec (normalized where translation has
/// to adjust policy) plus the metric identities that decide it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectationPlan {
    /// The originating spec.
    pub spec: ExpectationSpec,
    /// The metrics behind it.
    pub kind: PlanKind,
}

impl ExpectationPlan {
    /// Every metric identity the validator must resolve for this plan.
    pub fn roots(&self) -> Vec<MetricId> {
        match &self.kind {
            PlanKind::Map(map) => {
                let mut roots = vec![
                    map.unexpected_count.clone(),
                    map.element_count.clone(),
                    map.null_count.clone(),
                ];
                roots.extend(map.values_sample.clone());
                roots.extend(map.rows_sample.clone());
                roots
            }
            PlanKind::Aggregate(aggregate) => vec![aggregate.observed.clone()],
        }
    }
}

/// Lowers a spec to the metrics that decide it.
///
/// Rejects unknown expectation types, domains of the wrong shape, missing
/// or malformed arguments, and `mostly` thresholds outside `(0, 1]`, all
/// before any backend work is scheduled.
pub fn translate(spec: &ExpectationSpec, ctx: &TranslationContext) -> Result<ExpectationPlan> {
    validate_policy(spec)?;
    validate_filter(spec)?;

    match spec.expectation.as_str() {
        types::VALUES_NOT_NULL => {
            require_domain(spec, DomainKind::Column)?;
            let mut plan = map_plan(spec, ctx, names::NONNULL, Vec::new());
            // Nulls are the thing being counted here, never excluded.
            plan.spec.policy.ignore_nulls = false;
            Ok(plan)
        }
        types::VALUES_IN_SET => {
            require_domain(spec, DomainKind::Column)?;
            let values = membership_set(spec)?;
            Ok(map_plan(
                spec,
                ctx,
                names::IN_SET,
                vec![(params::VALUE_SET, values.into())],
            ))
        }
        types::VALUES_NOT_IN_SET => {
            require_domain(spec, DomainKind::Column)?;
            let values = membership_set(spec)?;
            Ok(map_plan(
                spec,
                ctx,
                names::NOT_IN_SET,
                vec![(params::VALUE_SET, values.into())],
            ))
        }
        types::VALUES_BETWEEN => {
            require_domain(spec, DomainKind::Column)?;
            let (min, max) = range_bounds(spec)?;
            let mut range_params: Vec<(&str, ParamValue)> = Vec::new();
            if let Some(min) = min {
                range_params.push((params::MIN, min.into()));
            }
            if let Some(max) = max {
                range_params.push((params::MAX, max.into()));
            }
            if spec.args.strict_min {
                range_params.push((params::STRICT_MIN, true.into()));
            }
            if spec.args.strict_max {
                range_params.push((params::STRICT_MAX, true.into()));
            }
            Ok(map_plan(spec, ctx, names::BETWEEN, range_params))
        }
        types::VALUES_MATCH_REGEX => {
            require_domain(spec, DomainKind::Column)?;
            let pattern = regex_pattern(spec)?;
            Ok(map_plan(
                spec,
                ctx,
                names::MATCH_REGEX,
                vec![(params::PATTERN, pattern.into())],
            ))
        }
        types::VALUES_UNIQUE => {
            require_domain(spec, DomainKind::Column)?;
            Ok(map_plan(spec, ctx, names::UNIQUE, Vec::new()))
        }
        types::PAIR_VALUES_EQUAL => {
            require_domain(spec, DomainKind::ColumnPair)?;
            Ok(map_plan(spec, ctx, names::PAIR_EQUAL, Vec::new()))
        }
        types::PAIR_VALUES_A_GREATER_THAN_B => {
            require_domain(spec, DomainKind::ColumnPair)?;
            let mut pair_params: Vec<(&str, ParamValue)> = Vec::new();
            if spec.args.or_equal {
                pair_params.push((params::OR_EQUAL, true.into()));
            }
            Ok(map_plan(
                spec,
                ctx,
                names::PAIR_A_GREATER_THAN_B,
                pair_params,
            ))
        }
        types::COMPOUND_COLUMNS_UNIQUE => {
            require_domain(spec, DomainKind::MultiColumn)?;
            Ok(map_plan(spec, ctx, names::COMPOUND_UNIQUE, Vec::new()))
        }
        types::ROW_COUNT_BETWEEN => {
            require_domain(spec, DomainKind::Table)?;
            aggregate_plan(spec, names::ROW_COUNT)
        }
        types::MEAN_BETWEEN => {
            require_domain(spec, DomainKind::Column)?;
            aggregate_plan(spec, names::COLUMN_MEAN)
        }
        types::MIN_BETWEEN => {
            require_domain(spec, DomainKind::Column)?;
            aggregate_plan(spec, names::COLUMN_MIN)
        }
        types::MAX_BETWEEN => {
            require_domain(spec, DomainKind::Column)?;
            aggregate_plan(spec, names::COLUMN_MAX)
        }
        types::UNIQUE_VALUE_COUNT_BETWEEN => {
            require_domain(spec, DomainKind::Column)?;
            aggregate_plan(spec, names::COLUMN_DISTINCT_COUNT)
        }
        other => Err(AssayError::unknown_expectation(other)),
    }
}

fn map_plan(
    spec: &ExpectationSpec,
    ctx: &TranslationContext,
    family: &str,
    condition_params: Vec<(&str, ParamValue)>,
) -> ExpectationPlan {
    let mut condition = MetricId::new(names::condition(family), spec.domain.clone());
    for (key, value) in condition_params {
        condition = condition.with_param(key, value);
    }

    let unexpected_count = condition.renamed(names::unexpected_count(family));
    let values_sample = (ctx.sample_limit > 0).then(|| {
        condition
            .renamed(names::unexpected_values(family))
            .with_param(params::SAMPLE_LIMIT, ctx.sample_limit as i64)
    });
    let rows_sample = (ctx.sample_limit > 0 && ctx.supports_row_keys).then(|| {
        condition
            .renamed(names::unexpected_rows(family))
            .with_param(params::SAMPLE_LIMIT, ctx.sample_limit as i64)
    });

    // The domain row count keeps the filter but drops the columns, so every
    // expectation over the same filtered table shares one row count metric.
    let element_count = MetricId::new(names::ROW_COUNT, spec.domain.rescope(DomainScope::Table));
    let null_count = MetricId::new(names::NULL_COUNT, spec.domain.clone());

    ExpectationPlan {
        spec: spec.clone(),
        kind: PlanKind::Map(MapPlan {
            unexpected_count,
            element_count,
            null_count,
            values_sample,
            rows_sample,
        }),
    }
}

fn aggregate_plan(spec: &ExpectationSpec, metric: &str) -> Result<ExpectationPlan> {
    if let PolicyKind::Mostly(_) = spec.policy.kind {
        return Err(invalid(
            spec,
            "mostly applies to row-level expectations only",
        ));
    }
    let (min, max) = range_bounds(spec)?;
    Ok(ExpectationPlan {
        spec: spec.clone(),
        kind: PlanKind::Aggregate(AggregatePlan {
            observed: MetricId::new(metric, spec.domain.clone()),
            min,
            max,
            strict_min: spec.args.strict_min,
            strict_max: spec.args.strict_max,
        }),
    })
}

fn invalid(spec: &ExpectationSpec, message: impl Into<String>) -> AssayError {
    AssayError::invalid_expectation(&spec.expectation, message)
}

fn validate_policy(spec: &ExpectationSpec) -> Result<()> {
    if let PolicyKind::Mostly(threshold) = spec.policy.kind {
        if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
            return Err(invalid(
                spec,
                format!("mostly must lie in (0, 1], got {threshold}"),
            ));
        }
    }
    Ok(())
}

fn validate_filter(spec: &ExpectationSpec) -> Result<()> {
    if let Some(filter) = &spec.domain.filter {
        if !filter.predicate.usable_as_filter() {
            return Err(invalid(
                spec,
                format!("'{filter}' cannot filter rows; filters must be row-local single-column predicates"),
            ));
        }
    }
    Ok(())
}

fn require_domain(spec: &ExpectationSpec, kind: DomainKind) -> Result<()> {
    if spec.domain.kind() == kind {
        return Ok(());
    }
    Err(invalid(
        spec,
        format!("needs a {} domain", describe(kind)),
    ))
}

fn describe(kind: DomainKind) -> &'static str {
    match kind {
        DomainKind::Table => "table",
        DomainKind::Column => "single-column",
        DomainKind::ColumnPair => "column-pair",
        DomainKind::MultiColumn => "multi-column",
    }
}

fn membership_set(spec: &ExpectationSpec) -> Result<Vec<Scalar>> {
    let values = spec
        .args
        .value_set
        .clone()
        .ok_or_else(|| invalid(spec, "value_set is required"))?;
    if values.is_empty() {
        return Err(invalid(spec, "value_set must not be empty"));
    }
    for value in &values {
        match value {
            Scalar::Null => {
                return Err(invalid(
                    spec,
                    "value_set must not contain null; nullness is checked with expect_column_values_to_not_be_null",
                ))
            }
            Scalar::Float(v) if v.is_nan() => {
                return Err(invalid(spec, "value_set must not contain NaN"))
            }
            _ => {}
        }
    }
    Ok(values)
}

fn regex_pattern(spec: &ExpectationSpec) -> Result<String> {
    let pattern = spec
        .args
        .pattern
        .clone()
        .ok_or_else(|| invalid(spec, "pattern is required"))?;
    Regex::new(&pattern)
        .map_err(|e| invalid(spec, format!("pattern does not compile: {e}")))?;
    Ok(pattern)
}

fn range_bounds(spec: &ExpectationSpec) -> Result<(Option<Scalar>, Option<Scalar>)> {
    let min = spec.args.min_value.clone();
    let max = spec.args.max_value.clone();
    if min.is_none() && max.is_none() {
        return Err(invalid(
            spec,
            "at least one of min_value and max_value is required",
        ));
    }
    for bound in [min.as_ref(), max.as_ref()].into_iter().flatten() {
        match bound {
            Scalar::Null => return Err(invalid(spec, "range bounds must not be null")),
            Scalar::Bool(_) => {
                return Err(invalid(spec, "range bounds must be numeric or text"))
            }
            Scalar::Float(v) if v.is_nan() => {
                return Err(invalid(spec, "range bounds must not be NaN"))
            }
            _ => {}
        }
    }
    if let (Some(lo), Some(hi)) = (&min, &max) {
        match compare_bounds(lo, hi) {
            Some(Ordering::Greater) => {
                return Err(invalid(spec, "min_value must not exceed max_value"))
            }
            Some(_) => {}
            None => {
                return Err(invalid(
                    spec,
                    "min_value and max_value must be mutually comparable",
                ))
            }
        }
    }
    Ok((min, max))
}

fn compare_bounds(lo: &Scalar, hi: &Scalar) -> Option<Ordering> {
    match (lo.as_f64(), hi.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (lo, hi) {
            (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

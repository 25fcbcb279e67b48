//! The built-in metric catalog.
//!
//! Three provider shapes cover the whole catalog:
//!
//! - [`AggregateProvider`]: dependency-free metrics that reduce the domain
//!   with one aggregate function (row count, null count, mean, min, max,
//!   distinct count).
//! - [`ConditionProvider`]: builds the unexpected-row [`Predicate`] for one
//!   condition family from the identity's params. Resolves without a round
//!   trip, so every derived metric of the family shares one cached
//!   condition.
//! - [`DerivedProvider`]: the generic `unexpected_count` /
//!   `unexpected_values` / `unexpected_rows` implementation. It finds its
//!   condition dependency by rewriting its own name suffix, so one provider
//!   instance serves every family.
//!
//! Names follow the `<family>.<part>` convention, e.g.
//! `column_values.in_set.unexpected_count`.

use std::sync::Arc;

use crate::error::{AssayError, Result};
use crate::metrics::condition::Predicate;
use crate::metrics::id::{MetricId, ParamValue, Scalar};
use crate::metrics::provider::{
    AggregateFunction, DependencyValues, MetricPlan, MetricProvider, SampleSpec, SampleTarget,
    ScanRequest,
};
use crate::metrics::registry::ProviderRegistry;
use crate::metrics::value::ResolvedValue;

/// Default cap on unexpected-value and unexpected-row samples.
pub const DEFAULT_SAMPLE_LIMIT: usize = 20;

/// Identity param keys used by the built-in catalog.
pub mod params {
    /// Membership set for the `in_set` / `not_in_set` families.
    pub const VALUE_SET: &str = "value_set";
    /// Lower bound for the `between` family.
    pub const MIN: &str = "min";
    /// Upper bound for the `between` family.
    pub const MAX: &str = "max";
    /// Excludes the lower boundary itself.
    pub const STRICT_MIN: &str = "strict_min";
    /// Excludes the upper boundary itself.
    pub const STRICT_MAX: &str = "strict_max";
    /// Regular expression for the `match_regex` family.
    pub const PATTERN: &str = "pattern";
    /// Treats equality as satisfying the pair comparison.
    pub const OR_EQUAL: &str = "or_equal";
    /// Sample cap for `unexpected_values` / `unexpected_rows` metrics.
    pub const SAMPLE_LIMIT: &str = "limit";
}

/// Metric and family name constants used by the built-in catalog and the
/// expectation translator.
pub mod names {
    /// Row count of the (filtered) domain table.
    pub const ROW_COUNT: &str = "table.row_count";
    /// Count of rows where any domain column is null.
    pub const NULL_COUNT: &str = "column_values.null.count";
    /// Mean of a column.
    pub const COLUMN_MEAN: &str = "column.mean";
    /// Minimum of a column.
    pub const COLUMN_MIN: &str = "column.min";
    /// Maximum of a column.
    pub const COLUMN_MAX: &str = "column.max";
    /// Distinct non-null value count of a column.
    pub const COLUMN_DISTINCT_COUNT: &str = "column.distinct_count";

    /// Condition family: value must not be null.
    pub const NONNULL: &str = "column_values.nonnull";
    /// Condition family: value must be in a set.
    pub const IN_SET: &str = "column_values.in_set";
    /// Condition family: value must not be in a set.
    pub const NOT_IN_SET: &str = "column_values.not_in_set";
    /// Condition family: value must lie in a range.
    pub const BETWEEN: &str = "column_values.between";
    /// Condition family: value must match a regex.
    pub const MATCH_REGEX: &str = "column_values.match_regex";
    /// Condition family: value must be unique in its column.
    pub const UNIQUE: &str = "column_values.unique";
    /// Condition family: pair columns must be equal.
    pub const PAIR_EQUAL: &str = "column_pair_values.equal";
    /// Condition family: left pair column must exceed the right.
    pub const PAIR_A_GREATER_THAN_B: &str = "column_pair_values.a_greater_than_b";
    /// Condition family: column tuples must be unique.
    pub const COMPOUND_UNIQUE: &str = "compound_columns.unique";

    /// `<family>.condition`
    pub fn condition(family: &str) -> String {
        format!("{family}.condition")
    }

    /// `<family>.unexpected_count`
    pub fn unexpected_count(family: &str) -> String {
        format!("{family}.unexpected_count")
    }

    /// `<family>.unexpected_values`
    pub fn unexpected_values(family: &str) -> String {
        format!("{family}.unexpected_values")
    }

    /// `<family>.unexpected_rows`
    pub fn unexpected_rows(family: &str) -> String {
        format!("{family}.unexpected_rows")
    }
}

fn missing_param(id: &MetricId, key: &str) -> AssayError {
    AssayError::Internal(format!("metric '{id}' is missing required param '{key}'"))
}

fn list_param(id: &MetricId, key: &str) -> Result<Vec<Scalar>> {
    match id.params.get(key) {
        Some(ParamValue::List(values)) => Ok(values.clone()),
        Some(ParamValue::Scalar(value)) => Ok(vec![value.clone()]),
        None => Err(missing_param(id, key)),
    }
}

fn opt_scalar_param(id: &MetricId, key: &str) -> Option<Scalar> {
    match id.params.get(key) {
        Some(ParamValue::Scalar(value)) => Some(value.clone()),
        _ => None,
    }
}

fn text_param(id: &MetricId, key: &str) -> Result<String> {
    match opt_scalar_param(id, key) {
        Some(Scalar::Text(value)) => Ok(value),
        _ => Err(missing_param(id, key)),
    }
}

fn bool_param(id: &MetricId, key: &str, default: bool) -> bool {
    match opt_scalar_param(id, key) {
        Some(Scalar::Bool(value)) => value,
        _ => default,
    }
}

fn limit_param(id: &MetricId) -> usize {
    match opt_scalar_param(id, params::SAMPLE_LIMIT) {
        Some(Scalar::Int(value)) if value >= 0 => value as usize,
        _ => DEFAULT_SAMPLE_LIMIT,
    }
}

/// Dependency-free provider that reduces the domain with one aggregate.
pub struct AggregateProvider {
    function: AggregateFunction,
}

impl AggregateProvider {
    /// Creates a shared provider for the given aggregate function.
    pub fn shared(function: AggregateFunction) -> Arc<Self> {
        Arc::new(Self { function })
    }

    fn check_domain(&self, id: &MetricId) -> Result<()> {
        match self.function {
            AggregateFunction::RowCount => Ok(()),
            AggregateFunction::NullCount => {
                if id.domain.columns().is_empty() {
                    Err(AssayError::Internal(format!(
                        "metric '{id}' needs a column-bearing domain"
                    )))
                } else {
                    Ok(())
                }
            }
            _ => {
                if id.domain.column_name().is_none() {
                    Err(AssayError::Internal(format!(
                        "metric '{id}' needs a single-column domain"
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl MetricProvider for AggregateProvider {
    fn dependencies(&self, _id: &MetricId) -> Result<Vec<MetricId>> {
        Ok(Vec::new())
    }

    fn plan(&self, id: &MetricId, _deps: &DependencyValues<'_>) -> Result<MetricPlan> {
        self.check_domain(id)?;
        Ok(MetricPlan::Scan(ScanRequest::Aggregate(
            self.function.clone(),
        )))
    }
}

/// Builds one condition family's unexpected-row predicate from the identity.
pub struct ConditionProvider {
    build: fn(&MetricId) -> Result<Predicate>,
}

impl ConditionProvider {
    fn shared(build: fn(&MetricId) -> Result<Predicate>) -> Arc<Self> {
        Arc::new(Self { build })
    }
}

impl MetricProvider for ConditionProvider {
    fn dependencies(&self, _id: &MetricId) -> Result<Vec<MetricId>> {
        Ok(Vec::new())
    }

    fn plan(&self, id: &MetricId, _deps: &DependencyValues<'_>) -> Result<MetricPlan> {
        let predicate = (self.build)(id)?;
        Ok(MetricPlan::Ready(ResolvedValue::Condition(predicate)))
    }
}

fn build_nonnull(_id: &MetricId) -> Result<Predicate> {
    Ok(Predicate::IsNull)
}

fn build_in_set(id: &MetricId) -> Result<Predicate> {
    let values = list_param(id, params::VALUE_SET)?;
    Ok(Predicate::InSet { values }.negated())
}

fn build_not_in_set(id: &MetricId) -> Result<Predicate> {
    let values = list_param(id, params::VALUE_SET)?;
    Ok(Predicate::InSet { values })
}

fn build_between(id: &MetricId) -> Result<Predicate> {
    let min = opt_scalar_param(id, params::MIN);
    let max = opt_scalar_param(id, params::MAX);
    if min.is_none() && max.is_none() {
        return Err(AssayError::Internal(format!(
            "metric '{id}' needs at least one of '{}' or '{}'",
            params::MIN,
            params::MAX
        )));
    }
    Ok(Predicate::Between {
        min,
        max,
        strict_min: bool_param(id, params::STRICT_MIN, false),
        strict_max: bool_param(id, params::STRICT_MAX, false),
    }
    .negated())
}

fn build_match_regex(id: &MetricId) -> Result<Predicate> {
    let pattern = text_param(id, params::PATTERN)?;
    regex::Regex::new(&pattern)
        .map_err(|e| AssayError::Internal(format!("metric '{id}' has an invalid pattern: {e}")))?;
    Ok(Predicate::MatchesRegex { pattern }.negated())
}

fn build_unique(_id: &MetricId) -> Result<Predicate> {
    Ok(Predicate::Duplicated)
}

fn build_pair_equal(_id: &MetricId) -> Result<Predicate> {
    Ok(Predicate::PairEqual.negated())
}

fn build_pair_a_greater_than_b(id: &MetricId) -> Result<Predicate> {
    let or_equal = bool_param(id, params::OR_EQUAL, false);
    Ok(Predicate::PairGreaterThan { or_equal }.negated())
}

/// Which derived metric of a condition family a [`DerivedProvider`] serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DerivedKind {
    UnexpectedCount,
    UnexpectedValues,
    UnexpectedRows,
}

/// Generic provider for `unexpected_count`, `unexpected_values`, and
/// `unexpected_rows` metrics of every condition family.
pub struct DerivedProvider {
    kind: DerivedKind,
}

impl DerivedProvider {
    fn shared(kind: DerivedKind) -> Arc<Self> {
        Arc::new(Self { kind })
    }

    /// The sibling condition identity: same family, domain, and params,
    /// minus the sample cap, which must not fragment condition sharing.
    fn condition_sibling(id: &MetricId) -> Result<MetricId> {
        let (family, _part) = id.name.rsplit_once('.').ok_or_else(|| {
            AssayError::Internal(format!("metric '{id}' has no family prefix to derive from"))
        })?;
        let mut sibling = id.renamed(names::condition(family));
        sibling.params.remove(params::SAMPLE_LIMIT);
        Ok(sibling)
    }
}

impl MetricProvider for DerivedProvider {
    fn dependencies(&self, id: &MetricId) -> Result<Vec<MetricId>> {
        Ok(vec![Self::condition_sibling(id)?])
    }

    fn plan(&self, id: &MetricId, deps: &DependencyValues<'_>) -> Result<MetricPlan> {
        let sibling = Self::condition_sibling(id)?;
        let predicate = deps.condition(&sibling)?.clone();
        let request = match self.kind {
            DerivedKind::UnexpectedCount => {
                ScanRequest::Aggregate(AggregateFunction::MatchCount(predicate))
            }
            DerivedKind::UnexpectedValues => ScanRequest::Sample(SampleSpec {
                predicate,
                limit: limit_param(id),
                target: SampleTarget::Values,
            }),
            DerivedKind::UnexpectedRows => ScanRequest::Sample(SampleSpec {
                predicate,
                limit: limit_param(id),
                target: SampleTarget::RowKeys,
            }),
        };
        Ok(MetricPlan::Scan(request))
    }
}

/// Registers the whole built-in catalog for every backend kind.
pub fn register_defaults(registry: &mut ProviderRegistry) {
    registry.register_for_all(
        names::ROW_COUNT,
        AggregateProvider::shared(AggregateFunction::RowCount),
    );
    registry.register_for_all(
        names::NULL_COUNT,
        AggregateProvider::shared(AggregateFunction::NullCount),
    );
    registry.register_for_all(
        names::COLUMN_MEAN,
        AggregateProvider::shared(AggregateFunction::Mean),
    );
    registry.register_for_all(
        names::COLUMN_MIN,
        AggregateProvider::shared(AggregateFunction::Min),
    );
    registry.register_for_all(
        names::COLUMN_MAX,
        AggregateProvider::shared(AggregateFunction::Max),
    );
    registry.register_for_all(
        names::COLUMN_DISTINCT_COUNT,
        AggregateProvider::shared(AggregateFunction::DistinctCount),
    );

    let families: &[(&str, fn(&MetricId) -> Result<Predicate>)] = &[
        (names::NONNULL, build_nonnull),
        (names::IN_SET, build_in_set),
        (names::NOT_IN_SET, build_not_in_set),
        (names::BETWEEN, build_between),
        (names::MATCH_REGEX, build_match_regex),
        (names::UNIQUE, build_unique),
        (names::PAIR_EQUAL, build_pair_equal),
        (names::PAIR_A_GREATER_THAN_B, build_pair_a_greater_than_b),
        (names::COMPOUND_UNIQUE, build_unique),
    ];
    for (family, build) in families {
        registry.register_for_all(names::condition(family), ConditionProvider::shared(*build));
        registry.register_for_all(
            names::unexpected_count(family),
            DerivedProvider::shared(DerivedKind::UnexpectedCount),
        );
        registry.register_for_all(
            names::unexpected_values(family),
            DerivedProvider::shared(DerivedKind::UnexpectedValues),
        );
        registry.register_for_all(
            names::unexpected_rows(family),
            DerivedProvider::shared(DerivedKind::UnexpectedRows),
        );
    }
}

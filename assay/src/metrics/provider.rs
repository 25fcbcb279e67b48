//! The metric provider contract.
//!
//! A provider is the unit of metric capability. It answers exactly two
//! questions about an identity: which other metrics it needs first
//! ([`MetricProvider::dependencies`]), and how to produce it once those are
//! resolved ([`MetricProvider::plan`]). A plan either finishes the metric on
//! the spot from dependency values ([`MetricPlan::Ready`]) or asks the
//! backend for data ([`MetricPlan::Scan`]); scan requests from one
//! dependency layer are folded into shared round trips by the executor.
//!
//! Providers are synchronous and pure. All I/O lives behind the backend
//! adapter, which is the only async seam in the engine.

use std::collections::HashMap;

use crate::error::{AssayError, Result};
use crate::metrics::condition::Predicate;
use crate::metrics::id::MetricId;
use crate::metrics::value::ResolvedValue;

/// Aggregate functions a backend can fold into a shared scan.
///
/// Every variant reduces the metric's (filtered) domain to one scalar. The
/// adapter owns the translation: SQL renders these as select-list
/// expressions of one combined query, the in-memory backend computes them
/// from Arrow arrays in one pass.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateFunction {
    /// Number of rows in the domain.
    RowCount,
    /// Number of rows where any domain column is null.
    NullCount,
    /// Number of rows definitely matching the predicate.
    MatchCount(Predicate),
    /// Arithmetic mean of the domain column.
    Mean,
    /// Minimum of the domain column.
    Min,
    /// Maximum of the domain column.
    Max,
    /// Number of distinct non-null values of the domain column.
    DistinctCount,
}

/// What a sample request collects from each matching row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleTarget {
    /// The domain value itself.
    Values,
    /// A row identifier (position or key column value).
    RowKeys,
}

/// A bounded sample over rows definitely matching a predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSpec {
    /// Rows matching this predicate are sampled.
    pub predicate: Predicate,
    /// Maximum number of entries collected.
    pub limit: usize,
    /// What to collect per row.
    pub target: SampleTarget,
}

/// A backend-neutral data request for one metric.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanRequest {
    /// Reduce the domain to one scalar.
    Aggregate(AggregateFunction),
    /// Collect a bounded sample of matching rows.
    Sample(SampleSpec),
}

/// How to produce a metric once its dependencies are resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricPlan {
    /// The metric is a pure function of its dependencies; no round trip.
    Ready(ResolvedValue),
    /// The metric needs backend data.
    Scan(ScanRequest),
}

/// Resolved dependency values handed to [`MetricProvider::plan`].
///
/// Holds exactly the identities the provider declared. A miss or a type
/// mismatch is an engine invariant violation, reported as
/// [`AssayError::Internal`].
pub struct DependencyValues<'a> {
    values: HashMap<&'a MetricId, &'a ResolvedValue>,
}

impl<'a> DependencyValues<'a> {
    /// Builds the view from (identity, value) pairs.
    pub fn new(pairs: impl IntoIterator<Item = (&'a MetricId, &'a ResolvedValue)>) -> Self {
        Self {
            values: pairs.into_iter().collect(),
        }
    }

    /// An empty view, for providers without dependencies.
    pub fn empty() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Looks up a dependency value.
    pub fn get(&self, id: &MetricId) -> Result<&ResolvedValue> {
        self.values.get(id).copied().ok_or_else(|| {
            AssayError::Internal(format!("dependency '{id}' was not resolved before planning"))
        })
    }

    /// Looks up a dependency that must be a condition metric.
    pub fn condition(&self, id: &MetricId) -> Result<&Predicate> {
        self.get(id)?.as_condition().ok_or_else(|| {
            AssayError::Internal(format!("dependency '{id}' is not a condition metric"))
        })
    }

    /// Looks up a dependency that must be an integral scalar.
    pub fn long(&self, id: &MetricId) -> Result<i64> {
        self.get(id)?.as_i64().ok_or_else(|| {
            AssayError::Internal(format!("dependency '{id}' is not an integer metric"))
        })
    }
}

/// The capability to resolve one family of metric identities.
pub trait MetricProvider: Send + Sync {
    /// Identities that must be resolved before this metric can be planned.
    ///
    /// Called during graph expansion, before any backend work. Returned
    /// identities are expanded recursively; a cycle through them is a
    /// configuration error.
    fn dependencies(&self, id: &MetricId) -> Result<Vec<MetricId>>;

    /// Produces the plan for `id` given its resolved dependencies.
    ///
    /// An `Err` here is recorded as the metric's failure; dependents see a
    /// dependency failure instead of recomputing.
    fn plan(&self, id: &MetricId, deps: &DependencyValues<'_>) -> Result<MetricPlan>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::id::MetricDomain;

    #[test]
    fn test_dependency_values_miss_is_internal() {
        let deps = DependencyValues::empty();
        let id = MetricId::new("table.row_count", MetricDomain::table());
        let err = deps.get(&id).unwrap_err();
        assert!(matches!(err, AssayError::Internal(_)));
    }

    #[test]
    fn test_dependency_values_type_checks() {
        let id = MetricId::new(
            "column_values.nonnull.condition",
            MetricDomain::column("age"),
        );
        let value = ResolvedValue::Condition(Predicate::IsNull);
        let deps = DependencyValues::new([(&id, &value)]);

        assert_eq!(deps.condition(&id).unwrap(), &Predicate::IsNull);
        assert!(deps.long(&id).is_err());
    }
}

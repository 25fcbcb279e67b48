//! Declarative expectations over tabular data.
//!
//! An [`ExpectationSpec`] names a check in domain language ("values of
//! `age` fall between 0 and 120"), not in metric language. The
//! [`translate`] module lowers a spec to the metric identities that decide
//! it, the validator resolves those metrics through the dependency graph,
//! and the [`evaluate`] module folds the resolved values into an
//! [`ExpectationOutcome`].
//!
//! Success policy is part of the spec, not the metric: the same unexpected
//! count feeds both an exact check and a `mostly` threshold, so switching
//! policy never recomputes anything.

use serde::{Deserialize, Serialize};

use crate::error::MetricError;
use crate::metrics::condition::RowFilter;
use crate::metrics::id::{MetricDomain, Scalar};
use crate::metrics::value::{MetricValue, RowSample};

pub mod evaluate;
pub mod translate;

pub use evaluate::evaluate;
pub use translate::{translate, ExpectationPlan, TranslationContext};

/// Named arguments an expectation accepts.
///
/// Which fields apply depends on the expectation type; the translator
/// rejects specs whose required arguments are absent and ignores the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectationArgs {
    /// Membership set for the `in_set` / `not_in_set` expectations.
    pub value_set: Option<Vec<Scalar>>,
    /// Lower bound for range expectations. `None` leaves the side open.
    pub min_value: Option<Scalar>,
    /// Upper bound for range expectations. `None` leaves the side open.
    pub max_value: Option<Scalar>,
    /// Excludes the lower boundary itself.
    pub strict_min: bool,
    /// Excludes the upper boundary itself.
    pub strict_max: bool,
    /// Regular expression for `match_regex`.
    pub pattern: Option<String>,
    /// Treats equal pair values as satisfying `a_greater_than_b`.
    pub or_equal: bool,
}

/// How row-level unexpected counts decide success.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "threshold", rename_all = "snake_case")]
pub enum PolicyKind {
    /// Every evaluated row must be expected.
    Exact,
    /// At least the given fraction of evaluated rows must be expected.
    /// Boundary inclusive: a fraction exactly at the threshold passes.
    Mostly(f64),
}

/// Success policy for a row-level expectation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuccessPolicy {
    /// Exact or thresholded counting.
    pub kind: PolicyKind,
    /// Whether null rows are excluded from the denominator. The
    /// `not_be_null` expectation forces this off, since nulls are exactly
    /// what it counts.
    pub ignore_nulls: bool,
}

impl Default for SuccessPolicy {
    fn default() -> Self {
        Self {
            kind: PolicyKind::Exact,
            ignore_nulls: true,
        }
    }
}

/// A single declarative check against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationSpec {
    /// Expectation type, e.g. `expect_column_values_to_be_between`.
    pub expectation: String,
    /// Columns (and optional row filter) the check reads.
    pub domain: MetricDomain,
    /// Type-specific arguments.
    #[serde(default)]
    pub args: ExpectationArgs,
    /// How unexpected rows decide success.
    #[serde(default)]
    pub policy: SuccessPolicy,
    /// Opaque caller metadata, echoed unchanged into the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl ExpectationSpec {
    /// Creates a spec with default arguments and an exact policy.
    pub fn new(expectation: impl Into<String>, domain: MetricDomain) -> Self {
        Self {
            expectation: expectation.into(),
            domain,
            args: ExpectationArgs::default(),
            policy: SuccessPolicy::default(),
            meta: None,
        }
    }

    /// Replaces the argument block.
    pub fn with_args(mut self, args: ExpectationArgs) -> Self {
        self.args = args;
        self
    }

    /// Switches the policy to a `mostly` threshold.
    pub fn with_mostly(mut self, threshold: f64) -> Self {
        self.policy.kind = PolicyKind::Mostly(threshold);
        self
    }

    /// Restricts the domain to rows matching the filter.
    pub fn with_row_filter(mut self, filter: RowFilter) -> Self {
        self.domain = self.domain.clone().with_filter(filter);
        self
    }

    /// Attaches caller metadata.
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// The evaluated result of one expectation.
///
/// Row-level expectations fill the counting fields; aggregate expectations
/// fill `observed_value` and leave the counts absent. Absent fields are
/// omitted from serialized output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationResult {
    /// Expectation type this result answers.
    pub expectation: String,
    /// Domain the check ran over.
    pub domain: MetricDomain,
    /// Whether the expectation held.
    pub success: bool,
    /// Observed aggregate value, for aggregate expectations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_value: Option<MetricValue>,
    /// Rows in the (filtered) domain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_count: Option<i64>,
    /// Rows whose domain value was null.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_count: Option<i64>,
    /// `missing_count` as a percentage of `element_count`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_percent: Option<f64>,
    /// Rows that violated the expectation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unexpected_count: Option<i64>,
    /// `unexpected_count` as a percentage of the policy denominator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unexpected_percent: Option<f64>,
    /// Sample of violating values, capped at the configured limit.
    /// `unexpected_count` still reports the uncapped total.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unexpected_list: Option<Vec<Scalar>>,
    /// Sample of violating row keys, when the backend can name rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unexpected_index_list: Option<Vec<RowSample>>,
    /// Caller metadata from the spec, passed through unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// One metric that failed while deciding an expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFailure {
    /// Display form of the failed metric identity.
    pub metric: String,
    /// Why it failed.
    pub error: MetricError,
}

/// An expectation that could not be evaluated because a metric it needs
/// failed to resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationFailure {
    /// Expectation type that went unanswered.
    pub expectation: String,
    /// Domain the check would have run over.
    pub domain: MetricDomain,
    /// Every failed metric the expectation depended on.
    pub errors: Vec<MetricFailure>,
}

/// Terminal state of one expectation after a validation run.
///
/// `Failed` is an error state, not a third verdict: the expectation was
/// neither satisfied nor violated, it went unanswered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExpectationOutcome {
    /// The expectation was decided, successfully or not.
    Evaluated(ExpectationResult),
    /// A required metric failed; no verdict exists.
    Failed(ExpectationFailure),
}

impl ExpectationOutcome {
    /// The evaluated result, if a verdict exists.
    pub fn result(&self) -> Option<&ExpectationResult> {
        match self {
            Self::Evaluated(result) => Some(result),
            Self::Failed(_) => None,
        }
    }

    /// Whether the expectation was decided and held.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Evaluated(result) if result.success)
    }

    /// Whether the expectation went unanswered.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::condition::Predicate;

    #[test]
    fn test_spec_builders_compose() {
        let spec = ExpectationSpec::new(
            "expect_column_values_to_be_between",
            MetricDomain::column("age"),
        )
        .with_args(ExpectationArgs {
            min_value: Some(Scalar::Int(0)),
            max_value: Some(Scalar::Int(120)),
            ..Default::default()
        })
        .with_mostly(0.95)
        .with_row_filter(RowFilter::new("status", Predicate::NotNull))
        .with_meta(serde_json::json!({"owner": "data-eng"}));

        assert_eq!(spec.policy.kind, PolicyKind::Mostly(0.95));
        assert!(spec.policy.ignore_nulls);
        assert!(spec.domain.filter.is_some());
        assert_eq!(spec.args.min_value, Some(Scalar::Int(0)));
    }

    #[test]
    fn test_default_policy_is_exact_ignoring_nulls() {
        let policy = SuccessPolicy::default();
        assert_eq!(policy.kind, PolicyKind::Exact);
        assert!(policy.ignore_nulls);
    }

    #[test]
    fn test_outcome_accessors() {
        let result = ExpectationResult {
            expectation: "expect_column_values_to_not_be_null".into(),
            domain: MetricDomain::column("id"),
            success: true,
            observed_value: None,
            element_count: Some(10),
            missing_count: Some(0),
            missing_percent: Some(0.0),
            unexpected_count: Some(0),
            unexpected_percent: Some(0.0),
            unexpected_list: None,
            unexpected_index_list: None,
            meta: None,
        };
        let outcome = ExpectationOutcome::Evaluated(result);
        assert!(outcome.is_success());
        assert!(!outcome.is_failed());
        assert_eq!(outcome.result().map(|r| r.element_count), Some(Some(10)));

        let failed = ExpectationOutcome::Failed(ExpectationFailure {
            expectation: "expect_column_values_to_not_be_null".into(),
            domain: MetricDomain::column("id"),
            errors: vec![MetricFailure {
                metric: "column_values.nonnull.unexpected_count over column id".into(),
                error: MetricError::aborted("backend went away"),
            }],
        });
        assert!(!failed.is_success());
        assert!(failed.is_failed());
        assert!(failed.result().is_none());
    }

    #[test]
    fn test_spec_round_trips_through_serde() {
        let spec = ExpectationSpec::new(
            "expect_column_values_to_be_in_set",
            MetricDomain::column("status"),
        )
        .with_args(ExpectationArgs {
            value_set: Some(vec![Scalar::from("active"), Scalar::from("trial")]),
            ..Default::default()
        });

        let encoded = serde_json::to_string(&spec).unwrap();
        let decoded: ExpectationSpec = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, spec);
    }

    #[test]
    fn test_result_serialization_omits_absent_fields() {
        let result = ExpectationResult {
            expectation: "expect_column_mean_to_be_between".into(),
            domain: MetricDomain::column("age"),
            success: true,
            observed_value: Some(MetricValue::Double(41.5)),
            element_count: None,
            missing_count: None,
            missing_percent: None,
            unexpected_count: None,
            unexpected_percent: None,
            unexpected_list: None,
            unexpected_index_list: None,
            meta: None,
        };
        let encoded = serde_json::to_value(&result).unwrap();
        assert!(encoded.get("observed_value").is_some());
        assert!(encoded.get("unexpected_count").is_none());
        assert!(encoded.get("element_count").is_none());
    }
}

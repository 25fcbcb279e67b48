//! Error types for the assay expectation engine.
//!
//! Two layers of failure exist and must not be conflated. `AssayError` is the
//! process-level error: configuration problems (unknown expectation types,
//! unsupported metrics, dependency cycles), broken engine invariants, and
//! transport failures talking to a backend. `MetricError` is the per-metric
//! failure recorded inside the run cache: it is cheap to clone because a
//! failed metric's error is replayed to every dependent metric instead of
//! recomputing anything.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for the assay engine.
#[derive(Error, Debug)]
pub enum AssayError {
    /// The expectation type string is not in the translation table.
    #[error("Unknown expectation type '{expectation}'")]
    UnknownExpectation {
        /// The unrecognized expectation type name
        expectation: String,
    },

    /// An expectation's arguments failed validation before any backend work.
    #[error("Invalid expectation '{expectation}': {message}")]
    InvalidExpectation {
        /// Expectation type name
        expectation: String,
        /// What was wrong with the arguments
        message: String,
    },

    /// No provider is registered for a metric on the requested backend.
    #[error("Metric '{metric}' is not supported on the {backend} backend")]
    UnsupportedMetric {
        /// Metric name that failed lookup
        metric: String,
        /// Backend the lookup was scoped to
        backend: String,
    },

    /// Dependency expansion re-entered a metric already on the current path.
    #[error("Cyclic metric dependency: {}", path.join(" -> "))]
    CyclicDependency {
        /// The cycle, starting and ending at the repeated metric
        path: Vec<String>,
    },

    /// A metric was re-inserted into the run cache with a different result.
    #[error("Resolution cache conflict for metric '{metric}'")]
    CacheConsistency {
        /// Metric identity rendering
        metric: String,
    },

    /// A backend round trip failed as a whole, before per-metric results
    /// could be produced. Scheduling of further layers stops.
    #[error("Backend error on {backend}: {message}")]
    Backend {
        /// Backend kind that failed
        backend: String,
        /// Detailed error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error when a required column is not found in the dataset.
    #[error("Column '{column}' not found in dataset")]
    ColumnNotFound { column: String },

    /// Error when an operation is not supported.
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, AssayError>`.
///
/// This is the standard `Result` type used throughout the assay engine.
///
/// # Examples
///
/// ```rust,ignore
/// use assay::error::Result;
///
/// fn resolve_metrics() -> Result<()> {
///     // resolution logic here
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, AssayError>;

impl AssayError {
    /// Creates an unknown-expectation error.
    pub fn unknown_expectation(expectation: impl Into<String>) -> Self {
        Self::UnknownExpectation {
            expectation: expectation.into(),
        }
    }

    /// Creates an invalid-expectation error.
    pub fn invalid_expectation(expectation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExpectation {
            expectation: expectation.into(),
            message: message.into(),
        }
    }

    /// Creates an unsupported-metric error.
    pub fn unsupported_metric(metric: impl Into<String>, backend: impl Into<String>) -> Self {
        Self::UnsupportedMetric {
            metric: metric.into(),
            backend: backend.into(),
        }
    }

    /// Creates a backend transport error.
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a backend transport error wrapping an underlying error.
    pub fn backend_with_source(
        backend: impl Into<String>,
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
            source: Some(source),
        }
    }
}

/// A per-metric failure stored in the run cache.
///
/// Unlike [`AssayError`], this type is `Clone` and serializable: it travels
/// inside [`ResolvedMetric`](crate::metrics::ResolvedMetric) entries, gets
/// replayed to dependents as a [`MetricError::DependencyFailed`] cause, and
/// ends up verbatim in failed expectation outcomes.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricError {
    /// The backend computed this batch but could not produce this metric.
    #[error("Computation failed on {backend} backend: {message}")]
    Computation {
        /// Backend kind
        backend: String,
        /// Detailed error message
        message: String,
    },

    /// A metric this one depends on failed; this metric was never computed.
    #[error("Dependency '{dependency}' failed: {cause}")]
    DependencyFailed {
        /// Identity rendering of the failed dependency
        dependency: String,
        /// The dependency's own failure
        cause: Box<MetricError>,
    },

    /// The run stopped before this metric's layer was scheduled.
    #[error("Resolution aborted before this metric was computed: {message}")]
    Aborted {
        /// The transport failure that stopped the run
        message: String,
    },
}

impl MetricError {
    /// Creates a computation error for the given backend.
    pub fn computation(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Computation {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Wraps a dependency's failure for replay on a dependent metric.
    pub fn dependency_failed(dependency: impl Into<String>, cause: MetricError) -> Self {
        Self::DependencyFailed {
            dependency: dependency.into(),
            cause: Box::new(cause),
        }
    }

    /// Marks a metric whose layer was never scheduled.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Walks the `DependencyFailed` chain down to the original failure.
    pub fn root_cause(&self) -> &MetricError {
        match self {
            Self::DependencyFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_expectation_message() {
        let err = AssayError::unknown_expectation("expect_column_to_levitate");
        assert_eq!(
            err.to_string(),
            "Unknown expectation type 'expect_column_to_levitate'"
        );
    }

    #[test]
    fn test_cyclic_dependency_message() {
        let err = AssayError::CyclicDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Cyclic metric dependency: a -> b -> a");
    }

    #[test]
    fn test_unsupported_metric_message() {
        let err = AssayError::unsupported_metric("column.median", "sql");
        assert_eq!(
            err.to_string(),
            "Metric 'column.median' is not supported on the sql backend"
        );
    }

    #[test]
    fn test_dependency_failed_root_cause() {
        let base = MetricError::computation("sql", "division by zero");
        let mid = MetricError::dependency_failed("column_values.in_set.unexpected_count", base.clone());
        let top = MetricError::dependency_failed("column_values.in_set.unexpected_values", mid);
        assert_eq!(top.root_cause(), &base);
        assert!(top.to_string().contains("division by zero"));
    }

    #[test]
    fn test_metric_error_serializes_with_kind_tag() {
        let err = MetricError::computation("memory", "type mismatch");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "computation");
        assert_eq!(json["backend"], "memory");
    }
}

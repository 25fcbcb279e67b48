//! Prelude for commonly used types and traits in assay.

pub use crate::backend::{BackendAdapter, BackendKind, MemoryAdapter, SqlAdapter};
pub use crate::error::{AssayError, MetricError, Result};
pub use crate::expectations::translate::types;
pub use crate::expectations::{
    ExpectationArgs, ExpectationOutcome, ExpectationResult, ExpectationSpec, PolicyKind,
    SuccessPolicy,
};
pub use crate::logging::LoggingConfig;
pub use crate::metrics::{MetricDomain, MetricId, MetricValue, Predicate, RowFilter, Scalar};
pub use crate::telemetry::{RunSink, RunSummary};
pub use crate::validator::{ValidationOptions, Validator};

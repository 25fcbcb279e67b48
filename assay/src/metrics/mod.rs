//! Metric identity, values, conditions, and the provider layer.
//!
//! This module defines what a metric *is* in assay. A metric is identified
//! structurally by name, domain, and value parameters ([`MetricId`]);
//! resolves to a value, a condition, or a bounded sample ([`ResolvedValue`]);
//! and is produced by a [`MetricProvider`] registered per backend kind in the
//! [`ProviderRegistry`].
//!
//! ## Condition families
//!
//! Value-level checks share one structure: a cheap *condition* metric
//! resolves to the backend-neutral predicate flagging unexpected rows, and
//! derived metrics (`unexpected_count`, `unexpected_values`,
//! `unexpected_rows`) consume it. Because the condition is an ordinary cached
//! metric, every expectation over the same domain and parameters shares it,
//! and every derived metric of one family rides the same backend round trip.
//!
//! ## Example
//!
//! ```rust,ignore
//! use assay::metrics::{builtin::names, MetricDomain, MetricId, Scalar};
//!
//! let count = MetricId::new(
//!     names::unexpected_count(names::IN_SET),
//!     MetricDomain::column("status"),
//! )
//! .with_param("value_set", vec![Scalar::from("active"), Scalar::from("trial")]);
//! ```

pub mod builtin;
pub mod condition;
pub mod id;
pub mod provider;
pub mod registry;
pub mod value;

pub use condition::{Predicate, RowFilter};
pub use id::{DomainKind, DomainScope, MetricDomain, MetricId, MetricParams, ParamValue, Scalar};
pub use provider::{
    AggregateFunction, DependencyValues, MetricPlan, MetricProvider, SampleSpec, SampleTarget,
    ScanRequest,
};
pub use registry::ProviderRegistry;
pub use value::{MetricValue, ResolvedMetric, ResolvedValue, RowSample};

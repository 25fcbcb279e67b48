//! Backend adapters: where scan requests meet actual data.
//!
//! The engine never talks to data directly. Providers emit backend-neutral
//! [`ScanRequest`]s; the executor folds one dependency layer's requests into
//! [`MetricBatch`]es grouped by row filter; and a [`BackendAdapter`] turns
//! each batch into resolved metrics in one logical round trip. The SQL
//! adapter renders a batch's aggregates as a single combined `SELECT`; the
//! in-memory adapter serves everything from one pass over Arrow arrays.
//!
//! The error split matters: `execute_batch` returning `Err` is a transport
//! failure and stops the run's remaining layers, while a metric the backend
//! could not produce comes back as a failed [`ResolvedMetric`] and poisons
//! only its own dependents.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::metrics::condition::RowFilter;
use crate::metrics::id::MetricId;
use crate::metrics::provider::ScanRequest;
use crate::metrics::value::ResolvedMetric;

pub use memory::MemoryAdapter;
pub use sql::SqlAdapter;

/// The backend families providers can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Arrow record batches evaluated in process.
    Memory,
    /// DataFusion SQL execution.
    Sql,
}

impl BackendKind {
    /// Every backend kind, for registering a provider across all of them.
    pub const ALL: [BackendKind; 2] = [BackendKind::Memory, BackendKind::Sql];
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Sql => write!(f, "sql"),
        }
    }
}

/// One metric's scan request, paired with its identity.
///
/// The identity carries the domain (columns and filter) the adapter needs to
/// translate the request.
#[derive(Debug, Clone)]
pub struct ScanMetric {
    /// The metric the request resolves.
    pub id: MetricId,
    /// What to compute.
    pub request: ScanRequest,
}

/// A group of scan requests sharing one row filter, executed in one logical
/// round trip.
#[derive(Debug, Clone)]
pub struct MetricBatch {
    /// The row filter shared by every request's domain. `None` means the
    /// unfiltered table.
    pub filter: Option<RowFilter>,
    /// The requests of this batch.
    pub requests: Vec<ScanMetric>,
}

impl MetricBatch {
    /// Number of requests in the batch.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the batch has no requests.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Groups one layer's scan requests into batches by row filter.
///
/// Requests over the same filtered view of the table can share a scan;
/// differing filters change the row set and must not be mixed. Groups keep
/// first-seen order, and requests keep their order within a group, so the
/// batching is deterministic for a deterministic input order.
pub fn group_into_batches(requests: Vec<ScanMetric>) -> Vec<MetricBatch> {
    let mut batches: Vec<MetricBatch> = Vec::new();
    for request in requests {
        let filter = request.id.domain.filter.clone();
        match batches.iter_mut().find(|batch| batch.filter == filter) {
            Some(batch) => batch.requests.push(request),
            None => batches.push(MetricBatch {
                filter,
                requests: vec![request],
            }),
        }
    }
    batches
}

/// A connection to one tabular data reference.
///
/// Implementations execute all requests of a batch together and return one
/// [`ResolvedMetric`] per request, in any order. Batches arrive serially per
/// adapter; an adapter is one logical connection.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// The backend kind, used for provider registry lookups.
    fn kind(&self) -> BackendKind;

    /// Name of the data reference, for logs and run summaries.
    fn table_name(&self) -> &str;

    /// Whether the adapter can identify sampled rows. Adapters without row
    /// identity still serve value samples; row-sample metrics are simply not
    /// requested from them.
    fn supports_row_keys(&self) -> bool;

    /// Executes every request of the batch in one logical round trip.
    ///
    /// # Errors
    ///
    /// `Err` means the round trip itself failed (connection, query
    /// planning); the executor stops scheduling further layers. A metric
    /// the backend reached but could not produce must instead come back as
    /// a failed [`ResolvedMetric`].
    async fn execute_batch(&self, batch: &MetricBatch) -> Result<Vec<ResolvedMetric>>;
}

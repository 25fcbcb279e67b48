//! The run-scoped metric resolution cache.
//!
//! Every validation run owns exactly one [`ResolutionCache`]. The executor
//! consults it before planning a metric, which is what turns "many
//! expectations over the same data" into at-most-once computation per
//! identity. Entries are immutable once written: a second `put` with an
//! equal result is an accepted no-op (two code paths may race to record the
//! same fact), while a conflicting re-insert is a broken engine invariant
//! and fails the run.
//!
//! Failed computations occupy cache slots exactly like successful ones, so
//! dependents discover the failure instead of retrying it.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{AssayError, MetricError, Result};
use crate::metrics::id::MetricId;
use crate::metrics::value::{ResolvedMetric, ResolvedValue};

/// Run-scoped store mapping metric identities to their resolution outcome.
#[derive(Default)]
pub struct ResolutionCache {
    entries: RwLock<HashMap<MetricId, std::result::Result<ResolvedValue, MetricError>>>,
}

impl ResolutionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached outcome for an identity, if present.
    pub fn get(&self, id: &MetricId) -> Option<std::result::Result<ResolvedValue, MetricError>> {
        self.read_entries().get(id).cloned()
    }

    /// Whether an outcome is cached for the identity.
    pub fn contains(&self, id: &MetricId) -> bool {
        self.read_entries().contains_key(id)
    }

    /// Records a resolved metric.
    ///
    /// Idempotent for an equal result. A conflicting re-insert returns
    /// [`AssayError::CacheConsistency`] and leaves the original entry in
    /// place.
    pub fn put(&self, metric: ResolvedMetric) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match entries.get(&metric.id) {
            Some(existing) if *existing == metric.result => Ok(()),
            Some(_) => Err(AssayError::CacheConsistency {
                metric: metric.id.to_string(),
            }),
            None => {
                entries.insert(metric.id, metric.result);
                Ok(())
            }
        }
    }

    /// Number of cached identities.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Number of cached identities that resolved to a failure.
    pub fn failed_count(&self) -> usize {
        self.read_entries()
            .values()
            .filter(|result| result.is_err())
            .count()
    }

    fn read_entries(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<MetricId, std::result::Result<ResolvedValue, MetricError>>>
    {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

//! Run observation hooks.
//!
//! The engine transmits no telemetry of its own. Each validation run
//! produces one [`RunSummary`] and hands it to a caller-supplied
//! [`RunSink`], a bring-your-own-exporter seam: the default
//! [`TracingSink`] emits a structured `tracing` event, and callers
//! wanting OpenTelemetry, files, or dashboards implement the trait over
//! their own exporter.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::info;

/// Summary of one validation run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Table the run validated.
    pub table: String,
    /// Backend kind the run executed on.
    pub backend: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Expectations in the run.
    pub expectations: usize,
    /// Specs per expectation type.
    pub expectation_types: BTreeMap<String, usize>,
    /// Expectations that evaluated and held.
    pub successful: usize,
    /// Expectations that evaluated and did not hold.
    pub unsuccessful: usize,
    /// Expectations that went unanswered because metrics failed.
    pub failed: usize,
    /// Metrics that resolved to values.
    pub metrics_resolved: usize,
    /// Metrics recorded as failures.
    pub metrics_failed: usize,
}

impl RunSummary {
    /// Wall-clock duration of the run.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Receives one event per validation run.
///
/// Called synchronously at the end of the run, so implementations should
/// hand the summary off rather than block on exporting it.
pub trait RunSink: Send + Sync {
    /// Records a finished run.
    fn record(&self, summary: &RunSummary);
}

/// The default sink: one structured `tracing` event per run.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl RunSink for TracingSink {
    fn record(&self, summary: &RunSummary) {
        info!(
            table = %summary.table,
            backend = %summary.backend,
            expectations = summary.expectations,
            expectation_types = ?summary.expectation_types,
            successful = summary.successful,
            unsuccessful = summary.unsuccessful,
            failed = summary.failed,
            metrics.resolved = summary.metrics_resolved,
            metrics.failed = summary.metrics_failed,
            duration_ms = summary.duration().num_milliseconds(),
            "validation run finished"
        );
    }
}

/// Buffers summaries in memory, for tests and callers that export in
/// batches of their own.
#[derive(Debug, Default)]
pub struct CollectingSink {
    summaries: Mutex<Vec<RunSummary>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// The summaries recorded so far.
    pub fn summaries(&self) -> Vec<RunSummary> {
        self.summaries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl RunSink for CollectingSink {
    fn record(&self, summary: &RunSummary) {
        self.summaries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(summary.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> RunSummary {
        let started_at = Utc::now();
        RunSummary {
            table: "people".into(),
            backend: "memory".into(),
            started_at,
            finished_at: started_at + chrono::Duration::milliseconds(12),
            expectations: 3,
            expectation_types: BTreeMap::from([
                ("expect_column_values_to_be_in_set".to_string(), 2),
                ("expect_table_row_count_to_be_between".to_string(), 1),
            ]),
            successful: 2,
            unsuccessful: 1,
            failed: 0,
            metrics_resolved: 9,
            metrics_failed: 0,
        }
    }

    #[test]
    fn test_collecting_sink_buffers_summaries() {
        let sink = CollectingSink::new();
        sink.record(&summary());
        sink.record(&summary());

        let recorded = sink.summaries();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].table, "people");
        assert_eq!(recorded[0].duration(), chrono::Duration::milliseconds(12));
    }

    #[test]
    fn test_summary_serializes_flat() {
        let encoded = serde_json::to_value(summary()).unwrap();
        assert_eq!(encoded["table"], "people");
        assert_eq!(encoded["backend"], "memory");
        assert_eq!(encoded["successful"], 2);
        assert_eq!(encoded["metrics_resolved"], 9);
        assert_eq!(
            encoded["expectation_types"]["expect_column_values_to_be_in_set"],
            2
        );
    }
}

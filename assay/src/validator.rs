//! The validation run loop.
//!
//! One run is one pass over one table: translate every spec, expand the
//! combined metric graph, resolve it layer by layer against the backend
//! adapter, then evaluate each expectation from the run cache.
//!
//! The scheduling rules live here. Metrics are planned only after their
//! dependencies resolved, one layer's scan requests are folded into shared
//! round trips, and every identity is computed at most once per run no
//! matter how many expectations ask for it. Configuration problems
//! (unknown expectations, unsupported metrics, dependency cycles) abort
//! the run as `Err` before the backend sees anything; backend trouble
//! mid-run degrades into failed outcomes so the caller still gets one
//! answer per spec.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future;
use tracing::{debug, instrument, warn};

use crate::backend::{group_into_batches, BackendAdapter, ScanMetric};
use crate::cache::ResolutionCache;
use crate::error::{MetricError, Result};
use crate::expectations::evaluate::evaluate;
use crate::expectations::translate::{translate, ExpectationPlan, TranslationContext};
use crate::expectations::{ExpectationOutcome, ExpectationSpec};
use crate::graph::MetricGraph;
use crate::metrics::builtin::DEFAULT_SAMPLE_LIMIT;
use crate::metrics::id::MetricId;
use crate::metrics::provider::{DependencyValues, MetricPlan};
use crate::metrics::registry::ProviderRegistry;
use crate::metrics::value::ResolvedMetric;
use crate::telemetry::{RunSink, RunSummary, TracingSink};

/// Tunables of a validation run.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Cap on sampled unexpected values and row keys per expectation.
    /// Zero disables sampling.
    pub sample_limit: usize,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }
}

/// Runs expectation suites against backend adapters.
///
/// A validator is cheap to construct and reusable across runs and
/// adapters; each [`validate`](Validator::validate) call gets a fresh run
/// cache, so runs never see each other's data.
pub struct Validator {
    registry: Arc<ProviderRegistry>,
    options: ValidationOptions,
    sink: Arc<dyn RunSink>,
}

impl Validator {
    /// Creates a validator over the shared built-in metric catalog, with
    /// default options and the tracing run sink.
    pub fn new() -> Self {
        Self {
            registry: ProviderRegistry::shared_default(),
            options: ValidationOptions::default(),
            sink: Arc::new(TracingSink),
        }
    }

    /// Swaps in a custom provider registry.
    pub fn with_registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the run options.
    pub fn with_options(mut self, options: ValidationOptions) -> Self {
        self.options = options;
        self
    }

    /// Caps sampled unexpected values and row keys per expectation.
    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.options.sample_limit = limit;
        self
    }

    /// Replaces the run summary sink.
    pub fn with_sink(mut self, sink: Arc<dyn RunSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validates every spec against the adapter's table in one run.
    ///
    /// Returns one outcome per spec, in spec order.
    ///
    /// # Errors
    ///
    /// `Err` is reserved for configuration failures caught before any
    /// backend work and for engine invariant violations. A backend that
    /// fails mid-run produces `Failed` outcomes, not an `Err`.
    #[instrument(skip(self, adapter, specs), fields(table = %adapter.table_name(), backend = %adapter.kind(), expectations = specs.len()))]
    pub async fn validate(
        &self,
        adapter: &dyn BackendAdapter,
        specs: &[ExpectationSpec],
    ) -> Result<Vec<ExpectationOutcome>> {
        let started_at = Utc::now();

        let ctx = TranslationContext {
            sample_limit: self.options.sample_limit,
            supports_row_keys: adapter.supports_row_keys(),
        };
        let plans = specs
            .iter()
            .map(|spec| translate(spec, &ctx))
            .collect::<Result<Vec<_>>>()?;

        let roots: Vec<MetricId> = plans.iter().flat_map(ExpectationPlan::roots).collect();
        let graph = MetricGraph::build(&roots, &self.registry, adapter.kind())?;
        let layers = graph.layers()?;
        debug!(
            metrics = graph.len(),
            layers = layers.len(),
            "metric graph expanded"
        );

        let cache = ResolutionCache::new();
        self.resolve_layers(adapter, &graph, &layers, &cache).await?;

        let outcomes: Vec<ExpectationOutcome> =
            plans.iter().map(|plan| evaluate(plan, &cache)).collect();

        let successful = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.iter().filter(|o| o.is_failed()).count();
        let metrics_failed = cache.failed_count();
        let mut expectation_types: BTreeMap<String, usize> = BTreeMap::new();
        for spec in specs {
            *expectation_types.entry(spec.expectation.clone()).or_insert(0) += 1;
        }
        let summary = RunSummary {
            table: adapter.table_name().to_string(),
            backend: adapter.kind().to_string(),
            started_at,
            finished_at: Utc::now(),
            expectations: specs.len(),
            expectation_types,
            successful,
            unsuccessful: outcomes.len() - successful - failed,
            failed,
            metrics_resolved: cache.len() - metrics_failed,
            metrics_failed,
        };
        self.sink.record(&summary);

        Ok(outcomes)
    }

    /// Resolves the graph into the cache, layer by layer.
    ///
    /// A transport failure marks every still-uncached identity as aborted
    /// and stops scheduling; evaluation then runs against what resolved.
    async fn resolve_layers(
        &self,
        adapter: &dyn BackendAdapter,
        graph: &MetricGraph,
        layers: &[Vec<MetricId>],
        cache: &ResolutionCache,
    ) -> Result<()> {
        'layers: for layer in layers {
            let mut scans: Vec<ScanMetric> = Vec::new();
            for id in layer {
                if cache.contains(id) {
                    continue;
                }
                if let Some(scan) = self.plan_metric(adapter, graph, cache, id)? {
                    scans.push(scan);
                }
            }

            // Batches of one layer differ only in their row filter, so their
            // round trips are independent and run concurrently.
            let batches = group_into_batches(scans);
            let results = future::join_all(batches.iter().map(|batch| {
                debug!(
                    batch.requests = batch.len(),
                    filtered = batch.filter.is_some(),
                    "dispatching metric batch"
                );
                adapter.execute_batch(batch)
            }))
            .await;

            // Keep everything that resolved before acting on a failure, so
            // evaluation sees as much of the layer as actually completed.
            let mut transport_failure = None;
            for result in results {
                match result {
                    Ok(resolved) => {
                        for metric in resolved {
                            cache.put(metric)?;
                        }
                    }
                    Err(error) => transport_failure = Some(error),
                }
            }
            if let Some(error) = transport_failure {
                warn!(error = %error, "backend round trip failed, aborting metric resolution");
                abort_uncached(graph, cache, &error.to_string())?;
                break 'layers;
            }
        }
        Ok(())
    }

    /// Plans one metric. Returns the scan request if the metric needs
    /// backend data; ready values and failures go straight into the cache.
    fn plan_metric(
        &self,
        adapter: &dyn BackendAdapter,
        graph: &MetricGraph,
        cache: &ResolutionCache,
        id: &MetricId,
    ) -> Result<Option<ScanMetric>> {
        let dep_ids = graph.dependencies_of(id).unwrap_or(&[]);

        let mut resolved = Vec::with_capacity(dep_ids.len());
        for dep in dep_ids {
            match cache.get(dep) {
                Some(Ok(value)) => resolved.push((dep, value)),
                Some(Err(cause)) => {
                    // Replay the dependency's failure instead of computing.
                    cache.put(ResolvedMetric::failed(
                        id.clone(),
                        MetricError::dependency_failed(dep.to_string(), cause),
                    ))?;
                    return Ok(None);
                }
                None => {
                    // Layers schedule dependencies strictly earlier; a miss
                    // means the run aborted mid-graph.
                    cache.put(ResolvedMetric::failed(
                        id.clone(),
                        MetricError::dependency_failed(
                            dep.to_string(),
                            MetricError::aborted("dependency was never resolved"),
                        ),
                    ))?;
                    return Ok(None);
                }
            }
        }
        let deps = DependencyValues::new(resolved.iter().map(|(dep, value)| (*dep, value)));

        let provider = self.registry.lookup(&id.name, adapter.kind())?;
        match provider.plan(id, &deps) {
            Ok(MetricPlan::Ready(value)) => {
                cache.put(ResolvedMetric::ok(id.clone(), value))?;
                Ok(None)
            }
            Ok(MetricPlan::Scan(request)) => Ok(Some(ScanMetric {
                id: id.clone(),
                request,
            })),
            Err(error) => {
                cache.put(ResolvedMetric::failed(
                    id.clone(),
                    MetricError::computation(adapter.kind().to_string(), error.to_string()),
                ))?;
                Ok(None)
            }
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

fn abort_uncached(graph: &MetricGraph, cache: &ResolutionCache, message: &str) -> Result<()> {
    for id in graph.ids() {
        if !cache.contains(id) {
            cache.put(ResolvedMetric::failed(
                id.clone(),
                MetricError::aborted(message),
            ))?;
        }
    }
    Ok(())
}

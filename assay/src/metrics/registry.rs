//! The per-backend provider registry.
//!
//! Metric capability is declared by registration, never inferred: a metric
//! name resolves on a backend if and only if a provider was registered for
//! that `(name, backend kind)` pair. Lookup failure is an
//! [`UnsupportedMetric`](crate::error::AssayError::UnsupportedMetric)
//! configuration error raised during graph expansion, before any backend
//! round trip.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::BackendKind;
use crate::error::{AssayError, Result};
use crate::metrics::builtin;
use crate::metrics::provider::MetricProvider;

/// Maps `(metric name, backend kind)` to the provider that resolves it.
pub struct ProviderRegistry {
    providers: HashMap<(String, BackendKind), Arc<dyn MetricProvider>>,
}

static DEFAULT_REGISTRY: Lazy<Arc<ProviderRegistry>> =
    Lazy::new(|| Arc::new(ProviderRegistry::with_defaults()));

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Creates a registry pre-loaded with the built-in metric catalog for
    /// every backend kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        builtin::register_defaults(&mut registry);
        registry
    }

    /// The process-wide shared default registry.
    pub fn shared_default() -> Arc<Self> {
        Arc::clone(&DEFAULT_REGISTRY)
    }

    /// Registers a provider for one metric name on one backend kind.
    ///
    /// Re-registering a pair replaces the previous provider, so callers can
    /// override built-ins.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        kind: BackendKind,
        provider: Arc<dyn MetricProvider>,
    ) {
        self.providers.insert((name.into(), kind), provider);
    }

    /// Registers one provider for a metric name on every backend kind.
    pub fn register_for_all(&mut self, name: impl Into<String>, provider: Arc<dyn MetricProvider>) {
        let name = name.into();
        for kind in BackendKind::ALL {
            self.providers
                .insert((name.clone(), kind), Arc::clone(&provider));
        }
    }

    /// Looks up the provider for a metric name on a backend kind.
    pub fn lookup(&self, name: &str, kind: BackendKind) -> Result<&Arc<dyn MetricProvider>> {
        self.providers
            .get(&(name.to_string(), kind))
            .ok_or_else(|| AssayError::unsupported_metric(name, kind.to_string()))
    }

    /// Whether a provider is registered for the pair.
    pub fn contains(&self, name: &str, kind: BackendKind) -> bool {
        self.providers.contains_key(&(name.to_string(), kind))
    }

    /// Number of registered `(name, kind)` pairs.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

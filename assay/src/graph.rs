//! The metric dependency graph.
//!
//! Requested metrics are expanded depth-first through the provider registry
//! into the closure of everything they transitively need, with one node per
//! distinct identity no matter how many expectations requested it. Expansion
//! happens entirely before execution: an unsupported metric or a dependency
//! cycle surfaces here as a configuration error, before any backend round
//! trip.
//!
//! [`MetricGraph::layers`] turns the graph into a layered schedule: layer 0
//! has no dependencies, and every node in layer k depends only on nodes in
//! earlier layers. The executor runs layers strictly in order, which is what
//! lets it hand a whole layer's scan requests to the backend as shared
//! batches.

use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::backend::BackendKind;
use crate::error::{AssayError, Result};
use crate::metrics::id::MetricId;
use crate::metrics::registry::ProviderRegistry;

/// The expanded dependency graph over metric identities.
#[derive(Debug, Clone)]
pub struct MetricGraph {
    /// Each node mapped to its direct dependencies.
    nodes: HashMap<MetricId, Vec<MetricId>>,
}

impl MetricGraph {
    /// Expands the requested roots into the full dependency graph.
    ///
    /// Dependencies are looked up through `registry` for the given backend
    /// kind. Shared identities collapse into one node.
    ///
    /// # Errors
    ///
    /// [`AssayError::UnsupportedMetric`] when a metric name has no provider
    /// for the backend kind, and [`AssayError::CyclicDependency`] when
    /// expansion re-enters an identity already on the current path. Both are
    /// raised before any backend work.
    pub fn build(
        roots: &[MetricId],
        registry: &ProviderRegistry,
        kind: BackendKind,
    ) -> Result<Self> {
        let mut nodes = HashMap::new();
        let mut path = Vec::new();
        for root in roots {
            expand(root, registry, kind, &mut nodes, &mut path)?;
        }
        debug!(
            node.count = nodes.len(),
            root.count = roots.len(),
            "expanded metric dependency graph"
        );
        Ok(Self { nodes })
    }

    /// Number of distinct metric identities in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the identity is a node of the graph.
    pub fn contains(&self, id: &MetricId) -> bool {
        self.nodes.contains_key(id)
    }

    /// The direct dependencies of a node, if present.
    pub fn dependencies_of(&self, id: &MetricId) -> Option<&[MetricId]> {
        self.nodes.get(id).map(Vec::as_slice)
    }

    /// Iterates over every node identity of the graph, in no
    /// particular order.
    pub fn ids(&self) -> impl Iterator<Item = &MetricId> {
        self.nodes.keys()
    }

    /// Produces the layered execution schedule (layered Kahn's algorithm).
    ///
    /// Every node appears in exactly one layer, and all of its dependencies
    /// sit in strictly earlier layers. Within a layer, nodes are sorted by
    /// name and fingerprint so the schedule is stable across runs.
    ///
    /// Expansion already rejects cycles, so a shortfall here means the graph
    /// was mutated inconsistently; it is still reported as
    /// [`AssayError::CyclicDependency`] rather than trusted.
    pub fn layers(&self) -> Result<Vec<Vec<MetricId>>> {
        let mut in_degree: HashMap<&MetricId, usize> = HashMap::new();
        let mut dependents: HashMap<&MetricId, Vec<&MetricId>> = HashMap::new();

        for (id, deps) in &self.nodes {
            in_degree.entry(id).or_insert(0);
            for dep in deps {
                dependents.entry(dep).or_default().push(id);
                *in_degree.entry(id).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<&MetricId> = VecDeque::new();
        for (&id, &degree) in &in_degree {
            if degree == 0 {
                queue.push_back(id);
            }
        }

        let mut layers: Vec<Vec<MetricId>> = Vec::new();
        let mut total_resolved = 0;

        while !queue.is_empty() {
            let layer_size = queue.len();
            let mut current_layer = Vec::with_capacity(layer_size);

            for _ in 0..layer_size {
                if let Some(current) = queue.pop_front() {
                    current_layer.push(current.clone());
                    total_resolved += 1;

                    if let Some(next) = dependents.get(current) {
                        for &dependent in next {
                            if let Some(degree) = in_degree.get_mut(dependent) {
                                *degree -= 1;
                                if *degree == 0 {
                                    queue.push_back(dependent);
                                }
                            }
                        }
                    }
                }
            }

            current_layer.sort_by_key(|id| (id.name.clone(), id.fingerprint()));
            layers.push(current_layer);
        }

        if total_resolved != self.nodes.len() {
            let unresolved: Vec<String> = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(AssayError::CyclicDependency { path: unresolved });
        }

        Ok(layers)
    }
}

fn expand(
    id: &MetricId,
    registry: &ProviderRegistry,
    kind: BackendKind,
    nodes: &mut HashMap<MetricId, Vec<MetricId>>,
    path: &mut Vec<MetricId>,
) -> Result<()> {
    if nodes.contains_key(id) {
        return Ok(());
    }
    if let Some(pos) = path.iter().position(|on_stack| on_stack == id) {
        let mut cycle: Vec<String> = path[pos..].iter().map(|m| m.to_string()).collect();
        cycle.push(id.to_string());
        return Err(AssayError::CyclicDependency { path: cycle });
    }

    let provider = registry.lookup(&id.name, kind)?;
    let deps = provider.dependencies(id)?;

    path.push(id.clone());
    for dep in &deps {
        expand(dep, registry, kind, nodes, path)?;
    }
    path.pop();

    nodes.insert(id.clone(), deps);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::builtin::{names, params};
    use crate::metrics::id::{MetricDomain, Scalar};
    use crate::metrics::provider::{DependencyValues, MetricPlan, MetricProvider};
    use std::sync::Arc;

    struct ChainProvider {
        next: Option<MetricId>,
    }

    impl MetricProvider for ChainProvider {
        fn dependencies(&self, _id: &MetricId) -> Result<Vec<MetricId>> {
            Ok(self.next.iter().cloned().collect())
        }

        fn plan(&self, _id: &MetricId, _deps: &DependencyValues<'_>) -> Result<MetricPlan> {
            Ok(MetricPlan::Ready(0i64.into()))
        }
    }

    fn unexpected_count_root() -> MetricId {
        MetricId::new(
            names::unexpected_count(names::IN_SET),
            MetricDomain::column("status"),
        )
        .with_param(params::VALUE_SET, vec![Scalar::from("active")])
    }

    #[test]
    fn test_layers_put_conditions_before_derived_metrics() {
        let registry = ProviderRegistry::with_defaults();
        let roots = vec![
            unexpected_count_root(),
            MetricId::new(names::ROW_COUNT, MetricDomain::table()),
        ];
        let graph = MetricGraph::build(&roots, &registry, BackendKind::Memory).unwrap();
        // roots + the shared condition
        assert_eq!(graph.len(), 3);

        let layers = graph.layers().unwrap();
        assert_eq!(layers.len(), 2);
        assert!(layers[0]
            .iter()
            .any(|id| id.name == names::condition(names::IN_SET)));
        assert!(layers[0].iter().any(|id| id.name == names::ROW_COUNT));
        assert_eq!(layers[1].len(), 1);
        assert_eq!(layers[1][0].name, names::unexpected_count(names::IN_SET));
    }

    #[test]
    fn test_shared_dependencies_collapse_into_one_node() {
        let registry = ProviderRegistry::with_defaults();
        let count = unexpected_count_root();
        let values = MetricId::new(
            names::unexpected_values(names::IN_SET),
            MetricDomain::column("status"),
        )
        .with_param(params::VALUE_SET, vec![Scalar::from("active")]);

        let graph =
            MetricGraph::build(&[count, values], &registry, BackendKind::Memory).unwrap();
        // two derived roots share one condition node
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_cycle_is_rejected_with_path() {
        let mut registry = ProviderRegistry::new();
        let a = MetricId::new("cycle.a", MetricDomain::table());
        let b = MetricId::new("cycle.b", MetricDomain::table());
        registry.register(
            "cycle.a",
            BackendKind::Memory,
            Arc::new(ChainProvider {
                next: Some(b.clone()),
            }),
        );
        registry.register(
            "cycle.b",
            BackendKind::Memory,
            Arc::new(ChainProvider {
                next: Some(a.clone()),
            }),
        );

        let err = MetricGraph::build(&[a], &registry, BackendKind::Memory).unwrap_err();
        match err {
            AssayError::CyclicDependency { path } => {
                assert_eq!(path.len(), 3);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected CyclicDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_metric_fails_expansion() {
        let registry = ProviderRegistry::with_defaults();
        let root = MetricId::new("column.median", MetricDomain::column("age"));
        let err = MetricGraph::build(&[root], &registry, BackendKind::Sql).unwrap_err();
        assert!(matches!(err, AssayError::UnsupportedMetric { .. }));
    }

    #[test]
    fn test_linear_chain_layers() {
        let mut registry = ProviderRegistry::new();
        let a = MetricId::new("chain.a", MetricDomain::table());
        let b = MetricId::new("chain.b", MetricDomain::table());
        let c = MetricId::new("chain.c", MetricDomain::table());
        registry.register(
            "chain.a",
            BackendKind::Memory,
            Arc::new(ChainProvider { next: None }),
        );
        registry.register(
            "chain.b",
            BackendKind::Memory,
            Arc::new(ChainProvider {
                next: Some(a.clone()),
            }),
        );
        registry.register(
            "chain.c",
            BackendKind::Memory,
            Arc::new(ChainProvider {
                next: Some(b.clone()),
            }),
        );

        let graph = MetricGraph::build(&[c.clone()], &registry, BackendKind::Memory).unwrap();
        let layers = graph.layers().unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0], vec![a]);
        assert_eq!(layers[1], vec![b]);
        assert_eq!(layers[2], vec![c]);
    }
}

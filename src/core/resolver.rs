//! Dependency resolution for execution plans.
//!
//! Plans are reduced to successive layers with Kahn's algorithm: every node
//! of in-degree zero is peeled into the current layer, its successors lose one
//! in-degree, and the process repeats. Nodes left over when peeling stalls sit
//! on a cycle, and the whole plan is rejected.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use tracing::{debug, warn};

use crate::core::error::{OrchestratorError, OrchestratorResult};

/// Turns nodes plus "must finish before" edges into an execution order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Create a new resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Build dependency layers.
    ///
    /// An edge `(a, b)` means `a` must complete before `b` starts. Nodes in
    /// the same layer have no edges between them and are sorted with `cmp`.
    ///
    /// # Errors
    ///
    /// * [`OrchestratorError::Validation`] for duplicate nodes or edges that
    ///   name an unknown node.
    /// * [`OrchestratorError::Cycle`] listing every node that could not be
    ///   peeled.
    pub fn build_order<N, F>(
        &self,
        nodes: &[N],
        edges: &[(N, N)],
        mut cmp: F,
    ) -> OrchestratorResult<Vec<Vec<N>>>
    where
        N: Clone + Eq + Hash + fmt::Display,
        F: FnMut(&N, &N) -> Ordering,
    {
        let mut index: HashMap<&N, usize> = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node, i).is_some() {
                return Err(OrchestratorError::Validation(format!(
                    "duplicate plan member `{node}`"
                )));
            }
        }

        let lookup = |node: &N| {
            index.get(node).copied().ok_or_else(|| {
                OrchestratorError::Validation(format!("edge references unknown task `{node}`"))
            })
        };

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut in_degree = vec![0_usize; nodes.len()];
        let mut seen = HashSet::with_capacity(edges.len());
        for (from, to) in edges {
            let (from, to) = (lookup(from)?, lookup(to)?);
            if seen.insert((from, to)) {
                successors[from].push(to);
                in_degree[to] += 1;
            }
        }

        let mut layers = Vec::new();
        let mut peeled = 0;
        let mut current: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();

        while !current.is_empty() {
            current.sort_by(|&a, &b| cmp(&nodes[a], &nodes[b]));
            peeled += current.len();

            let mut next = Vec::new();
            for &u in &current {
                for &v in &successors[u] {
                    in_degree[v] -= 1;
                    if in_degree[v] == 0 {
                        next.push(v);
                    }
                }
            }
            layers.push(current.iter().map(|&i| nodes[i].clone()).collect());
            current = next;
        }

        if peeled < nodes.len() {
            let cyclic: Vec<String> = (0..nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| nodes[i].to_string())
                .collect();
            warn!(members = ?cyclic, "dependency cycle detected");
            return Err(OrchestratorError::Cycle(cyclic));
        }

        debug!(layers = layers.len(), nodes = nodes.len(), "dependency order built");
        Ok(layers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(a: &str, b: &str) -> (String, String) {
        (a.to_string(), b.to_string())
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    fn by_name(a: &String, b: &String) -> Ordering {
        a.cmp(b)
    }

    #[test]
    fn diamond_produces_three_layers() {
        let nodes = names(&["d", "c", "b", "a"]);
        let edges = vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")];
        let layers = DependencyResolver::new()
            .build_order(&nodes, &edges, by_name)
            .unwrap();
        assert_eq!(layers, vec![names(&["a"]), names(&["b", "c"]), names(&["d"])]);
    }

    #[test]
    fn layer_ties_follow_comparator() {
        let nodes = names(&["x", "y", "z"]);
        let layers = DependencyResolver::new()
            .build_order(&nodes, &[], |a: &String, b: &String| b.cmp(a))
            .unwrap();
        assert_eq!(layers, vec![names(&["z", "y", "x"])]);
    }

    #[test]
    fn duplicate_edges_do_not_inflate_in_degree() {
        let nodes = names(&["a", "b"]);
        let edges = vec![edge("a", "b"), edge("a", "b")];
        let layers = DependencyResolver::new()
            .build_order(&nodes, &edges, by_name)
            .unwrap();
        assert_eq!(layers.len(), 2);
    }

    #[test]
    fn partial_cycle_rejects_whole_plan() {
        let nodes = names(&["root", "a", "b", "c"]);
        let edges = vec![edge("root", "a"), edge("a", "b"), edge("b", "c"), edge("c", "a")];
        let err = DependencyResolver::new()
            .build_order(&nodes, &edges, by_name)
            .unwrap_err();
        assert_eq!(err, OrchestratorError::Cycle(names(&["a", "b", "c"])));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let nodes = names(&["a"]);
        let err = DependencyResolver::new()
            .build_order(&nodes, &[edge("a", "a")], by_name)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Cycle(_)));
    }

    #[test]
    fn unknown_edge_endpoint_is_validation_error() {
        let nodes = names(&["a"]);
        let err = DependencyResolver::new()
            .build_order(&nodes, &[edge("a", "ghost")], by_name)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[test]
    fn duplicate_nodes_are_rejected() {
        let nodes = names(&["a", "a"]);
        let err = DependencyResolver::new()
            .build_order(&nodes, &[], by_name)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }
}

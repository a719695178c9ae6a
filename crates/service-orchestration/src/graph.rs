//! Dependency graph over registered services
//!
//! Ordering is a depth-first visit that distinguishes "visiting" from
//! "visited": reaching a node that is still being visited means the graph
//! has a cycle, and the sort fails with the offending path instead of
//! producing a partial order. Nodes are visited in insertion order, so
//! independent services keep their registration order.

use crate::{Error, Result};
use indexmap::IndexMap;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

/// Directed graph from each service to the services it depends on
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: IndexMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(name, dependencies)` pairs, keeping their order
    pub fn from_entries<I, N, D>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let mut graph = Self::new();
        for (name, deps) in entries {
            graph.add_node(name, deps);
        }
        graph
    }

    /// Add a node. Dependencies naming unknown nodes are kept but ignored
    /// when ordering.
    pub fn add_node<N, D>(&mut self, name: N, dependencies: D)
    where
        N: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        self.nodes.insert(
            name.into(),
            dependencies.into_iter().map(Into::into).collect(),
        );
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies of `name`
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.nodes.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes that directly depend on `name`, in insertion order
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, deps)| deps.iter().any(|dep| dep == name))
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// Order every node after all of its dependencies
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut marks = HashMap::with_capacity(self.nodes.len());
        let mut path = Vec::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        for name in self.nodes.keys() {
            self.visit(name, &mut marks, &mut path, &mut order)?;
        }

        Ok(order)
    }

    /// Order every node before all of its dependencies
    pub fn shutdown_order(&self) -> Result<Vec<String>> {
        let mut order = self.topological_sort()?;
        order.reverse();
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(name) {
            Some(Mark::Visited) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|node| *node == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                return Err(Error::CircularDependency { cycle });
            }
            None => {}
        }

        marks.insert(name, Mark::Visiting);
        path.push(name);

        for dep in self.dependencies(name) {
            if self.nodes.contains_key(dep.as_str()) {
                self.visit(dep, marks, path, order)?;
            }
        }

        path.pop();
        marks.insert(name, Mark::Visited);
        order.push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> DependencyGraph {
        // a depends on b depends on c
        DependencyGraph::from_entries([
            ("a", vec!["b"]),
            ("b", vec!["c"]),
            ("c", vec![]),
        ])
    }

    #[test]
    fn test_topological_sort_chain() {
        let graph = chain();
        assert_eq!(graph.topological_sort().unwrap(), vec!["c", "b", "a"]);
        assert_eq!(graph.shutdown_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_independent_nodes_keep_insertion_order() {
        let graph = DependencyGraph::from_entries([
            ("web", vec!["api"]),
            ("metrics", vec![]),
            ("api", vec!["postgres", "redis"]),
            ("postgres", vec![]),
            ("redis", vec![]),
        ]);

        assert_eq!(
            graph.topological_sort().unwrap(),
            vec!["postgres", "redis", "api", "web", "metrics"]
        );
    }

    #[test]
    fn test_circular_dependency_detection() {
        let graph = DependencyGraph::from_entries([("a", vec!["b"]), ("b", vec!["a"])]);

        match graph.topological_sort() {
            Err(Error::CircularDependency { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_reported_from_entry_point() {
        let graph = DependencyGraph::from_entries([
            ("app", vec!["x"]),
            ("x", vec!["y"]),
            ("y", vec!["z"]),
            ("z", vec!["x"]),
        ]);

        let err = graph.topological_sort().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Circular dependency detected: x -> y -> z -> x"
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = DependencyGraph::from_entries([("loop", vec!["loop"])]);
        assert!(graph.topological_sort().is_err());
    }

    #[test]
    fn test_unknown_dependencies_are_ignored_for_ordering() {
        let graph = DependencyGraph::from_entries([("api", vec!["external"])]);
        assert_eq!(graph.topological_sort().unwrap(), vec!["api"]);
        assert_eq!(graph.dependencies("api"), ["external".to_string()]);
    }

    #[test]
    fn test_dependents() {
        let graph = chain();
        assert_eq!(graph.dependents("c"), vec!["b"]);
        assert!(graph.dependents("a").is_empty());
    }
}

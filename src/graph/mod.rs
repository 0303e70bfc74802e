// src/graph/mod.rs

//! Dependency graph construction, topological ordering, cycle detection
//!
//! Nodes are package names held in a flat arena; edges are index pairs
//! with both directions materialized, so the rebuild planner gets reverse
//! reachability for free. Ordering uses Kahn's algorithm with a
//! lexicographic tie-break among ready nodes, making every order
//! deterministic for a given graph.

use crate::error::{Error, Result};
use crate::recipe::RecipeStore;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// A package dependency graph
#[derive(Debug, Default)]
pub struct DepGraph {
    /// Arena of node names; `NodeId` indexes into this
    names: Vec<String>,
    /// Name → arena index
    index: HashMap<String, usize>,
    /// dependency edges: `forward[u]` lists nodes u depends on
    forward: Vec<Vec<usize>>,
    /// dependent edges: `reverse[v]` lists nodes that depend on v
    reverse: Vec<Vec<usize>>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph reachable from `roots` by following recipe deps.
    ///
    /// Both runtime deps and build deps become edges: a package cannot
    /// build before either kind is installed. Each node is visited once
    /// even when reachable from several roots.
    pub fn from_recipes(store: &RecipeStore, roots: &[String]) -> Result<Self> {
        let mut graph = Self::new();
        let mut queue: VecDeque<String> = roots.iter().cloned().collect();
        let mut seen: HashSet<String> = HashSet::new();

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let recipe = store.load_linted(&name)?;
            graph.add_node(&name);

            let mut deps: Vec<String> = recipe.package.deps.clone();
            deps.extend(recipe.package.build_deps.clone());
            for dep in deps {
                graph.add_edge(&name, &dep);
                queue.push_back(dep);
            }
        }

        debug!(
            "dependency graph: {} nodes, {} edges",
            graph.len(),
            graph.forward.iter().map(Vec::len).sum::<usize>()
        );
        Ok(graph)
    }

    /// Build a graph from explicit `(name, deps)` pairs (installed DB view)
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let mut graph = Self::new();
        for (name, deps) in pairs {
            graph.add_node(name);
            for dep in deps {
                graph.add_edge(name, dep);
            }
        }
        graph
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Ensure a node exists, returning its arena index
    pub fn add_node(&mut self, name: &str) -> usize {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        self.forward.push(Vec::new());
        self.reverse.push(Vec::new());
        id
    }

    /// Record that `from` depends on `to`
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let u = self.add_node(from);
        let v = self.add_node(to);
        if !self.forward[u].contains(&v) {
            self.forward[u].push(v);
            self.reverse[v].push(u);
        }
    }

    /// Direct dependencies of a node
    pub fn deps_of(&self, name: &str) -> Vec<&str> {
        match self.index.get(name) {
            Some(&id) => self.forward[id].iter().map(|&v| self.names[v].as_str()).collect(),
            None => Vec::new(),
        }
    }

    /// Direct dependents of a node
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        match self.index.get(name) {
            Some(&id) => self.reverse[id].iter().map(|&u| self.names[u].as_str()).collect(),
            None => Vec::new(),
        }
    }

    /// Total order with every dependency preceding its dependents.
    ///
    /// Kahn's algorithm over dependency edges; ties among ready nodes break
    /// lexicographically. A cycle yields [`Error::CycleDetected`] listing
    /// every node still carrying unresolved dependencies.
    pub fn topo_order(&self) -> Result<Vec<String>> {
        // indegree counts unresolved dependencies of each node
        let mut indegree: Vec<usize> = self.forward.iter().map(Vec::len).collect();

        let mut ready: BTreeSet<&str> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| self.names[i].as_str())
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(&name) = ready.iter().next() {
            ready.remove(name);
            let id = self.index[name];
            order.push(name.to_string());

            for &dependent in &self.reverse[id] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.insert(self.names[dependent].as_str());
                }
            }
        }

        if order.len() != self.len() {
            let mut stuck: Vec<String> = indegree
                .iter()
                .enumerate()
                .filter(|(_, &d)| d > 0)
                .map(|(i, _)| self.names[i].clone())
                .collect();
            stuck.sort();
            return Err(Error::CycleDetected(stuck));
        }

        Ok(order)
    }

    /// Dependency-respecting layers: every node's dependencies live in an
    /// earlier layer. Nodes within a layer are mutually independent and
    /// sorted, so a scheduler may build them concurrently.
    pub fn topo_layers(&self) -> Result<Vec<Vec<String>>> {
        let order = self.topo_order()?;
        if order.is_empty() {
            return Ok(Vec::new());
        }

        // Process in topo order so every dependency's depth is final
        let mut depth = vec![0usize; self.len()];
        for name in &order {
            let id = self.index[name];
            depth[id] = self.forward[id]
                .iter()
                .map(|&v| depth[v] + 1)
                .max()
                .unwrap_or(0);
        }

        let max_depth = depth.iter().copied().max().unwrap_or(0);
        let mut layers: Vec<Vec<String>> = vec![Vec::new(); max_depth + 1];
        for (id, &d) in depth.iter().enumerate() {
            layers[d].push(self.names[id].clone());
        }
        for layer in &mut layers {
            layer.sort();
        }
        Ok(layers)
    }

    /// Transitive dependents of `name` (excluding `name` itself), in
    /// topological order. Used by the rebuild planner: when a package
    /// changes, these must rebuild after it.
    pub fn transitive_dependents(&self, name: &str) -> Result<Vec<String>> {
        let Some(&start) = self.index.get(name) else {
            return Ok(Vec::new());
        };

        let mut affected: HashSet<usize> = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            for &dep in &self.reverse[id] {
                if affected.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }

        let order = self.topo_order()?;
        Ok(order
            .into_iter()
            .filter(|n| affected.contains(&self.index[n]))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str)], solo: &[&str]) -> DepGraph {
        let mut g = DepGraph::new();
        for name in solo {
            g.add_node(name);
        }
        for (from, to) in edges {
            g.add_edge(from, to);
        }
        g
    }

    #[test]
    fn test_single_node_order() {
        let g = graph(&[], &["zlib"]);
        assert_eq!(g.topo_order().unwrap(), vec!["zlib"]);
    }

    #[test]
    fn test_deps_precede_dependents() {
        let g = graph(&[("app", "libb"), ("libb", "libc"), ("app", "libc")], &[]);
        let order = g.topo_order().unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("libc") < pos("libb"));
        assert!(pos("libb") < pos("app"));
    }

    #[test]
    fn test_tie_break_is_lexicographic() {
        let g = graph(&[("top", "b"), ("top", "a"), ("top", "c")], &[]);
        assert_eq!(g.topo_order().unwrap(), vec!["a", "b", "c", "top"]);
    }

    #[test]
    fn test_two_node_cycle_reports_both() {
        let g = graph(&[("a", "b"), ("b", "a")], &[]);
        match g.topo_order() {
            Err(Error::CycleDetected(nodes)) => assert_eq!(nodes, vec!["a", "b"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_with_clean_prefix() {
        // ok has no deps; the cycle is x <-> y
        let g = graph(&[("x", "y"), ("y", "x"), ("x", "ok")], &[]);
        match g.topo_order() {
            Err(Error::CycleDetected(nodes)) => assert_eq!(nodes, vec!["x", "y"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_edges_ignored() {
        let mut g = DepGraph::new();
        g.add_edge("a", "b");
        g.add_edge("a", "b");
        assert_eq!(g.deps_of("a"), vec!["b"]);
        assert_eq!(g.dependents_of("b"), vec!["a"]);
    }

    #[test]
    fn test_layers_respect_dependencies() {
        let g = graph(
            &[("app", "libb"), ("app", "libc"), ("libb", "base"), ("libc", "base")],
            &["loner"],
        );
        let layers = g.topo_layers().unwrap();
        assert_eq!(layers[0], vec!["base", "loner"]);
        assert_eq!(layers[1], vec!["libb", "libc"]);
        assert_eq!(layers[2], vec!["app"]);
    }

    #[test]
    fn test_transitive_dependents() {
        let g = graph(
            &[("app", "libb"), ("libb", "zlib"), ("tool", "zlib"), ("app", "zlib")],
            &[],
        );
        let affected = g.transitive_dependents("zlib").unwrap();
        // every dependent present, in topo order (libb before app)
        assert_eq!(affected.len(), 3);
        let pos = |n: &str| affected.iter().position(|x| x == n).unwrap();
        assert!(pos("libb") < pos("app"));
        assert!(affected.contains(&"tool".to_string()));
        assert!(!affected.contains(&"zlib".to_string()));
    }

    #[test]
    fn test_transitive_dependents_of_leaf_is_empty() {
        let g = graph(&[("app", "zlib")], &[]);
        assert!(g.transitive_dependents("app").unwrap().is_empty());
    }

    #[test]
    fn test_from_pairs() {
        let deps_a = vec!["b".to_string()];
        let deps_b: Vec<String> = vec![];
        let g = DepGraph::from_pairs([("a", deps_a.as_slice()), ("b", deps_b.as_slice())]);
        assert_eq!(g.topo_order().unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_empty_graph() {
        let g = DepGraph::new();
        assert!(g.topo_order().unwrap().is_empty());
        assert!(g.topo_layers().unwrap().is_empty());
    }
}

//! Directed graph over package ids
//!
//! An edge `dependent → dependency` records that `dependent` needs
//! `dependency`. Every node keeps both directions so dependents can be found
//! without a scan. Structural operations are pure; ordering and cycle queries
//! are depth-first and deterministic (nodes iterate in id order).

use sdk::errors::EngineError;
use sdk::PluginPackage;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct DependencyNode {
    pub id: String,
    pub package: Option<PluginPackage>,
    pub dependencies: BTreeSet<String>,
    pub dependents: BTreeSet<String>,
    /// Longest chain to a leaf; set by [`DependencyGraph::compute_depths`]
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, DependencyNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph over `packages` with an edge for every dependency that names
    /// another package in the set
    pub fn from_packages<'a>(packages: impl IntoIterator<Item = &'a PluginPackage>) -> Self {
        let mut graph = Self::new();
        let packages: Vec<&PluginPackage> = packages.into_iter().collect();
        for package in &packages {
            graph.add_package((*package).clone());
        }
        for package in &packages {
            for dependency in &package.dependencies {
                if graph.contains(&dependency.name) {
                    graph.add_edge(&package.id, &dependency.name);
                }
            }
        }
        graph
    }

    /// Insert a node; an existing node keeps its edges
    pub fn add_node(&mut self, id: &str) {
        self.nodes
            .entry(id.to_string())
            .or_insert_with(|| DependencyNode {
                id: id.to_string(),
                ..Default::default()
            });
    }

    /// Insert or replace the package carried by a node
    pub fn add_package(&mut self, package: PluginPackage) {
        self.add_node(&package.id);
        if let Some(node) = self.nodes.get_mut(&package.id) {
            node.package = Some(package);
        }
    }

    /// Record that `dependent` needs `dependency`; missing nodes are created
    pub fn add_edge(&mut self, dependent: &str, dependency: &str) {
        self.add_node(dependent);
        self.add_node(dependency);
        if let Some(node) = self.nodes.get_mut(dependent) {
            node.dependencies.insert(dependency.to_string());
        }
        if let Some(node) = self.nodes.get_mut(dependency) {
            node.dependents.insert(dependent.to_string());
        }
    }

    pub fn remove_edge(&mut self, dependent: &str, dependency: &str) -> bool {
        let removed = self
            .nodes
            .get_mut(dependent)
            .map(|node| node.dependencies.remove(dependency))
            .unwrap_or(false);
        if let Some(node) = self.nodes.get_mut(dependency) {
            node.dependents.remove(dependent);
        }
        removed
    }

    /// Remove a node and every edge touching it
    pub fn remove_node(&mut self, id: &str) -> Option<DependencyNode> {
        let node = self.nodes.remove(id)?;
        for dependency in &node.dependencies {
            if let Some(other) = self.nodes.get_mut(dependency) {
                other.dependents.remove(id);
            }
        }
        for dependent in &node.dependents {
            if let Some(other) = self.nodes.get_mut(dependent) {
                other.dependencies.remove(id);
            }
        }
        Some(node)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&DependencyNode> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dependencies_of(&self, id: &str) -> Vec<String> {
        self.nodes
            .get(id)
            .map(|node| node.dependencies.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.nodes
            .get(id)
            .map(|node| node.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Everything `id` needs, directly or indirectly
    pub fn transitive_dependencies(&self, id: &str) -> BTreeSet<String> {
        self.reachable(id, |node| &node.dependencies)
    }

    /// Everything that needs `id`, directly or indirectly
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        self.reachable(id, |node| &node.dependents)
    }

    fn reachable<F>(&self, id: &str, next: F) -> BTreeSet<String>
    where
        F: Fn(&DependencyNode) -> &BTreeSet<String>,
    {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for neighbour in next(node) {
                if neighbour != id && seen.insert(neighbour.clone()) {
                    stack.push(neighbour.clone());
                }
            }
        }
        seen
    }

    pub fn has_circular_dependencies(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// The first cycle found, as a path that starts and ends on the same id
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
        let mut stack: Vec<&str> = Vec::new();
        for id in self.nodes.keys() {
            if !marks.contains_key(id.as_str()) {
                if let Some(cycle) = self.cycle_from(id, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn cycle_from<'a>(
        &'a self,
        id: &'a str,
        marks: &mut BTreeMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(id, Mark::Visiting);
        stack.push(id);

        if let Some(node) = self.nodes.get(id) {
            for dependency in &node.dependencies {
                match marks.get(dependency.as_str()) {
                    Some(Mark::Visiting) => {
                        // Back edge into the recursion stack
                        let start = stack.iter().position(|s| *s == dependency.as_str())?;
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dependency.clone());
                        return Some(cycle);
                    }
                    Some(Mark::Done) => {}
                    None => {
                        if let Some(cycle) = self.cycle_from(dependency, marks, stack) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }

        stack.pop();
        marks.insert(id, Mark::Done);
        None
    }

    /// Postorder over dependency edges: every node after all it depends on
    fn postorder(&self) -> Result<Vec<String>, EngineError> {
        if let Some(cycle) = self.find_cycle() {
            return Err(EngineError::CircularDependency(cycle));
        }

        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        for id in self.nodes.keys() {
            self.visit(id, &mut visited, &mut order);
        }
        Ok(order)
    }

    fn visit<'a>(&'a self, id: &'a str, visited: &mut BTreeSet<&'a str>, order: &mut Vec<String>) {
        if !visited.insert(id) {
            return;
        }
        if let Some(node) = self.nodes.get(id) {
            for dependency in &node.dependencies {
                self.visit(dependency, visited, order);
            }
        }
        order.push(id.to_string());
    }

    /// Topological order along the edges: dependents before dependencies
    ///
    /// Fails with `CircularDependency` instead of returning a partial order.
    pub fn topological_sort(&self) -> Result<Vec<String>, EngineError> {
        let mut order = self.postorder()?;
        order.reverse();
        Ok(order)
    }

    /// Dependencies before dependents
    pub fn installation_order(&self) -> Result<Vec<String>, EngineError> {
        self.postorder()
    }

    /// Set every node's depth to the length of its longest chain to a leaf
    pub fn compute_depths(&mut self) -> Result<(), EngineError> {
        let order = self.postorder()?;
        let mut depths: BTreeMap<String, usize> = BTreeMap::new();
        for id in &order {
            let depth = self
                .nodes
                .get(id)
                .map(|node| {
                    node.dependencies
                        .iter()
                        .filter_map(|dep| depths.get(dep))
                        .map(|d| d + 1)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            depths.insert(id.clone(), depth);
        }
        for (id, depth) in depths {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.depth = depth;
            }
        }
        Ok(())
    }
}

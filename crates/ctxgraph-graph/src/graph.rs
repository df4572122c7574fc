use crate::traversal;
use ctxgraph_core::{CtxGraphError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Adjacency of a single file in both directions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEdges {
    /// Files this file depends on
    pub dependencies: BTreeSet<String>,
    /// Files that depend on this file
    pub dependents: BTreeSet<String>,
}

/// Read-only projection of the graph over a set of paths (induced subgraph).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: BTreeMap<String, NodeEdges>,
}

impl GraphSnapshot {
    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.dependencies.len()).sum()
    }
}

#[derive(Debug, Default)]
struct GraphInner {
    nodes: HashMap<String, NodeEdges>,
    edge_count: usize,
}

impl GraphInner {
    fn node_mut(&mut self, path: &str) -> &mut NodeEdges {
        self.nodes.entry(path.to_string()).or_default()
    }

    fn insert_edge(&mut self, from: &str, to: &str) -> bool {
        let added = self.node_mut(from).dependencies.insert(to.to_string());
        self.node_mut(to).dependents.insert(from.to_string());
        if added {
            self.edge_count += 1;
        }
        added
    }

    fn delete_edge(&mut self, from: &str, to: &str) -> bool {
        let removed = self
            .nodes
            .get_mut(from)
            .map(|n| n.dependencies.remove(to))
            .unwrap_or(false);
        if let Some(target) = self.nodes.get_mut(to) {
            target.dependents.remove(from);
        }
        if removed {
            self.edge_count -= 1;
        }
        removed
    }

    fn neighbours(&self, path: &str, forward: bool) -> Vec<String> {
        self.nodes
            .get(path)
            .map(|n| {
                let set = if forward {
                    &n.dependencies
                } else {
                    &n.dependents
                };
                set.iter().cloned().collect()
            })
            .unwrap_or_default()
    }
}

/// Bidirectional file dependency graph.
///
/// Both directions of every edge are written under one write lock, so a
/// reader never observes `A in dependencies(B)` without `B in dependents(A)`.
/// The graph may contain cycles; all traversals are visited-set bounded.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    inner: RwLock<GraphInner>,
}

fn validate_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(CtxGraphError::DependencyGraph(
            "edge endpoint must be a non-empty path".to_string(),
        ));
    }
    Ok(())
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file without edges.
    pub fn add_file(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        self.inner.write().node_mut(path);
        Ok(())
    }

    /// Record that `from` depends on `to`. Returns whether the edge is new.
    pub fn add_edge(&self, from: &str, to: &str) -> Result<bool> {
        validate_path(from)?;
        validate_path(to)?;
        Ok(self.inner.write().insert_edge(from, to))
    }

    pub fn remove_edge(&self, from: &str, to: &str) -> bool {
        self.inner.write().delete_edge(from, to)
    }

    /// Replace the outgoing edges of `path` in one step. Nothing changes if
    /// any of the new endpoints is malformed.
    pub fn set_dependencies<I, S>(&self, path: &str, dependencies: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_path(path)?;
        let new_deps: BTreeSet<String> = dependencies.into_iter().map(Into::into).collect();
        for dep in &new_deps {
            validate_path(dep)?;
        }

        let mut inner = self.inner.write();
        let old_deps = inner
            .nodes
            .get(path)
            .map(|n| n.dependencies.clone())
            .unwrap_or_default();

        for stale in old_deps.difference(&new_deps) {
            inner.delete_edge(path, stale);
        }
        for added in new_deps.difference(&old_deps) {
            inner.insert_edge(path, added);
        }
        inner.node_mut(path);

        debug!(
            "Dependencies of {} set to {} entries",
            path,
            new_deps.len()
        );
        Ok(())
    }

    /// Drop a file and every edge touching it.
    pub fn remove_file(&self, path: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(edges) = inner.nodes.remove(path) else {
            return false;
        };
        for dep in &edges.dependencies {
            if let Some(n) = inner.nodes.get_mut(dep) {
                n.dependents.remove(path);
            }
        }
        for dependent in &edges.dependents {
            if let Some(n) = inner.nodes.get_mut(dependent) {
                n.dependencies.remove(path);
            }
        }
        // A self-loop is counted once but appears on both sides.
        let self_loop = edges.dependencies.contains(path) as usize;
        inner.edge_count -= edges.dependencies.len() + edges.dependents.len() - self_loop;
        true
    }

    pub fn dependencies(&self, path: &str, recursive: bool) -> BTreeSet<String> {
        self.walk(path, recursive, true)
    }

    pub fn dependents(&self, path: &str, recursive: bool) -> BTreeSet<String> {
        self.walk(path, recursive, false)
    }

    fn walk(&self, path: &str, recursive: bool, forward: bool) -> BTreeSet<String> {
        let inner = self.inner.read();
        if recursive {
            traversal::reachable(path, |p| inner.neighbours(p, forward))
        } else {
            let mut direct: BTreeSet<String> =
                inner.neighbours(path, forward).into_iter().collect();
            direct.remove(path);
            direct
        }
    }

    /// Files within `max_depth` hops of `path`, following edges in either
    /// direction. `path` itself is excluded.
    pub fn related_files(&self, path: &str, max_depth: usize) -> BTreeSet<String> {
        let inner = self.inner.read();
        let mut related = BTreeSet::new();
        let mut frontier = vec![path.to_string()];

        for _ in 0..max_depth {
            let mut next = Vec::new();
            for node in &frontier {
                for neighbour in inner
                    .neighbours(node, true)
                    .into_iter()
                    .chain(inner.neighbours(node, false))
                {
                    if neighbour != path && related.insert(neighbour.clone()) {
                        next.push(neighbour);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        related
    }

    /// Dependents of `path` layered by distance; layer 0 is `path` itself.
    pub fn dependent_levels(&self, path: &str) -> Vec<Vec<String>> {
        let inner = self.inner.read();
        traversal::levels(path, |p| inner.neighbours(p, false))
    }

    /// Whether the dependents-edges among `nodes` form a cycle.
    pub fn has_cycle_among(&self, nodes: &BTreeSet<String>) -> bool {
        let inner = self.inner.read();
        traversal::has_cycle(nodes, |p| inner.neighbours(p, false))
    }

    pub fn snapshot<I, S>(&self, paths: I) -> GraphSnapshot
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: BTreeSet<String> = paths.into_iter().map(|p| p.as_ref().to_string()).collect();
        let inner = self.inner.read();

        let nodes = wanted
            .iter()
            .filter_map(|path| {
                inner.nodes.get(path).map(|edges| {
                    let projected = NodeEdges {
                        dependencies: edges
                            .dependencies
                            .intersection(&wanted)
                            .cloned()
                            .collect(),
                        dependents: edges.dependents.intersection(&wanted).cloned().collect(),
                    };
                    (path.clone(), projected)
                })
            })
            .collect();

        GraphSnapshot { nodes }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.read().nodes.contains_key(path)
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().edge_count
    }

    pub fn files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.inner.read().nodes.keys().cloned().collect();
        files.sort();
        files
    }
}

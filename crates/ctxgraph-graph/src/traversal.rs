//! Cycle-safe traversals over an adjacency function.
//!
//! Every walk keeps an explicit visited set, so each node is expanded at most
//! once and the walk is O(V+E) even when the graph has cycles.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// All nodes reachable from `start` in one or more hops. `start` itself is
/// not part of the result, even when it sits on a cycle.
pub fn reachable<F, I>(start: &str, mut neighbours: F) -> BTreeSet<String>
where
    F: FnMut(&str) -> I,
    I: IntoIterator<Item = String>,
{
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    visited.insert(start.to_string());
    queue.push_back(start.to_string());

    let mut result = BTreeSet::new();
    while let Some(current) = queue.pop_front() {
        for next in neighbours(&current) {
            if visited.insert(next.clone()) {
                result.insert(next.clone());
                queue.push_back(next);
            }
        }
    }
    result
}

/// Breadth-first layers starting at `start` (layer 0). Each node appears in
/// exactly one layer, the one of its shortest distance from `start`.
pub fn levels<F, I>(start: &str, mut neighbours: F) -> Vec<Vec<String>>
where
    F: FnMut(&str) -> I,
    I: IntoIterator<Item = String>,
{
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.to_string());

    let mut layers = vec![vec![start.to_string()]];
    loop {
        let mut next_layer = BTreeSet::new();
        let frontier = layers.last().cloned().unwrap_or_default();
        for node in &frontier {
            for next in neighbours(node) {
                if visited.insert(next.clone()) {
                    next_layer.insert(next);
                }
            }
        }
        if next_layer.is_empty() {
            break;
        }
        layers.push(next_layer.into_iter().collect());
    }
    layers
}

/// Whether the subgraph induced by `nodes` contains a directed cycle.
/// Iterative three-colour DFS; no recursion.
pub fn has_cycle<F, I>(nodes: &BTreeSet<String>, mut neighbours: F) -> bool
where
    F: FnMut(&str) -> I,
    I: IntoIterator<Item = String>,
{
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Colour {
        White,
        Grey,
        Black,
    }

    let mut colour: HashMap<&str, Colour> =
        nodes.iter().map(|n| (n.as_str(), Colour::White)).collect();

    for root in nodes {
        if colour.get(root.as_str()) != Some(&Colour::White) {
            continue;
        }

        // (node, remaining children)
        let mut stack: Vec<(&str, Vec<String>)> = Vec::new();
        colour.insert(root.as_str(), Colour::Grey);
        stack.push((root.as_str(), neighbours(root).into_iter().collect()));

        loop {
            let next = match stack.last_mut() {
                Some((_, children)) => children.pop(),
                None => break,
            };
            match next {
                Some(child) => {
                    let Some(key) = nodes.get(&child) else {
                        continue;
                    };
                    match colour.get(key.as_str()).copied() {
                        Some(Colour::Grey) => return true,
                        Some(Colour::White) => {
                            colour.insert(key.as_str(), Colour::Grey);
                            let grandchildren = neighbours(key).into_iter().collect();
                            stack.push((key.as_str(), grandchildren));
                        }
                        _ => {}
                    }
                }
                None => {
                    if let Some((node, _)) = stack.pop() {
                        colour.insert(node, Colour::Black);
                    }
                }
            }
        }
    }
    false
}

//! Cycle-tolerant topological ordering of the canonical-URL dependency
//! graph.
//!
//! Depth-first post-order with a visiting set: dependencies are appended
//! before their dependents, so the output is leaves-first. A back edge
//! records the current DFS path as a cycle and traversal continues; cycles
//! never abort compilation, they only mark the URLs involved as
//! best-effort.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Result of sorting: leaves-first order plus every detected cycle.
#[derive(Debug, Default, Clone)]
pub struct TopoSort {
    pub sorted: Vec<String>,
    pub cycles: Vec<Vec<String>>,
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    Visiting,
    Done,
}

pub fn topo_sort(graph: &BTreeMap<String, BTreeSet<String>>) -> TopoSort {
    topo_sort_seeded(graph, graph.keys().map(String::as_str))
}

/// Sort with an explicit traversal seed order. Ties between unrelated
/// nodes resolve to seed order, which is how the by-kind stabilizer
/// reaches the final ordering.
pub fn topo_sort_seeded<'a>(
    graph: &'a BTreeMap<String, BTreeSet<String>>,
    seeds: impl IntoIterator<Item = &'a str>,
) -> TopoSort {
    let mut result = TopoSort::default();
    let mut states: HashMap<&str, VisitState> = HashMap::with_capacity(graph.len());
    let mut path: Vec<&str> = Vec::new();

    for node in seeds {
        if graph.contains_key(node) {
            visit(node, graph, &mut states, &mut path, &mut result);
        }
    }
    // Anything the seeds missed still takes a position.
    for node in graph.keys() {
        visit(node, graph, &mut states, &mut path, &mut result);
    }

    result
}

fn visit<'a>(
    node: &'a str,
    graph: &'a BTreeMap<String, BTreeSet<String>>,
    states: &mut HashMap<&'a str, VisitState>,
    path: &mut Vec<&'a str>,
    result: &mut TopoSort,
) {
    match states.get(node) {
        Some(VisitState::Done) => return,
        Some(VisitState::Visiting) => {
            // Back edge: the cycle is the path suffix starting at `node`.
            let start = path.iter().position(|n| *n == node).unwrap_or(0);
            let cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            if !cycle.is_empty() {
                result.cycles.push(cycle);
            }
            return;
        }
        None => {}
    }

    states.insert(node, VisitState::Visiting);
    path.push(node);

    if let Some(deps) = graph.get(node) {
        for dep in deps {
            // Dependencies outside the registered graph resolve to `Any`
            // later; they take no position in the order.
            if graph.contains_key(dep.as_str()) {
                visit(dep, graph, states, path, result);
            }
        }
    }

    path.pop();
    states.insert(node, VisitState::Done);
    result.sorted.push(node.to_string());
}

/// Total order over URLs induced by a sort result: sorted URLs by index
/// (dependencies first), sorted before unsorted, unsorted by URL.
pub struct DependencyOrder {
    index: HashMap<String, usize>,
}

impl DependencyOrder {
    pub fn new(sort: &TopoSort) -> Self {
        let index = sort
            .sorted
            .iter()
            .enumerate()
            .map(|(i, url)| (url.clone(), i))
            .collect();
        Self { index }
    }

    pub fn position(&self, url: &str) -> Option<usize> {
        self.index.get(url).copied()
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match (self.index.get(a), self.index.get(b)) {
            (Some(ia), Some(ib)) => ia.cmp(ib),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    }
}

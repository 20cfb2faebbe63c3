// src/dag/graph.rs

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::cmp::Reverse;
use std::fmt::Debug;

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::{DiGraphMap, NodeTrait};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies: nodes that must finish before this one can run.
    deps: Vec<usize>,
    /// Direct dependents: nodes that depend on this one.
    dependents: Vec<usize>,
}

/// In-memory DAG over plan positions.
///
/// Nodes are identified by their index (the order they were inserted in).
/// Acyclicity is established by the resolver before a graph reaches the
/// scheduler, so this only keeps adjacency for scheduling and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    nodes: Vec<DagNode>,
}

impl DagGraph {
    /// Build a graph with `len` nodes and `(dep, dependent)` edges.
    /// Duplicate edges and self-loops are ignored.
    pub fn from_edges(len: usize, edges: &[(usize, usize)]) -> Self {
        let mut nodes = vec![DagNode::default(); len];
        let mut seen: HashSet<(usize, usize)> = HashSet::new();

        for &(dep, dependent) in edges {
            if dep == dependent || dep >= len || dependent >= len || !seen.insert((dep, dependent)) {
                continue;
            }
            nodes[dependent].deps.push(dep);
            nodes[dep].dependents.push(dependent);
        }
        for node in nodes.iter_mut() {
            node.deps.sort_unstable();
            node.dependents.sort_unstable();
        }

        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Immediate dependencies of a node.
    pub fn dependencies_of(&self, idx: usize) -> &[usize] {
        self.nodes.get(idx).map(|n| n.deps.as_slice()).unwrap_or(&[])
    }

    /// Immediate dependents of a node.
    pub fn dependents_of(&self, idx: usize) -> &[usize] {
        self.nodes
            .get(idx)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// All nodes reachable downstream of `idx` (excluding `idx`).
    pub fn transitive_dependents(&self, idx: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<usize> = self.dependents_of(idx).iter().copied().collect();
        while let Some(n) = queue.pop_front() {
            if !visited.insert(n) {
                continue;
            }
            out.push(n);
            queue.extend(self.dependents_of(n).iter().copied());
        }
        out.sort_unstable();
        out
    }

    /// Kahn's algorithm, always releasing the lowest ready index first.
    ///
    /// Returns `Err` with the nodes that could not be ordered when the graph
    /// has a cycle.
    pub fn toposort_by_insertion(&self) -> std::result::Result<Vec<usize>, Vec<usize>> {
        let mut indegree: Vec<usize> = self.nodes.iter().map(|n| n.deps.len()).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &dependent in &self.nodes[idx].dependents {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let placed: HashSet<usize> = order.into_iter().collect();
            Err((0..self.nodes.len()).filter(|i| !placed.contains(i)).collect())
        }
    }
}

/// Find one dependency cycle among `nodes` given `(from, to)` edges.
///
/// The cycle is returned as a closed path (`a -> b -> a`), starting from
/// the earliest member in `nodes` order.
pub fn find_cycle<N>(nodes: &[N], edges: &[(N, N)]) -> Option<Vec<N>>
where
    N: NodeTrait + Debug,
{
    let mut graph: DiGraphMap<N, ()> = DiGraphMap::new();
    for &n in nodes {
        graph.add_node(n);
    }
    for &(from, to) in edges {
        graph.add_edge(from, to, ());
    }

    let position: HashMap<N, usize> = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();
    let rank = |n: &N| position.get(n).copied().unwrap_or(usize::MAX);

    let component = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .min_by_key(|scc| scc.iter().map(|n| rank(n)).min().unwrap_or(usize::MAX))?;

    let start = *component.iter().min_by_key(|n| rank(n))?;
    if component.len() == 1 {
        return Some(vec![start, start]);
    }

    // Breadth-first search back to `start` inside the component.
    let members: HashSet<N> = component.iter().copied().collect();
    let mut parent: HashMap<N, N> = HashMap::new();
    let mut queue: VecDeque<N> = VecDeque::new();
    let mut successors: Vec<N> = graph.neighbors(start).filter(|n| members.contains(n)).collect();
    successors.sort_by_key(|n| rank(n));
    for s in successors {
        if s != start && !parent.contains_key(&s) {
            parent.insert(s, start);
            queue.push_back(s);
        }
    }

    while let Some(n) = queue.pop_front() {
        let mut next: Vec<N> = graph.neighbors(n).filter(|m| members.contains(m)).collect();
        next.sort_by_key(|m| rank(m));
        for m in next {
            if m == start {
                let mut chain = vec![n];
                let mut cur = n;
                while let Some(&p) = parent.get(&cur) {
                    if p == start {
                        break;
                    }
                    chain.push(p);
                    cur = p;
                }
                chain.reverse();
                let mut path = vec![start];
                path.extend(chain);
                path.push(start);
                return Some(path);
            }
            if !parent.contains_key(&m) {
                parent.insert(m, n);
                queue.push_back(m);
            }
        }
    }

    Some(component)
}

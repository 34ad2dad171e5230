use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::graph::{Edge, EdgeReason, NodeId, ResourceGraph};

/// Query trait implemented by all query types.
///
/// Given an immutable reference to a `ResourceGraph`, returns a result of type `R`.
pub trait Query<R> {
    fn run(&self, graph: &ResourceGraph) -> R;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphSummary {
    pub parser: Option<String>,
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub edges_by_reason: BTreeMap<String, usize>,
}

/// Node counts per type and edge counts per reason.
#[derive(Debug, Default)]
pub struct SummaryQuery;

impl SummaryQuery {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Query<GraphSummary> for SummaryQuery {
    fn run(&self, graph: &ResourceGraph) -> GraphSummary {
        let mut summary = GraphSummary {
            parser: graph.meta.get("parser").and_then(|v| v.as_str()).map(str::to_string),
            node_count: graph.nodes.len(),
            edge_count: graph.edges.len(),
            ..GraphSummary::default()
        };
        for n in &graph.nodes {
            *summary.nodes_by_type.entry(n.node_type.clone()).or_default() += 1;
        }
        for e in &graph.edges {
            *summary.edges_by_reason.entry(e.reason.as_str().to_string()).or_default() += 1;
        }
        summary
    }
}

/// Which edges of a node `NeighborsQuery` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighbor {
    pub id: NodeId,
    /// `out` when the queried node is the edge source, `in` otherwise.
    pub direction: &'static str,
    pub reason: EdgeReason,
}

/// Edges adjacent to one node, in edge order.
pub struct NeighborsQuery {
    pub node: NodeId,
    pub direction: Direction,
}

impl NeighborsQuery {
    #[must_use]
    pub fn new(node: &str, direction: Direction) -> Self {
        Self { node: NodeId::from(node), direction }
    }
}

impl Query<Vec<Neighbor>> for NeighborsQuery {
    fn run(&self, graph: &ResourceGraph) -> Vec<Neighbor> {
        let outgoing = matches!(self.direction, Direction::Outgoing | Direction::Both);
        let incoming = matches!(self.direction, Direction::Incoming | Direction::Both);
        let mut out = Vec::new();
        for e in &graph.edges {
            if outgoing && e.from_id == self.node {
                out.push(Neighbor { id: e.to_id.clone(), direction: "out", reason: e.reason });
            }
            if incoming && e.to_id == self.node {
                out.push(Neighbor { id: e.from_id.clone(), direction: "in", reason: e.reason });
            }
        }
        out
    }
}

/// Edges whose source or target is not a node of the graph.
#[derive(Debug, Default)]
pub struct DanglingEdgesQuery;

impl DanglingEdgesQuery {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Query<Vec<Edge>> for DanglingEdgesQuery {
    fn run(&self, graph: &ResourceGraph) -> Vec<Edge> {
        let ids: std::collections::HashSet<&NodeId> = graph.nodes.iter().map(|n| &n.id).collect();
        graph
            .edges
            .iter()
            .filter(|e| !ids.contains(&e.from_id) || !ids.contains(&e.to_id))
            .cloned()
            .collect()
    }
}

/// Dependency cycles among nodes, following every edge reason.
///
/// Each cycle is reported once per DFS back edge, starting at the node the
/// back edge points to. Nodes are visited in id order so output is stable.
#[derive(Debug, Default)]
pub struct CyclesQuery;

impl CyclesQuery {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

struct CycleSearch<'a> {
    adj: &'a [Vec<usize>],
    ids: &'a [&'a NodeId],
    visited: Vec<bool>,
    on_stack: Vec<bool>,
    path: Vec<usize>,
    cycles: Vec<Vec<NodeId>>,
}

impl CycleSearch<'_> {
    fn visit(&mut self, u: usize) {
        self.visited[u] = true;
        self.on_stack[u] = true;
        self.path.push(u);
        for &v in &self.adj[u] {
            if !self.visited[v] {
                self.visit(v);
            } else if self.on_stack[v] {
                if let Some(pos) = self.path.iter().position(|&x| x == v) {
                    self.cycles.push(self.path[pos..].iter().map(|&i| self.ids[i].clone()).collect());
                }
            }
        }
        self.path.pop();
        self.on_stack[u] = false;
    }
}

impl Query<Vec<Vec<NodeId>>> for CyclesQuery {
    fn run(&self, graph: &ResourceGraph) -> Vec<Vec<NodeId>> {
        let mut ids: Vec<&NodeId> = graph.nodes.iter().map(|n| &n.id).collect();
        ids.sort();
        ids.dedup();
        let index: HashMap<&NodeId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
        for e in &graph.edges {
            if let (Some(&u), Some(&v)) = (index.get(&e.from_id), index.get(&e.to_id)) {
                if u != v {
                    adj[u].push(v);
                }
            }
        }
        // Parallel edges with different reasons collapse to one
        for neigh in &mut adj {
            neigh.sort_unstable();
            neigh.dedup();
        }

        let mut search = CycleSearch {
            adj: &adj,
            ids: &ids,
            visited: vec![false; ids.len()],
            on_stack: vec![false; ids.len()],
            path: Vec::new(),
            cycles: Vec::new(),
        };
        for u in 0..ids.len() {
            if !search.visited[u] {
                search.visit(u);
            }
        }
        search.cycles
    }
}

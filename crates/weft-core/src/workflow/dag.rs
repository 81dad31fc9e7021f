//! Graph construction, cycle detection and level computation.
//!
//! Uses `petgraph` to check acyclicity with a topological sort. The scheduler
//! itself works on the plain index lists in `WorkflowGraph`, which keep edges
//! in declaration order so dispatch is deterministic.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use weft_types::workflow::WorkflowDefinition;

use super::definition::WorkflowInvalidError;

/// An edge with endpoints resolved to node indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub branch: Option<String>,
}

/// Index form of a validated definition.
///
/// Nodes are indexed in id order (the definition's `BTreeMap` order).
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    edges: Vec<GraphEdge>,
    incoming: Vec<Vec<usize>>,
    outgoing: Vec<Vec<usize>>,
    entry: usize,
    topo_order: Vec<usize>,
}

impl WorkflowGraph {
    /// Build the graph and check its structure: edge endpoints exist, no
    /// self-loops or duplicate edges, no cycles, exactly one entry node.
    pub fn build(def: &WorkflowDefinition) -> Result<Self, WorkflowInvalidError> {
        if def.nodes.is_empty() {
            return Err(WorkflowInvalidError::Empty);
        }

        let ids: Vec<String> = def.nodes.keys().cloned().collect();
        let index: HashMap<String, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut edges = Vec::with_capacity(def.edges.len());
        let mut incoming = vec![Vec::new(); ids.len()];
        let mut outgoing = vec![Vec::new(); ids.len()];
        let mut seen: HashSet<(usize, usize)> = HashSet::new();

        for edge in &def.edges {
            let endpoint = |id: &str| {
                index
                    .get(id)
                    .copied()
                    .ok_or_else(|| WorkflowInvalidError::UnknownEdgeEndpoint {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: id.to_string(),
                    })
            };
            let from = endpoint(&edge.from)?;
            let to = endpoint(&edge.to)?;

            if from == to {
                return Err(WorkflowInvalidError::SelfLoop(edge.from.clone()));
            }
            if !seen.insert((from, to)) {
                return Err(WorkflowInvalidError::DuplicateEdge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                });
            }

            let edge_idx = edges.len();
            edges.push(GraphEdge {
                from,
                to,
                branch: edge.branch.clone(),
            });
            outgoing[from].push(edge_idx);
            incoming[to].push(edge_idx);
        }

        // Topological sort -- detects cycles
        let mut graph = DiGraph::<usize, ()>::new();
        let node_indices: Vec<_> = (0..ids.len()).map(|i| graph.add_node(i)).collect();
        for edge in &edges {
            graph.add_edge(node_indices[edge.from], node_indices[edge.to], ());
        }
        let sorted = toposort(&graph, None).map_err(|cycle| {
            let node = graph[cycle.node_id()];
            WorkflowInvalidError::CycleDetected(ids[node].clone())
        })?;
        let topo_order: Vec<usize> = sorted.into_iter().map(|n| graph[n]).collect();

        let entries: Vec<usize> = (0..ids.len()).filter(|&i| incoming[i].is_empty()).collect();
        let entry = match entries.as_slice() {
            [entry] => *entry,
            _ => {
                return Err(WorkflowInvalidError::MultipleEntryNodes(
                    entries.iter().map(|&i| ids[i].clone()).collect(),
                ));
            }
        };

        Ok(Self {
            ids,
            index,
            edges,
            incoming,
            outgoing,
            entry,
            topo_order,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, node: usize) -> &str {
        &self.ids[node]
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn entry(&self) -> usize {
        self.entry
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn edge(&self, edge: usize) -> &GraphEdge {
        &self.edges[edge]
    }

    /// Incoming edge indices of `node`, in declaration order.
    pub fn incoming(&self, node: usize) -> &[usize] {
        &self.incoming[node]
    }

    /// Outgoing edge indices of `node`, in declaration order.
    pub fn outgoing(&self, node: usize) -> &[usize] {
        &self.outgoing[node]
    }

    pub fn topological_order(&self) -> &[usize] {
        &self.topo_order
    }

    /// Group nodes by depth from the entry node.
    ///
    /// Level 0 holds the entry; every other node sits one level below its
    /// deepest predecessor. Nodes in a level have no edges between them.
    pub fn levels(&self) -> Vec<Vec<&str>> {
        let mut depth = vec![0usize; self.len()];
        for &node in &self.topo_order {
            depth[node] = self.incoming[node]
                .iter()
                .map(|&e| depth[self.edges[e].from] + 1)
                .max()
                .unwrap_or(0);
        }

        let max_depth = depth.iter().copied().max().unwrap_or(0);
        let mut levels: Vec<Vec<&str>> = vec![Vec::new(); max_depth + 1];
        for (node, d) in depth.iter().enumerate() {
            levels[*d].push(self.ids[node].as_str());
        }
        levels
    }

    /// Transitive predecessors of `id`, sorted. Empty for unknown ids.
    pub fn ancestors(&self, id: &str) -> Vec<&str> {
        let Some(start) = self.index_of(id) else {
            return Vec::new();
        };

        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            for &e in &self.incoming[current] {
                let from = self.edges[e].from;
                if visited.insert(from) {
                    stack.push(from);
                }
            }
        }

        let mut out: Vec<&str> = visited.into_iter().map(|i| self.ids[i].as_str()).collect();
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use weft_types::workflow::{EdgeSpec, NodeSpec};

    fn def(nodes: &[&str], edges: Vec<EdgeSpec>) -> WorkflowDefinition {
        let nodes: BTreeMap<String, NodeSpec> = nodes
            .iter()
            .map(|id| {
                let node: NodeSpec =
                    serde_json::from_value(serde_json::json!({"id": id, "type": "transform"}))
                        .unwrap();
                (id.to_string(), node)
            })
            .collect();
        WorkflowDefinition {
            id: "wf".to_string(),
            name: None,
            description: None,
            nodes,
            edges,
            metadata: Default::default(),
        }
    }

    fn diamond() -> WorkflowDefinition {
        def(
            &["a", "b", "c", "d"],
            vec![
                EdgeSpec::new("a", "b"),
                EdgeSpec::new("a", "c"),
                EdgeSpec::new("b", "d"),
                EdgeSpec::new("c", "d"),
            ],
        )
    }

    #[test]
    fn diamond_levels_and_entry() {
        let graph = WorkflowGraph::build(&diamond()).unwrap();
        assert_eq!(graph.id(graph.entry()), "a");
        assert_eq!(graph.levels(), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
        let d = graph.index_of("d").unwrap();
        assert_eq!(graph.incoming(d).len(), 2);
        assert_eq!(graph.ancestors("d"), vec!["a", "b", "c"]);
        assert!(graph.ancestors("a").is_empty());
    }

    #[test]
    fn topological_order_respects_edges() {
        let graph = WorkflowGraph::build(&diamond()).unwrap();
        let pos = |id: &str| {
            let idx = graph.index_of(id).unwrap();
            graph.topological_order().iter().position(|&n| n == idx).unwrap()
        };
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn cycle_is_rejected() {
        let result = WorkflowGraph::build(&def(
            &["start", "a", "b"],
            vec![
                EdgeSpec::new("start", "a"),
                EdgeSpec::new("a", "b"),
                EdgeSpec::new("b", "a"),
            ],
        ));
        assert!(matches!(result, Err(WorkflowInvalidError::CycleDetected(_))));
    }

    #[test]
    fn multiple_entries_are_rejected() {
        let result = WorkflowGraph::build(&def(&["a", "b"], vec![]));
        match result {
            Err(WorkflowInvalidError::MultipleEntryNodes(ids)) => assert_eq!(ids, vec!["a", "b"]),
            other => panic!("expected MultipleEntryNodes, got {other:?}"),
        }
    }

    #[test]
    fn unknown_endpoint_self_loop_and_duplicate() {
        let result = WorkflowGraph::build(&def(&["a"], vec![EdgeSpec::new("a", "ghost")]));
        assert!(matches!(
            result,
            Err(WorkflowInvalidError::UnknownEdgeEndpoint { ref missing, .. }) if missing == "ghost"
        ));

        let result = WorkflowGraph::build(&def(&["a"], vec![EdgeSpec::new("a", "a")]));
        assert!(matches!(result, Err(WorkflowInvalidError::SelfLoop(_))));

        let result = WorkflowGraph::build(&def(
            &["a", "b"],
            vec![EdgeSpec::new("a", "b"), EdgeSpec::on_branch("a", "b", "true")],
        ));
        assert!(matches!(result, Err(WorkflowInvalidError::DuplicateEdge { .. })));
    }

    #[test]
    fn empty_definition_is_rejected() {
        assert!(matches!(
            WorkflowGraph::build(&def(&[], vec![])),
            Err(WorkflowInvalidError::Empty)
        ));
    }
}

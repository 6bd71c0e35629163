use std::collections::{HashMap, HashSet, VecDeque};

use crate::dsl::{Edge, Graph, ShaderStage};
use crate::error::CompileError;

/// Edges that take part in compiling `stage`, plus the stage-tagged edges
/// that were dropped because an endpoint is explicitly bound to the other
/// stage.
pub fn stage_edges(graph: &Graph, stage: ShaderStage) -> (Vec<&Edge>, Vec<&Edge>) {
    let stage_of: HashMap<&str, Option<ShaderStage>> =
        graph.nodes.iter().map(|n| (n.id.as_str(), n.stage)).collect();
    let compatible = |id: &str| match stage_of.get(id) {
        Some(Some(s)) => *s == stage,
        _ => true,
    };

    let mut kept = Vec::new();
    let mut mismatched = Vec::new();
    for e in graph.edges.iter().filter(|e| e.stage == stage) {
        if compatible(&e.from) && compatible(&e.to) {
            kept.push(e);
        } else {
            mismatched.push(e);
        }
    }
    (kept, mismatched)
}

pub fn upstream_reachable(edges: &[&Edge], start: &str) -> HashSet<String> {
    let mut incoming: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in edges {
        incoming.entry(e.to.as_str()).or_default().push(e.from.as_str());
    }

    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<&str> = vec![start];
    while let Some(n) = stack.pop() {
        if !visited.insert(n.to_string()) {
            continue;
        }
        if let Some(prevs) = incoming.get(n) {
            for p in prevs {
                stack.push(*p);
            }
        }
    }
    visited
}

/// Kahn's algorithm over `node_ids` (in graph order) and the edges between
/// them. Ties resolve by node order, successors by edge order, so the
/// result is stable for a given graph.
pub fn topo_sort(node_ids: &[&str], edges: &[&Edge], stage: ShaderStage) -> Result<Vec<String>, CompileError> {
    let mut indeg: HashMap<&str, usize> = node_ids.iter().map(|id| (*id, 0usize)).collect();

    let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
    for e in edges {
        if !indeg.contains_key(e.from.as_str()) {
            continue;
        }
        let Some(d) = indeg.get_mut(e.to.as_str()) else {
            continue;
        };
        *d += 1;
        outgoing.entry(e.from.as_str()).or_default().push(e.to.as_str());
    }

    let mut q: VecDeque<&str> = node_ids.iter().copied().filter(|id| indeg[id] == 0).collect();
    let mut order: Vec<String> = Vec::with_capacity(node_ids.len());

    while let Some(n) = q.pop_front() {
        order.push(n.to_string());
        if let Some(nexts) = outgoing.get(n) {
            for m in nexts {
                if let Some(entry) = indeg.get_mut(m) {
                    *entry -= 1;
                    if *entry == 0 {
                        q.push_back(*m);
                    }
                }
            }
        }
    }

    if order.len() != node_ids.len() {
        return Err(CompileError::Cycle { stage });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{add_node, expression_node, output_node, source_node};
    use crate::dsl::NodeConfig;

    fn graph() -> Graph {
        Graph::new(
            vec![
                output_node("out", "Output", ShaderStage::Fragment),
                add_node("add"),
                expression_node("a", "A", "vec4(1.0)"),
                expression_node("b", "B", "vec4(2.0)"),
                source_node("v", "Vert", NodeConfig::default(), "void main() {}", ShaderStage::Vertex),
                expression_node("lonely", "Lonely", "vec4(0.0)"),
            ],
            vec![
                Edge::new("b", "add", "out", "b", ShaderStage::Fragment),
                Edge::new("a", "add", "out", "a", ShaderStage::Fragment),
                Edge::new("add", "out", "out", "color", ShaderStage::Fragment),
                Edge::new("v", "add", "out", "c", ShaderStage::Fragment),
            ],
        )
    }

    #[test]
    fn stage_edges_drop_mismatched_endpoints() {
        let g = graph();
        let (kept, mismatched) = stage_edges(&g, ShaderStage::Fragment);
        assert_eq!(kept.len(), 3);
        assert_eq!(mismatched.len(), 1);
        assert_eq!(mismatched[0].from, "v");
        let (kept, _) = stage_edges(&g, ShaderStage::Vertex);
        assert!(kept.is_empty());
    }

    #[test]
    fn reachable_from_output() {
        let g = graph();
        let (kept, _) = stage_edges(&g, ShaderStage::Fragment);
        let active = upstream_reachable(&kept, "out");
        let mut ids: Vec<_> = active.into_iter().collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "add", "b", "out"]);
    }

    #[test]
    fn topo_order_is_deterministic() {
        let g = graph();
        let (kept, _) = stage_edges(&g, ShaderStage::Fragment);
        let ids = ["out", "add", "a", "b"];
        let order = topo_sort(&ids, &kept, ShaderStage::Fragment).unwrap();
        assert_eq!(order, vec!["a", "b", "add", "out"]);
    }

    #[test]
    fn cycle_is_an_error() {
        let e1 = Edge::new("x", "y", "out", "a", ShaderStage::Fragment);
        let e2 = Edge::new("y", "x", "out", "a", ShaderStage::Fragment);
        let err = topo_sort(&["x", "y"], &[&e1, &e2], ShaderStage::Fragment).unwrap_err();
        assert_eq!(err, CompileError::Cycle { stage: ShaderStage::Fragment });
    }
}

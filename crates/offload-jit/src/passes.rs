// crates/offload-jit/src/passes.rs
//! Code-shaping passes run on a lowered graph before kernel compilation.
//!
//! Each pass returns a new graph. Rewrites rely on the node list being in
//! definition order, which [`GraphBuilder::finish`](crate::graph::GraphBuilder::finish)
//! guarantees, so a single forward sweep with a remap table is enough.

use crate::graph::{Graph, Node, NodeId};

/// Where a captured-scope read sits in the shaped graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeBinding {
    pub node: NodeId,
    pub slot: u32,
}

/// Run every shaping pass in order.
#[tracing::instrument(level = "debug", skip_all, fields(nodes = graph.len()))]
pub fn shape(graph: &Graph) -> Graph {
    let graph = strip_frame_states(graph);
    let graph = strip_type_guards(&graph);
    let graph = fold_boxing(&graph);
    let graph = eliminate_dead_nodes(&graph);
    tracing::debug!(nodes = graph.len(), "shaped graph");
    graph
}

/// Drop frame-state anchors and everything only they kept alive.
pub fn strip_frame_states(graph: &Graph) -> Graph {
    let mut stripped = graph.clone();
    stripped
        .anchors
        .retain(|a| !matches!(graph.node(*a), Some(Node::FrameState { .. })));
    eliminate_dead_nodes(&stripped)
}

/// Replace every type guard with the value it guards.
pub fn strip_type_guards(graph: &Graph) -> Graph {
    forward(graph, |node| match node {
        Node::TypeGuard { value, .. } => Some(*value),
        _ => None,
    })
}

/// Collapse box and unbox nodes onto their operand.
pub fn fold_boxing(graph: &Graph) -> Graph {
    forward(graph, |node| match node {
        Node::Box(value) | Node::Unbox(value) => Some(*value),
        _ => None,
    })
}

/// Remove nodes not reachable from an output or an anchor, renumbering the rest.
pub fn eliminate_dead_nodes(graph: &Graph) -> Graph {
    let mut live = vec![false; graph.len()];
    for id in graph.outputs.iter().chain(graph.anchors.iter()) {
        if let Some(flag) = live.get_mut(id.slot()) {
            *flag = true;
        }
    }
    for index in (0..graph.nodes.len()).rev() {
        if !live[index] {
            continue;
        }
        for input in graph.nodes[index].inputs() {
            if let Some(flag) = live.get_mut(input.slot()) {
                *flag = true;
            }
        }
    }

    let mut remap = vec![NodeId::new(0); graph.len()];
    let mut nodes = Vec::with_capacity(graph.len());
    for (index, node) in graph.nodes.iter().enumerate() {
        if !live[index] {
            continue;
        }
        remap[index] = NodeId::new(nodes.len() as u32);
        nodes.push(node.map_inputs(|i| remap[i.slot()]));
    }
    Graph {
        nodes,
        outputs: graph.outputs.iter().map(|o| remap[o.slot()]).collect(),
        anchors: graph.anchors.iter().map(|a| remap[a.slot()]).collect(),
    }
}

/// Every captured-scope read, in node order.
pub fn detect_scope(graph: &Graph) -> Vec<ScopeBinding> {
    graph
        .nodes()
        .filter_map(|(node, n)| match n {
            Node::ScopeRead { slot } | Node::ScopeElement { slot, .. } => {
                Some(ScopeBinding { node, slot: *slot })
            }
            _ => None,
        })
        .collect()
}

/// Rebuild `graph`, redirecting uses of a node to the input `redirect` picks.
fn forward(graph: &Graph, redirect: impl Fn(&Node) -> Option<NodeId>) -> Graph {
    let mut remap: Vec<NodeId> = Vec::with_capacity(graph.len());
    let mut nodes = Vec::with_capacity(graph.len());
    for node in &graph.nodes {
        let target = match redirect(node) {
            Some(operand) => remap[operand.slot()],
            None => {
                let id = NodeId::new(nodes.len() as u32);
                nodes.push(node.map_inputs(|i| remap[i.slot()]));
                id
            }
        };
        remap.push(target);
    }
    Graph {
        nodes,
        outputs: graph.outputs.iter().map(|o| remap[o.slot()]).collect(),
        anchors: graph.anchors.iter().map(|a| remap[a.slot()]).collect(),
    }
}

#[cfg(test)]
mod tests {
    use offload_runtime::{Scalar, ScalarKind};

    use super::*;
    use crate::graph::{BinaryOp, CompareOp};

    /// `x + 1` as lowering would hand it over: boxed, guarded, with frame states.
    fn lowered_increment() -> Graph {
        let mut b = Graph::builder();
        let raw = b.param(0);
        let boxed = b.boxed(raw);
        let guarded = b.type_guard(boxed, ScalarKind::Int);
        let x = b.unbox(guarded);
        b.frame_state(&[boxed]);
        let one = b.constant(Scalar::Int(1));
        let sum = b.binary(BinaryOp::Add, x, one);
        let out = b.boxed(sum);
        b.frame_state(&[out, guarded]);
        b.finish(&[out]).unwrap()
    }

    #[test]
    fn shape_removes_interpreter_nodes() {
        let shaped = shape(&lowered_increment());
        assert!(!shaped.has_interpreter_nodes());
        assert_eq!(shaped.len(), 3);
        assert_eq!(
            shaped.node(shaped.outputs()[0]),
            Some(&Node::Binary(BinaryOp::Add, NodeId::new(0), NodeId::new(1)))
        );
        assert!(shaped.anchors().is_empty());
    }

    #[test]
    fn frame_states_go_but_deopts_stay() {
        let mut b = Graph::builder();
        let x = b.param(0);
        let zero = b.constant(Scalar::Int(0));
        let neg = b.compare(CompareOp::Lt, x, zero);
        b.deopt_if(neg);
        b.frame_state(&[x]);
        let g = b.finish(&[x]).unwrap();

        let stripped = strip_frame_states(&g);
        assert_eq!(stripped.len(), 4);
        assert_eq!(stripped.anchors().len(), 1);
        assert!(matches!(
            stripped.node(stripped.anchors()[0]),
            Some(Node::DeoptIf { .. })
        ));
    }

    #[test]
    fn dead_nodes_are_dropped_and_renumbered() {
        let mut b = Graph::builder();
        let _unused = b.constant(Scalar::Double(9.0));
        let x = b.param(0);
        let g = b.finish(&[x]).unwrap();
        let cleaned = eliminate_dead_nodes(&g);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned.outputs(), &[NodeId::new(0)]);
    }

    #[test]
    fn scope_reads_are_detected() {
        let mut b = Graph::builder();
        let x = b.param(0);
        let k = b.scope_read(2);
        let i = b.constant(Scalar::Int(0));
        let e = b.scope_element(0, i);
        let a = b.binary(BinaryOp::Mul, x, k);
        let out = b.binary(BinaryOp::Add, a, e);
        let g = b.finish(&[out]).unwrap();
        assert_eq!(
            detect_scope(&g),
            vec![
                ScopeBinding { node: k, slot: 2 },
                ScopeBinding { node: e, slot: 0 },
            ]
        );
    }
}

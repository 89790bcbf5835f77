// crates/offload-jit/src/graph.rs
//! Lowered per-element graphs.
//!
//! A `Graph` is what the lowering collaborator hands over once a call target
//! is hot: a topologically ordered node list describing the computation for a
//! single element. Parameters are the fields of one input row, outputs are the
//! fields of one output row.
//!
//! Graphs straight out of lowering still carry interpreter-only nodes (frame
//! states, type guards, box/unbox pairs). The passes in [`crate::passes`]
//! remove them before a kernel compiler ever sees the graph.

use std::fmt;

use offload_runtime::{Scalar, ScalarKind};
use smallvec::SmallVec;

use crate::errors::{CompileError, CompileResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }

    pub(crate) fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Opaque identity of a traced call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(u64);

impl TraceId {
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    Abs,
    Sqrt,
    ToDouble,
    ToInt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Min,
    Max,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Field `n` of the current input row.
    Param(u8),
    Const(Scalar),
    /// A captured scalar variable.
    ScopeRead { slot: u32 },
    /// Element `index` of a captured vector.
    ScopeElement { slot: u32, index: NodeId },
    Unary(UnaryOp, NodeId),
    Binary(BinaryOp, NodeId, NodeId),
    Compare(CompareOp, NodeId, NodeId),
    Select {
        cond: NodeId,
        then: NodeId,
        otherwise: NodeId,
    },
    Box(NodeId),
    Unbox(NodeId),
    /// Interpreter state needed to resume after a deopt. Produces no value.
    FrameState { values: SmallVec<[NodeId; 4]> },
    /// Speculative type check; evaluates to `value`.
    TypeGuard { value: NodeId, kind: ScalarKind },
    /// Abandon the element when `cond` holds. Produces no value.
    DeoptIf { cond: NodeId },
}

impl Node {
    pub fn name(&self) -> &'static str {
        match self {
            Node::Param(_) => "param",
            Node::Const(_) => "const",
            Node::ScopeRead { .. } => "scope-read",
            Node::ScopeElement { .. } => "scope-element",
            Node::Unary(..) => "unary",
            Node::Binary(..) => "binary",
            Node::Compare(..) => "compare",
            Node::Select { .. } => "select",
            Node::Box(_) => "box",
            Node::Unbox(_) => "unbox",
            Node::FrameState { .. } => "frame-state",
            Node::TypeGuard { .. } => "type-guard",
            Node::DeoptIf { .. } => "deopt-if",
        }
    }

    /// Nodes that only make sense inside the interpreter.
    pub fn is_interpreter_only(&self) -> bool {
        matches!(
            self,
            Node::Box(_) | Node::Unbox(_) | Node::FrameState { .. } | Node::TypeGuard { .. }
        )
    }

    pub fn inputs(&self) -> SmallVec<[NodeId; 4]> {
        match self {
            Node::Param(_) | Node::Const(_) | Node::ScopeRead { .. } => SmallVec::new(),
            Node::ScopeElement { index, .. } => smallvec::smallvec![*index],
            Node::Unary(_, a) | Node::Box(a) | Node::Unbox(a) => smallvec::smallvec![*a],
            Node::TypeGuard { value, .. } => smallvec::smallvec![*value],
            Node::DeoptIf { cond } => smallvec::smallvec![*cond],
            Node::Binary(_, a, b) | Node::Compare(_, a, b) => smallvec::smallvec![*a, *b],
            Node::Select {
                cond,
                then,
                otherwise,
            } => smallvec::smallvec![*cond, *then, *otherwise],
            Node::FrameState { values } => values.clone(),
        }
    }

    /// Copy of this node with every input rewritten through `f`.
    pub(crate) fn map_inputs(&self, f: impl Fn(NodeId) -> NodeId) -> Node {
        match self {
            Node::Param(_) | Node::Const(_) | Node::ScopeRead { .. } => self.clone(),
            Node::ScopeElement { slot, index } => Node::ScopeElement {
                slot: *slot,
                index: f(*index),
            },
            Node::Unary(op, a) => Node::Unary(*op, f(*a)),
            Node::Binary(op, a, b) => Node::Binary(*op, f(*a), f(*b)),
            Node::Compare(op, a, b) => Node::Compare(*op, f(*a), f(*b)),
            Node::Select {
                cond,
                then,
                otherwise,
            } => Node::Select {
                cond: f(*cond),
                then: f(*then),
                otherwise: f(*otherwise),
            },
            Node::Box(a) => Node::Box(f(*a)),
            Node::Unbox(a) => Node::Unbox(f(*a)),
            Node::FrameState { values } => Node::FrameState {
                values: values.iter().map(|v| f(*v)).collect(),
            },
            Node::TypeGuard { value, kind } => Node::TypeGuard {
                value: f(*value),
                kind: *kind,
            },
            Node::DeoptIf { cond } => Node::DeoptIf { cond: f(*cond) },
        }
    }
}

/// A lowered per-element computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) outputs: SmallVec<[NodeId; 4]>,
    /// Side-effecting nodes kept alive regardless of uses.
    pub(crate) anchors: Vec<NodeId>,
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.slot())
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId::new(i as u32), n))
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn anchors(&self) -> &[NodeId] {
        &self.anchors
    }

    /// Whether any interpreter-only node survives.
    pub fn has_interpreter_nodes(&self) -> bool {
        self.nodes.iter().any(Node::is_interpreter_only)
    }

    pub(crate) fn validate(&self) -> CompileResult<()> {
        for (id, node) in self.nodes() {
            for input in node.inputs() {
                if input >= id {
                    return Err(CompileError::ForwardReference { node: id, input });
                }
            }
        }
        let end = NodeId::new(self.nodes.len() as u32);
        if let Some(&bad) = self
            .outputs
            .iter()
            .chain(self.anchors.iter())
            .find(|id| **id >= end)
        {
            return Err(CompileError::ForwardReference {
                node: end,
                input: bad,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, node) in self.nodes() {
            write!(f, "{id} = {}", node.name())?;
            match node {
                Node::Param(i) => write!(f, " {i}")?,
                Node::Const(s) => write!(f, " {s:?}")?,
                Node::ScopeRead { slot } => write!(f, " slot {slot}")?,
                Node::ScopeElement { slot, .. } => write!(f, " slot {slot}")?,
                Node::Unary(op, _) => write!(f, " {op:?}")?,
                Node::Binary(op, ..) => write!(f, " {op:?}")?,
                Node::Compare(op, ..) => write!(f, " {op:?}")?,
                Node::TypeGuard { kind, .. } => write!(f, " {kind}")?,
                _ => {}
            }
            for input in node.inputs() {
                write!(f, " {input}")?;
            }
            writeln!(f)?;
        }
        write!(f, "return")?;
        for out in &self.outputs {
            write!(f, " {out}")?;
        }
        Ok(())
    }
}

/// Appends nodes in definition order.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    anchors: Vec<NodeId>,
}

impl GraphBuilder {
    pub fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        if matches!(node, Node::FrameState { .. } | Node::DeoptIf { .. }) {
            self.anchors.push(id);
        }
        self.nodes.push(node);
        id
    }

    pub fn param(&mut self, index: u8) -> NodeId {
        self.push(Node::Param(index))
    }

    pub fn constant(&mut self, value: Scalar) -> NodeId {
        self.push(Node::Const(value))
    }

    pub fn scope_read(&mut self, slot: u32) -> NodeId {
        self.push(Node::ScopeRead { slot })
    }

    pub fn scope_element(&mut self, slot: u32, index: NodeId) -> NodeId {
        self.push(Node::ScopeElement { slot, index })
    }

    pub fn unary(&mut self, op: UnaryOp, a: NodeId) -> NodeId {
        self.push(Node::Unary(op, a))
    }

    pub fn binary(&mut self, op: BinaryOp, a: NodeId, b: NodeId) -> NodeId {
        self.push(Node::Binary(op, a, b))
    }

    pub fn compare(&mut self, op: CompareOp, a: NodeId, b: NodeId) -> NodeId {
        self.push(Node::Compare(op, a, b))
    }

    pub fn select(&mut self, cond: NodeId, then: NodeId, otherwise: NodeId) -> NodeId {
        self.push(Node::Select {
            cond,
            then,
            otherwise,
        })
    }

    pub fn boxed(&mut self, value: NodeId) -> NodeId {
        self.push(Node::Box(value))
    }

    pub fn unbox(&mut self, value: NodeId) -> NodeId {
        self.push(Node::Unbox(value))
    }

    pub fn frame_state(&mut self, values: &[NodeId]) -> NodeId {
        self.push(Node::FrameState {
            values: values.iter().copied().collect(),
        })
    }

    pub fn type_guard(&mut self, value: NodeId, kind: ScalarKind) -> NodeId {
        self.push(Node::TypeGuard { value, kind })
    }

    pub fn deopt_if(&mut self, cond: NodeId) -> NodeId {
        self.push(Node::DeoptIf { cond })
    }

    /// Seal the graph with its output fields.
    pub fn finish(self, outputs: &[NodeId]) -> CompileResult<Graph> {
        let graph = Graph {
            nodes: self.nodes,
            outputs: outputs.iter().copied().collect(),
            anchors: self.anchors,
        };
        graph.validate()?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_records_anchors() {
        let mut b = Graph::builder();
        let x = b.param(0);
        let zero = b.constant(Scalar::Int(0));
        let neg = b.compare(CompareOp::Lt, x, zero);
        let deopt = b.deopt_if(neg);
        let fs = b.frame_state(&[x]);
        let g = b.finish(&[x]).unwrap();
        assert_eq!(g.anchors(), &[deopt, fs]);
        assert!(g.has_interpreter_nodes());
    }

    #[test]
    fn foreign_ids_are_rejected() {
        let mut b = Graph::builder();
        let x = b.param(0);
        let err = b.finish(&[NodeId::new(7)]).unwrap_err();
        assert!(matches!(err, CompileError::ForwardReference { .. }));
        let _ = x;
    }

    #[test]
    fn display_lists_nodes() {
        let mut b = Graph::builder();
        let x = b.param(0);
        let one = b.constant(Scalar::Int(1));
        let sum = b.binary(BinaryOp::Add, x, one);
        let g = b.finish(&[sum]).unwrap();
        let text = g.to_string();
        assert!(text.contains("n2 = binary Add n0 n1"));
        assert!(text.ends_with("return n2"));
    }
}

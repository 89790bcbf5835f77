// crates/offload-jit/src/kernel.rs
//! Type-checked shaped graphs evaluated row by row on the host.
//!
//! This is the kernel form produced by [`HostKernelCompiler`](crate::HostKernelCompiler)
//! and run by [`HostDevice`](crate::HostDevice). Int arithmetic is checked:
//! overflow, division by zero and out-of-range scope indices deoptimize the
//! element instead of producing a wrong value.

use offload_runtime::{MAX_TUPLE_ARITY, Scalar, ScalarKind, TypeDescriptor, Value};
use smallvec::SmallVec;

use crate::errors::{CompileError, CompileResult};
use crate::graph::{BinaryOp, CompareOp, Graph, Node, NodeId, UnaryOp};

/// The kernel could not complete this element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deopt;

pub type Row = SmallVec<[Scalar; MAX_TUPLE_ARITY]>;

#[derive(Debug, Clone)]
pub struct HostKernel {
    graph: Graph,
    input: TypeDescriptor,
    output: TypeDescriptor,
    kinds: Vec<Option<ScalarKind>>,
}

impl HostKernel {
    /// Check `graph` against the input row layout, output layout and scope.
    pub fn check(
        graph: Graph,
        input: &TypeDescriptor,
        output: &TypeDescriptor,
        scope: &[Value],
    ) -> CompileResult<Self> {
        graph.validate()?;
        let params = input.column_kinds();
        let mut kinds: Vec<Option<ScalarKind>> = Vec::with_capacity(graph.len());
        for (id, node) in graph.nodes() {
            let kind = node_kind(id, node, &kinds, &params, input, scope)?;
            kinds.push(kind);
        }

        let expected = output.column_kinds();
        if graph.outputs().len() != expected.len() {
            return Err(CompileError::OutputArity {
                expected: expected.len(),
                found: graph.outputs().len(),
            });
        }
        for (out, want) in graph.outputs().iter().zip(expected.iter()) {
            let have = value_kind(&kinds, *out)?;
            let widened = have == ScalarKind::Int && *want == ScalarKind::Double;
            if have != *want && !widened {
                return Err(mismatch(*out, want.name(), have));
            }
        }

        Ok(Self {
            graph,
            input: input.clone(),
            output: output.clone(),
            kinds,
        })
    }

    pub fn input(&self) -> &TypeDescriptor {
        &self.input
    }

    pub fn output(&self) -> &TypeDescriptor {
        &self.output
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Evaluate one row.
    pub fn run(&self, row: &[Scalar], scope: &[Value]) -> Result<Row, Deopt> {
        let mut values: Vec<Option<Scalar>> = Vec::with_capacity(self.graph.len());
        for (id, node) in self.graph.nodes() {
            let value = self.eval(id, node, &values, row, scope)?;
            values.push(value);
        }
        let kinds = self.output.column_kinds();
        self.graph
            .outputs()
            .iter()
            .zip(kinds.iter())
            .map(|(out, kind)| get(&values, *out).map(|s| coerce(s, *kind)))
            .collect()
    }

    fn eval(
        &self,
        id: NodeId,
        node: &Node,
        values: &[Option<Scalar>],
        row: &[Scalar],
        scope: &[Value],
    ) -> Result<Option<Scalar>, Deopt> {
        let kind = self.kinds.get(id.slot()).copied().flatten();
        let value = match node {
            Node::Param(i) => *row.get(usize::from(*i)).ok_or(Deopt)?,
            Node::Const(s) => *s,
            Node::ScopeRead { slot } => scope_scalar(scope, *slot)?,
            Node::ScopeElement { slot, index } => {
                let Scalar::Int(i) = get(values, *index)? else {
                    return Err(Deopt);
                };
                let i = usize::try_from(i).map_err(|_| Deopt)?;
                match scope.get(*slot as usize) {
                    Some(Value::List(items)) => {
                        items.get(i).and_then(Value::as_scalar).ok_or(Deopt)?
                    }
                    _ => return Err(Deopt),
                }
            }
            Node::Unary(op, a) => unary(*op, get(values, *a)?)?,
            Node::Binary(op, a, b) => {
                binary(*op, get(values, *a)?, get(values, *b)?, kind.ok_or(Deopt)?)?
            }
            Node::Compare(op, a, b) => Scalar::Bool(compare(*op, get(values, *a)?, get(values, *b)?)),
            Node::Select {
                cond,
                then,
                otherwise,
            } => {
                let pick = if get(values, *cond)?.as_bool() {
                    *then
                } else {
                    *otherwise
                };
                coerce(get(values, pick)?, kind.ok_or(Deopt)?)
            }
            Node::DeoptIf { cond } => {
                if get(values, *cond)?.as_bool() {
                    return Err(Deopt);
                }
                return Ok(None);
            }
            Node::Box(_) | Node::Unbox(_) | Node::FrameState { .. } | Node::TypeGuard { .. } => {
                return Err(Deopt);
            }
        };
        Ok(Some(value))
    }
}

fn get(values: &[Option<Scalar>], id: NodeId) -> Result<Scalar, Deopt> {
    values.get(id.slot()).copied().flatten().ok_or(Deopt)
}

fn scope_scalar(scope: &[Value], slot: u32) -> Result<Scalar, Deopt> {
    scope
        .get(slot as usize)
        .and_then(Value::as_scalar)
        .ok_or(Deopt)
}

fn coerce(s: Scalar, kind: ScalarKind) -> Scalar {
    match (s, kind) {
        (Scalar::Int(v), ScalarKind::Double) => Scalar::Double(f64::from(v)),
        _ => s,
    }
}

fn unary(op: UnaryOp, a: Scalar) -> Result<Scalar, Deopt> {
    Ok(match (op, a) {
        (UnaryOp::Neg, Scalar::Int(v)) => Scalar::Int(v.checked_neg().ok_or(Deopt)?),
        (UnaryOp::Neg, s) => Scalar::Double(-s.as_f64()),
        (UnaryOp::Abs, Scalar::Int(v)) => Scalar::Int(v.checked_abs().ok_or(Deopt)?),
        (UnaryOp::Abs, s) => Scalar::Double(s.as_f64().abs()),
        (UnaryOp::Not, s) => Scalar::Bool(!s.as_bool()),
        (UnaryOp::Sqrt, s) => Scalar::Double(s.as_f64().sqrt()),
        (UnaryOp::ToDouble, s) => Scalar::Double(s.as_f64()),
        (UnaryOp::ToInt, Scalar::Int(v)) => Scalar::Int(v),
        (UnaryOp::ToInt, Scalar::Bool(v)) => Scalar::Int(i32::from(v)),
        (UnaryOp::ToInt, Scalar::Double(v)) => {
            let t = v.trunc();
            if !t.is_finite() || t < f64::from(i32::MIN) || t > f64::from(i32::MAX) {
                return Err(Deopt);
            }
            Scalar::Int(t as i32)
        }
    })
}

fn binary(op: BinaryOp, a: Scalar, b: Scalar, kind: ScalarKind) -> Result<Scalar, Deopt> {
    if let (Scalar::Int(x), Scalar::Int(y), ScalarKind::Int) = (a, b, kind) {
        let v = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Rem => x.checked_rem(y),
            BinaryOp::Min => Some(x.min(y)),
            BinaryOp::Max => Some(x.max(y)),
            BinaryOp::Div | BinaryOp::And | BinaryOp::Or => None,
        };
        return v.map(Scalar::Int).ok_or(Deopt);
    }
    let (x, y) = (a.as_f64(), b.as_f64());
    Ok(match op {
        BinaryOp::Add => Scalar::Double(x + y),
        BinaryOp::Sub => Scalar::Double(x - y),
        BinaryOp::Mul => Scalar::Double(x * y),
        BinaryOp::Div => Scalar::Double(x / y),
        BinaryOp::Rem => Scalar::Double(x % y),
        BinaryOp::Min => Scalar::Double(x.min(y)),
        BinaryOp::Max => Scalar::Double(x.max(y)),
        BinaryOp::And => Scalar::Bool(a.as_bool() && b.as_bool()),
        BinaryOp::Or => Scalar::Bool(a.as_bool() || b.as_bool()),
    })
}

fn compare(op: CompareOp, a: Scalar, b: Scalar) -> bool {
    let ord = match (a, b) {
        (Scalar::Int(x), Scalar::Int(y)) => x.partial_cmp(&y),
        (Scalar::Bool(x), Scalar::Bool(y)) => x.partial_cmp(&y),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    };
    let Some(ord) = ord else {
        return op == CompareOp::Ne;
    };
    match op {
        CompareOp::Eq => ord.is_eq(),
        CompareOp::Ne => ord.is_ne(),
        CompareOp::Lt => ord.is_lt(),
        CompareOp::Le => ord.is_le(),
        CompareOp::Gt => ord.is_gt(),
        CompareOp::Ge => ord.is_ge(),
    }
}

// ============================================================================
// Type checking
// ============================================================================

fn mismatch(node: NodeId, expected: &str, found: ScalarKind) -> CompileError {
    CompileError::TypeMismatch {
        node,
        expected: expected.to_string(),
        found: found.name().to_string(),
    }
}

fn value_kind(kinds: &[Option<ScalarKind>], id: NodeId) -> CompileResult<ScalarKind> {
    kinds
        .get(id.slot())
        .copied()
        .flatten()
        .ok_or(CompileError::NoValue { node: id })
}

fn numeric(kinds: &[Option<ScalarKind>], id: NodeId) -> CompileResult<ScalarKind> {
    match value_kind(kinds, id)? {
        ScalarKind::Boolean => Err(mismatch(id, "a numeric value", ScalarKind::Boolean)),
        k => Ok(k),
    }
}

fn boolean(kinds: &[Option<ScalarKind>], id: NodeId) -> CompileResult<()> {
    match value_kind(kinds, id)? {
        ScalarKind::Boolean => Ok(()),
        k => Err(mismatch(id, "Boolean", k)),
    }
}

fn promote(a: ScalarKind, b: ScalarKind) -> ScalarKind {
    if a == ScalarKind::Double || b == ScalarKind::Double {
        ScalarKind::Double
    } else {
        ScalarKind::Int
    }
}

fn node_kind(
    id: NodeId,
    node: &Node,
    kinds: &[Option<ScalarKind>],
    params: &[ScalarKind],
    input: &TypeDescriptor,
    scope: &[Value],
) -> CompileResult<Option<ScalarKind>> {
    let kind = match node {
        Node::Param(i) => *params
            .get(usize::from(*i))
            .ok_or_else(|| CompileError::ParamOutOfRange {
                index: *i,
                input: input.to_string(),
            })?,
        Node::Const(s) => s.kind(),
        Node::ScopeRead { slot } => scope
            .get(*slot as usize)
            .and_then(Value::as_scalar)
            .map(Scalar::kind)
            .ok_or(CompileError::ScopeSlot { slot: *slot })?,
        Node::ScopeElement { slot, index } => {
            match value_kind(kinds, *index)? {
                ScalarKind::Int => {}
                k => return Err(mismatch(*index, "Int", k)),
            }
            match scope.get(*slot as usize) {
                Some(Value::List(items)) => items
                    .first()
                    .and_then(Value::as_scalar)
                    .map(Scalar::kind)
                    .ok_or(CompileError::ScopeSlot { slot: *slot })?,
                _ => return Err(CompileError::ScopeSlot { slot: *slot }),
            }
        }
        Node::Unary(op, a) => match op {
            UnaryOp::Neg | UnaryOp::Abs => numeric(kinds, *a)?,
            UnaryOp::Sqrt => {
                numeric(kinds, *a)?;
                ScalarKind::Double
            }
            UnaryOp::Not => {
                boolean(kinds, *a)?;
                ScalarKind::Boolean
            }
            UnaryOp::ToDouble => {
                value_kind(kinds, *a)?;
                ScalarKind::Double
            }
            UnaryOp::ToInt => {
                value_kind(kinds, *a)?;
                ScalarKind::Int
            }
        },
        Node::Binary(op, a, b) => match op {
            BinaryOp::And | BinaryOp::Or => {
                boolean(kinds, *a)?;
                boolean(kinds, *b)?;
                ScalarKind::Boolean
            }
            BinaryOp::Div => {
                numeric(kinds, *a)?;
                numeric(kinds, *b)?;
                ScalarKind::Double
            }
            _ => promote(numeric(kinds, *a)?, numeric(kinds, *b)?),
        },
        Node::Compare(op, a, b) => {
            let (ka, kb) = (value_kind(kinds, *a)?, value_kind(kinds, *b)?);
            let bools = ka == ScalarKind::Boolean && kb == ScalarKind::Boolean;
            if !(bools && matches!(op, CompareOp::Eq | CompareOp::Ne)) {
                numeric(kinds, *a)?;
                numeric(kinds, *b)?;
            }
            ScalarKind::Boolean
        }
        Node::Select {
            cond,
            then,
            otherwise,
        } => {
            boolean(kinds, *cond)?;
            let (kt, ko) = (value_kind(kinds, *then)?, value_kind(kinds, *otherwise)?);
            if kt == ko {
                kt
            } else {
                promote(numeric(kinds, *then)?, numeric(kinds, *otherwise)?)
            }
        }
        Node::DeoptIf { cond } => {
            boolean(kinds, *cond)?;
            return Ok(None);
        }
        Node::Box(_) | Node::Unbox(_) | Node::FrameState { .. } | Node::TypeGuard { .. } => {
            return Err(CompileError::InterpreterOnly {
                node: id,
                op: node.name(),
            });
        }
    };
    Ok(Some(kind))
}

// src/function.rs
//! User functions as seen by the operators.
//!
//! The host evaluator is modelled by the [`Callable`] trait. A [`Function`]
//! pairs a callable with the identity it was created with; a [`CallTarget`]
//! is the entry point actually invoked, which differs from the function's own
//! body once the function has been rewritten.

use std::fmt;
use std::sync::Arc;

use offload_runtime::{FunctionId, ScopeSnapshot, Value};

use crate::errors::EvalError;

/// A host-language function body.
pub trait Callable: Send + Sync {
    fn arity(&self) -> usize;

    fn arg_names(&self) -> &[Arc<str>];

    /// Evaluate the body. Must be free of side effects visible to other elements.
    fn call(&self, args: &[Value]) -> Result<Value, EvalError>;

    /// Values captured from the enclosing lexical scope, by slot.
    fn captured_scope(&self) -> ScopeSnapshot;

    /// A rewrite of this body with its captured scope folded in, if one exists.
    fn specialize(&self) -> Option<Arc<dyn Callable>> {
        None
    }
}

type NativeBody = dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync;

/// A [`Callable`] backed by a Rust closure.
#[derive(Clone)]
pub struct NativeFunction {
    arg_names: Vec<Arc<str>>,
    scope: ScopeSnapshot,
    body: Arc<NativeBody>,
    specialized: Option<Arc<dyn Callable>>,
}

impl NativeFunction {
    pub fn new(
        arg_names: &[&str],
        body: impl Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            arg_names: arg_names.iter().map(|n| Arc::from(*n)).collect(),
            scope: Arc::from(Vec::new()),
            body: Arc::new(body),
            specialized: None,
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl IntoIterator<Item = Value>) -> Self {
        self.scope = scope.into_iter().collect();
        self
    }

    /// Body to hand out from [`Callable::specialize`].
    #[must_use]
    pub fn with_specialization(mut self, rewritten: impl Callable + 'static) -> Self {
        self.specialized = Some(Arc::new(rewritten));
        self
    }
}

impl Callable for NativeFunction {
    fn arity(&self) -> usize {
        self.arg_names.len()
    }

    fn arg_names(&self) -> &[Arc<str>] {
        &self.arg_names
    }

    fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        (self.body)(args)
    }

    fn captured_scope(&self) -> ScopeSnapshot {
        Arc::clone(&self.scope)
    }

    fn specialize(&self) -> Option<Arc<dyn Callable>> {
        self.specialized.clone()
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("arg_names", &self.arg_names)
            .field("scope", &self.scope)
            .finish()
    }
}

/// A function value: identity plus body. Clones share the identity.
#[derive(Clone)]
pub struct Function {
    id: FunctionId,
    body: Arc<dyn Callable>,
}

impl Function {
    pub fn new(body: impl Callable + 'static) -> Self {
        Self::from_arc(Arc::new(body))
    }

    pub fn from_arc(body: Arc<dyn Callable>) -> Self {
        Self {
            id: FunctionId::fresh(),
            body,
        }
    }

    /// Shorthand for a [`NativeFunction`] without captured scope.
    pub fn native(
        arg_names: &[&str],
        body: impl Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    ) -> Self {
        Self::new(NativeFunction::new(arg_names, body))
    }

    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn body(&self) -> &Arc<dyn Callable> {
        &self.body
    }

    pub fn arity(&self) -> usize {
        self.body.arity()
    }

    /// The function's own entry point.
    pub fn default_target(&self) -> CallTarget {
        CallTarget {
            id: self.id,
            body: Arc::clone(&self.body),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("id", &self.id)
            .field("arity", &self.body.arity())
            .finish()
    }
}

/// The entry point invoked for a function.
///
/// Its id keys tracing: a rewritten body gets a fresh id and therefore a
/// fresh trace identity.
#[derive(Clone)]
pub struct CallTarget {
    id: FunctionId,
    body: Arc<dyn Callable>,
}

impl CallTarget {
    pub fn rewritten(body: Arc<dyn Callable>) -> Self {
        Self {
            id: FunctionId::fresh(),
            body,
        }
    }

    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn body(&self) -> &Arc<dyn Callable> {
        &self.body
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        self.body.call(args)
    }

    pub fn same_entry(&self, other: &CallTarget) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTarget").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_one() -> Function {
        Function::native(&["x"], |args| match args {
            [Value::Int(x)] => Ok(Value::Int(x + 1)),
            _ => Err(EvalError::new("non-numeric argument")),
        })
    }

    #[test]
    fn native_function_calls_body() {
        let f = add_one();
        assert_eq!(f.arity(), 1);
        assert_eq!(f.body().arg_names()[0].as_ref(), "x");
        assert_eq!(f.default_target().call(&[Value::Int(1)]), Ok(Value::Int(2)));
        assert!(f.default_target().call(&[Value::from("a")]).is_err());
    }

    #[test]
    fn clones_share_identity() {
        let f = add_one();
        let g = f.clone();
        assert_eq!(f.id(), g.id());
        assert_ne!(f.id(), add_one().id());
    }

    #[test]
    fn rewritten_target_has_new_identity() {
        let f = add_one();
        let target = CallTarget::rewritten(Arc::clone(f.body()));
        assert_ne!(target.id(), f.id());
        assert!(!target.same_entry(&f.default_target()));
    }

    #[test]
    fn scope_and_specialization() {
        let inner = NativeFunction::new(&["x"], |args| Ok(args[0].clone()));
        let f = NativeFunction::new(&["x"], |args| Ok(args[0].clone()))
            .with_scope([Value::Int(3)])
            .with_specialization(inner);
        assert_eq!(f.captured_scope().as_ref(), &[Value::Int(3)]);
        assert!(f.specialize().is_some());
    }
}

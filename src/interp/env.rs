use std::any::Any;
use std::rc::Rc;

use crate::graph::NodeId;
use crate::interp::value::Value;

/// What a placeholder node is bound to in the current scope.
#[derive(Clone)]
pub enum Binding {
    /// A runtime value (loop item, lambda argument, caught error, batch).
    Value(Value),
    /// Plugin-defined scope data, e.g. a transaction-scoped client.
    Opaque(Rc<dyn Any>),
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Binding::Value(value) => write!(f, "Value({value})"),
            Binding::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

struct Frame {
    node: NodeId,
    binding: Binding,
    parent: Env,
}

/// Persistent placeholder → binding map threaded through evaluation.
///
/// Extending an environment never affects the one it was derived from, so
/// concurrently evaluated siblings each see their own iteration variable.
#[derive(Clone, Default)]
pub struct Env(Option<Rc<Frame>>);

impl Env {
    /// Empty environment.
    pub fn new() -> Self {
        Self(None)
    }

    /// A new environment with `node` bound on top of this one.
    pub fn bind(&self, node: NodeId, binding: Binding) -> Env {
        Env(Some(Rc::new(Frame {
            node,
            binding,
            parent: self.clone(),
        })))
    }

    /// Innermost binding for `node`.
    pub fn lookup(&self, node: NodeId) -> Option<&Binding> {
        let mut current = self.0.as_deref();
        while let Some(frame) = current {
            if frame.node == node {
                return Some(&frame.binding);
            }
            current = frame.parent.0.as_deref();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_bindings_shadow_without_mutating_parent() {
        let outer = Env::new().bind(NodeId(1), Binding::Value(Value::Number(1.0)));
        let inner = outer.bind(NodeId(1), Binding::Value(Value::Number(2.0)));
        let lookup = |env: &Env| match env.lookup(NodeId(1)) {
            Some(Binding::Value(v)) => v.clone(),
            _ => Value::Null,
        };
        assert_eq!(lookup(&inner), Value::Number(2.0));
        assert_eq!(lookup(&outer), Value::Number(1.0));
        assert!(inner.lookup(NodeId(9)).is_none());
    }
}

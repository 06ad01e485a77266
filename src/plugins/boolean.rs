//! The `boolean` plugin.

use std::rc::Rc;

use super::num::{binary, unary};
use crate::builder::{Expr, Lift};
use crate::error::{Fault, Outcome};
use crate::graph::{Node, TypeTag};
use crate::interp::{Cx, Fragment, Value, Visit};
use crate::plugin::{Plugin, TraitImpl};

const KINDS: &[&str] = &["boolean/and", "boolean/or", "boolean/not", "boolean/eq"];

/// The `boolean` plugin.
pub fn plugin() -> Plugin {
    let mut plugin = Plugin::new("boolean", KINDS, Rc::new(BooleanFragment))
        .implements(TraitImpl::new("eq", TypeTag::Boolean).op("eq", "boolean/eq"));
    for kind in KINDS {
        plugin = plugin.returns(*kind, TypeTag::Boolean);
    }
    plugin
}

/// Logical constructors on expression handles.
pub trait BoolOps<'b> {
    /// Short-circuiting conjunction.
    fn and(self, other: impl Into<Lift<'b>>) -> Expr<'b>;
    /// Short-circuiting disjunction.
    fn or(self, other: impl Into<Lift<'b>>) -> Expr<'b>;
    /// Negation.
    fn not(self) -> Expr<'b>;
}

impl<'b> BoolOps<'b> for Expr<'b> {
    fn and(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        binary(self, "boolean/and", other)
    }

    fn or(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        binary(self, "boolean/or", other)
    }

    fn not(self) -> Expr<'b> {
        unary(self, "boolean/not")
    }
}

/// Interpreter for `boolean/*`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BooleanFragment;

impl Fragment for BooleanFragment {
    fn name(&self) -> &str {
        "boolean"
    }

    fn kinds(&self) -> &[&'static str] {
        KINDS
    }

    fn visit(&self, node: Rc<Node>, cx: Cx) -> Visit {
        Visit::suspend(evaluate(node, cx))
    }
}

async fn evaluate(node: Rc<Node>, cx: Cx) -> Outcome {
    let kind = node.kind.as_str();
    let truth = |value: Value| {
        value
            .as_bool()
            .ok_or_else(|| Fault::type_error(kind, "boolean", &value))
    };
    if kind == "boolean/not" {
        let x = truth(cx.recurse(node.child("operand")?).await?)?;
        return Ok(Value::Bool(!x));
    }
    let left = truth(cx.recurse(node.child("left")?).await?)?;
    match (kind, left) {
        ("boolean/and", false) => return Ok(Value::Bool(false)),
        ("boolean/or", true) => return Ok(Value::Bool(true)),
        _ => {}
    }
    let right = truth(cx.recurse(node.child("right")?).await?)?;
    Ok(Value::Bool(match kind {
        "boolean/eq" => left == right,
        _ => right,
    }))
}

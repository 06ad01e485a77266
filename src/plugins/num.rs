//! The `num` plugin: arithmetic plus the number implementations of the
//! `eq` and `ord` traits.

use std::rc::Rc;

use crate::builder::{Expr, Lift};
use crate::error::{Fault, Outcome};
use crate::graph::{Field, Node, TypeTag};
use crate::interp::{Cx, Fragment, Value, Visit};
use crate::plugin::{Plugin, TraitImpl};

const KINDS: &[&str] = &[
    "num/add",
    "num/sub",
    "num/mul",
    "num/div",
    "num/mod",
    "num/neg",
    "num/floor",
    "num/eq",
    "num/compare",
];

/// The `num` plugin.
pub fn plugin() -> Plugin {
    let mut plugin = Plugin::new("num", KINDS, Rc::new(NumFragment))
        .implements(TraitImpl::new("eq", TypeTag::Number).op("eq", "num/eq"))
        .implements(TraitImpl::new("ord", TypeTag::Number).op("compare", "num/compare"))
        .returns("num/eq", TypeTag::Boolean);
    for kind in &KINDS[..KINDS.len() - 2] {
        plugin = plugin.returns(*kind, TypeTag::Number);
    }
    plugin.returns("num/compare", TypeTag::Number)
}

/// Arithmetic constructors on expression handles.
pub trait NumOps<'b> {
    /// `self + other`
    fn add(self, other: impl Into<Lift<'b>>) -> Expr<'b>;
    /// `self - other`
    fn sub(self, other: impl Into<Lift<'b>>) -> Expr<'b>;
    /// `self * other`
    fn mul(self, other: impl Into<Lift<'b>>) -> Expr<'b>;
    /// `self / other`
    fn div(self, other: impl Into<Lift<'b>>) -> Expr<'b>;
    /// `self % other`, with the sign of the dividend.
    fn rem(self, other: impl Into<Lift<'b>>) -> Expr<'b>;
    /// `-self`
    fn neg(self) -> Expr<'b>;
    /// Largest integer not greater than `self`.
    fn floor(self) -> Expr<'b>;
}

impl<'b> NumOps<'b> for Expr<'b> {
    fn add(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        binary(self, "num/add", other)
    }

    fn sub(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        binary(self, "num/sub", other)
    }

    fn mul(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        binary(self, "num/mul", other)
    }

    fn div(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        binary(self, "num/div", other)
    }

    fn rem(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        binary(self, "num/mod", other)
    }

    fn neg(self) -> Expr<'b> {
        unary(self, "num/neg")
    }

    fn floor(self) -> Expr<'b> {
        unary(self, "num/floor")
    }
}

pub(crate) fn binary<'b>(left: Expr<'b>, kind: &str, right: impl Into<Lift<'b>>) -> Expr<'b> {
    let b = left.builder();
    let right = b.lift(right);
    b.node(
        kind,
        [
            ("left", Field::Child(left.id())),
            ("right", Field::Child(right.id())),
        ],
    )
}

pub(crate) fn unary<'b>(operand: Expr<'b>, kind: &str) -> Expr<'b> {
    operand
        .builder()
        .node(kind, [("operand", Field::Child(operand.id()))])
}

/// Interpreter for `num/*`. Every rule is pure and total over numbers;
/// other operand types raise `TYPE_ERROR`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumFragment;

impl Fragment for NumFragment {
    fn name(&self) -> &str {
        "num"
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
    let number = |value: Value| {
        value
            .as_f64()
            .ok_or_else(|| Fault::type_error(kind, "number", &value))
    };
    if let Ok(operand) = node.child("operand") {
        let x = number(cx.recurse(operand).await?)?;
        return match kind {
            "num/neg" => Ok(Value::Number(-x)),
            _ => Ok(Value::Number(x.floor())),
        };
    }
    let left = number(cx.recurse(node.child("left")?).await?)?;
    let right = number(cx.recurse(node.child("right")?).await?)?;
    arithmetic(kind, left, right)
}

fn arithmetic(kind: &str, left: f64, right: f64) -> Outcome {
    let value = match kind {
        "num/add" => left + right,
        "num/sub" => left - right,
        "num/mul" => left * right,
        "num/div" | "num/mod" if right == 0.0 => {
            return Err(Fault::raise("DIVISION_BY_ZERO", format!("{kind} by zero")));
        }
        "num/div" => left / right,
        "num/mod" => left % right,
        "num/eq" => return Ok(Value::Bool(left == right)),
        "num/compare" => match left.partial_cmp(&right) {
            Some(std::cmp::Ordering::Less) => -1.0,
            Some(std::cmp::Ordering::Equal) => 0.0,
            _ => 1.0,
        },
        other => {
            return Err(Fault::Fatal(crate::error::EvalError::UnknownNodeKind {
                kind: other.to_string(),
            }));
        }
    };
    Ok(Value::Number(value))
}

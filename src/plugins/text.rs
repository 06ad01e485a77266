//! The `text` plugin: concatenation, length and the string implementations
//! of `eq` and `ord`.

use std::rc::Rc;

use super::num::{binary, unary};
use crate::builder::{Expr, Lift};
use crate::error::{Fault, Outcome};
use crate::graph::{Node, TypeTag};
use crate::interp::{Cx, Fragment, Value, Visit};
use crate::plugin::{Plugin, TraitImpl};

const KINDS: &[&str] = &["text/concat", "text/len", "text/eq", "text/compare"];

/// The `text` plugin.
pub fn plugin() -> Plugin {
    Plugin::new("text", KINDS, Rc::new(TextFragment))
        .implements(TraitImpl::new("eq", TypeTag::String).op("eq", "text/eq"))
        .implements(TraitImpl::new("ord", TypeTag::String).op("compare", "text/compare"))
        .returns("text/concat", TypeTag::String)
        .returns("text/len", TypeTag::Number)
        .returns("text/eq", TypeTag::Boolean)
        .returns("text/compare", TypeTag::Number)
}

/// String constructors on expression handles.
pub trait TextOps<'b> {
    /// `self` followed by `other`.
    fn concat(self, other: impl Into<Lift<'b>>) -> Expr<'b>;
    /// Length in characters.
    fn len(self) -> Expr<'b>;
}

impl<'b> TextOps<'b> for Expr<'b> {
    fn concat(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        binary(self, "text/concat", other)
    }

    fn len(self) -> Expr<'b> {
        unary(self, "text/len")
    }
}

/// Interpreter for `text/*`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFragment;

impl Fragment for TextFragment {
    fn name(&self) -> &str {
        "text"
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
    let text = |value: Value| match value {
        Value::String(s) => Ok(s),
        other => Err(Fault::type_error(kind, "string", &other)),
    };
    if kind == "text/len" {
        let s = text(cx.recurse(node.child("operand")?).await?)?;
        return Ok(Value::from(s.chars().count()));
    }
    let left = text(cx.recurse(node.child("left")?).await?)?;
    let right = text(cx.recurse(node.child("right")?).await?)?;
    Ok(match kind {
        "text/concat" => Value::String(left + &right),
        "text/eq" => Value::Bool(left == right),
        _ => Value::Number(match left.cmp(&right) {
            std::cmp::Ordering::Less => -1.0,
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Greater => 1.0,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Schema;
    use crate::plugin::PluginSet;
    use serde_json::json;

    #[test]
    fn string_ordering_and_concat_through_dispatch() {
        let plugins = PluginSet::standard().unwrap();
        let schema = Schema::record([("name", Schema::String)]);
        let program = plugins
            .build(schema, |b| {
                let name = b.input().get("name");
                b.record([
                    ("greeting", b.lift("hi ").concat(name).into()),
                    ("before", name.lt("zed").into()),
                    ("len", name.len().into()),
                ])
            })
            .unwrap();
        let out = plugins
            .interpreter()
            .unwrap()
            .run(&program, Value::from(json!({"name": "ada"})))
            .unwrap();
        assert_eq!(out, Value::from(json!({"greeting": "hi ada", "before": true, "len": 3})));
    }
}

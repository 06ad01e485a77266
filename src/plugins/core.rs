//! The `core` plugin: literals, input access, records and tuples,
//! sequencing, conditionals, mutable cells, loops, lambdas and recursion.

use std::rc::Rc;

use crate::builder::dispatch::Ordering;
use crate::error::{EvalError, Fault, Outcome};
use crate::graph::{Node, NodeId, TypeTag};
use crate::interp::{Binding, Cx, Fragment, Value, Visit};
use crate::plugin::Plugin;

/// Every kind interpreted by [`CoreFragment`].
pub const KINDS: &[&str] = &[
    "core/literal",
    "core/input",
    "core/param",
    "core/nop",
    "core/prop",
    "core/index",
    "core/record",
    "core/tuple",
    "core/program",
    "core/do",
    "core/cond",
    "core/let",
    "core/let_get",
    "core/let_set",
    "core/let_push",
    "core/each",
    "core/while",
    "core/lambda",
    "core/call",
    "core/map",
    "core/filter",
    "core/reduce",
    "core/for_each",
    "core/rec",
    "core/rec_self",
    "core/rec_call",
    "core/ord",
];

/// The `core` plugin.
pub fn plugin() -> Plugin {
    Plugin::new("core", KINDS, Rc::new(CoreFragment))
        .inert(&[
            "core/literal",
            "core/input",
            "core/param",
            "core/nop",
            "core/rec_self",
        ])
        .returns("core/record", TypeTag::Record)
        .returns("core/tuple", TypeTag::List)
        .returns("core/map", TypeTag::List)
        .returns("core/filter", TypeTag::List)
        .returns("core/ord", TypeTag::Boolean)
}

/// Interpreter for `core/*`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreFragment;

impl Fragment for CoreFragment {
    fn name(&self) -> &str {
        "core"
    }

    fn kinds(&self) -> &[&'static str] {
        KINDS
    }

    fn is_volatile(&self, kind: &str) -> bool {
        matches!(
            kind,
            "core/param" | "core/let" | "core/let_get" | "core/let_set" | "core/let_push"
        )
    }

    fn is_placeholder(&self, kind: &str) -> bool {
        matches!(kind, "core/param" | "core/rec_self")
    }

    fn visit(&self, node: Rc<Node>, cx: Cx) -> Visit {
        match node.kind.as_str() {
            "core/literal" => Visit::Ready(node.data("value").cloned().map_err(Fault::from)),
            "core/input" => Visit::value(cx.inputs().clone()),
            "core/param" => Visit::Ready(cx.placeholder_value(&node)),
            "core/nop" => Visit::value(Value::Null),
            "core/let_get" => Visit::Ready(
                node.ident("cell")
                    .map_err(Fault::from)
                    .and_then(|cell| cx.cell(cell)),
            ),
            "core/lambda" | "core/rec_self" => Visit::Ready(Err(Fault::Fatal(
                node.malformed("function nodes are applied, never evaluated as values"),
            ))),
            _ => Visit::suspend(visit_async(node, cx)),
        }
    }
}

/// Recursion frame bound to a `core/rec_self` placeholder.
struct RecFrame {
    param: NodeId,
    body: NodeId,
}

async fn visit_async(node: Rc<Node>, cx: Cx) -> Outcome {
    let kind = node.kind.as_str();
    match kind {
        "core/prop" => {
            let object = cx.recurse(node.child("object")?).await?;
            project(kind, &object, node.data("key")?)
        }
        "core/index" => {
            let object = cx.recurse(node.child("object")?).await?;
            let key = cx.recurse(node.child("key")?).await?;
            project(kind, &object, &key)
        }
        "core/record" => {
            let mut fields = std::collections::BTreeMap::new();
            for (key, id) in node.entries("entries")? {
                fields.insert(key.clone(), cx.recurse(*id).await?);
            }
            Ok(Value::Record(fields))
        }
        "core/tuple" => Ok(Value::List(eval_all(&cx, node.children("items")?).await?)),
        "core/program" => {
            sequence(&cx, node.children("statements")?).await?;
            cx.recurse(node.child("result")?).await
        }
        "core/do" => {
            sequence(&cx, node.children("steps")?).await?;
            cx.recurse(node.child("result")?).await
        }
        "core/cond" => {
            let test = cx.recurse(node.child("test")?).await?;
            let branch = if truth(kind, &test)? { "then" } else { "else" };
            cx.recurse(node.child(branch)?).await
        }
        "core/let" => {
            let value = cx.recurse(node.child("init")?).await?;
            cx.set_cell(node.ident("cell")?, value.clone());
            Ok(value)
        }
        "core/let_set" => {
            let value = cx.recurse(node.child("value")?).await?;
            cx.set_cell(node.ident("cell")?, value);
            Ok(Value::Null)
        }
        "core/let_push" => {
            let cell = node.ident("cell")?;
            let value = cx.recurse(node.child("value")?).await?;
            match cx.cell(cell)? {
                Value::List(mut items) => {
                    items.push(value);
                    cx.set_cell(cell, Value::List(items));
                    Ok(Value::Null)
                }
                other => Err(Fault::type_error(kind, "list", &other)),
            }
        }
        "core/each" => {
            let items = list(kind, cx.recurse(node.child("collection")?).await?)?;
            let item = node.child("item")?;
            let body = node.child("body")?;
            for value in items {
                cx.bind_value(item, value).recurse(body).await?;
            }
            Ok(Value::Null)
        }
        "core/while" => {
            let test = node.child("test")?;
            let body = node.child("body")?;
            while truth(kind, &cx.recurse(test).await?)? {
                cx.recurse(body).await?;
            }
            Ok(Value::Null)
        }
        "core/call" => {
            let args = eval_all(&cx, node.children("args")?).await?;
            apply(&cx, node.child("fn")?, args).await
        }
        "core/map" | "core/filter" | "core/for_each" => {
            let items = list(kind, cx.recurse(node.child("collection")?).await?)?;
            let lambda = node.child("fn")?;
            let mut out = Vec::new();
            for (index, item) in items.into_iter().enumerate() {
                let result = apply(&cx, lambda, vec![item.clone(), Value::from(index)]).await?;
                match kind {
                    "core/map" => out.push(result),
                    "core/filter" if truth(kind, &result)? => out.push(item),
                    _ => {}
                }
            }
            if kind == "core/for_each" {
                Ok(Value::Null)
            } else {
                Ok(Value::List(out))
            }
        }
        "core/reduce" => {
            let items = list(kind, cx.recurse(node.child("collection")?).await?)?;
            let lambda = node.child("fn")?;
            let mut acc = cx.recurse(node.child("init")?).await?;
            for item in items {
                acc = apply(&cx, lambda, vec![acc, item]).await?;
            }
            Ok(acc)
        }
        "core/rec" => {
            let arg = cx.recurse(node.child("arg")?).await?;
            let frame = RecFrame {
                param: node.child("param")?,
                body: node.child("body")?,
            };
            let (param, body) = (frame.param, frame.body);
            let scope = cx
                .bind(node.child("target")?, Binding::Opaque(Rc::new(frame)))
                .bind_value(param, arg);
            scope.recurse(body).await
        }
        "core/rec_call" => {
            let arg = cx.recurse(node.child("arg")?).await?;
            let (param, body) = rec_frame(&cx, &node)?;
            cx.bind_value(param, arg).recurse(body).await
        }
        "core/ord" => {
            let test = node.data("test")?;
            let sign = cx.recurse(node.child("compare")?).await?;
            let sign = sign
                .as_f64()
                .ok_or_else(|| Fault::type_error(kind, "number", &sign))?;
            let tag = test.as_str().unwrap_or_default();
            Ordering::holds(tag, sign)
                .map(Value::Bool)
                .ok_or_else(|| Fault::Fatal(node.malformed(format!("unknown ordering '{tag}'"))))
        }
        other => Err(Fault::Fatal(EvalError::UnknownNodeKind {
            kind: other.to_string(),
        })),
    }
}

/// Resolve the body and parameter a `core/rec_call` jumps to: the frame
/// bound by the enclosing `core/rec`, else the program's recursion table.
fn rec_frame(cx: &Cx, node: &Node) -> Result<(NodeId, NodeId), Fault> {
    if let Some(Binding::Opaque(frame)) = cx.binding(node.child("target")?) {
        if let Some(frame) = frame.downcast_ref::<RecFrame>() {
            return Ok((frame.param, frame.body));
        }
    }
    let ident = node.ident("rec")?;
    let rec = cx
        .recursion(ident)
        .ok_or_else(|| Fault::Fatal(node.malformed(format!("unknown recursion id {ident}"))))?;
    let rec = cx.node(rec)?;
    Ok((rec.child("param")?, rec.child("body")?))
}

/// Apply a `core/lambda` to positional arguments. Extra arguments are
/// ignored, missing ones leave their parameter unbound.
pub(crate) async fn apply(cx: &Cx, lambda: NodeId, args: Vec<Value>) -> Outcome {
    let lambda = cx.node(lambda)?;
    let mut scope = cx.clone();
    for (param, arg) in lambda.children("params")?.iter().zip(args) {
        scope = scope.bind_value(*param, arg);
    }
    scope.recurse(lambda.child("body")?).await
}

/// Evaluate `ids` in order, collecting their values.
pub(crate) async fn eval_all(cx: &Cx, ids: &[NodeId]) -> Result<Vec<Value>, Fault> {
    let mut values = Vec::with_capacity(ids.len());
    for id in ids {
        values.push(cx.recurse(*id).await?);
    }
    Ok(values)
}

async fn sequence(cx: &Cx, ids: &[NodeId]) -> Result<(), Fault> {
    for id in ids {
        cx.recurse(*id).await?;
    }
    Ok(())
}

pub(crate) fn truth(kind: &str, value: &Value) -> Result<bool, Fault> {
    value
        .as_bool()
        .ok_or_else(|| Fault::type_error(kind, "boolean", value))
}

pub(crate) fn list(kind: &str, value: Value) -> Result<Vec<Value>, Fault> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(Fault::type_error(kind, "list", &other)),
    }
}

fn project(kind: &str, object: &Value, key: &Value) -> Outcome {
    object.project(key).ok_or_else(|| {
        Fault::raise(
            "TYPE_ERROR",
            format!("{kind}: cannot read {key} of {}", object.type_tag()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Schema;
    use crate::plugin::PluginSet;
    use crate::plugins::num::NumOps;
    use serde_json::json;

    fn run(
        schema: Schema,
        inputs: serde_json::Value,
        f: impl for<'b> FnOnce(&'b crate::builder::Builder) -> crate::builder::Expr<'b>,
    ) -> Outcome {
        let plugins = PluginSet::standard().unwrap();
        let program = plugins.build(schema, f).unwrap();
        plugins.interpreter().unwrap().run(&program, Value::from(inputs))
    }

    #[test]
    fn records_tuples_and_property_reads() {
        let out = run(Schema::Any, json!({"user": {"name": "ada"}}), |b| {
            b.record([
                ("name", b.input().get("user").get("name").into()),
                ("pair", b.tuple([1, 2]).into()),
            ])
        })
        .unwrap();
        assert_eq!(Value::from(json!({"name": "ada", "pair": [1, 2]})), out);
    }

    #[test]
    fn missing_keys_read_as_null_but_scalars_cannot_be_indexed() {
        let out = run(Schema::Any, json!({}), |b| b.input().get("absent")).unwrap();
        assert_eq!(out, Value::Null);
        let err = run(Schema::Any, json!({"n": 3}), |b| b.input().get("n").get("x")).unwrap_err();
        assert_eq!(err.raised().and_then(Value::match_key), Some("TYPE_ERROR"));
    }

    #[test]
    fn map_filter_reduce() {
        let out = run(Schema::Any, json!({"xs": [1, 2, 3, 4]}), |b| {
            let xs = b.input().get("xs");
            let doubled = xs.map(|x| x.mul(2));
            let big = doubled.filter(|x| x.gt(4));
            big.reduce(0, |acc, x| acc.add(x))
        })
        .unwrap();
        assert_eq!(out, Value::Number(14.0));
    }

    #[test]
    fn while_loop_counts_down_a_cell() {
        let out = run(Schema::Any, json!(null), |b| {
            let n = b.let_(5);
            let steps = b.let_(Value::List(vec![]));
            b.while_(n.get().gt(0)).body(|| {
                steps.push(n.get());
                n.set(n.get().sub(1));
            });
            steps.get()
        })
        .unwrap();
        assert_eq!(out, Value::from(json!([5, 4, 3, 2, 1])));
    }

    #[test]
    fn recursion_without_host_recursion() {
        let out = run(Schema::Any, json!({"n": 6}), |b| {
            b.rec(b.input().get("n"), |this, n| {
                b.cond(n.lte(1))
                    .then(1)
                    .otherwise(n.mul(this.call(n.sub(1))))
            })
        })
        .unwrap();
        assert_eq!(out, Value::Number(720.0));
    }

    #[test]
    fn lambdas_are_applied_with_call() {
        let out = run(Schema::Any, json!(null), |b| {
            let inc = b.lambda(|x| x.add(1));
            b.tuple([inc.call([1]), inc.call([41])])
        })
        .unwrap();
        assert_eq!(out, Value::from(json!([2, 42])));
    }

    #[test]
    fn non_boolean_condition_is_a_type_error() {
        let err = run(Schema::Any, json!(null), |b| b.cond(1).then(2).otherwise(3)).unwrap_err();
        assert!(!err.is_fatal());
    }
}

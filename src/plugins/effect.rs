//! The `effect` plugin: named effects delegated to the injected handler.

use std::rc::Rc;

use crate::builder::{Builder, Expr, Lift};
use crate::error::Outcome;
use crate::graph::{Field, Node};
use crate::interp::{Cx, Fragment, Value, Visit};
use crate::plugin::Plugin;

const KINDS: &[&str] = &["effect/perform"];

/// The `effect` plugin.
pub fn plugin() -> Plugin {
    Plugin::new("effect", KINDS, Rc::new(EffectFragment))
}

/// Named-effect constructor.
pub trait EffectOps {
    /// Ask the evaluation's effect handler to perform `tag` with `payload`.
    fn perform<'b>(&'b self, tag: &str, payload: impl Into<Lift<'b>>) -> Expr<'b>;
}

impl EffectOps for Builder {
    fn perform<'b>(&'b self, tag: &str, payload: impl Into<Lift<'b>>) -> Expr<'b> {
        let payload = self.lift(payload);
        self.node(
            "effect/perform",
            [
                ("tag", Field::Data(Value::from(tag))),
                ("payload", Field::Child(payload.id())),
            ],
        )
    }
}

/// Interpreter for `effect/perform`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EffectFragment;

impl Fragment for EffectFragment {
    fn name(&self) -> &str {
        "effect"
    }

    fn kinds(&self) -> &[&'static str] {
        KINDS
    }

    fn visit(&self, node: Rc<Node>, cx: Cx) -> Visit {
        Visit::suspend(evaluate(node, cx))
    }
}

async fn evaluate(node: Rc<Node>, cx: Cx) -> Outcome {
    let tag = match node.data("tag")? {
        Value::String(tag) => tag.clone(),
        _ => return Err(node.malformed("effect tag must be a string").into()),
    };
    let payload = cx.recurse(node.child("payload")?).await?;
    cx.perform(tag, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use crate::error::Fault;
    use crate::graph::Schema;
    use crate::interp::MockHandler;
    use crate::plugin::PluginSet;

    #[test]
    fn same_program_against_different_handlers() {
        let plugins = PluginSet::standard().unwrap();
        let program = plugins
            .build(Schema::Any, |b| b.perform("kv/get", "answer"))
            .unwrap();

        let mock = Rc::new(MockHandler::new().respond("kv/get", 42));
        let mocked = plugins.interpreter().unwrap().with_handler(mock.clone());
        assert_eq!(mocked.run(&program, Value::Null), Ok(Value::Number(42.0)));
        assert_eq!(mock.calls(), vec![("kv/get".to_string(), Value::from("answer"))]);

        let echo = |tag: &str, payload: Value| {
            let out = Value::from(format!("{tag}:{payload}"));
            async move { Ok(out) }
        };
        let echoing = plugins.interpreter().unwrap().with_handler(Rc::new(echo));
        assert_eq!(echoing.run(&program, Value::Null), Ok(Value::from("kv/get:\"answer\"")));

        let bare = plugins.interpreter().unwrap();
        assert!(matches!(
            bare.run(&program, Value::Null),
            Err(Fault::Fatal(EvalError::UnhandledEffect { .. }))
        ));
    }
}

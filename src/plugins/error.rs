//! The `error` plugin: raising, guarding and recovering from DSL-level
//! failures.
//!
//! Only [`Fault::Raised`] values are ever caught. Fatal faults pass through
//! `try`, `settle` and `attempt` untouched.

use std::rc::Rc;

use crate::builder::{Builder, Expr, Lift};
use crate::error::{Fault, Outcome};
use crate::graph::{Field, Node, NodeId, TypeTag};
use crate::interp::{Cx, Fragment, Value, Visit};
use crate::plugin::Plugin;

const KINDS: &[&str] = &[
    "error/fail",
    "error/try",
    "error/guard",
    "error/settle",
    "error/attempt",
];

/// Key of the wildcard `match` arm.
pub const WILDCARD: &str = "_";

/// The `error` plugin.
pub fn plugin() -> Plugin {
    Plugin::new("error", KINDS, Rc::new(ErrorFragment))
        .returns("error/settle", TypeTag::Record)
        .returns("error/attempt", TypeTag::Record)
}

/// Error-handling constructors.
pub trait ErrorOps {
    /// Raise `error` as a failure value.
    fn fail<'b>(&'b self, error: impl Into<Lift<'b>>) -> Expr<'b>;

    /// Raise `error` unless `test` is `true`; emitted as a statement and
    /// produces no value.
    fn guard<'b>(&'b self, test: impl Into<Lift<'b>>, error: impl Into<Lift<'b>>) -> Expr<'b>;

    /// Evaluate every item independently, collecting `{fulfilled, rejected}`.
    fn settle<'b, T: Into<Lift<'b>>>(&'b self, items: impl IntoIterator<Item = T>) -> Expr<'b>;

    /// Evaluate `body` into `{ok, err}` without failing.
    fn attempt<'b>(&'b self, body: impl Into<Lift<'b>>) -> Expr<'b>;

    /// Start a `try` around `body`.
    fn try_<'b>(&'b self, body: impl Into<Lift<'b>>) -> Try<'b>;
}

impl ErrorOps for Builder {
    fn fail<'b>(&'b self, error: impl Into<Lift<'b>>) -> Expr<'b> {
        let error = self.lift(error);
        self.node("error/fail", [("error", Field::Child(error.id()))])
    }

    fn guard<'b>(&'b self, test: impl Into<Lift<'b>>, error: impl Into<Lift<'b>>) -> Expr<'b> {
        let test = self.lift(test);
        let error = self.lift(error);
        let node = self.node(
            "error/guard",
            [
                ("test", Field::Child(test.id())),
                ("error", Field::Child(error.id())),
            ],
        );
        self.emit(node)
    }

    fn settle<'b, T: Into<Lift<'b>>>(&'b self, items: impl IntoIterator<Item = T>) -> Expr<'b> {
        let items = items.into_iter().map(|item| self.lift(item).id()).collect();
        self.node("error/settle", [("items", Field::Children(items))])
    }

    fn attempt<'b>(&'b self, body: impl Into<Lift<'b>>) -> Expr<'b> {
        let body = self.lift(body);
        self.node("error/attempt", [("body", Field::Child(body.id()))])
    }

    fn try_<'b>(&'b self, body: impl Into<Lift<'b>>) -> Try<'b> {
        Try {
            builder: self,
            body: self.lift(body).id(),
            error: None,
            catch: None,
            arms: Vec::new(),
            finally: None,
        }
    }
}

/// A `try` expression under construction.
#[must_use = "call `end` to produce the try node"]
pub struct Try<'b> {
    builder: &'b Builder,
    body: NodeId,
    error: Option<NodeId>,
    catch: Option<NodeId>,
    arms: Vec<(String, NodeId)>,
    finally: Option<NodeId>,
}

impl<'b> Try<'b> {
    fn error(&mut self) -> Expr<'b> {
        let b = self.builder;
        let id = *self
            .error
            .get_or_insert_with(|| b.placeholder("core/param").id());
        Expr::new(id, b)
    }

    /// Recover from any raised value; `f` receives it.
    pub fn catch<R: Into<Lift<'b>>>(mut self, f: impl FnOnce(Expr<'b>) -> R) -> Self {
        let error = self.error();
        self.catch = Some(self.builder.body(|| f(error)).id());
        self
    }

    /// Recover from errors whose match key (the string itself, else its
    /// `code` or `type` field) equals `key`.
    pub fn on<R: Into<Lift<'b>>>(mut self, key: &str, f: impl FnOnce(Expr<'b>) -> R) -> Self {
        let error = self.error();
        let arm = self.builder.body(|| f(error)).id();
        self.arms.push((key.to_string(), arm));
        self
    }

    /// Arm taken when no keyed arm matches.
    pub fn on_any<R: Into<Lift<'b>>>(self, f: impl FnOnce(Expr<'b>) -> R) -> Self {
        self.on(WILDCARD, f)
    }

    /// Run `f`'s expression after the body or handler, whatever the result.
    pub fn finally<R: Into<Lift<'b>>>(mut self, f: impl FnOnce() -> R) -> Self {
        self.finally = Some(self.builder.body(f).id());
        self
    }

    /// Produce the `error/try` node.
    pub fn end(self) -> Expr<'b> {
        let mut fields = vec![("body", Field::Child(self.body))];
        if let Some(error) = self.error {
            fields.push(("error", Field::Child(error)));
        }
        if let Some(catch) = self.catch {
            fields.push(("catch", Field::Child(catch)));
        }
        if !self.arms.is_empty() {
            fields.push(("arms", Field::Entries(self.arms)));
        }
        if let Some(finally) = self.finally {
            fields.push(("finally", Field::Child(finally)));
        }
        self.builder.node("error/try", fields)
    }
}

/// Interpreter for `error/*`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorFragment;

impl Fragment for ErrorFragment {
    fn name(&self) -> &str {
        "error"
    }

    fn kinds(&self) -> &[&'static str] {
        KINDS
    }

    fn visit(&self, node: Rc<Node>, cx: Cx) -> Visit {
        Visit::suspend(evaluate(node, cx))
    }
}

async fn evaluate(node: Rc<Node>, cx: Cx) -> Outcome {
    match node.kind.as_str() {
        "error/fail" => Err(Fault::Raised(cx.recurse(node.child("error")?).await?)),
        "error/guard" => {
            let test = cx.recurse(node.child("test")?).await?;
            if super::core::truth(&node.kind, &test)? {
                Ok(Value::Null)
            } else {
                Err(Fault::Raised(cx.recurse(node.child("error")?).await?))
            }
        }
        "error/settle" => {
            let mut fulfilled = Vec::new();
            let mut rejected = Vec::new();
            for id in node.children("items")? {
                match cx.recurse(*id).await {
                    Ok(value) => fulfilled.push(value),
                    Err(Fault::Raised(error)) => rejected.push(error),
                    Err(fatal) => return Err(fatal),
                }
            }
            Ok(Value::record([
                ("fulfilled", Value::List(fulfilled)),
                ("rejected", Value::List(rejected)),
            ]))
        }
        "error/attempt" => match cx.recurse(node.child("body")?).await {
            Ok(value) => Ok(Value::record([("ok", value), ("err", Value::Null)])),
            Err(Fault::Raised(error)) => {
                Ok(Value::record([("ok", Value::Null), ("err", error)]))
            }
            Err(fatal) => Err(fatal),
        },
        _ => visit_try(&node, &cx).await,
    }
}

async fn visit_try(node: &Node, cx: &Cx) -> Outcome {
    let outcome = match cx.recurse(node.child("body")?).await {
        Err(Fault::Raised(error)) => recover(node, cx, error).await,
        other => other,
    };
    match node.opt_child("finally") {
        Some(finally) => match cx.recurse(finally).await {
            Ok(_) => outcome,
            Err(fault) => Err(fault),
        },
        None => outcome,
    }
}

async fn recover(node: &Node, cx: &Cx, error: Value) -> Outcome {
    let scope = match node.opt_child("error") {
        Some(param) => cx.bind_value(param, error.clone()),
        None => cx.clone(),
    };
    if let Some(catch) = node.opt_child("catch") {
        return scope.recurse(catch).await;
    }
    let arm = node.fields.get("arms").and_then(|field| match field {
        Field::Entries(arms) => {
            let key = error.match_key();
            arms.iter()
                .find(|(k, _)| Some(k.as_str()) == key)
                .or_else(|| arms.iter().find(|(k, _)| k == WILDCARD))
                .map(|(_, id)| *id)
        }
        _ => None,
    });
    match arm {
        Some(arm) => scope.recurse(arm).await,
        None => Err(Fault::Raised(error)),
    }
}

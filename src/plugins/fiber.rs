//! The `fiber` plugin: bounded-concurrency map, parallel evaluation, race,
//! deadline-with-fallback and bounded retry.
//!
//! Everything runs on the evaluation's single thread. Overlap comes from
//! polling several suspended child computations at once, so nothing here
//! requires `Send`.

use futures::future::{self, Either};
use std::rc::Rc;
use tracing::{debug, warn};

use super::core::{apply, list};
use crate::builder::{Builder, Expr, Lift};
use crate::error::{Fault, Outcome};
use crate::graph::{Field, Node, TypeTag};
use crate::interp::{Cx, Fragment, Value, Visit};
use crate::plugin::Plugin;

const KINDS: &[&str] = &[
    "fiber/par_map",
    "fiber/par",
    "fiber/race",
    "fiber/timeout",
    "fiber/retry",
];

/// The `fiber` plugin.
pub fn plugin() -> Plugin {
    Plugin::new("fiber", KINDS, Rc::new(FiberFragment))
        .returns("fiber/par_map", TypeTag::List)
        .returns("fiber/par", TypeTag::List)
}

/// Concurrency constructors.
pub trait FiberOps {
    /// Map `f` over `collection` in consecutive batches of `limit` items;
    /// items of one batch run concurrently, results keep input order.
    fn par_map<'b, R: Into<Lift<'b>>>(
        &'b self,
        collection: impl Into<Lift<'b>>,
        limit: usize,
        f: impl FnOnce(Expr<'b>) -> R,
    ) -> Expr<'b>;

    /// Evaluate every item concurrently; results keep input order.
    fn par<'b, T: Into<Lift<'b>>>(&'b self, items: impl IntoIterator<Item = T>) -> Expr<'b>;

    /// Settle with whichever branch finishes first. Losers keep running
    /// unobserved.
    fn race<'b, T: Into<Lift<'b>>>(&'b self, branches: impl IntoIterator<Item = T>) -> Expr<'b>;

    /// `body`, unless it takes longer than `ms`, in which case `fallback`.
    fn timeout<'b>(
        &'b self,
        body: impl Into<Lift<'b>>,
        ms: u64,
        fallback: impl Into<Lift<'b>>,
    ) -> Expr<'b>;

    /// Evaluate a fresh copy of `body` up to `attempts` times, waiting
    /// `delay_ms` between failed attempts.
    fn retry<'b>(&'b self, body: impl Into<Lift<'b>>, attempts: u32, delay_ms: u64) -> Expr<'b>;
}

impl FiberOps for Builder {
    fn par_map<'b, R: Into<Lift<'b>>>(
        &'b self,
        collection: impl Into<Lift<'b>>,
        limit: usize,
        f: impl FnOnce(Expr<'b>) -> R,
    ) -> Expr<'b> {
        let collection = self.lift(collection);
        let lambda = self.lambda(f);
        self.node(
            "fiber/par_map",
            [
                ("collection", Field::Child(collection.id())),
                ("fn", Field::Child(lambda.id())),
                ("limit", Field::Data(Value::from(limit))),
            ],
        )
    }

    fn par<'b, T: Into<Lift<'b>>>(&'b self, items: impl IntoIterator<Item = T>) -> Expr<'b> {
        let items = items.into_iter().map(|item| self.lift(item).id()).collect();
        self.node("fiber/par", [("items", Field::Children(items))])
    }

    fn race<'b, T: Into<Lift<'b>>>(&'b self, branches: impl IntoIterator<Item = T>) -> Expr<'b> {
        let items = branches.into_iter().map(|b| self.lift(b).id()).collect();
        self.node("fiber/race", [("items", Field::Children(items))])
    }

    fn timeout<'b>(
        &'b self,
        body: impl Into<Lift<'b>>,
        ms: u64,
        fallback: impl Into<Lift<'b>>,
    ) -> Expr<'b> {
        let body = self.lift(body);
        let fallback = self.lift(fallback);
        self.node(
            "fiber/timeout",
            [
                ("body", Field::Child(body.id())),
                ("ms", Field::Data(Value::Number(ms as f64))),
                ("fallback", Field::Child(fallback.id())),
            ],
        )
    }

    fn retry<'b>(&'b self, body: impl Into<Lift<'b>>, attempts: u32, delay_ms: u64) -> Expr<'b> {
        let body = self.lift(body);
        self.node(
            "fiber/retry",
            [
                ("body", Field::Child(body.id())),
                ("attempts", Field::Data(Value::from(attempts as usize))),
                ("delay", Field::Data(Value::Number(delay_ms as f64))),
            ],
        )
    }
}

/// Interpreter for `fiber/*`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FiberFragment;

impl Fragment for FiberFragment {
    fn name(&self) -> &str {
        "fiber"
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
        "fiber/par_map" => par_map(&node, &cx).await,
        "fiber/par" => {
            let branches = node.children("items")?.iter().map(|id| cx.recurse(*id));
            let outcomes = future::join_all(branches).await;
            outcomes
                .into_iter()
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        "fiber/race" => race(&node, &cx).await,
        "fiber/timeout" => timeout(&node, &cx).await,
        _ => retry(&node, &cx).await,
    }
}

fn count(node: &Node, field: &str) -> Result<u64, Fault> {
    let value = node.data(field)?;
    value
        .as_f64()
        .filter(|n| *n >= 0.0)
        .map(|n| n as u64)
        .ok_or_else(|| Fault::Fatal(node.malformed(format!("'{field}' must be a count"))))
}

async fn par_map(node: &Node, cx: &Cx) -> Outcome {
    let items = list(&node.kind, cx.recurse(node.child("collection")?).await?)?;
    let limit = count(node, "limit")?.max(1) as usize;
    let lambda = node.child("fn")?;
    let mut results = Vec::with_capacity(items.len());
    for (batch, chunk) in items.chunks(limit).enumerate() {
        debug!(batch, size = chunk.len(), "par_map batch");
        let elements = chunk.iter().enumerate().map(|(offset, item)| {
            let index = batch * limit + offset;
            apply(cx, lambda, vec![item.clone(), Value::from(index)])
        });
        for outcome in future::join_all(elements).await {
            results.push(outcome?);
        }
    }
    Ok(Value::List(results))
}

async fn race(node: &Node, cx: &Cx) -> Outcome {
    let branches: Vec<_> = node
        .children("items")?
        .iter()
        .map(|id| cx.recurse(*id))
        .collect();
    if branches.is_empty() {
        return Err(Fault::raise("EMPTY_RACE", "race needs at least one branch"));
    }
    let (outcome, winner, losers) = future::select_all(branches).await;
    if !losers.is_empty() {
        warn!(winner, losers = losers.len(), "race settled; detaching losing branches");
        for loser in losers {
            cx.detach(loser);
        }
    }
    outcome
}

async fn timeout(node: &Node, cx: &Cx) -> Outcome {
    let ms = count(node, "ms")?;
    let primary = cx.recurse(node.child("body")?);
    let timer = Box::pin(cx.sleep(ms));
    match future::select(primary, timer).await {
        Either::Left((outcome, _timer)) => outcome,
        Either::Right(((), primary)) => {
            warn!(ms, "deadline passed; detaching primary and evaluating fallback");
            cx.detach(primary);
            cx.recurse(node.child("fallback")?).await
        }
    }
}

async fn retry(node: &Node, cx: &Cx) -> Outcome {
    let attempts = count(node, "attempts")?.max(1);
    let delay = count(node, "delay")?;
    let body = node.child("body")?;
    let mut last = Fault::raise("RETRY_EXHAUSTED", "no attempt was made");
    for attempt in 1..=attempts {
        let copy = cx.fresh_copy(body);
        match cx.recurse(copy).await {
            Ok(value) => return Ok(value),
            Err(fatal @ Fault::Fatal(_)) => return Err(fatal),
            Err(raised) => {
                debug!(attempt, attempts, error = %raised, "attempt failed");
                last = raised;
            }
        }
        if attempt < attempts && delay > 0 {
            cx.sleep(delay).await;
        }
    }
    Err(last)
}

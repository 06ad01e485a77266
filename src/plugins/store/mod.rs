//! The `store` plugin: requests, transactions, savepoints and batched
//! cursors against a stateful external resource.
//!
//! The plugin is parameterised by the root [`ResourceClient`]. Opening a
//! transaction or savepoint binds the scoped client to the unit's handle
//! placeholder; requests built through that handle use it, every other
//! request goes to the root client. Each unit evaluates with its own
//! [`crate::interp::Memo`], so nothing cached outside a transaction leaks
//! into it and nothing read inside escapes.
//!
//! A cursor re-runs its body once per streamed batch. The batch placeholder
//! is volatile, so everything derived from it is recomputed per batch while
//! lookups that do not depend on it are computed once for the whole cursor.

/// Resource client contract.
pub mod client;
/// In-memory reference client.
pub mod memory;

pub use client::{ClientError, ClientFuture, Request, ResourceClient};
pub use memory::MemoryStore;

use futures::stream::StreamExt;
use std::rc::Rc;
use tracing::{debug, warn};

use crate::builder::{Builder, Expr, Lift};
use crate::error::{EvalError, Fault, Outcome};
use crate::graph::{Field, Node, NodeId, TypeTag};
use crate::interp::{Binding, Cx, Fragment, Value, Visit};
use crate::plugin::Plugin;

const KINDS: &[&str] = &[
    "store/request",
    "store/transaction",
    "store/savepoint",
    "store/cursor",
    "store/scope",
    "store/batch",
];

/// The `store` plugin over `client`.
pub fn plugin(client: Rc<dyn ResourceClient>) -> Plugin {
    Plugin::new("store", KINDS, Rc::new(StoreFragment::new(client)))
        .inert(&["store/scope", "store/batch"])
        .returns("store/cursor", TypeTag::List)
}

/// Entry point to the resource constructors.
pub trait StoreOps {
    /// Handle on the root client.
    fn store(&self) -> Store<'_>;
}

impl StoreOps for Builder {
    fn store(&self) -> Store<'_> {
        Store {
            builder: self,
            scope: None,
        }
    }
}

/// A resource handle: the root client, or the client of an enclosing
/// transaction or savepoint.
///
/// Every operation built through a handle is emitted as a statement, so
/// writes run in the order they were written even when their results are
/// never used.
#[derive(Clone, Copy)]
pub struct Store<'b> {
    builder: &'b Builder,
    scope: Option<NodeId>,
}

impl std::fmt::Debug for Store<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("scope", &self.scope).finish()
    }
}

impl<'b> Store<'b> {
    /// Whether this handle belongs to a transaction or savepoint.
    pub fn is_scoped(&self) -> bool {
        self.scope.is_some()
    }

    fn emit(&self, kind: &str, mut fields: Vec<(&'static str, Field)>) -> Expr<'b> {
        if let Some(scope) = self.scope {
            fields.push(("scope", Field::Child(scope)));
        }
        let node = self.builder.node(kind, fields);
        self.builder.emit(node)
    }

    fn unit<R: Into<Lift<'b>>>(&self, kind: &str, f: impl FnOnce(Store<'b>) -> R) -> Expr<'b> {
        let b = self.builder;
        let handle = b.placeholder("store/scope").id();
        let inner = Store {
            builder: b,
            scope: Some(handle),
        };
        let body = b.body(|| f(inner)).id();
        self.emit(
            kind,
            vec![("handle", Field::Child(handle)), ("body", Field::Child(body))],
        )
    }

    /// Run one operation.
    pub fn request(&self, op: &str, args: impl Into<Lift<'b>>) -> Expr<'b> {
        let args = self.builder.lift(args).id();
        self.emit(
            "store/request",
            vec![
                ("op", Field::Data(Value::from(op))),
                ("args", Field::Child(args)),
            ],
        )
    }

    /// Run `f`'s expression atomically. `f` receives the transaction's
    /// handle; the transaction commits when the expression succeeds and
    /// rolls back when it fails.
    pub fn transaction<R: Into<Lift<'b>>>(&self, f: impl FnOnce(Store<'b>) -> R) -> Expr<'b> {
        self.unit("store/transaction", f)
    }

    /// Run a fixed list of `(op, args)` requests atomically, in order,
    /// producing the list of their results.
    pub fn transaction_pipeline<'s, T: Into<Lift<'b>>>(
        &self,
        requests: impl IntoIterator<Item = (&'s str, T)>,
    ) -> Expr<'b> {
        let b = self.builder;
        let handle = b.placeholder("store/scope").id();
        let inner = Store {
            builder: b,
            scope: Some(handle),
        };
        let steps: Vec<Expr<'b>> = requests
            .into_iter()
            .map(|(op, args)| inner.request(op, args))
            .collect();
        // Claiming the requests as tuple items takes them out of the
        // enclosing statement block.
        let steps = b.tuple(steps).id();
        self.emit(
            "store/transaction",
            vec![("handle", Field::Child(handle)), ("body", Field::Child(steps))],
        )
    }

    /// Run `f`'s expression in a savepoint of this handle's unit of work.
    /// A failure rolls back to the savepoint and still fails the caller.
    pub fn savepoint<R: Into<Lift<'b>>>(&self, f: impl FnOnce(Store<'b>) -> R) -> Expr<'b> {
        self.unit("store/savepoint", f)
    }

    /// Stream `op` in batches of `batch_size`, evaluating `f`'s expression
    /// once per batch. Produces the list of per-batch results.
    pub fn cursor<R: Into<Lift<'b>>>(
        &self,
        op: &str,
        args: impl Into<Lift<'b>>,
        batch_size: usize,
        f: impl FnOnce(Expr<'b>) -> R,
    ) -> Expr<'b> {
        let b = self.builder;
        let args = b.lift(args).id();
        let batch = b.placeholder("store/batch");
        let body = b.body(|| f(batch)).id();
        self.emit(
            "store/cursor",
            vec![
                ("op", Field::Data(Value::from(op))),
                ("args", Field::Child(args)),
                ("batch_size", Field::Data(Value::from(batch_size))),
                ("batch", Field::Child(batch.id())),
                ("body", Field::Child(body)),
            ],
        )
    }
}

/// Scoped client bound to a `store/scope` placeholder.
struct ScopeClient(Rc<dyn ResourceClient>);

/// Interpreter for `store/*`.
#[derive(Clone)]
pub struct StoreFragment {
    client: Rc<dyn ResourceClient>,
}

impl StoreFragment {
    /// Fragment sending unscoped requests to `client`.
    pub fn new(client: Rc<dyn ResourceClient>) -> Self {
        Self { client }
    }
}

impl Fragment for StoreFragment {
    fn name(&self) -> &str {
        "store"
    }

    fn kinds(&self) -> &[&'static str] {
        KINDS
    }

    fn is_volatile(&self, kind: &str) -> bool {
        kind == "store/batch"
    }

    fn is_placeholder(&self, kind: &str) -> bool {
        matches!(kind, "store/scope" | "store/batch")
    }

    fn visit(&self, node: Rc<Node>, cx: Cx) -> Visit {
        match node.kind.as_str() {
            "store/batch" => Visit::Ready(cx.placeholder_value(&node)),
            "store/scope" => Visit::Ready(Err(Fault::Fatal(
                node.malformed("resource handles are not values"),
            ))),
            _ => Visit::suspend(evaluate(self.client.clone(), node, cx)),
        }
    }
}

/// The client a node's requests go to.
fn resolve(
    root: &Rc<dyn ResourceClient>,
    cx: &Cx,
    node: &Node,
) -> Result<Rc<dyn ResourceClient>, Fault> {
    let Some(scope) = node.opt_child("scope") else {
        return Ok(root.clone());
    };
    if let Some(Binding::Opaque(bound)) = cx.binding(scope) {
        if let Some(ScopeClient(client)) = bound.downcast_ref::<ScopeClient>() {
            return Ok(client.clone());
        }
    }
    Err(Fault::Fatal(EvalError::UnboundPlaceholder {
        node: scope,
        kind: "store/scope".to_string(),
    }))
}

fn op_name(node: &Node) -> Result<String, Fault> {
    match node.data("op")? {
        Value::String(op) => Ok(op.clone()),
        _ => Err(Fault::Fatal(node.malformed("'op' must be a string"))),
    }
}

async fn evaluate(root: Rc<dyn ResourceClient>, node: Rc<Node>, cx: Cx) -> Outcome {
    let client = resolve(&root, &cx, &node)?;
    match node.kind.as_str() {
        "store/request" => {
            let args = cx.recurse(node.child("args")?).await?;
            let op = op_name(&node)?;
            debug!(%op, "store request");
            Ok(client.request(Request::new(op, args)).await?)
        }
        "store/cursor" => cursor(client, &node, &cx).await,
        kind => {
            let scoped = if kind == "store/savepoint" {
                client.savepoint().await?
            } else {
                client.begin().await?
            };
            unit(scoped, &node, &cx).await
        }
    }
}

async fn unit(scoped: Rc<dyn ResourceClient>, node: &Node, cx: &Cx) -> Outcome {
    debug!(kind = %node.kind, "unit of work opened");
    let handle = node.child("handle")?;
    let inner = cx
        .scoped()
        .bind(handle, Binding::Opaque(Rc::new(ScopeClient(scoped.clone()))));
    let outcome = inner.recurse(node.child("body")?).await;
    let fault = match outcome {
        Ok(value) => match scoped.commit().await {
            Ok(()) => {
                debug!(kind = %node.kind, "committed");
                return Ok(value);
            }
            Err(err) => {
                warn!(kind = %node.kind, error = %err, "commit failed");
                Fault::from(err)
            }
        },
        Err(fault) => fault,
    };
    match scoped.rollback().await {
        Ok(()) => debug!(kind = %node.kind, error = %fault, "rolled back"),
        Err(err) => warn!(kind = %node.kind, error = %err, "rollback failed"),
    }
    Err(fault)
}

async fn cursor(client: Rc<dyn ResourceClient>, node: &Node, cx: &Cx) -> Outcome {
    let args = cx.recurse(node.child("args")?).await?;
    let batch_size = node
        .data("batch_size")?
        .as_f64()
        .filter(|n| *n >= 1.0)
        .map(|n| n as usize)
        .ok_or_else(|| Fault::Fatal(node.malformed("'batch_size' must be positive")))?;
    let batch = node.child("batch")?;
    let body = node.child("body")?;
    let mut batches = client.stream(Request::new(op_name(node)?, args), batch_size);
    let mut results = Vec::new();
    while let Some(rows) = batches.next().await {
        let rows = rows?;
        debug!(batch = results.len(), rows = rows.len(), "cursor batch");
        results.push(cx.bind_value(batch, Value::List(rows)).recurse(body).await?);
    }
    Ok(Value::List(results))
}

//! The evaluation driver.
//!
//! Every node visit goes through [`Cx::recurse`]: cache lookup, fragment
//! selection, visitor execution and the taint decision all happen here, so
//! the memo layer observes every recursive call a fragment makes.
//!
//! Nested visits are nested polls, so every poll through [`Cx::recurse`]
//! first makes sure enough native stack is left, switching to a fresh
//! segment when it is not. Graph depth is bounded by
//! `EvalConfig::max_recursion_depth`, not by the thread's stack size.

use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::debug;

use super::env::{Binding, Env};
use super::fragment::{Fragment, FragmentTable, StepEffect, Visit};
use super::handler::EffectHandler;
use super::memo::Memo;
use crate::config::EvalConfig;
use crate::error::{EvalError, Fault, Outcome};
use crate::graph::{Node, NodeId, Program};
use crate::interp::value::Value;

/// Free stack below which a poll moves to a new segment.
const RED_ZONE: usize = 256 * 1024;

/// Size of each segment allocated once the red zone is reached.
const STACK_SEGMENT: usize = 4 * 1024 * 1024;

/// Node storage for one evaluation: the program's nodes plus any per-attempt
/// copies appended while it runs.
pub(crate) struct Arena {
    nodes: RefCell<Vec<Rc<Node>>>,
    /// Per node: its subgraph holds no volatile or placeholder kind, so its
    /// value cannot depend on the bindings of the path reading it.
    independent: RefCell<Vec<bool>>,
}

impl Arena {
    pub(crate) fn from_program(program: &Program, table: &FragmentTable) -> Self {
        let arena = Self {
            nodes: RefCell::new(Vec::with_capacity(program.nodes.len())),
            independent: RefCell::new(Vec::with_capacity(program.nodes.len())),
        };
        for node in &program.nodes {
            arena.push(Rc::new(node.clone()), table);
        }
        arena
    }

    fn get(&self, id: NodeId) -> Option<Rc<Node>> {
        self.nodes.borrow().get(id.index()).cloned()
    }

    fn is_independent(&self, id: NodeId) -> bool {
        self.independent
            .borrow()
            .get(id.index())
            .copied()
            .unwrap_or(false)
    }

    fn push(&self, node: Rc<Node>, table: &FragmentTable) {
        let own = table
            .select(&node)
            .is_none_or(|fragment| !depends_on_bindings(fragment.as_ref(), &node.kind));
        let independent = own && node.edges().all(|edge| self.is_independent(edge));
        self.independent.borrow_mut().push(independent);
        self.nodes.borrow_mut().push(node);
    }

    /// Copy every node reachable from `root` into fresh slots, except
    /// placeholders, and return the copy of `root`.
    fn copy_subtree(&self, root: NodeId, table: &FragmentTable) -> NodeId {
        let nodes = self.nodes.borrow();
        let mut reachable = Vec::new();
        let mut seen = vec![false; nodes.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if id.index() >= seen.len() || seen[id.index()] {
                continue;
            }
            seen[id.index()] = true;
            let node = &nodes[id.index()];
            if id != root && table.is_placeholder(&node.kind) {
                continue;
            }
            reachable.push(id);
            stack.extend(node.edges());
        }
        // Children precede parents; copying in id order keeps the DAG invariant.
        reachable.sort();
        let originals: Vec<Rc<Node>> =
            reachable.iter().map(|id| nodes[id.index()].clone()).collect();
        let mut next = nodes.len();
        drop(nodes);
        let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();
        for (id, original) in reachable.into_iter().zip(originals) {
            let fresh = NodeId::from_index(next);
            next += 1;
            let copy = original.relocated(fresh, |edge| {
                mapping.get(&edge).copied().unwrap_or(edge)
            });
            mapping.insert(id, fresh);
            self.push(Rc::new(copy), table);
        }
        mapping.get(&root).copied().unwrap_or(root)
    }
}

fn depends_on_bindings(fragment: &dyn Fragment, kind: &str) -> bool {
    fragment.is_volatile(kind) || fragment.is_placeholder(kind)
}

/// Polls the wrapped visit with at least [`RED_ZONE`] bytes of stack free.
struct Grow(LocalBoxFuture<'static, Outcome>);

impl Future for Grow {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, task: &mut Context<'_>) -> Poll<Outcome> {
        let visit = &mut self.0;
        stacker::maybe_grow(RED_ZONE, STACK_SEGMENT, || visit.as_mut().poll(task))
    }
}

/// Futures detached by race/timeout, polled alongside the root computation.
#[derive(Default)]
pub(crate) struct Background {
    queued: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
    running: RefCell<FuturesUnordered<LocalBoxFuture<'static, ()>>>,
}

impl Background {
    fn detach(&self, fut: LocalBoxFuture<'static, ()>) {
        self.queued.borrow_mut().push(fut);
    }

    /// Poll every detached future once it is ready to make progress; returns
    /// how many are still pending.
    pub(crate) fn poll(&self, task: &mut Context<'_>) -> usize {
        loop {
            let queued = std::mem::take(&mut *self.queued.borrow_mut());
            let mut running = self.running.borrow_mut();
            running.extend(queued);
            while let Poll::Ready(Some(())) = running.poll_next_unpin(task) {}
            let pending = running.len();
            drop(running);
            if self.queued.borrow().is_empty() {
                return pending;
            }
        }
    }

    /// Drop every detached future, returning how many were still pending.
    ///
    /// Detached futures hold the evaluation's [`Shared`] state, which in turn
    /// holds them; clearing the set is what releases both.
    pub(crate) fn clear(&self) -> usize {
        let queued = std::mem::take(&mut *self.queued.borrow_mut());
        let running = std::mem::take(&mut *self.running.borrow_mut());
        let abandoned = queued.len() + running.len();
        drop(queued);
        drop(running);
        abandoned
    }
}

/// State shared by every [`Cx`] of one evaluation.
pub(crate) struct Shared {
    pub(crate) arena: Arena,
    pub(crate) table: Rc<FragmentTable>,
    pub(crate) handler: Rc<dyn EffectHandler>,
    pub(crate) inputs: Value,
    pub(crate) cells: RefCell<HashMap<u32, Value>>,
    pub(crate) recursions: BTreeMap<u32, NodeId>,
    pub(crate) background: Background,
    pub(crate) config: EvalConfig,
}

/// Evaluation context handed to fragment visitors.
///
/// Cloning is cheap. A `Cx` carries the environment of placeholder bindings
/// for the path being evaluated, the memo cache of the enclosing scope and
/// the taint sink of the visit it belongs to.
#[derive(Clone)]
pub struct Cx {
    shared: Rc<Shared>,
    memo: Rc<Memo>,
    env: Env,
    taint: Rc<Cell<bool>>,
    depth: usize,
}

impl Cx {
    pub(crate) fn root(shared: Rc<Shared>) -> Self {
        let memo = Rc::new(Memo::new(shared.config.cache));
        Self {
            shared,
            memo,
            env: Env::new(),
            taint: Rc::new(Cell::new(false)),
            depth: 0,
        }
    }

    /// Fetch a node from the evaluation arena.
    pub fn node(&self, id: NodeId) -> Result<Rc<Node>, Fault> {
        self.shared
            .arena
            .get(id)
            .ok_or(Fault::Fatal(EvalError::MissingNode(id)))
    }

    /// Service one [`StepEffect`].
    pub fn step(&self, effect: StepEffect) -> LocalBoxFuture<'static, Outcome> {
        match effect {
            StepEffect::Recurse(id) => self.recurse(id),
            StepEffect::LegacyCall { fragment, node } => {
                let outcome = self.node(node).and_then(|node| fragment.call(&node, self));
                futures::future::ready(outcome).boxed_local()
            }
            StepEffect::Named { tag, payload } => {
                tracing::trace!(%tag, "named effect");
                self.shared.handler.handle(&tag, payload)
            }
        }
    }

    /// Evaluate a child through the driver.
    pub fn recurse(&self, id: NodeId) -> LocalBoxFuture<'static, Outcome> {
        let child = Cx {
            taint: Rc::new(Cell::new(false)),
            depth: self.depth + 1,
            ..self.clone()
        };
        let sink = self.taint.clone();
        let memo = self.memo.clone();
        let visit = async move {
            let outcome = visit(child, id).await;
            if memo.is_tainted(id) {
                sink.set(true);
            }
            outcome
        };
        Grow(visit.boxed_local()).boxed_local()
    }

    /// Perform a named effect through the injected handler.
    pub fn perform(
        &self,
        tag: impl Into<String>,
        payload: Value,
    ) -> LocalBoxFuture<'static, Outcome> {
        self.step(StepEffect::Named {
            tag: tag.into(),
            payload,
        })
    }

    /// Context with `node` bound to `binding`; shares cache and taint sink.
    pub fn bind(&self, node: NodeId, binding: Binding) -> Cx {
        Cx {
            env: self.env.bind(node, binding),
            ..self.clone()
        }
    }

    /// Context with `node` bound to a value.
    pub fn bind_value(&self, node: NodeId, value: Value) -> Cx {
        self.bind(node, Binding::Value(value))
    }

    /// Innermost binding of `node` on this path.
    pub fn binding(&self, node: NodeId) -> Option<&Binding> {
        self.env.lookup(node)
    }

    /// Value bound to a placeholder, or a fatal error naming it.
    pub fn placeholder_value(&self, node: &Node) -> Outcome {
        match self.binding(node.id) {
            Some(Binding::Value(value)) => Ok(value.clone()),
            _ => Err(Fault::Fatal(EvalError::UnboundPlaceholder {
                node: node.id,
                kind: node.kind.clone(),
            })),
        }
    }

    /// Context with its own, empty cache (transaction and savepoint scopes).
    pub fn scoped(&self) -> Cx {
        Cx {
            memo: Rc::new(Memo::new(self.shared.config.cache)),
            ..self.clone()
        }
    }

    /// Structurally fresh copy of the subtree at `id`, for retry attempts.
    /// Scope placeholders stay shared so the copy still sees its bindings.
    pub fn fresh_copy(&self, id: NodeId) -> NodeId {
        self.shared.arena.copy_subtree(id, &self.shared.table)
    }

    /// Keep `fut` running in the background without observing its outcome.
    pub fn detach(&self, fut: impl Future<Output = Outcome> + 'static) {
        self.shared.background.detach(fut.map(|_| ()).boxed_local());
    }

    /// Suspend for `ms` milliseconds on the runtime timer.
    pub fn sleep(&self, ms: u64) -> tokio::time::Sleep {
        tokio::time::sleep(Duration::from_millis(ms))
    }

    /// Input values supplied to the run.
    pub fn inputs(&self) -> &Value {
        &self.shared.inputs
    }

    /// Current value of a mutable cell.
    pub fn cell(&self, ident: u32) -> Outcome {
        self.shared
            .cells
            .borrow()
            .get(&ident)
            .cloned()
            .ok_or(Fault::Fatal(EvalError::UninitializedCell(ident)))
    }

    /// Overwrite a mutable cell.
    pub fn set_cell(&self, ident: u32, value: Value) {
        self.shared.cells.borrow_mut().insert(ident, value);
    }

    /// The `core/rec` node that introduced recursion id `ident`.
    pub fn recursion(&self, ident: u32) -> Option<NodeId> {
        self.shared.recursions.get(&ident).copied()
    }

    /// Cache of the enclosing scope.
    pub fn memo(&self) -> &Memo {
        &self.memo
    }
}

fn visit(cx: Cx, id: NodeId) -> LocalBoxFuture<'static, Outcome> {
    async move {
        let limit = cx.shared.config.max_recursion_depth;
        if cx.depth > limit {
            return Err(Fault::Fatal(EvalError::RecursionLimit { limit }));
        }
        if let Some(hit) = cx.memo.lookup(id) {
            debug!(node = %id, "cache hit");
            return hit;
        }
        if let Some(running) = cx.memo.running(id) {
            debug!(node = %id, "joining running visit");
            return running.await;
        }
        let node = cx.node(id)?;
        let Some(fragment) = cx.shared.table.select(&node).cloned() else {
            return Err(Fault::Fatal(EvalError::UnknownNodeKind {
                kind: node.kind.clone(),
            }));
        };
        if cx.memo.is_enabled() && cx.shared.arena.is_independent(id) {
            let memo = cx.memo.clone();
            let running = run_fragment(cx, node, fragment).boxed_local().shared();
            memo.start(id, &running);
            running.await
        } else {
            run_fragment(cx, node, fragment).await
        }
    }
    .boxed_local()
}

async fn run_fragment(cx: Cx, node: Rc<Node>, fragment: Rc<dyn Fragment>) -> Outcome {
    let id = node.id;
    debug!(node = %id, kind = %node.kind, fragment = fragment.name(), "visit");
    let volatile = fragment.is_volatile(&node.kind);
    let outcome = match fragment.visit(node.clone(), cx.clone()) {
        Visit::Ready(outcome) => outcome,
        Visit::Suspend(fut) => fut.await,
    };
    let tainted = volatile || cx.taint.get();
    if tainted {
        debug!(node = %id, kind = %node.kind, "tainted");
    }
    cx.memo.record(id, &outcome, tainted);
    outcome
}

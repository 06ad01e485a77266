//! Expression graph builder
//!
//! A build closure runs exactly once against a [`Builder`]. Every handle
//! method appends a node to the arena; statement combinators (`let_`,
//! `each`, `while_`, `guard`, ...) additionally record their node in the
//! innermost open statement block. Callback-taking combinators run their
//! callback once, now, against placeholder handles and capture whatever it
//! emitted as a nested block.
//!
//! Errors are deferred: the first failure is remembered, the offending call
//! returns an inert `core/nop` handle so the closure can finish, and
//! [`Builder::finish`] reports the error.

/// Typeclass dispatch and derived comparisons.
pub mod dispatch;
/// Expression and lambda handles.
pub mod expr;
/// Host value lifting.
pub mod lift;

pub use expr::{Expr, Lambda};
pub use lift::Lift;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};

use crate::error::{BuildError, BuildResult};
use crate::graph::{Field, Node, NodeId, Program, Schema, hash, reach};
use crate::interp::value::Value;
use crate::plugin::PluginSet;

/// Mutable state of one build pass.
pub struct Builder {
    nodes: RefCell<Vec<Node>>,
    blocks: RefCell<Vec<Vec<NodeId>>>,
    open: RefCell<HashSet<NodeId>>,
    next_ident: Cell<u32>,
    recursions: RefCell<BTreeMap<u32, NodeId>>,
    error: RefCell<Option<BuildError>>,
    input: Cell<Option<NodeId>>,
    plugins: PluginSet,
    schema: Schema,
}

impl Builder {
    /// Start a build against `plugins` with the declared input `schema`.
    pub fn new(plugins: PluginSet, schema: Schema) -> Self {
        Self {
            nodes: RefCell::new(Vec::new()),
            blocks: RefCell::new(vec![Vec::new()]),
            open: RefCell::new(HashSet::new()),
            next_ident: Cell::new(0),
            recursions: RefCell::new(BTreeMap::new()),
            error: RefCell::new(None),
            input: Cell::new(None),
            plugins,
            schema,
        }
    }

    /// Plugins active in this build.
    pub fn plugins(&self) -> &PluginSet {
        &self.plugins
    }

    /// Declared input schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Append a node with the given fields.
    ///
    /// Any operand that is still a pending statement is claimed: it leaves
    /// its statement block and is evaluated only at this operand position.
    pub fn node<'n>(
        &self,
        kind: &str,
        fields: impl IntoIterator<Item = (&'n str, Field)>,
    ) -> Expr<'_> {
        let mut nodes = self.nodes.borrow_mut();
        let id = NodeId::from_index(nodes.len());
        let mut node = Node::new(id, kind);
        for (name, field) in fields {
            node.fields.insert(name.to_string(), field);
        }
        let edges: Vec<NodeId> = node.edges().collect();
        nodes.push(node);
        drop(nodes);
        self.claim(&edges);
        Expr::new(id, self)
    }

    /// Lift a host value into the graph.
    pub fn lift<'b>(&'b self, value: impl Into<Lift<'b>>) -> Expr<'b> {
        let value = value.into();
        if let Some(reason) = value.defect() {
            return self.reject(BuildError::UnliftableValue { reason });
        }
        self.lift_checked(value)
    }

    fn lift_checked<'b>(&'b self, value: Lift<'b>) -> Expr<'b> {
        match value {
            Lift::Expr(expr) if std::ptr::eq(expr.builder, self) => expr,
            Lift::Expr(expr) => self.reject(BuildError::UnliftableValue {
                reason: format!("handle {} belongs to a different build", expr.id),
            }),
            Lift::Null => self.literal(Value::Null),
            Lift::Bool(b) => self.literal(Value::Bool(b)),
            Lift::Number(n) => self.literal(Value::Number(n)),
            Lift::String(s) => self.literal(Value::String(s)),
            Lift::Value(v) => self.literal(v),
            Lift::List(items) => {
                let items = items
                    .into_iter()
                    .map(|item| self.lift_checked(item).id)
                    .collect();
                self.node("core/tuple", [("items", Field::Children(items))])
            }
            Lift::Map(entries) => {
                let entries = entries
                    .into_iter()
                    .map(|(key, value)| (key, self.lift_checked(value).id))
                    .collect();
                self.node("core/record", [("entries", Field::Entries(entries))])
            }
        }
    }

    /// A literal node.
    pub fn literal(&self, value: Value) -> Expr<'_> {
        self.node("core/literal", [("value", Field::Data(value))])
    }

    /// The program input. Every call returns the same node.
    pub fn input(&self) -> Expr<'_> {
        if let Some(id) = self.input.get() {
            return Expr::new(id, self);
        }
        let input = self.node("core/input", []);
        self.input.set(Some(input.id));
        input
    }

    /// A record node from `(key, value)` pairs.
    pub fn record<'b, K: Into<String>>(
        &'b self,
        entries: impl IntoIterator<Item = (K, Lift<'b>)>,
    ) -> Expr<'b> {
        self.lift(Lift::map(entries))
    }

    /// A tuple node from positional items.
    pub fn tuple<'b, T: Into<Lift<'b>>>(&'b self, items: impl IntoIterator<Item = T>) -> Expr<'b> {
        self.lift(Lift::list(items))
    }

    /// A fresh placeholder node of `kind`, bound by its owning combinator
    /// during evaluation.
    pub fn placeholder(&self, kind: &str) -> Expr<'_> {
        self.node(kind, [])
    }

    /// A fresh synthetic identity (cell reference, recursion id).
    pub fn ident(&self) -> u32 {
        let ident = self.next_ident.get();
        self.next_ident.set(ident + 1);
        ident
    }

    /// Record `expr` as a statement of the innermost open block.
    pub fn emit<'b>(&'b self, expr: Expr<'b>) -> Expr<'b> {
        if let Some(block) = self.blocks.borrow_mut().last_mut() {
            block.push(expr.id);
        }
        self.open.borrow_mut().insert(expr.id);
        expr
    }

    /// Run `f` with a fresh statement block. Returns `f`'s result alone when
    /// nothing was emitted, else a `core/do` sequencing the block before it.
    pub fn body<'b, R: Into<Lift<'b>>>(&'b self, f: impl FnOnce() -> R) -> Expr<'b> {
        self.blocks.borrow_mut().push(Vec::new());
        let result = f();
        let result = self.lift(result);
        self.claim(&[result.id]);
        let steps = self.blocks.borrow_mut().pop().unwrap_or_default();
        {
            let mut open = self.open.borrow_mut();
            for id in &steps {
                open.remove(id);
            }
        }
        if steps.is_empty() {
            result
        } else {
            self.node(
                "core/do",
                [
                    ("steps", Field::Children(steps)),
                    ("result", Field::Child(result.id)),
                ],
            )
        }
    }

    /// Remember the first build error and hand back an inert stand-in.
    pub fn reject(&self, err: BuildError) -> Expr<'_> {
        let mut slot = self.error.borrow_mut();
        if slot.is_none() {
            tracing::debug!(error = %err, "build error");
            *slot = Some(err);
        }
        drop(slot);
        self.node("core/nop", [])
    }

    /// Mark the `core/rec` node that owns recursion id `ident`.
    pub(crate) fn register_recursion(&self, ident: u32, node: NodeId) {
        self.recursions.borrow_mut().insert(ident, node);
    }

    /// Kind of an already-built node.
    pub fn kind_of(&self, id: NodeId) -> Option<String> {
        self.nodes.borrow().get(id.index()).map(|node| node.kind.clone())
    }

    pub(crate) fn with_node<T>(&self, id: NodeId, f: impl FnOnce(&Node) -> T) -> Option<T> {
        self.nodes.borrow().get(id.index()).map(f)
    }

    fn claim(&self, ids: &[NodeId]) {
        let mut open = self.open.borrow_mut();
        for id in ids {
            if !open.remove(id) {
                continue;
            }
            let mut blocks = self.blocks.borrow_mut();
            for block in blocks.iter_mut().rev() {
                if let Some(pos) = block.iter().position(|s| s == id) {
                    block.remove(pos);
                    break;
                }
            }
        }
    }

    /// Close the build with `result` and assemble the [`Program`].
    pub fn finish(self, result: NodeId) -> BuildResult<Program> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.claim(&[result]);
        let statements = self.blocks.borrow_mut().drain(..).next().unwrap_or_default();
        {
            let nodes = self.nodes.borrow();
            reach::check(&nodes, &statements, result, |kind| self.plugins.is_inert(kind))?;
        }
        let root = self
            .node(
                "core/program",
                [
                    ("statements", Field::Children(statements.clone())),
                    ("result", Field::Child(result)),
                ],
            )
            .id;
        let nodes = self.nodes.take();
        let hash = hash::structural_hash(&nodes, root);
        tracing::debug!(%hash, nodes = nodes.len(), "program built");
        Ok(Program {
            nodes,
            root,
            statements,
            result,
            hash,
            plugins: self.plugins.names().into_iter().map(String::from).collect(),
            input_schema: self.schema,
            recursions: self.recursions.take(),
        })
    }
}

/// Conditional awaiting both branches.
#[must_use = "a conditional produces no node until both branches are given"]
pub struct Cond<'b> {
    builder: &'b Builder,
    test: NodeId,
}

/// Conditional with its `then` branch supplied.
#[must_use = "a conditional produces no node until both branches are given"]
pub struct CondThen<'b> {
    builder: &'b Builder,
    test: NodeId,
    then: NodeId,
}

/// Conditional with its `otherwise` branch supplied.
#[must_use = "a conditional produces no node until both branches are given"]
pub struct CondElse<'b> {
    builder: &'b Builder,
    test: NodeId,
    otherwise: NodeId,
}

impl<'b> Cond<'b> {
    /// Branch taken when the test is `true`.
    pub fn then(self, value: impl Into<Lift<'b>>) -> CondThen<'b> {
        CondThen {
            builder: self.builder,
            test: self.test,
            then: self.builder.lift(value).id,
        }
    }

    /// Branch taken when the test is `false`.
    pub fn otherwise(self, value: impl Into<Lift<'b>>) -> CondElse<'b> {
        CondElse {
            builder: self.builder,
            test: self.test,
            otherwise: self.builder.lift(value).id,
        }
    }
}

impl<'b> CondThen<'b> {
    /// Supply the `false` branch and produce the `core/cond` node.
    pub fn otherwise(self, value: impl Into<Lift<'b>>) -> Expr<'b> {
        let otherwise = self.builder.lift(value).id;
        cond_node(self.builder, self.test, self.then, otherwise)
    }
}

impl<'b> CondElse<'b> {
    /// Supply the `true` branch and produce the `core/cond` node.
    pub fn then(self, value: impl Into<Lift<'b>>) -> Expr<'b> {
        let then = self.builder.lift(value).id;
        cond_node(self.builder, self.test, then, self.otherwise)
    }
}

fn cond_node(builder: &Builder, test: NodeId, then: NodeId, otherwise: NodeId) -> Expr<'_> {
    builder.node(
        "core/cond",
        [
            ("test", Field::Child(test)),
            ("then", Field::Child(then)),
            ("else", Field::Child(otherwise)),
        ],
    )
}

/// A mutable cell introduced by [`Builder::let_`].
#[derive(Clone, Copy)]
pub struct LetCell<'b> {
    builder: &'b Builder,
    ident: u32,
}

impl<'b> LetCell<'b> {
    /// Current value of the cell.
    pub fn get(self) -> Expr<'b> {
        self.builder
            .node("core/let_get", [("cell", Field::Ident(self.ident))])
    }

    /// Overwrite the cell; emitted as a statement.
    pub fn set(self, value: impl Into<Lift<'b>>) -> Expr<'b> {
        self.write("core/let_set", value)
    }

    /// Append to a list-valued cell; emitted as a statement.
    pub fn push(self, value: impl Into<Lift<'b>>) -> Expr<'b> {
        self.write("core/let_push", value)
    }

    fn write(self, kind: &str, value: impl Into<Lift<'b>>) -> Expr<'b> {
        let value = self.builder.lift(value);
        let node = self.builder.node(
            kind,
            [
                ("cell", Field::Ident(self.ident)),
                ("value", Field::Child(value.id)),
            ],
        );
        self.builder.emit(node)
    }
}

/// A `while` loop awaiting its body.
#[must_use = "a loop produces no node until its body is given"]
pub struct While<'b> {
    builder: &'b Builder,
    test: NodeId,
}

impl<'b> While<'b> {
    /// Record the loop body and emit the `core/while` statement.
    pub fn body<R: Into<Lift<'b>>>(self, f: impl FnOnce() -> R) -> Expr<'b> {
        let body = self.builder.body(f);
        let node = self.builder.node(
            "core/while",
            [
                ("test", Field::Child(self.test)),
                ("body", Field::Child(body.id)),
            ],
        );
        self.builder.emit(node)
    }
}

/// The `self` handle of a recursive definition.
#[derive(Clone, Copy)]
pub struct Rec<'b> {
    builder: &'b Builder,
    ident: u32,
    target: NodeId,
}

impl<'b> Rec<'b> {
    /// Recursive call with a new argument.
    pub fn call(self, arg: impl Into<Lift<'b>>) -> Expr<'b> {
        let arg = self.builder.lift(arg);
        self.builder.node(
            "core/rec_call",
            [
                ("rec", Field::Ident(self.ident)),
                ("target", Field::Child(self.target)),
                ("arg", Field::Child(arg.id)),
            ],
        )
    }
}

impl Builder {
    /// Start a conditional on `test`.
    pub fn cond<'b>(&'b self, test: impl Into<Lift<'b>>) -> Cond<'b> {
        Cond {
            builder: self,
            test: self.lift(test).id,
        }
    }

    /// Introduce a mutable cell seeded with `init`; emits `core/let`.
    pub fn let_<'b>(&'b self, init: impl Into<Lift<'b>>) -> LetCell<'b> {
        let init = self.lift(init);
        let ident = self.ident();
        let node = self.node(
            "core/let",
            [("cell", Field::Ident(ident)), ("init", Field::Child(init.id))],
        );
        self.emit(node);
        LetCell {
            builder: self,
            ident,
        }
    }

    /// Run `body` once per item of `collection`; emits `core/each`.
    pub fn each<'b, R: Into<Lift<'b>>>(
        &'b self,
        collection: impl Into<Lift<'b>>,
        body: impl FnOnce(Expr<'b>) -> R,
    ) -> Expr<'b> {
        let collection = self.lift(collection);
        let item = self.placeholder("core/param");
        let body = self.body(|| body(item));
        let node = self.node(
            "core/each",
            [
                ("collection", Field::Child(collection.id)),
                ("item", Field::Child(item.id)),
                ("body", Field::Child(body.id)),
            ],
        );
        self.emit(node)
    }

    /// Start a loop that re-evaluates `test` before every iteration.
    pub fn while_<'b>(&'b self, test: impl Into<Lift<'b>>) -> While<'b> {
        While {
            builder: self,
            test: self.lift(test).id,
        }
    }

    /// Evaluate all but the last expression as ordered steps, then the last
    /// as the result.
    pub fn do_<'b, T: Into<Lift<'b>>>(&'b self, exprs: impl IntoIterator<Item = T>) -> Expr<'b> {
        let mut ids: Vec<NodeId> = exprs.into_iter().map(|e| self.lift(e).id).collect();
        let Some(result) = ids.pop() else {
            return self.literal(Value::Null);
        };
        self.node(
            "core/do",
            [
                ("steps", Field::Children(ids)),
                ("result", Field::Child(result)),
            ],
        )
    }

    /// Recursive definition applied to `arg`.
    ///
    /// `f` receives the `self` handle and the parameter placeholder and runs
    /// once; calls through the handle are resolved by recursion id at
    /// evaluation time, so no cycle appears in the graph.
    pub fn rec<'b, R: Into<Lift<'b>>>(
        &'b self,
        arg: impl Into<Lift<'b>>,
        f: impl FnOnce(Rec<'b>, Expr<'b>) -> R,
    ) -> Expr<'b> {
        let arg = self.lift(arg);
        let ident = self.ident();
        let target = self.node("core/rec_self", [("rec", Field::Ident(ident))]);
        let param = self.placeholder("core/param");
        let this = Rec {
            builder: self,
            ident,
            target: target.id,
        };
        let body = self.body(|| f(this, param));
        let node = self.node(
            "core/rec",
            [
                ("rec", Field::Ident(ident)),
                ("target", Field::Child(target.id)),
                ("param", Field::Child(param.id)),
                ("body", Field::Child(body.id)),
                ("arg", Field::Child(arg.id)),
            ],
        );
        self.register_recursion(ident, node.id);
        node
    }

    /// One-parameter lambda.
    pub fn lambda<'b, R: Into<Lift<'b>>>(&'b self, f: impl FnOnce(Expr<'b>) -> R) -> Lambda<'b> {
        let param = self.placeholder("core/param");
        let body = self.body(|| f(param));
        self.lambda_node(vec![param.id], body.id)
    }

    /// Two-parameter lambda.
    pub fn lambda2<'b, R: Into<Lift<'b>>>(
        &'b self,
        f: impl FnOnce(Expr<'b>, Expr<'b>) -> R,
    ) -> Lambda<'b> {
        let first = self.placeholder("core/param");
        let second = self.placeholder("core/param");
        let body = self.body(|| f(first, second));
        self.lambda_node(vec![first.id, second.id], body.id)
    }

    fn lambda_node(&self, params: Vec<NodeId>, body: NodeId) -> Lambda<'_> {
        let node = self.node(
            "core/lambda",
            [
                ("params", Field::Children(params)),
                ("body", Field::Child(body)),
            ],
        );
        Lambda {
            id: node.id,
            builder: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Builder;
    use crate::error::BuildError;
    use crate::graph::Schema;
    use crate::plugin::PluginSet;
    use crate::plugins::num::NumOps;

    fn plugins() -> PluginSet {
        PluginSet::standard().unwrap()
    }

    #[test]
    fn statements_are_collected_in_order() {
        let program = plugins()
            .build(Schema::Any, |b| {
                let cell = b.let_(1);
                cell.set(cell.get().add(1));
                cell.get()
            })
            .unwrap();
        let kinds: Vec<_> = program
            .statements
            .iter()
            .map(|id| program.node(*id).unwrap().kind.as_str())
            .collect();
        assert_eq!(kinds, vec!["core/let", "core/let_set"]);
        assert_eq!(program.node(program.result).unwrap().kind, "core/let_get");
    }

    #[test]
    fn statement_used_as_operand_leaves_its_block() {
        let program = plugins()
            .build(Schema::Any, |b| {
                let cell = b.let_(0);
                let write = cell.set(5);
                b.do_([write, cell.get()])
            })
            .unwrap();
        assert_eq!(program.statements.len(), 1);
        assert_eq!(program.node(program.result).unwrap().kind, "core/do");
    }

    #[test]
    fn each_body_runs_once_at_build_time() {
        let mut calls = 0;
        plugins()
            .build(Schema::Any, |b| {
                let total = b.let_(0);
                b.each([1, 2, 3, 4], |item| {
                    calls += 1;
                    total.set(total.get().add(item));
                });
                total.get()
            })
            .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn non_finite_numbers_do_not_lift() {
        let err = plugins()
            .build(Schema::Any, |b| b.lift(f64::INFINITY))
            .unwrap_err();
        assert!(matches!(err, BuildError::UnliftableValue { .. }));
    }

    #[test]
    fn handle_from_another_build_does_not_lift() {
        let first = Builder::new(plugins(), Schema::Any);
        let second = Builder::new(plugins(), Schema::Any);
        let foreign = first.lift(1);
        let result = second.lift(foreign).id();
        let err = second.finish(result).unwrap_err();
        assert!(matches!(err, BuildError::UnliftableValue { .. }));
    }

    #[test]
    fn cond_accepts_branches_in_either_order() {
        let a = plugins()
            .build(Schema::Any, |b| b.cond(true).then(1).otherwise(2))
            .unwrap();
        let b = plugins()
            .build(Schema::Any, |b| b.cond(true).otherwise(2).then(1))
            .unwrap();
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn recursion_ids_do_not_affect_hash() {
        let build = |extra: bool| {
            plugins()
                .build(Schema::Any, |b| {
                    if extra {
                        b.ident();
                    }
                    b.rec(5, |this, n| {
                        b.cond(n.lte(1))
                            .then(1)
                            .otherwise(n.mul(this.call(n.sub(1))))
                    })
                })
                .unwrap()
        };
        let (a, b) = (build(false), build(true));
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.recursions.len(), 1);
    }
}

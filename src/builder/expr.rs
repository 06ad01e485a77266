use std::fmt;

use super::Builder;
use super::lift::Lift;
use crate::graph::{Field, NodeId};
use crate::interp::value::Value;

/// Handle over exactly one node of the graph under construction.
///
/// Every method returns a new handle wrapping a new derived node; nothing
/// here inspects what the wrapped node will evaluate to.
#[derive(Clone, Copy)]
pub struct Expr<'b> {
    pub(crate) id: NodeId,
    pub(crate) builder: &'b Builder,
}

impl fmt::Debug for Expr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({})", self.id)
    }
}

impl<'b> Expr<'b> {
    pub(crate) fn new(id: NodeId, builder: &'b Builder) -> Self {
        Self { id, builder }
    }

    /// Identity of the wrapped node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The builder this handle belongs to.
    pub fn builder(&self) -> &'b Builder {
        self.builder
    }

    /// Property access: a record key, or `length` of a list or string.
    pub fn get(self, key: &str) -> Expr<'b> {
        self.builder.node(
            "core/prop",
            [
                ("object", Field::Child(self.id)),
                ("key", Field::Data(Value::from(key))),
            ],
        )
    }

    /// Positional access into a list.
    pub fn at(self, index: usize) -> Expr<'b> {
        self.builder.node(
            "core/prop",
            [
                ("object", Field::Child(self.id)),
                ("key", Field::Data(Value::from(index))),
            ],
        )
    }

    /// Property access with a key computed at evaluation time.
    pub fn index(self, key: impl Into<Lift<'b>>) -> Expr<'b> {
        let key = self.builder.lift(key);
        self.builder.node(
            "core/index",
            [
                ("object", Field::Child(self.id)),
                ("key", Field::Child(key.id)),
            ],
        )
    }

    /// Map every item through `f`. The callback runs once, now, against a
    /// placeholder item.
    pub fn map<R: Into<Lift<'b>>>(self, f: impl FnOnce(Expr<'b>) -> R) -> Expr<'b> {
        let lambda = self.builder.lambda(f);
        self.over("core/map", lambda, [])
    }

    /// Keep the items for which `f` evaluates to `true`.
    pub fn filter<R: Into<Lift<'b>>>(self, f: impl FnOnce(Expr<'b>) -> R) -> Expr<'b> {
        let lambda = self.builder.lambda(f);
        self.over("core/filter", lambda, [])
    }

    /// Fold the items with `f(accumulator, item)`, starting from `init`.
    pub fn reduce<R: Into<Lift<'b>>>(
        self,
        init: impl Into<Lift<'b>>,
        f: impl FnOnce(Expr<'b>, Expr<'b>) -> R,
    ) -> Expr<'b> {
        let init = self.builder.lift(init);
        let lambda = self.builder.lambda2(f);
        self.over("core/reduce", lambda, [("init", Field::Child(init.id))])
    }

    /// Run `f` for each item for its effects; emitted as a statement.
    pub fn for_each<R: Into<Lift<'b>>>(self, f: impl FnOnce(Expr<'b>) -> R) -> Expr<'b> {
        let lambda = self.builder.lambda(f);
        let node = self.over("core/for_each", lambda, []);
        self.builder.emit(node)
    }

    fn over<const N: usize>(
        self,
        kind: &str,
        lambda: Lambda<'b>,
        extra: [(&str, Field); N],
    ) -> Expr<'b> {
        let fields = [
            ("collection", Field::Child(self.id)),
            ("fn", Field::Child(lambda.id)),
        ];
        self.builder.node(kind, fields.into_iter().chain(extra))
    }
}

/// A function value built once from a host callback.
///
/// Lambdas are not expressions: they can only be applied with
/// [`Lambda::call`] or consumed by a collection combinator.
#[derive(Clone, Copy)]
pub struct Lambda<'b> {
    pub(crate) id: NodeId,
    pub(crate) builder: &'b Builder,
}

impl fmt::Debug for Lambda<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lambda({})", self.id)
    }
}

impl<'b> Lambda<'b> {
    /// Identity of the `core/lambda` node.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Apply the lambda to `args`, positionally.
    pub fn call<T: Into<Lift<'b>>>(self, args: impl IntoIterator<Item = T>) -> Expr<'b> {
        let args: Vec<NodeId> = args
            .into_iter()
            .map(|arg| self.builder.lift(arg).id)
            .collect();
        self.builder.node(
            "core/call",
            [("fn", Field::Child(self.id)), ("args", Field::Children(args))],
        )
    }
}

//! Build-time trait dispatch.
//!
//! Polymorphic operations (`eq`, the ordering comparisons) are resolved to a
//! concrete node kind while the closure runs. An operand's semantic type is
//! inferred from a literal's scalar, from the declared input schema along an
//! input projection's access path, or from the result type a plugin declares
//! for the operand's node kind. The first operand with a known type picks the
//! implementation.

use super::{Builder, Expr, Lift};
use crate::error::BuildError;
use crate::graph::{Field, NodeId, Schema, TypeTag};
use crate::interp::value::Value;

/// Comparison derived from the `ord` trait's three-way `compare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
}

impl Ordering {
    /// Tag stored on the `core/ord` node.
    pub fn tag(self) -> &'static str {
        match self {
            Ordering::Lt => "lt",
            Ordering::Lte => "lte",
            Ordering::Gt => "gt",
            Ordering::Gte => "gte",
        }
    }

    /// Whether a three-way comparison result satisfies this ordering.
    pub fn holds(tag: &str, sign: f64) -> Option<bool> {
        Some(match tag {
            "lt" => sign < 0.0,
            "lte" => sign <= 0.0,
            "gt" => sign > 0.0,
            "gte" => sign >= 0.0,
            _ => return None,
        })
    }
}

impl Builder {
    /// Semantic type of a node, when it can be known at build time.
    pub fn infer(&self, id: NodeId) -> Option<TypeTag> {
        let (kind, literal) = self.with_node(id, |node| {
            let literal = match node.fields.get("value") {
                Some(Field::Data(value)) if node.kind == "core/literal" => Some(value.clone()),
                _ => None,
            };
            (node.kind.clone(), literal)
        })?;
        match kind.as_str() {
            "core/literal" => match literal? {
                Value::Null => None,
                value => Some(value.type_tag()),
            },
            "core/input" => self.schema().tag(),
            "core/prop" => self
                .input_path(id)
                .and_then(|path| self.schema().walk(path.iter()).and_then(Schema::tag)),
            other => self.plugins().result_type(other),
        }
    }

    /// Access path from the input root to `id`, if `id` is a chain of static
    /// property reads on `core/input`.
    fn input_path(&self, id: NodeId) -> Option<Vec<Value>> {
        let mut path = Vec::new();
        let mut current = id;
        loop {
            let step = self.with_node(current, |node| match node.kind.as_str() {
                "core/input" => Some(None),
                "core/prop" => match (node.fields.get("object"), node.fields.get("key")) {
                    (Some(Field::Child(object)), Some(Field::Data(key))) => {
                        Some(Some((*object, key.clone())))
                    }
                    _ => None,
                },
                _ => None,
            })??;
            match step {
                None => break,
                Some((object, key)) => {
                    path.push(key);
                    current = object;
                }
            }
        }
        path.reverse();
        Some(path)
    }

    /// Resolve `op` of `trait_name` for `operands` to a concrete node kind.
    pub fn resolve(
        &self,
        trait_name: &str,
        op: &str,
        operands: &[NodeId],
    ) -> Result<String, BuildError> {
        let impls = self.plugins().trait_impls(trait_name);
        let chosen = match operands.iter().find_map(|id| self.infer(*id)) {
            Some(tag) => impls
                .iter()
                .find(|imp| imp.semantic_type == tag)
                .ok_or_else(|| BuildError::NoImplementationForType {
                    trait_name: trait_name.to_string(),
                    type_tag: tag.to_string(),
                })?,
            None => match impls.as_slice() {
                [] => {
                    return Err(BuildError::NoImplementationForType {
                        trait_name: trait_name.to_string(),
                        type_tag: "unknown".to_string(),
                    });
                }
                [only] => only,
                many => {
                    let mut candidates: Vec<String> =
                        many.iter().map(|imp| imp.semantic_type.to_string()).collect();
                    candidates.sort();
                    return Err(BuildError::AmbiguousDispatch {
                        trait_name: trait_name.to_string(),
                        candidates,
                    });
                }
            },
        };
        chosen
            .kind_for(op)
            .map(str::to_string)
            .ok_or_else(|| BuildError::NoImplementationForType {
                trait_name: trait_name.to_string(),
                type_tag: chosen.semantic_type.to_string(),
            })
    }

    /// Binary trait operation on `left` and `right`.
    pub fn dispatch<'b>(
        &'b self,
        trait_name: &str,
        op: &str,
        left: impl Into<Lift<'b>>,
        right: impl Into<Lift<'b>>,
    ) -> Expr<'b> {
        let left = self.lift(left);
        let right = self.lift(right);
        match self.resolve(trait_name, op, &[left.id, right.id]) {
            Ok(kind) => self.node(
                &kind,
                [
                    ("left", Field::Child(left.id)),
                    ("right", Field::Child(right.id)),
                ],
            ),
            Err(err) => self.reject(err),
        }
    }

    /// Equality through the `eq` trait.
    pub fn eq<'b>(&'b self, left: impl Into<Lift<'b>>, right: impl Into<Lift<'b>>) -> Expr<'b> {
        self.dispatch("eq", "eq", left, right)
    }

    /// Ordering comparison: the trait's `compare` wrapped in a sign test.
    pub fn compare<'b>(
        &'b self,
        ordering: Ordering,
        left: impl Into<Lift<'b>>,
        right: impl Into<Lift<'b>>,
    ) -> Expr<'b> {
        let compare = self.dispatch("ord", "compare", left, right);
        self.node(
            "core/ord",
            [
                ("test", Field::Data(Value::from(ordering.tag()))),
                ("compare", Field::Child(compare.id)),
            ],
        )
    }

    /// `left < right`.
    pub fn lt<'b>(&'b self, left: impl Into<Lift<'b>>, right: impl Into<Lift<'b>>) -> Expr<'b> {
        self.compare(Ordering::Lt, left, right)
    }

    /// `left <= right`.
    pub fn lte<'b>(&'b self, left: impl Into<Lift<'b>>, right: impl Into<Lift<'b>>) -> Expr<'b> {
        self.compare(Ordering::Lte, left, right)
    }

    /// `left > right`.
    pub fn gt<'b>(&'b self, left: impl Into<Lift<'b>>, right: impl Into<Lift<'b>>) -> Expr<'b> {
        self.compare(Ordering::Gt, left, right)
    }

    /// `left >= right`.
    pub fn gte<'b>(&'b self, left: impl Into<Lift<'b>>, right: impl Into<Lift<'b>>) -> Expr<'b> {
        self.compare(Ordering::Gte, left, right)
    }
}

impl<'b> Expr<'b> {
    /// `self == other` through the `eq` trait.
    pub fn eq(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        self.builder.eq(self, other)
    }

    /// `self < other`.
    pub fn lt(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        self.builder.lt(self, other)
    }

    /// `self <= other`.
    pub fn lte(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        self.builder.lte(self, other)
    }

    /// `self > other`.
    pub fn gt(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        self.builder.gt(self, other)
    }

    /// `self >= other`.
    pub fn gte(self, other: impl Into<Lift<'b>>) -> Expr<'b> {
        self.builder.gte(self, other)
    }
}

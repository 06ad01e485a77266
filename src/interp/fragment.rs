use futures::future::{FutureExt, LocalBoxFuture};
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use super::driver::Cx;
use crate::error::{ConfigError, Outcome};
use crate::graph::Node;
use crate::graph::NodeId;
use crate::interp::value::Value;

/// A suspension request issued by a visitor and serviced by the driver.
#[derive(Clone)]
pub enum StepEffect {
    /// Evaluate a child node through the driver (and therefore the cache).
    Recurse(NodeId),
    /// Hand a node to a non-suspending evaluator directly.
    LegacyCall {
        /// Evaluator to invoke.
        fragment: Rc<dyn LegacyFragment>,
        /// Node to evaluate.
        node: NodeId,
    },
    /// Ask the injected [`super::EffectHandler`] to perform an external effect.
    Named {
        /// Effect tag, e.g. `http/get`.
        tag: String,
        /// Effect payload.
        payload: Value,
    },
}

impl std::fmt::Debug for StepEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepEffect::Recurse(id) => write!(f, "Recurse({id})"),
            StepEffect::LegacyCall { fragment, node } => {
                write!(f, "LegacyCall({}, {node})", fragment.name())
            }
            StepEffect::Named { tag, .. } => write!(f, "Named({tag})"),
        }
    }
}

/// What a fragment's visitor produced for a node.
pub enum Visit {
    /// The value (or failure) is known without suspending.
    Ready(Outcome),
    /// A suspended computation that awaits [`StepEffect`]s through its [`Cx`].
    Suspend(LocalBoxFuture<'static, Outcome>),
}

impl Visit {
    /// Wrap a future as a suspended visit.
    pub fn suspend(fut: impl Future<Output = Outcome> + 'static) -> Self {
        Visit::Suspend(fut.boxed_local())
    }

    /// Immediate success.
    pub fn value(value: impl Into<Value>) -> Self {
        Visit::Ready(Ok(value.into()))
    }
}

/// Interpreter for one plugin's node-kind namespace.
///
/// Fragments hold no per-evaluation state; everything they need flows through
/// the [`Cx`] handed to [`Fragment::visit`].
pub trait Fragment {
    /// Name used in diagnostics and overlap errors.
    fn name(&self) -> &str;

    /// Node kinds this fragment handles.
    fn kinds(&self) -> &[&'static str];

    /// Whether this fragment handles `node`.
    fn can_handle(&self, node: &Node) -> bool {
        self.kinds().contains(&node.kind.as_str())
    }

    /// Whether values of `kind` must never be cached (loop variables,
    /// streamed batches, mutable cell reads).
    fn is_volatile(&self, _kind: &str) -> bool {
        false
    }

    /// Whether `kind` is a scope-bound placeholder that per-attempt copies
    /// must share rather than duplicate.
    fn is_placeholder(&self, _kind: &str) -> bool {
        false
    }

    /// Evaluate `node`.
    fn visit(&self, node: Rc<Node>, cx: Cx) -> Visit;
}

/// Non-suspending evaluator reachable through [`StepEffect::LegacyCall`].
pub trait LegacyFragment {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Evaluate `node` synchronously.
    fn call(&self, node: &Node, cx: &Cx) -> Outcome;
}

/// Fragments registered together, with the kind table checked for overlap.
pub struct FragmentTable {
    fragments: Vec<Rc<dyn Fragment>>,
    by_kind: HashMap<&'static str, usize>,
}

impl FragmentTable {
    /// Register fragments, rejecting any two that claim the same kind.
    pub fn new(fragments: impl IntoIterator<Item = Rc<dyn Fragment>>) -> Result<Self, ConfigError> {
        let fragments: Vec<Rc<dyn Fragment>> = fragments.into_iter().collect();
        let mut by_kind = HashMap::new();
        for (index, fragment) in fragments.iter().enumerate() {
            for kind in fragment.kinds() {
                if let Some(previous) = by_kind.insert(*kind, index) {
                    return Err(ConfigError::OverlappingFragment {
                        kind: kind.to_string(),
                        first: fragments[previous].name().to_string(),
                        second: fragment.name().to_string(),
                    });
                }
            }
        }
        Ok(Self { fragments, by_kind })
    }

    /// Select the fragment for `node`: the kind table first, then the first
    /// fragment whose predicate accepts it.
    pub fn select(&self, node: &Node) -> Option<&Rc<dyn Fragment>> {
        if let Some(index) = self.by_kind.get(node.kind.as_str()) {
            return self.fragments.get(*index);
        }
        self.fragments.iter().find(|fragment| fragment.can_handle(node))
    }

    /// Whether any fragment declares `kind` a placeholder.
    pub fn is_placeholder(&self, kind: &str) -> bool {
        self.by_kind
            .get(kind)
            .map(|index| self.fragments[*index].is_placeholder(kind))
            .unwrap_or(false)
    }

    /// Names of the registered fragments, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.fragments.iter().map(|fragment| fragment.name()).collect()
    }
}

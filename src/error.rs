//! Error types for effgraph
//!
//! Build-time and composition errors are `thiserror` enums returned
//! synchronously; they indicate a defect in the authored program or plugin
//! set and are never retried. Evaluation separates DSL-level failures (a
//! raised [`Value`], recoverable with `try`/`settle`/`retry`) from fatal
//! interpreter errors through [`Fault`].

use std::fmt;
use std::io;
use thiserror::Error;

use crate::graph::NodeId;
use crate::interp::value::Value;

/// Errors raised while building a [`crate::graph::Program`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// The closure produced, or a constructor received, something that cannot
    /// become a node.
    #[error("value cannot be lifted into the graph: {reason}")]
    UnliftableValue {
        /// Why lifting failed.
        reason: String,
    },

    /// Several plugins implement the trait and no operand type is known.
    #[error("ambiguous dispatch of trait '{trait_name}': implemented for {candidates:?}")]
    AmbiguousDispatch {
        /// Trait being resolved.
        trait_name: String,
        /// Semantic types that implement it.
        candidates: Vec<String>,
    },

    /// The operand type is known but no active plugin implements the trait for it.
    #[error("no implementation of trait '{trait_name}' for type {type_tag}")]
    NoImplementationForType {
        /// Trait being resolved.
        trait_name: String,
        /// Operand type (or `unknown`).
        type_tag: String,
    },

    /// Nodes created during the build are not reachable from the result.
    #[error("unreachable nodes {kinds:?}; include them in do_(...) alongside the result")]
    UnreachableNodes {
        /// Kinds of every orphaned node.
        kinds: Vec<String>,
    },

    /// Plugin composition failed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while composing plugins or fragments, or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Two plugins were registered under the same name.
    #[error("plugin '{0}' registered twice")]
    DuplicatePlugin(String),

    /// Two plugins declare the same node kind.
    #[error("node kind '{kind}' declared by both '{first}' and '{second}'")]
    OverlappingNodeKind {
        /// Contested kind.
        kind: String,
        /// Plugin registered first.
        first: String,
        /// Plugin registered second.
        second: String,
    },

    /// Two fragments registered together both handle the same kind.
    #[error("fragments '{first}' and '{second}' both handle '{kind}'")]
    OverlappingFragment {
        /// Contested kind.
        kind: String,
        /// Fragment registered first.
        first: String,
        /// Fragment registered second.
        second: String,
    },

    /// IO error while reading configuration or programs.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialisation error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fatal evaluation errors. These always indicate a misconfiguration or a
/// malformed graph and bypass every DSL-level recovery combinator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// No registered fragment handles the node kind.
    #[error("no fragment handles node kind '{kind}'")]
    UnknownNodeKind {
        /// Kind without a handler.
        kind: String,
    },

    /// A node lacks a field its fragment requires.
    #[error("malformed '{kind}' node: {detail}")]
    MalformedNode {
        /// Node kind.
        kind: String,
        /// What is wrong.
        detail: String,
    },

    /// A placeholder was evaluated outside the scope that binds it.
    #[error("placeholder {node} ({kind}) is not bound in this scope")]
    UnboundPlaceholder {
        /// Placeholder node.
        node: NodeId,
        /// Placeholder kind.
        kind: String,
    },

    /// A cell was read before its `let` ran.
    #[error("cell {0} read before initialisation")]
    UninitializedCell(u32),

    /// A node id outside the evaluation arena.
    #[error("node {0} does not exist")]
    MissingNode(NodeId),

    /// The installed effect handler does not know the tag.
    #[error("no handler for effect '{tag}'")]
    UnhandledEffect {
        /// Effect tag.
        tag: String,
    },

    /// Evaluation nested deeper than the configured limit.
    #[error("evaluation depth exceeded {limit}")]
    RecursionLimit {
        /// Configured limit.
        limit: usize,
    },

    /// The interpreter could not be assembled or its runtime started.
    #[error("interpreter setup failed: {0}")]
    Setup(String),
}

/// Why a node failed to produce a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// A DSL-level failure value (from `fail`, `guard`, a plugin or a client).
    Raised(Value),
    /// A fatal interpreter error.
    Fatal(EvalError),
}

impl Fault {
    /// Raise a structured `{code, message}` record.
    pub fn raise(code: &str, message: impl Into<String>) -> Self {
        Fault::Raised(Value::record([
            ("code", Value::from(code)),
            ("message", Value::String(message.into())),
        ]))
    }

    /// Raise a `TYPE_ERROR` for an operand of the wrong type.
    pub fn type_error(kind: &str, expected: &str, found: &Value) -> Self {
        Fault::raise(
            "TYPE_ERROR",
            format!("{kind} expected {expected}, found {}", found.type_tag()),
        )
    }

    /// Whether the fault bypasses DSL recovery.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Fault::Fatal(_))
    }

    /// The raised value, if this is a DSL-level failure.
    pub fn raised(&self) -> Option<&Value> {
        match self {
            Fault::Raised(value) => Some(value),
            Fault::Fatal(_) => None,
        }
    }
}

impl From<EvalError> for Fault {
    fn from(err: EvalError) -> Self {
        Fault::Fatal(err)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Raised(value) => write!(f, "raised {value}"),
            Fault::Fatal(err) => write!(f, "fatal: {err}"),
        }
    }
}

impl std::error::Error for Fault {}

/// Result of evaluating one node.
pub type Outcome = std::result::Result<Value, Fault>;

/// Convenience result alias for build operations.
pub type BuildResult<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_records_carry_code_and_message() {
        let fault = Fault::raise("NOT_FOUND", "no such row");
        let value = fault.raised().unwrap();
        assert_eq!(value.get("code"), Some(&Value::from("NOT_FOUND")));
        assert!(!fault.is_fatal());
        assert!(Fault::from(EvalError::RecursionLimit { limit: 1 }).is_fatal());
    }
}

//! Built programs: the node table, root, input schema and content hash.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::node::{Node, NodeId};
use super::schema::Schema;
use crate::error::ConfigError;

/// A fully built, immutable program graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Node arena, indexed by [`NodeId`].
    pub nodes: Vec<Node>,
    /// The `core/program` node tying statements and result together.
    pub root: NodeId,
    /// Top-level statements, evaluated in order before the result.
    pub statements: Vec<NodeId>,
    /// The program's result expression.
    pub result: NodeId,
    /// Structural digest (hex), independent of node identities.
    pub hash: String,
    /// Names of the plugins active when the program was built.
    pub plugins: Vec<String>,
    /// Declared input schema.
    pub input_schema: Schema,
    /// Recursion ids introduced by `rec`, mapped to their `core/rec` node.
    pub recursions: BTreeMap<u32, NodeId>,
}

impl Program {
    /// Look up a node by identity.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena is empty (never true for a built program).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Count of nodes per kind, sorted by kind.
    pub fn kind_histogram(&self) -> BTreeMap<&str, usize> {
        let mut histogram = BTreeMap::new();
        for node in &self.nodes {
            *histogram.entry(node.kind.as_str()).or_insert(0) += 1;
        }
        histogram
    }

    /// Serialize as pretty JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a program previously written with [`Program::to_json`].
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}

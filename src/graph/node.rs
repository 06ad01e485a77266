use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::EvalError;
use crate::interp::value::Value;

/// Dense identifier of a node inside one program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Create an identifier from an arena index.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position of the node in its arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One named slot of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Field {
    /// A single child node.
    Child(NodeId),
    /// An ordered list of child nodes (tuple items, statement blocks).
    Children(Vec<NodeId>),
    /// Keyed child nodes (record entries, match arms), in insertion order.
    Entries(Vec<(String, NodeId)>),
    /// Scalar payload carried by the node itself.
    Data(Value),
    /// Synthetic identity (cell reference, recursion id). Excluded from the
    /// structural hash except for its binding pattern.
    Ident(u32),
}

impl Field {
    /// Child nodes referenced by this field, in order.
    pub fn edges(&self) -> Vec<NodeId> {
        match self {
            Field::Child(id) => vec![*id],
            Field::Children(ids) => ids.clone(),
            Field::Entries(entries) => entries.iter().map(|(_, id)| *id).collect(),
            Field::Data(_) | Field::Ident(_) => Vec::new(),
        }
    }

    fn remap(&self, map: &impl Fn(NodeId) -> NodeId) -> Field {
        match self {
            Field::Child(id) => Field::Child(map(*id)),
            Field::Children(ids) => Field::Children(ids.iter().map(|id| map(*id)).collect()),
            Field::Entries(entries) => Field::Entries(
                entries
                    .iter()
                    .map(|(key, id)| (key.clone(), map(*id)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// A single entry of the expression DAG.
///
/// Fields only ever reference nodes with a smaller [`NodeId`], which is what
/// keeps the graph acyclic by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Arena identity.
    pub id: NodeId,
    /// Namespaced kind tag, e.g. `num/add`.
    pub kind: String,
    /// Named fields.
    pub fields: BTreeMap<String, Field>,
}

impl Node {
    /// Create a node with no fields.
    pub fn new(id: NodeId, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field insertion.
    pub fn with(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    /// Namespace prefix of the kind (`num` for `num/add`).
    pub fn namespace(&self) -> &str {
        self.kind.split('/').next().unwrap_or(&self.kind)
    }

    /// Every child edge of the node, in field order.
    pub fn edges(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.fields.values().flat_map(Field::edges)
    }

    /// Required single child.
    pub fn child(&self, name: &str) -> Result<NodeId, EvalError> {
        match self.fields.get(name) {
            Some(Field::Child(id)) => Ok(*id),
            _ => Err(self.malformed(format!("missing child field '{name}'"))),
        }
    }

    /// Optional single child.
    pub fn opt_child(&self, name: &str) -> Option<NodeId> {
        match self.fields.get(name) {
            Some(Field::Child(id)) => Some(*id),
            _ => None,
        }
    }

    /// Required child list.
    pub fn children(&self, name: &str) -> Result<&[NodeId], EvalError> {
        match self.fields.get(name) {
            Some(Field::Children(ids)) => Ok(ids),
            _ => Err(self.malformed(format!("missing children field '{name}'"))),
        }
    }

    /// Required keyed child list.
    pub fn entries(&self, name: &str) -> Result<&[(String, NodeId)], EvalError> {
        match self.fields.get(name) {
            Some(Field::Entries(entries)) => Ok(entries),
            _ => Err(self.malformed(format!("missing entries field '{name}'"))),
        }
    }

    /// Required scalar payload.
    pub fn data(&self, name: &str) -> Result<&Value, EvalError> {
        match self.fields.get(name) {
            Some(Field::Data(value)) => Ok(value),
            _ => Err(self.malformed(format!("missing data field '{name}'"))),
        }
    }

    /// Required synthetic identity.
    pub fn ident(&self, name: &str) -> Result<u32, EvalError> {
        match self.fields.get(name) {
            Some(Field::Ident(ident)) => Ok(*ident),
            _ => Err(self.malformed(format!("missing ident field '{name}'"))),
        }
    }

    /// Copy of this node under a new identity with every edge passed through `map`.
    pub fn relocated(&self, id: NodeId, map: impl Fn(NodeId) -> NodeId) -> Node {
        Node {
            id,
            kind: self.kind.clone(),
            fields: self
                .fields
                .iter()
                .map(|(name, field)| (name.clone(), field.remap(&map)))
                .collect(),
        }
    }

    /// Error describing a structurally invalid node.
    pub fn malformed(&self, detail: impl Into<String>) -> EvalError {
        EvalError::MalformedNode {
            kind: self.kind.clone(),
            detail: detail.into(),
        }
    }
}

//! Input schemas and the type tags they resolve to along a path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::interp::value::Value;

/// Semantic type of a runtime value, used as the dispatch key for traits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    /// The null value.
    Null,
    /// Booleans.
    Boolean,
    /// Numbers (all numbers are `f64`).
    Number,
    /// UTF-8 strings.
    String,
    /// Ordered lists.
    List,
    /// Keyed records.
    Record,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeTag::Null => "null",
            TypeTag::Boolean => "boolean",
            TypeTag::Number => "number",
            TypeTag::String => "string",
            TypeTag::List => "list",
            TypeTag::Record => "record",
        };
        f.write_str(name)
    }
}

/// Declared shape of a program's input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "of", rename_all = "lowercase")]
pub enum Schema {
    /// No static information.
    #[default]
    Any,
    /// A boolean.
    Boolean,
    /// A number.
    Number,
    /// A string.
    String,
    /// A homogeneous list.
    List(Box<Schema>),
    /// A record with known fields.
    Record(BTreeMap<String, Schema>),
}

impl Schema {
    /// Record schema from `(field, schema)` pairs.
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Schema)>) -> Self {
        Schema::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// List schema.
    pub fn list(item: Schema) -> Self {
        Schema::List(Box::new(item))
    }

    /// Semantic tag of the schema, `None` for [`Schema::Any`].
    pub fn tag(&self) -> Option<TypeTag> {
        match self {
            Schema::Any => None,
            Schema::Boolean => Some(TypeTag::Boolean),
            Schema::Number => Some(TypeTag::Number),
            Schema::String => Some(TypeTag::String),
            Schema::List(_) => Some(TypeTag::List),
            Schema::Record(_) => Some(TypeTag::Record),
        }
    }

    /// Follow an access path (record keys, list indices) through the schema.
    pub fn walk<'a>(&self, path: impl IntoIterator<Item = &'a Value>) -> Option<&Schema> {
        let mut current = self;
        for key in path {
            current = match (current, key) {
                (Schema::Record(fields), Value::String(name)) => fields.get(name)?,
                (Schema::List(item), Value::Number(_)) => item,
                _ => return None,
            };
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_nested_records_and_lists() {
        let schema = Schema::record([
            ("x", Schema::Number),
            (
                "user",
                Schema::record([("tags", Schema::list(Schema::String))]),
            ),
        ]);
        let path = [
            Value::from("user"),
            Value::from("tags"),
            Value::Number(0.0),
        ];
        assert_eq!(
            schema.walk(path.iter()).and_then(Schema::tag),
            Some(TypeTag::String)
        );
        assert_eq!(schema.walk([Value::from("missing")].iter()), None);
        assert_eq!(Schema::Any.tag(), None);
    }
}

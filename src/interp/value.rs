use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::graph::TypeTag;

/// Runtime value flowing through evaluation: inputs, literals, results and
/// raised failures all share this shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Number; integers are represented exactly up to 2^53.
    Number(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list.
    List(Vec<Value>),
    /// Keyed record with sorted keys.
    Record(BTreeMap<String, Value>),
}

impl Value {
    /// Build a record from `(key, value)` pairs.
    pub fn record<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Record(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Semantic type tag.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Boolean,
            Value::Number(_) => TypeTag::Number,
            Value::String(_) => TypeTag::String,
            Value::List(_) => TypeTag::List,
            Value::Record(_) => TypeTag::Record,
        }
    }

    /// Numeric view.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    /// List view.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Record field lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.get(key),
            _ => None,
        }
    }

    /// Property access used by `core/prop`: record keys and list indices.
    /// Missing keys read as [`Value::Null`]; `None` means the object cannot be
    /// indexed by `key` at all.
    pub fn project(&self, key: &Value) -> Option<Value> {
        match (self, key) {
            (Value::Record(fields), Value::String(name)) => {
                Some(fields.get(name).cloned().unwrap_or(Value::Null))
            }
            (Value::List(items), Value::Number(index)) if *index >= 0.0 => {
                Some(items.get(*index as usize).cloned().unwrap_or(Value::Null))
            }
            (Value::List(items), Value::String(name)) if name == "length" => {
                Some(Value::Number(items.len() as f64))
            }
            (Value::String(text), Value::String(name)) if name == "length" => {
                Some(Value::Number(text.chars().count() as f64))
            }
            _ => None,
        }
    }

    /// Key used by `match` arms: the value itself when it is a string,
    /// otherwise its `code` or `type` field.
    pub fn match_key(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            Value::Record(fields) => fields
                .get("code")
                .and_then(Value::as_str)
                .or_else(|| fields.get("type").and_then(Value::as_str)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(value as f64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Record(fields) => serde_json::Value::Object(
                fields.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_from_json_documents() {
        let value = Value::from(json!({"x": 7, "tags": ["a", "b"], "ok": true}));
        assert_eq!(value.get("x"), Some(&Value::Number(7.0)));
        assert_eq!(
            value.project(&Value::from("tags")).unwrap().as_list().map(<[Value]>::len),
            Some(2)
        );
        assert_eq!(value.project(&Value::from("missing")), Some(Value::Null));
        assert_eq!(Value::Number(1.0).project(&Value::from("x")), None);
    }

    #[test]
    fn untagged_serde_round_trips_json() {
        let text = r#"{"a":[1.5,null,"s"],"b":false}"#;
        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(value.to_string(), text);
    }

    #[test]
    fn match_key_prefers_code_then_type() {
        assert_eq!(Value::from("E").match_key(), Some("E"));
        let coded = Value::record([("code", Value::from("C")), ("type", Value::from("T"))]);
        assert_eq!(coded.match_key(), Some("C"));
        let typed = Value::record([("type", Value::from("T"))]);
        assert_eq!(typed.match_key(), Some("T"));
        assert_eq!(Value::Number(3.0).match_key(), None);
    }
}

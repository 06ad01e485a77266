use super::expr::Expr;
use crate::interp::value::Value;

/// A host value on its way into the graph.
///
/// Scalars become `core/literal` nodes, lists become `core/tuple` nodes and
/// keyed maps become `core/record` nodes; expression handles pass through
/// untouched.
#[derive(Debug, Clone)]
pub enum Lift<'b> {
    /// `null`.
    Null,
    /// A boolean literal.
    Bool(bool),
    /// A numeric literal; must be finite.
    Number(f64),
    /// A string literal.
    String(String),
    /// A list whose items are lifted one by one.
    List(Vec<Lift<'b>>),
    /// A keyed map whose values are lifted one by one, in order.
    Map(Vec<(String, Lift<'b>)>),
    /// Already a node.
    Expr(Expr<'b>),
    /// A runtime value embedded as a single literal.
    Value(Value),
}

impl<'b> Lift<'b> {
    /// Keyed map from `(key, value)` pairs.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Lift<'b>)>) -> Self {
        Lift::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// List of lifted items.
    pub fn list<T: Into<Lift<'b>>>(items: impl IntoIterator<Item = T>) -> Self {
        Lift::List(items.into_iter().map(Into::into).collect())
    }

    /// First reason this value cannot be lifted, if any. Expression handles
    /// are checked separately against their builder.
    pub(crate) fn defect(&self) -> Option<String> {
        match self {
            Lift::Number(n) if !n.is_finite() => Some(format!("non-finite number {n}")),
            Lift::Value(value) => value_defect(value),
            Lift::List(items) => items.iter().find_map(Lift::defect),
            Lift::Map(entries) => entries.iter().find_map(|(_, value)| value.defect()),
            _ => None,
        }
    }
}

fn value_defect(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) if !n.is_finite() => Some(format!("non-finite number {n}")),
        Value::List(items) => items.iter().find_map(value_defect),
        Value::Record(fields) => fields.values().find_map(value_defect),
        _ => None,
    }
}

impl<'b> From<Expr<'b>> for Lift<'b> {
    fn from(expr: Expr<'b>) -> Self {
        Lift::Expr(expr)
    }
}

impl From<()> for Lift<'_> {
    fn from(_: ()) -> Self {
        Lift::Null
    }
}

impl From<bool> for Lift<'_> {
    fn from(value: bool) -> Self {
        Lift::Bool(value)
    }
}

impl From<f64> for Lift<'_> {
    fn from(value: f64) -> Self {
        Lift::Number(value)
    }
}

impl From<i32> for Lift<'_> {
    fn from(value: i32) -> Self {
        Lift::Number(f64::from(value))
    }
}

impl From<i64> for Lift<'_> {
    fn from(value: i64) -> Self {
        Lift::Number(value as f64)
    }
}

impl From<u32> for Lift<'_> {
    fn from(value: u32) -> Self {
        Lift::Number(f64::from(value))
    }
}

impl From<usize> for Lift<'_> {
    fn from(value: usize) -> Self {
        Lift::Number(value as f64)
    }
}

impl From<&str> for Lift<'_> {
    fn from(value: &str) -> Self {
        Lift::String(value.to_string())
    }
}

impl From<String> for Lift<'_> {
    fn from(value: String) -> Self {
        Lift::String(value)
    }
}

impl From<Value> for Lift<'_> {
    fn from(value: Value) -> Self {
        Lift::Value(value)
    }
}

impl From<serde_json::Value> for Lift<'_> {
    fn from(value: serde_json::Value) -> Self {
        Lift::Value(Value::from(value))
    }
}

impl<'b, T: Into<Lift<'b>>> From<Vec<T>> for Lift<'b> {
    fn from(items: Vec<T>) -> Self {
        Lift::list(items)
    }
}

impl<'b, T: Into<Lift<'b>>, const N: usize> From<[T; N]> for Lift<'b> {
    fn from(items: [T; N]) -> Self {
        Lift::list(items)
    }
}

impl<'b, T: Into<Lift<'b>>> From<Option<T>> for Lift<'b> {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Lift::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nested_non_finite_numbers() {
        let ok = Lift::map([("a", Lift::from(vec![1, 2])), ("b", Lift::from("x"))]);
        assert_eq!(ok.defect(), None);
        let bad = Lift::list([Lift::from(1.0), Lift::map([("n", Lift::from(f64::NAN))])]);
        assert!(bad.defect().unwrap().contains("non-finite"));
        let value = Lift::from(Value::List(vec![Value::Number(f64::INFINITY)]));
        assert!(value.defect().is_some());
    }
}

//! Script expression tree.

use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// A node in a verb's script tree.
///
/// The wire format is untyped JSON: an array whose first element is a string
/// is an opcode call, any other array is a list literal. A list literal whose
/// head happens to be a string must be spelled with the `list.of` opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Expr>),
    Map(HashMap<String, Expr>),
    Call { op: String, args: Vec<Expr> },
}

impl Expr {
    /// Builds an opcode call node.
    pub fn call(op: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call {
            op: op.into(),
            args,
        }
    }

    /// Builds a string literal.
    pub fn str(value: impl Into<String>) -> Expr {
        Expr::String(value.into())
    }

    /// Builds a number literal.
    pub fn num(value: impl Into<f64>) -> Expr {
        Expr::Number(value.into())
    }

    /// Builds a map literal from key/node pairs.
    pub fn map<I>(entries: I) -> Expr
    where
        I: IntoIterator<Item = (String, Expr)>,
    {
        Expr::Map(entries.into_iter().collect())
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Expr::Call { .. })
    }

    /// The opcode name, if this node is a call.
    pub fn op(&self) -> Option<&str> {
        match self {
            Expr::Call { op, .. } => Some(op),
            _ => None,
        }
    }

    /// Converts untyped JSON into an expression tree.
    ///
    /// This is the inverse of serialization and encodes the call/list
    /// distinction: string-headed arrays become calls.
    pub fn from_value(value: serde_json::Value) -> Expr {
        match value {
            serde_json::Value::Null => Expr::Null,
            serde_json::Value::Bool(b) => Expr::Bool(b),
            serde_json::Value::Number(n) => Expr::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Expr::String(s),
            serde_json::Value::Array(mut items) => {
                if matches!(items.first(), Some(serde_json::Value::String(_))) {
                    let head = items.remove(0);
                    let op = match head {
                        serde_json::Value::String(s) => s,
                        _ => unreachable!(),
                    };
                    Expr::Call {
                        op,
                        args: items.into_iter().map(Expr::from_value).collect(),
                    }
                } else {
                    Expr::List(items.into_iter().map(Expr::from_value).collect())
                }
            }
            serde_json::Value::Object(map) => Expr::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Expr::from_value(v)))
                    .collect(),
            ),
        }
    }
}

impl Default for Expr {
    fn default() -> Self {
        Expr::Null
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Bool(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Number(value as f64)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Number(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::String(value.to_string())
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::String(value)
    }
}

impl Serialize for Expr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Expr::Null => serializer.serialize_unit(),
            Expr::Bool(b) => serializer.serialize_bool(*b),
            Expr::Number(n) => serializer.serialize_f64(*n),
            Expr::String(s) => serializer.serialize_str(s),
            Expr::List(items) => items.serialize(serializer),
            Expr::Map(map) => map.serialize(serializer),
            Expr::Call { op, args } => {
                let mut seq = serializer.serialize_seq(Some(args.len() + 1))?;
                seq.serialize_element(op)?;
                for arg in args {
                    seq.serialize_element(arg)?;
                }
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Expr::from_value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_headed_array_is_a_call() {
        let expr: Expr = serde_json::from_value(json!(["+", 1, 2])).unwrap();
        assert_eq!(
            expr,
            Expr::call("+", vec![Expr::num(1.0), Expr::num(2.0)])
        );
    }

    #[test]
    fn plain_array_is_a_list() {
        let expr: Expr = serde_json::from_value(json!([1, 2, 3])).unwrap();
        assert_eq!(
            expr,
            Expr::List(vec![Expr::num(1.0), Expr::num(2.0), Expr::num(3.0)])
        );
    }

    #[test]
    fn call_round_trips() {
        let expr = Expr::call(
            "if",
            vec![Expr::Bool(false), Expr::num(1.0), Expr::num(2.0)],
        );
        let wire = serde_json::to_value(&expr).unwrap();
        assert_eq!(wire, json!(["if", false, 1.0, 2.0]));
        let back: Expr = serde_json::from_value(wire).unwrap();
        assert_eq!(back, expr);
    }

    #[test]
    fn map_round_trips() {
        let expr: Expr =
            serde_json::from_value(json!({"path": "/tmp", "depth": 3})).unwrap();
        match &expr {
            Expr::Map(map) => {
                assert_eq!(map.get("path"), Some(&Expr::str("/tmp")));
                assert_eq!(map.get("depth"), Some(&Expr::num(3.0)));
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn nested_calls_parse() {
        let expr: Expr =
            serde_json::from_value(json!(["+", ["*", 2, 3], 4])).unwrap();
        match expr {
            Expr::Call { op, args } => {
                assert_eq!(op, "+");
                assert!(args[0].is_call());
            }
            other => panic!("expected call, got {:?}", other),
        }
    }
}

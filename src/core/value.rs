use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::core::{Result, TxError};

/// A single cell value as stored by the reference engine.
///
/// Values double as row keys, so equality and hashing are total:
/// floats compare by bit pattern and NULL only equals NULL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert to a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(v) => {
                serde_json::Number::from_f64(*v).map_or(serde_json::Value::Null, serde_json::Value::Number)
            }
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }

    /// Convert from a JSON scalar; arrays and objects are rejected.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(TxError::TypeMismatch(format!("unrepresentable number {}", n)))
                }
            }
            serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
            other => Err(TxError::TypeMismatch(format!(
                "cannot store JSON {} as a cell value",
                match other {
                    serde_json::Value::Array(_) => "array",
                    _ => "object",
                }
            ))),
        }
    }

    /// Total ordering across same-type values, NULL last.
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::Null, _) => Ok(Ordering::Greater),
            (_, Value::Null) => Ok(Ordering::Less),

            (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => {
                Ok(a.partial_cmp(b).unwrap_or(Ordering::Equal))
            }
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),

            _ => Err(TxError::TypeMismatch(format!(
                "Cannot compare incompatible types: {} and {}",
                self.type_name(),
                other.type_name()
            ))),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Boolean(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_same_types() {
        assert_eq!(
            Value::Integer(1).compare(&Value::Integer(2)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            Value::Text("b".into()).compare(&Value::Text("a".into())).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn test_null_sorts_last() {
        assert_eq!(
            Value::Null.compare(&Value::Integer(100)).unwrap(),
            Ordering::Greater
        );
    }

    #[test]
    fn test_incompatible_comparison_fails() {
        assert!(Value::Integer(1).compare(&Value::Text("1".into())).is_err());
    }

    #[test]
    fn test_equality_is_type_strict() {
        assert_eq!(Value::Integer(1), Value::Integer(1));
        assert_ne!(Value::Integer(1), Value::Float(1.0));
        assert_eq!(Value::Null, Value::Null);
    }

    #[test]
    fn test_variant_accessors() {
        assert_eq!(Value::Integer(7).as_i64(), Some(7));
        assert_eq!(Value::Text("x".into()).as_str(), Some("x"));
        assert_eq!(Value::Boolean(true).as_bool(), Some(true));

        assert_eq!(Value::Null.as_i64(), None);
        assert_eq!(Value::Integer(1).as_str(), None);
        assert_eq!(Value::Text("true".into()).as_bool(), None);
    }

    #[test]
    fn test_json_round_trip() {
        let values = [
            Value::Null,
            Value::Integer(42),
            Value::Text("Alice".into()),
            Value::Boolean(true),
        ];
        for value in values {
            let back = Value::from_json(&value.to_json()).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_json_rejects_composites() {
        assert!(Value::from_json(&serde_json::json!([1, 2])).is_err());
        assert!(Value::from_json(&serde_json::json!({"a": 1})).is_err());
    }

    #[test]
    fn test_float_keys_hash_by_bits() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(Value::Float(1.5), "a");
        assert_eq!(map.get(&Value::Float(1.5)), Some(&"a"));
    }
}

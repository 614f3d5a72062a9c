// Fact values and their declared types
//
// Values are the scalars (or lists of scalars) carried in fact and derived tuples.
// Equality and hashing are total so tuples can be deduplicated; floats compare by
// bit pattern for equality and numerically for ordering.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Positional values of a fact or derived tuple (key excluded)
pub type Tuple = Vec<Value>;

/// A single typed value
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Value>),
}

impl Value {
    /// Ordering used by comparison literals
    ///
    /// Numbers compare across `Int`/`Float`; strings and bools compare within their
    /// own kind. Other combinations are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Whether this value satisfies a declared type
    pub fn conforms_to(&self, ty: &ValueType) -> bool {
        match (self, ty) {
            (Value::Str(_), ValueType::String)
            | (Value::Int(_), ValueType::Int)
            | (Value::Float(_), ValueType::Float)
            | (Value::Bool(_), ValueType::Bool) => true,
            (Value::List(items), ValueType::List(inner)) => {
                items.iter().all(|item| item.conforms_to(inner))
            }
            _ => false,
        }
    }

    /// Name of this value's kind, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Str(s) => s.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::List(items) => items.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Declared type of a relation field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    String,
    Int,
    Float,
    Bool,
    List(Box<ValueType>),
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::String => write!(f, "string"),
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::List(inner) => write!(f, "list<{}>", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_comparison_crosses_int_and_float() {
        assert_eq!(Value::Int(1).compare(&Value::Float(0.7)), Some(Ordering::Greater));
        assert_eq!(Value::Float(0.7).compare(&Value::Float(0.7)), Some(Ordering::Equal));
        assert_eq!(Value::Str("a".into()).compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_no_coercion_between_int_and_float() {
        assert!(!Value::Int(2023).conforms_to(&ValueType::Float));
        assert!(Value::Float(0.85).conforms_to(&ValueType::Float));
        assert!(!Value::Int(1).eq(&Value::Float(1.0)));
    }

    #[test]
    fn test_list_type_checks_every_element() {
        let genres = Value::List(vec!["Fiction".into(), "Mystery".into()]);
        assert!(genres.conforms_to(&ValueType::List(Box::new(ValueType::String))));

        let mixed = Value::List(vec!["Fiction".into(), Value::Int(3)]);
        assert!(!mixed.conforms_to(&ValueType::List(Box::new(ValueType::String))));
    }

    #[test]
    fn test_json_representation_is_untagged() {
        let values: Vec<Value> = serde_json::from_str(r#"["Dune", 1965, 0.9, true, ["a"]]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Str("Dune".into()),
                Value::Int(1965),
                Value::Float(0.9),
                Value::Bool(true),
                Value::List(vec!["a".into()]),
            ]
        );
    }
}

//! Primary key values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A scalar primary key.
///
/// Every integer width normalizes to [`Key::Int`], so a key read back as
/// `INTEGER` compares equal to the same key bound as `BIGINT`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    /// Extract a key from a value.
    ///
    /// Returns `None` for NULL, DEFAULT and anything that is not an integer or
    /// text: such an entity is considered unkeyed.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
                value.as_i64().map(Key::Int)
            }
            Value::Text(s) if !s.is_empty() => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    /// The value to bind when this key is used as a query parameter.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(v) => Value::BigInt(*v),
            Key::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Text(v.to_string())
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Int(v) => Value::BigInt(v),
            Key::Text(s) => Value::Text(s),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(v) => write!(f, "{v}"),
            Key::Text(s) => write!(f, "{s}"),
        }
    }
}

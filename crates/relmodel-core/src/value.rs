//! Dynamic SQL values.
//!
//! Entity attributes travel as [`Value`], as do the parameters bound to a
//! statement. Columns convert between what an application hands them and
//! what the database stores; keys are read from the integer and text
//! variants.

use serde::{Deserialize, Serialize};

/// A dynamically-typed SQL value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
    /// Renders as the `DEFAULT` keyword instead of a bound parameter.
    Default,
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for booleans, numbers and text.
    ///
    /// Bytes, JSON documents, arrays, NULL and `DEFAULT` are not scalars and
    /// no column in this crate stores them.
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Bool(_)
                | Value::TinyInt(_)
                | Value::SmallInt(_)
                | Value::Int(_)
                | Value::BigInt(_)
                | Value::Float(_)
                | Value::Double(_)
                | Value::Text(_)
        )
    }

    /// Short label used in conversion errors.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
                "integer"
            }
            Value::Float(_) | Value::Double(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
            Value::Default => "default",
        }
    }

    /// Integer view of this value. Booleans count as 0 or 1; floats and text
    /// are not read as integers.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Bool(b) => Some(i64::from(b)),
            Value::TinyInt(n) => Some(i64::from(n)),
            Value::SmallInt(n) => Some(i64::from(n)),
            Value::Int(n) => Some(i64::from(n)),
            Value::BigInt(n) => Some(n),
            _ => None,
        }
    }

    /// Floating point view of any numeric value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f64::from(f)),
            Value::Double(f) => Some(f),
            Value::BigInt(n) => Some(n as f64),
            _ => self.as_i64().filter(|_| !matches!(self, Value::Bool(_))).map(|n| n as f64),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        if let Value::Text(s) = self { Some(s) } else { None }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                #[allow(clippy::useless_conversion)]
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => TinyInt,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    u32 => BigInt,
    f32 => Float,
    f64 => Double,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
    serde_json::Value => Json,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

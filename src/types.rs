// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The value model for payloads exchanged with the platform.

use chrono::{DateTime, Utc};

/// A single value carried by a datastream sample or property update.
///
/// Arrays are homogeneous on the wire but represented uniformly as
/// [`Value::Array`]; the `From` impls for typed vectors build them.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// IEEE-754 double.
    Double(f64),
    /// 32-bit signed integer.
    Integer(i32),
    /// 64-bit signed integer.
    LongInteger(i64),
    /// Boolean.
    Boolean(bool),
    /// UTF-8 string.
    String(String),
    /// Opaque binary blob.
    Binary(Vec<u8>),
    /// UTC timestamp with millisecond precision.
    DateTime(DateTime<Utc>),
    /// Array of scalar values.
    Array(Vec<Value>),
}

impl Value {
    /// Whether this value is an array.
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::LongInteger(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Binary(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Binary(value.to_vec())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

macro_rules! impl_array_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for Value {
                fn from(values: Vec<$ty>) -> Self {
                    Value::Array(values.into_iter().map(Value::$variant).collect())
                }
            }
        )*
    };
}

impl_array_from!(
    f64 => Double,
    i32 => Integer,
    i64 => LongInteger,
    bool => Boolean,
    String => String,
    Vec<u8> => Binary,
    DateTime<Utc> => DateTime,
);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scalar_conversions() {
        assert_eq!(Value::from(4.2), Value::Double(4.2));
        assert_eq!(Value::from(42i32), Value::Integer(42));
        assert_eq!(Value::from(42i64), Value::LongInteger(42));
        assert_eq!(Value::from(true), Value::Boolean(true));
        assert_eq!(Value::from("on"), Value::String("on".to_owned()));
        assert_eq!(Value::from(vec![1u8, 2]), Value::Binary(vec![1, 2]));
    }

    #[test]
    fn array_conversions() {
        assert_eq!(
            Value::from(vec![1i32, 2, 3]),
            Value::Array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)])
        );
        assert!(Value::from(vec![true]).is_array());
    }
}

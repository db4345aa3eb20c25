//! Conversions between decoded [`Value`]s and Rust types.
//!
//! Results decode into [`Value`] first; [`FromValue`] then maps a value onto
//! a Rust type. Parameters go the other way through `From<T> for Value`.

mod primitives;
mod row;
mod string;

#[cfg(feature = "with-chrono")]
mod chrono;
#[cfg(feature = "with-rust-decimal")]
mod decimal;
#[cfg(feature = "with-time")]
mod time;
#[cfg(feature = "with-uuid")]
mod uuid;

use crate::error::{Error, Result};
use crate::value::Value;

pub use row::FromRow;

/// Trait for converting a decoded value into a Rust type.
pub trait FromValue: Sized {
    /// Convert SQL NULL.
    ///
    /// Default implementation returns an error. Override for types that can
    /// represent NULL (like `Option<T>`).
    fn from_null() -> Result<Self> {
        Err(Error::Decode("unexpected NULL value".into()))
    }

    /// Convert a non-null value.
    fn from_value(value: &Value) -> Result<Self>;
}

/// Convert `value`, routing NULL through [`FromValue::from_null`].
pub fn from_value<T: FromValue>(value: &Value) -> Result<T> {
    match value {
        Value::Null => T::from_null(),
        other => T::from_value(other),
    }
}

// === Option<T> - NULL handling ===

impl<T: FromValue> FromValue for Option<T> {
    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn from_value(value: &Value) -> Result<Self> {
        T::from_value(value).map(Some)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl FromValue for Value {
    fn from_null() -> Result<Self> {
        Ok(Value::Null)
    }

    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

/// Elements of a one-dimensional array.
impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Array(array) => array.elements.iter().map(from_value).collect(),
            other => Err(Error::type_mismatch("array", other.kind())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ArrayValue;

    #[test]
    fn test_null_needs_option() {
        assert!(from_value::<i32>(&Value::Null).is_err());
        assert_eq!(from_value::<Option<i32>>(&Value::Null).unwrap(), None);
        assert_eq!(from_value::<Option<i32>>(&Value::Int4(7)).unwrap(), Some(7));
    }

    #[test]
    fn test_array_elements() {
        let value = Value::Array(ArrayValue::new(vec![
            Value::Int4(1),
            Value::Null,
            Value::Int4(3),
        ]));
        let decoded: Vec<Option<i64>> = from_value(&value).unwrap();
        assert_eq!(decoded, [Some(1), None, Some(3)]);
        assert!(from_value::<Vec<i32>>(&value).is_err());
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(5_i16)), Value::Int2(5));
    }
}

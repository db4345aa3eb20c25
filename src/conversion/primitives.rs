//! Primitive type implementations (bool, integers, floats).

use crate::error::{Error, Result};
use crate::value::Value;

use super::FromValue;

// === Boolean ===

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(Error::type_mismatch("bool", other.kind())),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

// === Integer types ===

/// Widest integer reading of `value`, if it is an integer.
fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int2(v) => Some(i64::from(*v)),
        Value::Int4(v) => Some(i64::from(*v)),
        Value::Int8(v) => Some(*v),
        Value::Oid(v) => Some(i64::from(*v)),
        _ => None,
    }
}

macro_rules! impl_integer {
    ($($T:ty => $variant:ident),+ $(,)?) => {
        $(
            impl FromValue for $T {
                fn from_value(value: &Value) -> Result<Self> {
                    let wide = integer(value)
                        .ok_or_else(|| Error::type_mismatch(stringify!($T), value.kind()))?;
                    <$T>::try_from(wide).map_err(|_overflow| Error::overflow(value.kind(), stringify!($T)))
                }
            }

            impl From<$T> for Value {
                fn from(value: $T) -> Self {
                    Value::$variant(value)
                }
            }
        )+
    };
}

impl_integer!(i16 => Int2, i32 => Int4, i64 => Int8, u32 => Oid);

impl FromValue for i8 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = integer(value).ok_or_else(|| Error::type_mismatch("i8", value.kind()))?;
        i8::try_from(wide).map_err(|_overflow| Error::overflow(value.kind(), "i8"))
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = integer(value).ok_or_else(|| Error::type_mismatch("u64", value.kind()))?;
        u64::try_from(wide).map_err(|_overflow| Error::overflow(value.kind(), "u64"))
    }
}

// === Floating point ===

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float4(v) => Ok(*v),
            Value::Int2(v) => Ok(f32::from(*v)),
            other => Err(Error::type_mismatch("f32", other.kind())),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float4(v) => Ok(f64::from(*v)),
            Value::Float8(v) => Ok(*v),
            Value::Int2(v) => Ok(f64::from(*v)),
            Value::Int4(v) => Ok(f64::from(*v)),
            Value::Numeric(text) => text
                .parse()
                .map_err(|e| Error::Decode(format!("invalid numeric {:?}: {}", text, e))),
            other => Err(Error::type_mismatch("f64", other.kind())),
        }
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float4(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float8(value)
    }
}

#[cfg(test)]
mod tests {
    use super::super::from_value;
    use super::*;

    #[test]
    fn test_integers_widen() {
        assert_eq!(from_value::<i64>(&Value::Int2(-3)).unwrap(), -3);
        assert_eq!(from_value::<i32>(&Value::Int2(12)).unwrap(), 12);
        assert_eq!(from_value::<u32>(&Value::Oid(26)).unwrap(), 26);
    }

    #[test]
    fn test_integers_narrow_with_check() {
        assert_eq!(from_value::<i16>(&Value::Int8(300)).unwrap(), 300);
        let err = from_value::<i16>(&Value::Int8(70_000)).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(from_value::<u64>(&Value::Int4(-1)).is_err());
    }

    #[test]
    fn test_type_mismatch() {
        assert!(from_value::<bool>(&Value::Int4(1)).is_err());
        assert!(from_value::<i32>(&Value::Text("1".into())).is_err());
    }

    #[test]
    fn test_floats() {
        assert_eq!(from_value::<f64>(&Value::Float4(1.5)).unwrap(), 1.5);
        assert_eq!(from_value::<f64>(&Value::Numeric("-2.25".into())).unwrap(), -2.25);
        assert_eq!(Value::from(0.5_f32), Value::Float4(0.5));
    }
}

//! String and byte type implementations.

use crate::error::{Error, Result};
use crate::value::{BitString, Value};

use super::FromValue;

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value.as_str() {
            Some(s) => Ok(s.to_string()),
            None => Err(Error::type_mismatch("String", value.kind())),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bytea(bytes) => Ok(bytes.clone()),
            other => Err(Error::type_mismatch("Vec<u8>", other.kind())),
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytea(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytea(value.to_vec())
    }
}

impl FromValue for BitString {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bits(bits) => Ok(bits.clone()),
            other => Err(Error::type_mismatch("BitString", other.kind())),
        }
    }
}

impl From<BitString> for Value {
    fn from(value: BitString) -> Self {
        Value::Bits(value)
    }
}

#[cfg(test)]
mod tests {
    use super::super::from_value;
    use super::*;

    #[test]
    fn test_text_like_values_read_as_string() {
        assert_eq!(from_value::<String>(&Value::Name("pg_type".into())).unwrap(), "pg_type");
        assert_eq!(from_value::<String>(&Value::Enum("happy".into())).unwrap(), "happy");
        assert!(from_value::<String>(&Value::Bytea(vec![1])).is_err());
    }

    #[test]
    fn test_empty_string_is_not_null() {
        let value = Value::from("");
        assert!(!value.is_null());
        assert_eq!(from_value::<Option<String>>(&value).unwrap(), Some(String::new()));
    }
}

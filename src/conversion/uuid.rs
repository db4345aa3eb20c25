//! UUID type implementation (uuid crate).

use crate::error::{Error, Result};
use crate::value::Value;

use super::FromValue;

impl FromValue for uuid::Uuid {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Uuid(bytes) => Ok(uuid::Uuid::from_bytes(*bytes)),
            Value::Text(s) | Value::Unknown(s) => {
                uuid::Uuid::parse_str(s).map_err(|e| Error::Decode(format!("invalid UUID: {}", e)))
            }
            other => Err(Error::type_mismatch("Uuid", other.kind())),
        }
    }
}

impl From<uuid::Uuid> for Value {
    fn from(value: uuid::Uuid) -> Self {
        Value::Uuid(value.into_bytes())
    }
}

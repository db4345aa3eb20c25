//! Decimal type implementation (rust_decimal crate).
//!
//! NUMERIC values travel as decimal strings inside [`Value::Numeric`], so
//! conversion is exact in both directions. `NaN` and the infinities have no
//! `Decimal` form.

use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::value::Value;

use super::FromValue;

impl FromValue for Decimal {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Numeric(text) => {
                if matches!(text.as_str(), "NaN" | "Infinity" | "-Infinity") {
                    return Err(Error::Decode(format!(
                        "{} cannot be represented as Decimal",
                        text
                    )));
                }
                Decimal::from_str_exact(text)
                    .map_err(|e| Error::Decode(format!("invalid decimal: {}", e)))
            }
            Value::Int2(v) => Ok(Decimal::from(*v)),
            Value::Int4(v) => Ok(Decimal::from(*v)),
            Value::Int8(v) => Ok(Decimal::from(*v)),
            other => Err(Error::type_mismatch("Decimal", other.kind())),
        }
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Numeric(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::super::from_value;
    use super::*;

    #[test]
    fn test_decimal_keeps_scale() {
        let value = Value::Numeric("-12.500".into());
        let decimal = from_value::<Decimal>(&value).unwrap();
        assert_eq!(decimal, Decimal::from_str("-12.500").unwrap());
        assert_eq!(Value::from(decimal), value);
    }

    #[test]
    fn test_nan_is_rejected() {
        assert!(from_value::<Decimal>(&Value::Numeric("NaN".into())).is_err());
    }
}

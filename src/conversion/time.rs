//! Time crate type implementations (Date, Time, PrimitiveDateTime, OffsetDateTime).

use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::error::{Error, Result};
use crate::value::{MICROS_PER_SECOND, Value};

use super::FromValue;

/// PostgreSQL epoch: 2000-01-01
const PG_EPOCH: Date = time::macros::date!(2000 - 01 - 01);

const PG_EPOCH_DATETIME: PrimitiveDateTime = time::macros::datetime!(2000-01-01 0:00);

fn out_of_range(kind: &str) -> Error {
    Error::Decode(format!("{} is out of range for the time crate", kind))
}

impl FromValue for Date {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Date(days) => PG_EPOCH
                .checked_add(Duration::days(i64::from(*days)))
                .ok_or_else(|| out_of_range("date")),
            other => Err(Error::type_mismatch("Date", other.kind())),
        }
    }
}

impl From<Date> for Value {
    fn from(value: Date) -> Self {
        Value::Date((value - PG_EPOCH).whole_days() as i32)
    }
}

impl FromValue for Time {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Time(micros) | Value::TimeTz { micros, .. } => {
                if !(0..=86_400 * MICROS_PER_SECOND).contains(micros) {
                    return Err(out_of_range("time"));
                }
                Ok(Time::MIDNIGHT + Duration::microseconds(*micros))
            }
            other => Err(Error::type_mismatch("Time", other.kind())),
        }
    }
}

impl From<Time> for Value {
    fn from(value: Time) -> Self {
        let micros = (value - Time::MIDNIGHT).whole_microseconds() as i64;
        Value::Time(micros)
    }
}

impl FromValue for PrimitiveDateTime {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(micros) => PG_EPOCH_DATETIME
                .checked_add(Duration::microseconds(*micros))
                .ok_or_else(|| out_of_range("timestamp")),
            other => Err(Error::type_mismatch("PrimitiveDateTime", other.kind())),
        }
    }
}

impl From<PrimitiveDateTime> for Value {
    fn from(value: PrimitiveDateTime) -> Self {
        Value::Timestamp((value - PG_EPOCH_DATETIME).whole_microseconds() as i64)
    }
}

impl FromValue for OffsetDateTime {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::TimestampTz(micros) => PG_EPOCH_DATETIME
                .assume_utc()
                .checked_add(Duration::microseconds(*micros))
                .ok_or_else(|| out_of_range("timestamptz")),
            other => Err(Error::type_mismatch("OffsetDateTime", other.kind())),
        }
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        let utc = value.to_offset(UtcOffset::UTC);
        Value::TimestampTz((utc - PG_EPOCH_DATETIME.assume_utc()).whole_microseconds() as i64)
    }
}

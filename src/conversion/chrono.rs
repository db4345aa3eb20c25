//! Chrono crate type implementations (NaiveDate, NaiveTime, NaiveDateTime, DateTime<Utc>).

use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::error::{Error, Result};
use crate::value::{MICROS_PER_SECOND, PG_EPOCH_MICROS_FROM_UNIX, Value};

use super::FromValue;

/// PostgreSQL epoch: 2000-01-01
const PG_EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(2000, 1, 1) {
    Some(d) => d,
    None => panic!("invalid date"),
};

fn out_of_range(kind: &str) -> Error {
    Error::Decode(format!("{} is out of range for chrono", kind))
}

fn utc_from_pg_micros(micros: i64) -> Option<DateTime<Utc>> {
    micros
        .checked_add(PG_EPOCH_MICROS_FROM_UNIX)
        .and_then(DateTime::<Utc>::from_timestamp_micros)
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Date(days) => {
                let magnitude = Days::new(u64::from(days.unsigned_abs()));
                let date = if *days >= 0 {
                    PG_EPOCH.checked_add_days(magnitude)
                } else {
                    PG_EPOCH.checked_sub_days(magnitude)
                };
                date.ok_or_else(|| out_of_range("date"))
            }
            other => Err(Error::type_mismatch("NaiveDate", other.kind())),
        }
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value.signed_duration_since(PG_EPOCH).num_days() as i32)
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Time(micros) | Value::TimeTz { micros, .. } => {
                let seconds = u32::try_from(micros.div_euclid(MICROS_PER_SECOND))
                    .map_err(|_overflow| out_of_range("time"))?;
                let nanos = (micros.rem_euclid(MICROS_PER_SECOND) * 1_000) as u32;
                NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos)
                    .ok_or_else(|| out_of_range("time"))
            }
            other => Err(Error::type_mismatch("NaiveTime", other.kind())),
        }
    }
}

impl From<NaiveTime> for Value {
    fn from(value: NaiveTime) -> Self {
        let seconds = i64::from(value.num_seconds_from_midnight());
        let micros = i64::from(value.nanosecond() / 1_000);
        Value::Time(seconds * MICROS_PER_SECOND + micros)
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(micros) => utc_from_pg_micros(*micros)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| out_of_range("timestamp")),
            other => Err(Error::type_mismatch("NaiveDateTime", other.kind())),
        }
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Timestamp(value.and_utc().timestamp_micros() - PG_EPOCH_MICROS_FROM_UNIX)
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::TimestampTz(micros) => {
                utc_from_pg_micros(*micros).ok_or_else(|| out_of_range("timestamptz"))
            }
            other => Err(Error::type_mismatch("DateTime<Utc>", other.kind())),
        }
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::TimestampTz(value.timestamp_micros() - PG_EPOCH_MICROS_FROM_UNIX)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Value::TimestampTz(value.timestamp_micros() - PG_EPOCH_MICROS_FROM_UNIX)
    }
}

//! Dynamically typed PostgreSQL values.

use crate::protocol::types::{Oid, oid};

/// Days between 1970-01-01 and 2000-01-01.
pub const PG_EPOCH_DAYS_FROM_UNIX: i32 = 10_957;

/// Microseconds between 1970-01-01 and 2000-01-01.
pub const PG_EPOCH_MICROS_FROM_UNIX: i64 = 946_684_800_000_000;

pub const MICROS_PER_SECOND: i64 = 1_000_000;
pub const MICROS_PER_DAY: i64 = 86_400 * MICROS_PER_SECOND;

/// A decoded column or parameter value.
///
/// Date and time variants count from the PostgreSQL epoch (2000-01-01).
/// `i32::MAX`/`i32::MIN` days and `i64::MAX`/`i64::MIN` microseconds stand for
/// `infinity` and `-infinity`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Oid(Oid),
    Float4(f32),
    Float8(f64),
    /// Decimal string, e.g. `-12.50`, `NaN` or `Infinity`
    Numeric(String),
    Text(String),
    Name(String),
    /// Single-byte `"char"`
    Char(u8),
    Bytea(Vec<u8>),
    Json(String),
    Jsonb(String),
    /// Days since 2000-01-01
    Date(i32),
    /// Microseconds since midnight
    Time(i64),
    TimeTz {
        micros: i64,
        /// Seconds east of UTC
        offset: i32,
    },
    /// Microseconds since 2000-01-01 00:00:00
    Timestamp(i64),
    /// Microseconds since 2000-01-01 00:00:00 UTC
    TimestampTz(i64),
    Interval(Interval),
    Uuid([u8; 16]),
    Bits(BitString),
    /// Amount in the smallest currency unit
    Money(i64),
    Enum(String),
    Array(ArrayValue),
    Record(RecordValue),
    Range(RangeValue),
    /// Text form of a type without a dedicated codec
    Unknown(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Type OID this value encodes as when no type is given.
    ///
    /// Returns `None` for values whose type the server must infer.
    pub fn natural_oid(&self) -> Option<Oid> {
        Some(match self {
            Value::Bool(_) => oid::BOOL,
            Value::Int2(_) => oid::INT2,
            Value::Int4(_) => oid::INT4,
            Value::Int8(_) => oid::INT8,
            Value::Oid(_) => oid::OID,
            Value::Float4(_) => oid::FLOAT4,
            Value::Float8(_) => oid::FLOAT8,
            Value::Numeric(_) => oid::NUMERIC,
            Value::Text(_) => oid::TEXT,
            Value::Name(_) => oid::NAME,
            Value::Char(_) => oid::CHAR,
            Value::Bytea(_) => oid::BYTEA,
            Value::Json(_) => oid::JSON,
            Value::Jsonb(_) => oid::JSONB,
            Value::Date(_) => oid::DATE,
            Value::Time(_) => oid::TIME,
            Value::TimeTz { .. } => oid::TIMETZ,
            Value::Timestamp(_) => oid::TIMESTAMP,
            Value::TimestampTz(_) => oid::TIMESTAMPTZ,
            Value::Interval(_) => oid::INTERVAL,
            Value::Uuid(_) => oid::UUID,
            Value::Bits(_) => oid::VARBIT,
            Value::Money(_) => oid::MONEY,
            Value::Null
            | Value::Enum(_)
            | Value::Array(_)
            | Value::Record(_)
            | Value::Range(_)
            | Value::Unknown(_) => return None,
        })
    }

    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int2(_) => "int2",
            Value::Int4(_) => "int4",
            Value::Int8(_) => "int8",
            Value::Oid(_) => "oid",
            Value::Float4(_) => "float4",
            Value::Float8(_) => "float8",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Name(_) => "name",
            Value::Char(_) => "char",
            Value::Bytea(_) => "bytea",
            Value::Json(_) => "json",
            Value::Jsonb(_) => "jsonb",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::TimeTz { .. } => "timetz",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Interval(_) => "interval",
            Value::Uuid(_) => "uuid",
            Value::Bits(_) => "bit varying",
            Value::Money(_) => "money",
            Value::Enum(_) => "enum",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Range(_) => "range",
            Value::Unknown(_) => "unknown",
        }
    }

    /// Borrow the string payload of any text-like variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s)
            | Value::Name(s)
            | Value::Json(s)
            | Value::Jsonb(s)
            | Value::Numeric(s)
            | Value::Enum(s)
            | Value::Unknown(s) => Some(s),
            _ => None,
        }
    }
}

/// `interval` split the way PostgreSQL stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub micros: i64,
}

/// `bit` / `bit varying` value; `bytes` holds `len` bits, most significant first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct BitString {
    pub len: u32,
    pub bytes: Vec<u8>,
}

impl BitString {
    pub fn from_bits(bits: &[bool]) -> Self {
        let mut bytes = vec![0_u8; bits.len().div_ceil(8)];
        for (i, bit) in bits.iter().enumerate() {
            if *bit {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Self {
            len: bits.len() as u32,
            bytes,
        }
    }

    pub fn get(&self, index: u32) -> Option<bool> {
        if index >= self.len {
            return None;
        }
        let byte = self.bytes.get((index / 8) as usize)?;
        Some(byte & (0x80 >> (index % 8)) != 0)
    }
}

/// One dimension of a possibly nested array.
///
/// A multi-dimensional array nests `Value::Array` elements, one level per
/// dimension. SQL NULL elements are `Value::Null`, never an empty value.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    /// Index of the first element, 1 unless the server says otherwise
    pub lower_bound: i32,
    pub elements: Vec<Value>,
}

impl ArrayValue {
    pub fn new(elements: Vec<Value>) -> Self {
        Self {
            lower_bound: 1,
            elements,
        }
    }

    /// Element count per dimension, outermost first.
    ///
    /// Follows the first element at each level; rectangular shape is
    /// checked when encoding.
    pub fn dimensions(&self) -> Vec<usize> {
        let mut dims = vec![self.elements.len()];
        let mut current = self;
        while let Some(Value::Array(inner)) = current.elements.first() {
            dims.push(inner.elements.len());
            current = inner;
        }
        dims
    }
}

/// Row value, one entry per attribute in attribute order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordValue {
    pub fields: Vec<Value>,
}

impl RecordValue {
    pub fn new(fields: Vec<Value>) -> Self {
        Self { fields }
    }
}

/// Range bounds; `None` bounds are unbounded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeValue {
    pub empty: bool,
    pub lower: Option<Box<Value>>,
    pub upper: Option<Box<Value>>,
    pub lower_inclusive: bool,
    pub upper_inclusive: bool,
}

impl RangeValue {
    pub fn empty() -> Self {
        Self {
            empty: true,
            ..Self::default()
        }
    }

    /// `[lower, upper)` with both bounds present.
    pub fn closed_open(lower: Value, upper: Value) -> Self {
        Self {
            empty: false,
            lower: Some(Box::new(lower)),
            upper: Some(Box::new(upper)),
            lower_inclusive: true,
            upper_inclusive: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_oids() {
        assert_eq!(Value::Int4(1).natural_oid(), Some(oid::INT4));
        assert_eq!(Value::Text("a".into()).natural_oid(), Some(oid::TEXT));
        assert_eq!(Value::Null.natural_oid(), None);
        assert_eq!(Value::Enum("red".into()).natural_oid(), None);
    }

    #[test]
    fn array_dimensions() {
        let row = |a: i32, b: i32, c: i32| {
            Value::Array(ArrayValue::new(vec![
                Value::Int4(a),
                Value::Int4(b),
                Value::Int4(c),
            ]))
        };
        let array = ArrayValue::new(vec![row(1, 2, 3), row(4, 5, 6)]);
        assert_eq!(array.dimensions(), vec![2, 3]);
        assert_eq!(ArrayValue::new(vec![]).dimensions(), vec![0]);
    }

    #[test]
    fn bit_string() {
        let bits = BitString::from_bits(&[true, false, true, true, false, false, false, false, true]);
        assert_eq!(bits.len, 9);
        assert_eq!(bits.bytes, vec![0b1011_0000, 0b1000_0000]);
        assert_eq!(bits.get(2), Some(true));
        assert_eq!(bits.get(1), Some(false));
        assert_eq!(bits.get(9), None);
    }
}

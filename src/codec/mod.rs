//! Codec dispatch.
//!
//! Every [`Type`] carries a text codec and, when the server can send it in
//! binary, a binary codec. Both are a [`CodecKind`] selected from the
//! type's input/receive function names. [`decode`] and [`encode`] pick the
//! codec for the negotiated [`FieldFormat`] and thread the connection
//! [`Context`] through.

pub mod array;
pub mod datetime;
pub mod numeric;
pub mod range;
pub mod record;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::protocol::codec::Reader;
use crate::protocol::types::{FieldFormat, Oid};
use crate::types::{Type, TypeKind};
use crate::value::{BitString, Interval, Value};

/// Wire representation handled by a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Bool,
    Bytea,
    Char,
    Name,
    Int2,
    Int4,
    Int8,
    Oid,
    Float4,
    Float8,
    Numeric,
    Text,
    Json,
    Jsonb,
    Date,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
    Interval,
    Uuid,
    Bits,
    Money,
    Enum,
    Array,
    Record,
    Range,
    /// Delegates to the domain's base type
    Domain,
    /// Passes the text form through as [`Value::Unknown`]
    Unknown,
}

fn strip_catalog(proc_name: &str) -> &str {
    proc_name.trim_start_matches("pg_catalog.")
}

impl CodecKind {
    /// Text codec for a `typinput` function. Unrecognized functions get
    /// the pass-through codec.
    pub fn from_input_proc(proc_name: &str) -> CodecKind {
        match strip_catalog(proc_name) {
            "boolin" => CodecKind::Bool,
            "byteain" => CodecKind::Bytea,
            "charin" => CodecKind::Char,
            "namein" => CodecKind::Name,
            "int2in" => CodecKind::Int2,
            "int4in" => CodecKind::Int4,
            "int8in" => CodecKind::Int8,
            "oidin" | "xidin" | "cidin" => CodecKind::Oid,
            "float4in" => CodecKind::Float4,
            "float8in" => CodecKind::Float8,
            "numeric_in" => CodecKind::Numeric,
            "textin" | "varcharin" | "bpcharin" | "unknownin" => CodecKind::Text,
            "json_in" => CodecKind::Json,
            "jsonb_in" => CodecKind::Jsonb,
            "date_in" => CodecKind::Date,
            "time_in" => CodecKind::Time,
            "timetz_in" => CodecKind::TimeTz,
            "timestamp_in" => CodecKind::Timestamp,
            "timestamptz_in" => CodecKind::TimestampTz,
            "interval_in" => CodecKind::Interval,
            "uuid_in" => CodecKind::Uuid,
            "bit_in" | "varbit_in" => CodecKind::Bits,
            "cash_in" => CodecKind::Money,
            "enum_in" => CodecKind::Enum,
            "array_in" | "int2vectorin" | "oidvectorin" => CodecKind::Array,
            "record_in" => CodecKind::Record,
            "range_in" => CodecKind::Range,
            "domain_in" => CodecKind::Domain,
            _ => CodecKind::Unknown,
        }
    }

    /// Binary codec for a `typreceive` function, if one is supported.
    pub fn from_receive_proc(proc_name: &str) -> Option<CodecKind> {
        Some(match strip_catalog(proc_name) {
            "boolrecv" => CodecKind::Bool,
            "bytearecv" => CodecKind::Bytea,
            "charrecv" => CodecKind::Char,
            "namerecv" => CodecKind::Name,
            "int2recv" => CodecKind::Int2,
            "int4recv" => CodecKind::Int4,
            "int8recv" => CodecKind::Int8,
            "oidrecv" | "regprocrecv" | "regtyperecv" | "regclassrecv" | "xidrecv" | "cidrecv" => {
                CodecKind::Oid
            }
            "float4recv" => CodecKind::Float4,
            "float8recv" => CodecKind::Float8,
            "numeric_recv" => CodecKind::Numeric,
            "textrecv" | "varcharrecv" | "bpcharrecv" | "unknownrecv" => CodecKind::Text,
            "json_recv" => CodecKind::Json,
            "jsonb_recv" => CodecKind::Jsonb,
            "date_recv" => CodecKind::Date,
            "time_recv" => CodecKind::Time,
            "timetz_recv" => CodecKind::TimeTz,
            "timestamp_recv" => CodecKind::Timestamp,
            "timestamptz_recv" => CodecKind::TimestampTz,
            "interval_recv" => CodecKind::Interval,
            "uuid_recv" => CodecKind::Uuid,
            "bit_recv" | "varbit_recv" => CodecKind::Bits,
            "cash_recv" => CodecKind::Money,
            "enum_recv" => CodecKind::Enum,
            "array_recv" | "int2vectorrecv" | "oidvectorrecv" => CodecKind::Array,
            "record_recv" => CodecKind::Record,
            "range_recv" => CodecKind::Range,
            "domain_recv" => CodecKind::Domain,
            _ => return None,
        })
    }

    /// Codecs whose wire form is plain UTF-8 text in both formats.
    fn is_textual(self) -> bool {
        matches!(
            self,
            CodecKind::Text | CodecKind::Name | CodecKind::Json | CodecKind::Enum | CodecKind::Unknown
        )
    }
}

fn domain_base(ty: &Type) -> Result<&Type> {
    match &ty.kind {
        TypeKind::Domain { base, .. } => Ok(base),
        _ => Err(Error::Decode(format!("type {} is not a domain", ty.name))),
    }
}

/// Reader failures inside a value are decode errors, not protocol errors.
fn value_error(err: Error) -> Error {
    match err {
        Error::Protocol(message) => Error::Decode(message),
        other => other,
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::basic::from_utf8(bytes).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
}

fn exact<const N: usize>(ty: &Type, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        Error::Decode(format!(
            "invalid {} length: {} (expected {})",
            ty.name.local,
            bytes.len(),
            N
        ))
    })
}

/// Decode one field. `None` bytes is SQL NULL.
pub fn decode(ty: &Type, format: FieldFormat, bytes: Option<&[u8]>, ctx: &Context) -> Result<Value> {
    let Some(bytes) = bytes else {
        return Ok(Value::Null);
    };
    match format {
        FieldFormat::Binary => decode_binary(ty, bytes, ctx),
        FieldFormat::Text => decode_text(ty, bytes, ctx),
    }
    .map_err(value_error)
}

fn decode_binary(ty: &Type, bytes: &[u8], ctx: &Context) -> Result<Value> {
    let kind = ty.binary_codec.ok_or_else(|| {
        Error::Decode(format!("type {} has no binary format", ty.name))
    })?;
    let mut reader = Reader::new(bytes);
    Ok(match kind {
        CodecKind::Bool => Value::Bool(exact::<1>(ty, bytes)?[0] != 0),
        CodecKind::Bytea => Value::Bytea(bytes.to_vec()),
        CodecKind::Char => Value::Char(bytes.first().copied().unwrap_or(0)),
        CodecKind::Name => Value::Name(utf8(bytes)?.to_string()),
        CodecKind::Int2 => Value::Int2(i16::from_be_bytes(exact(ty, bytes)?)),
        CodecKind::Int4 => Value::Int4(i32::from_be_bytes(exact(ty, bytes)?)),
        CodecKind::Int8 => Value::Int8(i64::from_be_bytes(exact(ty, bytes)?)),
        CodecKind::Oid => Value::Oid(u32::from_be_bytes(exact(ty, bytes)?)),
        CodecKind::Float4 => Value::Float4(f32::from_be_bytes(exact(ty, bytes)?)),
        CodecKind::Float8 => Value::Float8(f64::from_be_bytes(exact(ty, bytes)?)),
        CodecKind::Numeric => Value::Numeric(numeric::numeric_to_string(bytes)?),
        CodecKind::Text => Value::Text(utf8(bytes)?.to_string()),
        CodecKind::Json => Value::Json(utf8(bytes)?.to_string()),
        CodecKind::Jsonb => {
            let version = reader.read_u8()?;
            if version != 1 {
                return Err(Error::Decode(format!("unsupported jsonb version {}", version)));
            }
            Value::Jsonb(utf8(reader.rest())?.to_string())
        }
        CodecKind::Date => Value::Date(i32::from_be_bytes(exact(ty, bytes)?)),
        CodecKind::Time => Value::Time(i64::from_be_bytes(exact(ty, bytes)?)),
        CodecKind::TimeTz => {
            exact::<12>(ty, bytes)?;
            let micros = reader.read_i64()?;
            // The wire zone is seconds west of UTC
            let zone = reader.read_i32()?;
            Value::TimeTz {
                micros,
                offset: -zone,
            }
        }
        CodecKind::Timestamp => Value::Timestamp(i64::from_be_bytes(exact(ty, bytes)?)),
        CodecKind::TimestampTz => Value::TimestampTz(i64::from_be_bytes(exact(ty, bytes)?)),
        CodecKind::Interval => {
            exact::<16>(ty, bytes)?;
            let micros = reader.read_i64()?;
            let days = reader.read_i32()?;
            let months = reader.read_i32()?;
            Value::Interval(Interval {
                months,
                days,
                micros,
            })
        }
        CodecKind::Uuid => Value::Uuid(exact(ty, bytes)?),
        CodecKind::Bits => {
            let len = reader.read_i32()?;
            let len = u32::try_from(len)
                .map_err(|_| Error::Decode(format!("invalid bit string length {}", len)))?;
            let data = reader.read_bytes(len.div_ceil(8) as usize)?;
            Value::Bits(BitString {
                len,
                bytes: data.to_vec(),
            })
        }
        CodecKind::Money => Value::Money(i64::from_be_bytes(exact(ty, bytes)?)),
        CodecKind::Enum => Value::Enum(utf8(bytes)?.to_string()),
        CodecKind::Array => array::decode(ty, FieldFormat::Binary, bytes, ctx)?,
        CodecKind::Record => record::decode(ty, FieldFormat::Binary, bytes, ctx)?,
        CodecKind::Range => range::decode(ty, FieldFormat::Binary, bytes, ctx)?,
        CodecKind::Domain => decode_binary(domain_base(ty)?, bytes, ctx)?,
        CodecKind::Unknown => Value::Unknown(utf8(bytes)?.to_string()),
    })
}

fn parse_number<T: std::str::FromStr>(ty: &Type, text: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| Error::Decode(format!("invalid {} value: {:?}", ty.name.local, text)))
}

fn decode_text(ty: &Type, bytes: &[u8], ctx: &Context) -> Result<Value> {
    let text = utf8(bytes)?;
    Ok(match ty.text_codec {
        CodecKind::Bool => Value::Bool(parse_bool(text)?),
        CodecKind::Bytea => Value::Bytea(parse_bytea(text)?),
        CodecKind::Char => Value::Char(parse_char(text)?),
        CodecKind::Name => Value::Name(text.to_string()),
        CodecKind::Int2 => Value::Int2(parse_number(ty, text)?),
        CodecKind::Int4 => Value::Int4(parse_number(ty, text)?),
        CodecKind::Int8 => Value::Int8(parse_number(ty, text)?),
        CodecKind::Oid => Value::Oid(parse_number(ty, text)?),
        CodecKind::Float4 => Value::Float4(parse_number(ty, text)?),
        CodecKind::Float8 => Value::Float8(parse_number(ty, text)?),
        CodecKind::Numeric => {
            numeric::validate(text).map_err(|_| {
                Error::Decode(format!("invalid numeric value: {:?}", text))
            })?;
            Value::Numeric(text.to_string())
        }
        CodecKind::Text => Value::Text(text.to_string()),
        CodecKind::Json => Value::Json(text.to_string()),
        CodecKind::Jsonb => Value::Jsonb(text.to_string()),
        CodecKind::Date => Value::Date(datetime::parse_date(text)?),
        CodecKind::Time => Value::Time(datetime::parse_time(text)?),
        CodecKind::TimeTz => {
            let (micros, offset) = datetime::parse_timetz(text)?;
            Value::TimeTz { micros, offset }
        }
        CodecKind::Timestamp => Value::Timestamp(datetime::parse_timestamp(text)?),
        CodecKind::TimestampTz => Value::TimestampTz(datetime::parse_timestamptz(
            text,
            ctx.time_zone.offset_seconds(),
        )?),
        CodecKind::Interval => Value::Interval(datetime::parse_interval(text, ctx.interval_style)?),
        CodecKind::Uuid => Value::Uuid(parse_uuid(text)?),
        CodecKind::Bits => Value::Bits(parse_bits(text)?),
        CodecKind::Money => Value::Money(parse_money(text, ctx)?),
        CodecKind::Enum => Value::Enum(text.to_string()),
        CodecKind::Array => array::decode(ty, FieldFormat::Text, bytes, ctx)?,
        CodecKind::Record => record::decode(ty, FieldFormat::Text, bytes, ctx)?,
        CodecKind::Range => range::decode(ty, FieldFormat::Text, bytes, ctx)?,
        CodecKind::Domain => decode_text(domain_base(ty)?, bytes, ctx)?,
        CodecKind::Unknown => Value::Unknown(text.to_string()),
    })
}

/// Encode one parameter for `ty`.
///
/// Uses the type's parameter format, except that a string value bound to a
/// non-textual type goes as text so the server parses it.
pub fn encode(ty: &Type, value: &Value, ctx: &Context) -> Result<(FieldFormat, Option<Vec<u8>>)> {
    let mut format = ty.parameter_format();
    if value.is_null() {
        return Ok((format, None));
    }
    let binary_is_textual = ty.base_type().binary_codec.is_some_and(CodecKind::is_textual);
    if format == FieldFormat::Binary
        && matches!(value, Value::Text(_) | Value::Unknown(_))
        && !binary_is_textual
    {
        format = FieldFormat::Text;
    }
    let bytes = match format {
        FieldFormat::Binary => encode_binary(ty, value, ctx)?,
        FieldFormat::Text => encode_text(ty, value, ctx)?.into_bytes(),
    };
    Ok((format, Some(bytes)))
}

fn mismatch(ty: &Type, value: &Value) -> Error {
    Error::Encode(format!(
        "cannot encode {} value as {}",
        value.kind(),
        ty.name
    ))
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Int2(v) => Some(i64::from(*v)),
        Value::Int4(v) => Some(i64::from(*v)),
        Value::Int8(v) => Some(*v),
        Value::Oid(v) => Some(i64::from(*v)),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Float4(v) => Some(f64::from(*v)),
        Value::Float8(v) => Some(*v),
        Value::Int2(v) => Some(f64::from(*v)),
        Value::Int4(v) => Some(f64::from(*v)),
        _ => None,
    }
}

fn integer<T: TryFrom<i64>>(ty: &Type, value: &Value) -> Result<T> {
    let wide = as_i64(value).ok_or_else(|| mismatch(ty, value))?;
    T::try_from(wide).map_err(|_| {
        Error::Encode(format!("value {} out of range for type {}", wide, ty.name))
    })
}

pub(crate) fn encode_binary(ty: &Type, value: &Value, ctx: &Context) -> Result<Vec<u8>> {
    let kind = ty
        .binary_codec
        .ok_or_else(|| Error::Encode(format!("type {} has no binary format", ty.name)))?;
    Ok(match (kind, value) {
        (CodecKind::Bool, Value::Bool(b)) => vec![u8::from(*b)],
        (CodecKind::Bytea, Value::Bytea(b)) => b.clone(),
        (CodecKind::Char, Value::Char(c)) => vec![*c],
        (kind, v) if kind.is_textual() && v.as_str().is_some() => {
            v.as_str().unwrap_or_default().as_bytes().to_vec()
        }
        (CodecKind::Int2, v) => integer::<i16>(ty, v)?.to_be_bytes().to_vec(),
        (CodecKind::Int4, v) => integer::<i32>(ty, v)?.to_be_bytes().to_vec(),
        (CodecKind::Int8, v) => integer::<i64>(ty, v)?.to_be_bytes().to_vec(),
        (CodecKind::Oid, v) => integer::<u32>(ty, v)?.to_be_bytes().to_vec(),
        (CodecKind::Float4, Value::Float4(f)) => f.to_be_bytes().to_vec(),
        (CodecKind::Float4, v) => {
            let wide = as_f64(v).ok_or_else(|| mismatch(ty, v))?;
            (wide as f32).to_be_bytes().to_vec()
        }
        (CodecKind::Float8, v) => as_f64(v)
            .ok_or_else(|| mismatch(ty, v))?
            .to_be_bytes()
            .to_vec(),
        (CodecKind::Numeric, v) => numeric::string_to_numeric(&numeric_text(ty, v)?)?,
        (CodecKind::Jsonb, Value::Jsonb(s) | Value::Json(s) | Value::Text(s)) => {
            let mut out = Vec::with_capacity(s.len() + 1);
            out.push(1);
            out.extend_from_slice(s.as_bytes());
            out
        }
        (CodecKind::Date, Value::Date(d)) => d.to_be_bytes().to_vec(),
        (CodecKind::Time, Value::Time(t)) => t.to_be_bytes().to_vec(),
        (CodecKind::TimeTz, Value::TimeTz { micros, offset }) => {
            let mut out = micros.to_be_bytes().to_vec();
            out.extend_from_slice(&(-offset).to_be_bytes());
            out
        }
        (CodecKind::Timestamp, Value::Timestamp(t))
        | (CodecKind::TimestampTz, Value::TimestampTz(t)) => t.to_be_bytes().to_vec(),
        (CodecKind::Interval, Value::Interval(i)) => {
            let mut out = i.micros.to_be_bytes().to_vec();
            out.extend_from_slice(&i.days.to_be_bytes());
            out.extend_from_slice(&i.months.to_be_bytes());
            out
        }
        (CodecKind::Uuid, Value::Uuid(u)) => u.to_vec(),
        (CodecKind::Bits, Value::Bits(bits)) => {
            let len = i32::try_from(bits.len)
                .map_err(|_| Error::Encode("bit string too long".into()))?;
            let mut out = len.to_be_bytes().to_vec();
            out.extend_from_slice(&bits.bytes);
            out
        }
        (CodecKind::Money, Value::Money(m)) => m.to_be_bytes().to_vec(),
        (CodecKind::Array, Value::Array(a)) => array::encode(ty, FieldFormat::Binary, a, ctx)?,
        (CodecKind::Record, Value::Record(r)) => record::encode(ty, FieldFormat::Binary, r, ctx)?,
        (CodecKind::Range, Value::Range(r)) => range::encode(ty, FieldFormat::Binary, r, ctx)?,
        (CodecKind::Domain, v) => encode_binary(domain_base(ty)?, v, ctx)?,
        (_, v) => return Err(mismatch(ty, v)),
    })
}

fn numeric_text(ty: &Type, value: &Value) -> Result<String> {
    match value {
        Value::Numeric(s) => Ok(s.clone()),
        Value::Float4(f) if f.is_finite() => Ok(f.to_string()),
        Value::Float8(f) if f.is_finite() => Ok(f.to_string()),
        Value::Float4(f) => Ok(format_float(f64::from(*f))),
        Value::Float8(f) => Ok(format_float(*f)),
        other => as_i64(other)
            .map(|i| i.to_string())
            .ok_or_else(|| mismatch(ty, other)),
    }
}

pub(crate) fn encode_text(ty: &Type, value: &Value, ctx: &Context) -> Result<String> {
    // Strings go through as typed; the server parses them
    if let Value::Text(s) | Value::Unknown(s) = value {
        return Ok(s.clone());
    }
    Ok(match (ty.text_codec, value) {
        (CodecKind::Bool, Value::Bool(b)) => if *b { "t" } else { "f" }.to_string(),
        (CodecKind::Bytea, Value::Bytea(b)) => format_bytea(b),
        (CodecKind::Char, Value::Char(c)) => format_char(*c),
        (kind, v) if kind.is_textual() && v.as_str().is_some() => {
            v.as_str().unwrap_or_default().to_string()
        }
        (CodecKind::Int2, v) => integer::<i16>(ty, v)?.to_string(),
        (CodecKind::Int4, v) => integer::<i32>(ty, v)?.to_string(),
        (CodecKind::Int8, v) => integer::<i64>(ty, v)?.to_string(),
        (CodecKind::Oid, v) => integer::<u32>(ty, v)?.to_string(),
        (CodecKind::Float4, Value::Float4(f)) => format_float4(*f),
        (CodecKind::Float4 | CodecKind::Float8, v) => {
            format_float(as_f64(v).ok_or_else(|| mismatch(ty, v))?)
        }
        (CodecKind::Numeric, v) => {
            let text = numeric_text(ty, v)?;
            numeric::validate(&text)?;
            text
        }
        (CodecKind::Jsonb, Value::Jsonb(s) | Value::Json(s)) => s.clone(),
        (CodecKind::Date, Value::Date(d)) => datetime::format_date(*d),
        (CodecKind::Time, Value::Time(t)) => datetime::format_time(*t),
        (CodecKind::TimeTz, Value::TimeTz { micros, offset }) => {
            datetime::format_timetz(*micros, *offset)
        }
        (CodecKind::Timestamp, Value::Timestamp(t)) => datetime::format_timestamp(*t),
        (CodecKind::TimestampTz, Value::TimestampTz(t)) => datetime::format_timestamptz(*t, 0),
        (CodecKind::Interval, Value::Interval(i)) => datetime::format_interval(i),
        (CodecKind::Uuid, Value::Uuid(u)) => format_uuid(u),
        (CodecKind::Bits, Value::Bits(bits)) => format_bits(bits),
        (CodecKind::Money, Value::Money(m)) => format_money(*m, ctx),
        (CodecKind::Array, Value::Array(a)) => {
            String::from_utf8(array::encode(ty, FieldFormat::Text, a, ctx)?)
                .map_err(|e| Error::Encode(e.to_string()))?
        }
        (CodecKind::Record, Value::Record(r)) => {
            String::from_utf8(record::encode(ty, FieldFormat::Text, r, ctx)?)
                .map_err(|e| Error::Encode(e.to_string()))?
        }
        (CodecKind::Range, Value::Range(r)) => {
            String::from_utf8(range::encode(ty, FieldFormat::Text, r, ctx)?)
                .map_err(|e| Error::Encode(e.to_string()))?
        }
        (CodecKind::Domain, v) => encode_text(domain_base(ty)?, v, ctx)?,
        (_, v) => return Err(mismatch(ty, v)),
    })
}

/// Text form of a value with no resolved type. `None` if the value's type
/// cannot be inferred.
pub fn encode_untyped(value: &Value) -> Option<String> {
    match value {
        Value::Enum(s) | Value::Unknown(s) | Value::Text(s) => Some(s.clone()),
        _ => None,
    }
}

fn parse_bool(text: &str) -> Result<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::Decode(format!("invalid bool value: {:?}", text))),
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Parse `\x...` hex or the legacy escape format.
fn parse_bytea(text: &str) -> Result<Vec<u8>> {
    let invalid = || Error::Decode("invalid bytea value".into());
    if let Some(hex) = text.strip_prefix("\\x") {
        let digits: Vec<u8> = hex.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
        if digits.len() % 2 != 0 {
            return Err(invalid());
        }
        return digits
            .chunks_exact(2)
            .map(|pair| Some(hex_value(pair[0])? << 4 | hex_value(pair[1])?))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(invalid);
    }

    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match (bytes[i], bytes.get(i + 1..i + 4)) {
            (b'\\', _) if bytes.get(i + 1) == Some(&b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            (b'\\', Some(octal)) if octal.iter().all(|b| (b'0'..=b'7').contains(b)) => {
                out.push(octal.iter().fold(0_u8, |acc, b| acc.wrapping_mul(8) + (b - b'0')));
                i += 4;
            }
            (b'\\', _) => return Err(invalid()),
            (b, _) => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn format_bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn parse_char(text: &str) -> Result<u8> {
    let bytes = text.as_bytes();
    match bytes {
        [] => Ok(0),
        [b] => Ok(*b),
        [b'\\', octal @ ..] if octal.len() == 3 && octal.iter().all(|b| (b'0'..=b'7').contains(b)) => {
            Ok(octal.iter().fold(0_u8, |acc, b| acc.wrapping_mul(8) + (b - b'0')))
        }
        _ => Err(Error::Decode(format!("invalid \"char\" value: {:?}", text))),
    }
}

fn format_char(c: u8) -> String {
    if c.is_ascii() && c != 0 && c != b'\\' {
        (c as char).to_string()
    } else if c == 0 {
        String::new()
    } else {
        format!("\\{:03o}", c)
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NaN".into()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.into()
    } else {
        f.to_string()
    }
}

fn format_float4(f: f32) -> String {
    if f.is_finite() {
        f.to_string()
    } else {
        format_float(f64::from(f))
    }
}

fn parse_uuid(text: &str) -> Result<[u8; 16]> {
    let invalid = || Error::Decode(format!("invalid uuid value: {:?}", text));
    let digits: Vec<u8> = text
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .bytes()
        .filter(|b| *b != b'-')
        .collect();
    if digits.len() != 32 {
        return Err(invalid());
    }
    let mut out = [0_u8; 16];
    for (slot, pair) in out.iter_mut().zip(digits.chunks_exact(2)) {
        *slot = hex_value(pair[0]).ok_or_else(invalid)? << 4 | hex_value(pair[1]).ok_or_else(invalid)?;
    }
    Ok(out)
}

fn format_uuid(bytes: &[u8; 16]) -> String {
    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn parse_bits(text: &str) -> Result<BitString> {
    let bits = text
        .trim()
        .chars()
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            other => Err(Error::Decode(format!("invalid bit {:?}", other))),
        })
        .collect::<Result<Vec<bool>>>()?;
    Ok(BitString::from_bits(&bits))
}

fn format_bits(bits: &BitString) -> String {
    (0..bits.len)
        .map(|i| if bits.get(i) == Some(true) { '1' } else { '0' })
        .collect()
}

/// Parse locale-formatted money, e.g. `$1,234.56`, `-$5.00`, `($5.00)` or
/// `1.234,56 EUR`, into cents.
fn parse_money(text: &str, ctx: &Context) -> Result<i64> {
    let invalid = || Error::Decode(format!("invalid money value: {:?}", text));
    let separator = ctx.monetary_locale.decimal_separator;
    let negative = text.contains('-') || text.trim_start().starts_with('(');

    let mut whole = String::new();
    let mut fraction = String::new();
    let mut seen_separator = false;
    for c in text.chars() {
        if c.is_ascii_digit() {
            if seen_separator {
                fraction.push(c);
            } else {
                whole.push(c);
            }
        } else if c == separator {
            seen_separator = true;
        }
    }
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
    let mut cents: i64 = fraction
        .chars()
        .chain(std::iter::repeat('0'))
        .take(2)
        .collect::<String>()
        .parse()
        .map_err(|_| invalid())?;
    cents += whole.checked_mul(100).ok_or_else(invalid)?;
    Ok(if negative { -cents } else { cents })
}

fn format_money(cents: i64, ctx: &Context) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!(
        "{}{}{}{:02}",
        sign,
        abs / 100,
        ctx.monetary_locale.decimal_separator,
        abs % 100
    )
}

/// Natural OID of an array value, from its first non-null leaf.
pub fn infer_array_element(value: &Value) -> Option<Oid> {
    match value {
        Value::Array(array) => array.elements.iter().find_map(infer_array_element),
        other => other.natural_oid(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::{IntervalStyle, MonetaryLocale};
    use crate::protocol::types::oid;
    use crate::types::test_support::*;
    use crate::types::{Category, SharedRegistry};
    use crate::value::{ArrayValue, RangeValue, RecordValue};

    fn ctx() -> Context {
        Context::new(Arc::new(SharedRegistry::new()))
    }

    fn both_formats(ty: &Type, value: Value) {
        let ctx = ctx();
        let binary = encode_binary(ty, &value, &ctx).unwrap();
        assert_eq!(
            decode(ty, FieldFormat::Binary, Some(&binary), &ctx).unwrap(),
            value,
            "binary {}",
            ty.name
        );
        let text = encode_text(ty, &value, &ctx).unwrap();
        assert_eq!(
            decode(ty, FieldFormat::Text, Some(text.as_bytes()), &ctx).unwrap(),
            value,
            "text {} via {:?}",
            ty.name,
            text
        );
    }

    #[test]
    fn proc_names_select_codecs() {
        assert_eq!(CodecKind::from_receive_proc("int4recv"), Some(CodecKind::Int4));
        assert_eq!(CodecKind::from_receive_proc("array_recv"), Some(CodecKind::Array));
        assert_eq!(CodecKind::from_receive_proc("record_recv"), Some(CodecKind::Record));
        assert_eq!(CodecKind::from_receive_proc("point_recv"), None);
        assert_eq!(CodecKind::from_input_proc("pg_catalog.enum_in"), CodecKind::Enum);
        assert_eq!(CodecKind::from_input_proc("point_in"), CodecKind::Unknown);
    }

    #[test]
    fn scalars_in_both_formats() {
        both_formats(&bool(), Value::Bool(true));
        both_formats(&int4(), Value::Int4(-42));
        both_formats(&int8(), Value::Int8(i64::MAX));
        both_formats(&text(), Value::Text("héllo, world".into()));
        both_formats(
            &base(oid::INT2, "int2", Category::Numeric, CodecKind::Int2),
            Value::Int2(i16::MIN),
        );
        both_formats(
            &base(oid::FLOAT8, "float8", Category::Numeric, CodecKind::Float8),
            Value::Float8(0.1),
        );
        both_formats(
            &base(oid::FLOAT4, "float4", Category::Numeric, CodecKind::Float4),
            Value::Float4(1.5),
        );
        both_formats(
            &base(oid::NUMERIC, "numeric", Category::Numeric, CodecKind::Numeric),
            Value::Numeric("-1234.5600".into()),
        );
        both_formats(
            &base(oid::BYTEA, "bytea", Category::User, CodecKind::Bytea),
            Value::Bytea(vec![0, 1, 0xfe, b'\\']),
        );
        both_formats(
            &base(oid::CHAR, "char", Category::String, CodecKind::Char),
            Value::Char(b'x'),
        );
        both_formats(
            &base(oid::JSONB, "jsonb", Category::User, CodecKind::Jsonb),
            Value::Jsonb("{\"a\": 1}".into()),
        );
        both_formats(
            &base(oid::UUID, "uuid", Category::User, CodecKind::Uuid),
            Value::Uuid([0xa0, 0xee, 0xbc, 0x99, 0x9c, 0x0b, 0x4e, 0xf8, 0xbb, 0x6d, 0x6b, 0xb9, 0xbd, 0x38, 0x0a, 0x11]),
        );
        both_formats(
            &base(oid::VARBIT, "varbit", Category::BitString, CodecKind::Bits),
            Value::Bits(BitString::from_bits(&[true, false, true, true, false, false, true, false, true])),
        );
        both_formats(
            &base(oid::MONEY, "money", Category::Numeric, CodecKind::Money),
            Value::Money(-123_456),
        );
    }

    #[test]
    fn date_time_in_both_formats() {
        both_formats(&base(oid::DATE, "date", Category::DateTime, CodecKind::Date), Value::Date(-730));
        both_formats(
            &base(oid::TIME, "time", Category::DateTime, CodecKind::Time),
            Value::Time(45_296_789_000),
        );
        both_formats(
            &base(oid::TIMETZ, "timetz", Category::DateTime, CodecKind::TimeTz),
            Value::TimeTz { micros: 3_600_000_000, offset: -9 * 3600 },
        );
        both_formats(
            &base(oid::TIMESTAMP, "timestamp", Category::DateTime, CodecKind::Timestamp),
            Value::Timestamp(789_012_345_678),
        );
        both_formats(
            &base(oid::TIMESTAMPTZ, "timestamptz", Category::DateTime, CodecKind::TimestampTz),
            Value::TimestampTz(-1),
        );
        both_formats(
            &base(oid::INTERVAL, "interval", Category::Timespan, CodecKind::Interval),
            Value::Interval(Interval { months: 13, days: -2, micros: 1_000_001 }),
        );
    }

    #[test]
    fn timestamptz_text_uses_reported_offset() {
        let ty = base(oid::TIMESTAMPTZ, "timestamptz", Category::DateTime, CodecKind::TimestampTz);
        let value = decode(&ty, FieldFormat::Text, Some(b"2000-01-01 02:00:00+02"), &ctx()).unwrap();
        assert_eq!(value, Value::TimestampTz(0));
    }

    #[test]
    fn interval_text_follows_interval_style() {
        let ty = base(oid::INTERVAL, "interval", Category::Timespan, CodecKind::Interval);
        let mut ctx = ctx();
        ctx.interval_style = IntervalStyle::SqlStandard;
        let value = decode(&ty, FieldFormat::Text, Some(b"1-2"), &ctx).unwrap();
        assert_eq!(value, Value::Interval(Interval { months: 14, days: 0, micros: 0 }));
    }

    #[test]
    fn money_uses_locale_separator() {
        let mut ctx = ctx();
        let ty = base(oid::MONEY, "money", Category::Numeric, CodecKind::Money);
        assert_eq!(
            decode(&ty, FieldFormat::Text, Some(b"$1,234.56"), &ctx).unwrap(),
            Value::Money(123_456)
        );
        assert_eq!(
            decode(&ty, FieldFormat::Text, Some(b"($5.00)"), &ctx).unwrap(),
            Value::Money(-500)
        );
        ctx.monetary_locale = MonetaryLocale::parse("de_DE").unwrap();
        assert_eq!(
            decode(&ty, FieldFormat::Text, Some(b"1.234,5 EUR"), &ctx).unwrap(),
            Value::Money(123_450)
        );
        assert_eq!(encode_text(&ty, &Value::Money(123_450), &ctx).unwrap(), "1234,50");
    }

    #[test]
    fn arrays_through_dispatch() {
        let int4 = int4();
        let ty = array_of(oid::INT4_ARRAY, &int4);
        let row = |a: Value, b: Value, c: Value| Value::Array(ArrayValue::new(vec![a, b, c]));
        let value = Value::Array(ArrayValue::new(vec![
            row(Value::Int4(1), Value::Null, Value::Int4(3)),
            row(Value::Int4(4), Value::Int4(5), Value::Int4(6)),
        ]));
        both_formats(&ty, value);

        let text = array_of(oid::TEXT_ARRAY, &text());
        both_formats(
            &text,
            Value::Array(ArrayValue::new(vec![
                Value::Text(String::new()),
                Value::Null,
                Value::Text("NULL".into()),
                Value::Text("a,b".into()),
            ])),
        );
    }

    #[test]
    fn records_through_dispatch() {
        let int4 = int4();
        let text = text();
        let ty = composite(90_000, "item", &[("id", &int4), ("label", &text), ("note", &text)]);
        both_formats(
            &ty,
            Value::Record(RecordValue::new(vec![
                Value::Int4(7),
                Value::Text(String::new()),
                Value::Null,
            ])),
        );
        let err = encode_binary(&ty, &Value::Record(RecordValue::new(vec![Value::Int4(1)])), &ctx());
        assert!(err.is_err());
    }

    #[test]
    fn ranges_through_dispatch() {
        let subtype = int4();
        let ty = Arc::new(Type {
            oid: oid::INT4RANGE,
            name: crate::types::QualifiedName::new(Some("pg_catalog"), "int4range"),
            length: -1,
            alignment: 4,
            category: Category::Range,
            delimiter: ',',
            array_oid: 0,
            relation_oid: 0,
            kind: TypeKind::Range { subtype },
            text_codec: CodecKind::Range,
            binary_codec: Some(CodecKind::Range),
            modifier_kind: crate::types::ModifierKind::None,
            preferred_format: FieldFormat::Binary,
        });
        both_formats(&ty, Value::Range(RangeValue::closed_open(Value::Int4(1), Value::Int4(10))));
        both_formats(&ty, Value::Range(RangeValue::empty()));
        both_formats(
            &ty,
            Value::Range(RangeValue {
                empty: false,
                lower: None,
                upper: Some(Box::new(Value::Int4(3))),
                lower_inclusive: false,
                upper_inclusive: true,
            }),
        );
    }

    #[test]
    fn strings_for_typed_parameters_go_as_text() {
        let ctx = ctx();
        let (format, bytes) = encode(&int4(), &Value::Text("42".into()), &ctx).unwrap();
        assert_eq!(format, FieldFormat::Text);
        assert_eq!(bytes.as_deref(), Some(&b"42"[..]));

        let (format, bytes) = encode(&int4(), &Value::Int2(7), &ctx).unwrap();
        assert_eq!(format, FieldFormat::Binary);
        assert_eq!(bytes, Some(7_i32.to_be_bytes().to_vec()));

        let (_, bytes) = encode(&int4(), &Value::Null, &ctx).unwrap();
        assert_eq!(bytes, None);

        assert!(encode(&int4(), &Value::Int8(i64::MAX), &ctx).is_err());
        assert!(encode(&int4(), &Value::Bool(true), &ctx).is_err());
    }

    #[test]
    fn bad_lengths_are_decode_errors() {
        let err = decode(&int4(), FieldFormat::Binary, Some(&[0, 1]), &ctx()).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(!err.is_connection_broken());
    }

    #[test]
    fn bytea_escape_format() {
        assert_eq!(parse_bytea("a\\\\b\\001").unwrap(), vec![b'a', b'\\', b'b', 1]);
        assert_eq!(parse_bytea("\\x0aff").unwrap(), vec![0x0a, 0xff]);
        assert!(parse_bytea("\\xabc").is_err());
    }
}

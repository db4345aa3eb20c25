//! Range type codec.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::protocol::codec::{Reader, write_nullable};
use crate::protocol::types::FieldFormat;
use crate::types::{Type, TypeKind, TypeRef};
use crate::value::{RangeValue, Value};

const RANGE_EMPTY: u8 = 0x01;
const RANGE_LB_INC: u8 = 0x02;
const RANGE_UB_INC: u8 = 0x04;
const RANGE_LB_INF: u8 = 0x08;
const RANGE_UB_INF: u8 = 0x10;

fn subtype(ty: &Type) -> Result<&TypeRef> {
    match &ty.kind {
        TypeKind::Range { subtype } => Ok(subtype),
        _ => Err(Error::Decode(format!("type {} is not a range", ty.name))),
    }
}

/// Bounds of a range before subtype decoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct RawRange {
    empty: bool,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    lower_inclusive: bool,
    upper_inclusive: bool,
}

fn parse_binary(bytes: &[u8]) -> Result<RawRange> {
    let mut reader = Reader::new(bytes);
    let flags = reader.read_u8()?;
    if flags & RANGE_EMPTY != 0 {
        return Ok(RawRange {
            empty: true,
            ..RawRange::default()
        });
    }
    let mut bound = |infinite: u8| -> Result<Option<Vec<u8>>> {
        if flags & infinite != 0 {
            return Ok(None);
        }
        let len = reader.read_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::Decode(format!("invalid range bound length {}", len)))?;
        Ok(Some(reader.read_bytes(len)?.to_vec()))
    };
    let lower = bound(RANGE_LB_INF)?;
    let upper = bound(RANGE_UB_INF)?;
    Ok(RawRange {
        empty: false,
        lower,
        upper,
        lower_inclusive: flags & RANGE_LB_INC != 0,
        upper_inclusive: flags & RANGE_UB_INC != 0,
    })
}

fn write_binary(range: &RawRange, out: &mut Vec<u8>) {
    if range.empty {
        out.push(RANGE_EMPTY);
        return;
    }
    let mut flags = 0;
    if range.lower_inclusive && range.lower.is_some() {
        flags |= RANGE_LB_INC;
    }
    if range.upper_inclusive && range.upper.is_some() {
        flags |= RANGE_UB_INC;
    }
    if range.lower.is_none() {
        flags |= RANGE_LB_INF;
    }
    if range.upper.is_none() {
        flags |= RANGE_UB_INF;
    }
    out.push(flags);
    for bound in [&range.lower, &range.upper].into_iter().flatten() {
        write_nullable(out, Some(bound.as_slice()));
    }
}

fn parse_text(text: &str) -> Result<RawRange> {
    let malformed = || Error::Decode(format!("malformed range literal: {:?}", text));
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("empty") {
        return Ok(RawRange {
            empty: true,
            ..RawRange::default()
        });
    }

    let mut chars = trimmed.chars();
    let lower_inclusive = match chars.next() {
        Some('[') => true,
        Some('(') => false,
        _ => return Err(malformed()),
    };
    let upper_inclusive = match chars.next_back() {
        Some(']') => true,
        Some(')') => false,
        _ => return Err(malformed()),
    };

    let mut bounds: Vec<Option<String>> = Vec::with_capacity(2);
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut inner = chars.as_str().chars().peekable();
    while let Some(c) = inner.next() {
        match c {
            '"' if in_quotes && inner.peek() == Some(&'"') => {
                current.push('"');
                inner.next();
            }
            '"' => {
                quoted = true;
                in_quotes = !in_quotes;
            }
            '\\' => current.push(inner.next().ok_or_else(malformed)?),
            ',' if !in_quotes => {
                let field = std::mem::take(&mut current);
                bounds.push((quoted || !field.is_empty()).then_some(field));
                quoted = false;
            }
            c => current.push(c),
        }
    }
    bounds.push((quoted || !current.is_empty()).then_some(current));
    let [lower, upper]: [Option<String>; 2] = bounds.try_into().map_err(|_| malformed())?;

    Ok(RawRange {
        empty: false,
        lower_inclusive: lower_inclusive && lower.is_some(),
        upper_inclusive: upper_inclusive && upper.is_some(),
        lower: lower.map(String::into_bytes),
        upper: upper.map(String::into_bytes),
    })
}

fn write_text(range: &RawRange) -> String {
    if range.empty {
        return "empty".into();
    }
    let mut out = String::new();
    out.push(if range.lower_inclusive { '[' } else { '(' });
    for (i, bound) in [&range.lower, &range.upper].into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if let Some(bytes) = bound {
            let text = String::from_utf8_lossy(bytes);
            let needs_quotes = text.is_empty()
                || text.chars().any(|c| {
                    matches!(c, ',' | '"' | '\\' | '(' | ')' | '[' | ']') || c.is_whitespace()
                });
            if needs_quotes {
                out.push('"');
                for c in text.chars() {
                    if c == '"' || c == '\\' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
            } else {
                out.push_str(&text);
            }
        }
    }
    out.push(if range.upper_inclusive { ']' } else { ')' });
    out
}

pub fn decode(ty: &Type, format: FieldFormat, bytes: &[u8], ctx: &Context) -> Result<Value> {
    let subtype = subtype(ty)?;
    let raw = match format {
        FieldFormat::Binary => parse_binary(bytes)?,
        FieldFormat::Text => {
            let text = simdutf8::basic::from_utf8(bytes)
                .map_err(|e| Error::Decode(format!("invalid UTF-8 in range: {e}")))?;
            parse_text(text)?
        }
    };
    if raw.empty {
        return Ok(Value::Range(RangeValue::empty()));
    }
    let bound = |b: Option<Vec<u8>>| -> Result<Option<Box<Value>>> {
        b.map(|bytes| super::decode(subtype, format, Some(bytes.as_slice()), ctx).map(Box::new))
            .transpose()
    };
    Ok(Value::Range(RangeValue {
        empty: false,
        lower: bound(raw.lower)?,
        upper: bound(raw.upper)?,
        lower_inclusive: raw.lower_inclusive,
        upper_inclusive: raw.upper_inclusive,
    }))
}

pub fn encode(ty: &Type, format: FieldFormat, value: &RangeValue, ctx: &Context) -> Result<Vec<u8>> {
    let subtype = subtype(ty).map_err(|e| Error::Encode(e.to_string()))?;
    let bound = |b: &Option<Box<Value>>| -> Result<Option<Vec<u8>>> {
        match b.as_deref() {
            None | Some(Value::Null) => Ok(None),
            Some(v) => match format {
                FieldFormat::Binary => super::encode_binary(subtype, v, ctx).map(Some),
                FieldFormat::Text => super::encode_text(subtype, v, ctx).map(|s| Some(s.into_bytes())),
            },
        }
    };
    let raw = RawRange {
        empty: value.empty,
        lower: bound(&value.lower)?,
        upper: bound(&value.upper)?,
        lower_inclusive: value.lower_inclusive,
        upper_inclusive: value.upper_inclusive,
    };
    Ok(match format {
        FieldFormat::Binary => {
            let mut out = Vec::new();
            write_binary(&raw, &mut out);
            out
        }
        FieldFormat::Text => write_text(&raw).into_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_bounds() {
        let raw = parse_text("[1,10)").unwrap();
        assert_eq!(raw.lower.as_deref(), Some(&b"1"[..]));
        assert_eq!(raw.upper.as_deref(), Some(&b"10"[..]));
        assert!(raw.lower_inclusive);
        assert!(!raw.upper_inclusive);
        assert_eq!(write_text(&raw), "[1,10)");

        let unbounded = parse_text("(,\"2020-01-01 00:00:00\"]").unwrap();
        assert_eq!(unbounded.lower, None);
        assert!(!unbounded.lower_inclusive);
        assert_eq!(write_text(&unbounded), "(,\"2020-01-01 00:00:00\"]");

        assert!(parse_text("empty").unwrap().empty);
        assert!(parse_text("[1,2,3)").is_err());
        assert!(parse_text("1,2").is_err());
    }

    #[test]
    fn binary_flags() {
        let raw = RawRange {
            empty: false,
            lower: Some(5_i32.to_be_bytes().to_vec()),
            upper: None,
            lower_inclusive: true,
            upper_inclusive: true,
        };
        let mut out = Vec::new();
        write_binary(&raw, &mut out);
        assert_eq!(out[0], RANGE_LB_INC | RANGE_UB_INF);
        let parsed = parse_binary(&out).unwrap();
        assert_eq!(parsed.lower, raw.lower);
        assert_eq!(parsed.upper, None);
        assert!(!parsed.upper_inclusive);

        let mut empty = Vec::new();
        write_binary(&RawRange { empty: true, ..RawRange::default() }, &mut empty);
        assert_eq!(empty, vec![RANGE_EMPTY]);
        assert!(parse_binary(&empty).unwrap().empty);
    }
}

//! Composite (row) value codec.
//!
//! Text form is `(a,"b c",)`: an unquoted empty field is NULL, `""` is the
//! empty string. Binary form is a field count followed by (type oid,
//! length-prefixed value) pairs, length -1 for NULL.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::protocol::codec::{Reader, write_nullable};
use crate::protocol::types::{FieldFormat, Oid};
use crate::types::{Type, TypeRef};
use crate::value::{RecordValue, Value};

/// Split a binary record into (field type, buffer) pairs.
pub fn parse_binary(bytes: &[u8]) -> Result<Vec<(Oid, Option<&[u8]>)>> {
    let mut reader = Reader::new(bytes);
    let count = reader.read_i32()?;
    let count = usize::try_from(count)
        .map_err(|_| Error::Decode(format!("invalid record field count {}", count)))?;
    let mut fields = Vec::with_capacity(count.min(reader.remaining() / 8));
    for _ in 0..count {
        let oid = reader.read_u32()?;
        fields.push((oid, reader.read_nullable()?));
    }
    Ok(fields)
}

pub fn write_binary(fields: &[(Oid, Option<Vec<u8>>)], out: &mut Vec<u8>) {
    out.extend_from_slice(&(fields.len() as i32).to_be_bytes());
    for (oid, value) in fields {
        out.extend_from_slice(&oid.to_be_bytes());
        write_nullable(out, value.as_deref());
    }
}

/// Split the text form into fields; `None` is NULL.
pub fn parse_text(text: &str) -> Result<Vec<Option<String>>> {
    let malformed = || Error::Decode(format!("malformed record literal: {:?}", text));
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(malformed)?;

    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => {
                quoted = true;
                in_quotes = !in_quotes;
            }
            '\\' => current.push(chars.next().ok_or_else(malformed)?),
            ',' if !in_quotes => {
                fields.push(finish_field(&mut current, &mut quoted));
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(malformed());
    }
    fields.push(finish_field(&mut current, &mut quoted));
    Ok(fields)
}

fn finish_field(current: &mut String, quoted: &mut bool) -> Option<String> {
    let field = std::mem::take(current);
    let was_quoted = std::mem::replace(quoted, false);
    (was_quoted || !field.is_empty()).then_some(field)
}

/// Render the text form of already-encoded field texts.
pub fn write_text(fields: &[Option<String>]) -> String {
    let mut out = String::from("(");
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if let Some(text) = field {
            let needs_quotes = text.is_empty()
                || text
                    .chars()
                    .any(|c| matches!(c, ',' | '"' | '\\' | '(' | ')') || c.is_whitespace());
            if needs_quotes {
                out.push('"');
                for c in text.chars() {
                    if c == '"' || c == '\\' {
                        out.push(c);
                    }
                    out.push(c);
                }
                out.push('"');
            } else {
                out.push_str(text);
            }
        }
    }
    out.push(')');
    out
}

fn attribute_types(ty: &Type) -> Option<Vec<TypeRef>> {
    ty.attributes()
        .map(|attrs| attrs.iter().map(|a| std::sync::Arc::clone(&a.type_)).collect())
}

fn check_arity(ty: &Type, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(Error::Decode(format!(
            "record of type {} has {} fields, expected {}",
            ty.name, got, expected
        )))
    }
}

/// Decode a record of composite type `ty`, or an anonymous `record`.
pub fn decode(ty: &Type, format: FieldFormat, bytes: &[u8], ctx: &Context) -> Result<Value> {
    let attrs = attribute_types(ty);
    let fields = match format {
        FieldFormat::Binary => {
            let raw = parse_binary(bytes)?;
            if let Some(attrs) = &attrs {
                check_arity(ty, attrs.len(), raw.len())?;
            }
            raw.into_iter()
                .enumerate()
                .map(|(i, (oid, buffer))| {
                    let field_type = match attrs.as_ref().and_then(|a| a.get(i)) {
                        Some(attr) if attr.oid == oid || attr.base_type().oid == oid => {
                            std::sync::Arc::clone(attr)
                        }
                        _ => ctx
                            .cached_type(oid)
                            .ok_or_else(|| Error::UnknownType(format!("oid {}", oid)))?,
                    };
                    super::decode(&field_type, FieldFormat::Binary, buffer, ctx)
                })
                .collect::<Result<Vec<_>>>()?
        }
        FieldFormat::Text => {
            let text = simdutf8::basic::from_utf8(bytes)
                .map_err(|e| Error::Decode(format!("invalid UTF-8 in record: {e}")))?;
            let mut raw = parse_text(text)?;
            match &attrs {
                Some(attrs) => {
                    // "()" is a single NULL field, or no fields at all
                    if attrs.is_empty() && raw == [None] {
                        raw.clear();
                    }
                    check_arity(ty, attrs.len(), raw.len())?;
                    raw.iter()
                        .zip(attrs)
                        .map(|(field, attr)| {
                            super::decode(attr, FieldFormat::Text, field.as_deref().map(str::as_bytes), ctx)
                        })
                        .collect::<Result<Vec<_>>>()?
                }
                None => raw
                    .into_iter()
                    .map(|field| field.map_or(Value::Null, Value::Unknown))
                    .collect(),
            }
        }
    };
    Ok(Value::Record(RecordValue::new(fields)))
}

/// Encode a record of composite type `ty`. Attribute types must be loaded.
pub fn encode(ty: &Type, format: FieldFormat, value: &RecordValue, ctx: &Context) -> Result<Vec<u8>> {
    let attrs = attribute_types(ty).ok_or_else(|| {
        Error::Unsupported(format!(
            "cannot send a value of anonymous record type {}",
            ty.name
        ))
    })?;
    if attrs.len() != value.fields.len() {
        return Err(Error::Encode(format!(
            "record of type {} needs {} fields, got {}",
            ty.name,
            attrs.len(),
            value.fields.len()
        )));
    }

    match format {
        FieldFormat::Binary => {
            let fields = attrs
                .iter()
                .zip(&value.fields)
                .map(|(attr, field)| {
                    let buffer = match field {
                        Value::Null => None,
                        other => Some(super::encode_binary(attr, other, ctx)?),
                    };
                    Ok((attr.oid, buffer))
                })
                .collect::<Result<Vec<_>>>()?;
            let mut out = Vec::new();
            write_binary(&fields, &mut out);
            Ok(out)
        }
        FieldFormat::Text => {
            let fields = attrs
                .iter()
                .zip(&value.fields)
                .map(|(attr, field)| match field {
                    Value::Null => Ok(None),
                    other => super::encode_text(attr, other, ctx).map(Some),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(write_text(&fields).into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn null_and_empty_are_distinct() {
        let fields = parse_text(r#"(1,"",,"a ""q"" b",c\,d)"#).unwrap();
        assert_eq!(
            fields,
            vec![
                Some("1".to_string()),
                Some(String::new()),
                None,
                Some("a \"q\" b".to_string()),
                Some("c,d".to_string()),
            ]
        );
        assert_eq!(
            write_text(&fields),
            r#"(1,"",,"a ""q"" b","c,d")"#
        );
    }

    #[test]
    fn single_null_field() {
        assert_eq!(parse_text("()").unwrap(), vec![None]);
        assert!(parse_text("(1,2").is_err());
        assert!(parse_text("(\"open)").is_err());
    }

    #[test]
    fn binary_layout() {
        let fields = vec![
            (oid::INT4, Some(7_i32.to_be_bytes().to_vec())),
            (oid::TEXT, None),
            (oid::TEXT, Some(Vec::new())),
        ];
        let mut out = Vec::new();
        write_binary(&fields, &mut out);
        assert_eq!(&out[..4], &3_i32.to_be_bytes());

        let parsed = parse_binary(&out).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], (oid::INT4, Some(&7_i32.to_be_bytes()[..])));
        assert_eq!(parsed[1], (oid::TEXT, None));
        assert_eq!(parsed[2], (oid::TEXT, Some(&[][..])));
    }
}

//! Multi-dimensional array codec.
//!
//! Arrays travel as a flat list of element buffers plus a dimension vector.
//! A `None` buffer is SQL NULL; a zero-length buffer is a non-null empty
//! value and is never confused with NULL.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::protocol::codec::{Reader, write_nullable};
use crate::protocol::types::{FieldFormat, Oid};
use crate::types::Type;
use crate::value::{ArrayValue, Value};

/// PostgreSQL's MAXDIM.
const MAX_DIMENSIONS: usize = 6;

/// Array contents before element decoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlatArray {
    pub element_oid: Oid,
    /// Element count per dimension, outermost first. Empty for `{}`.
    pub dimensions: Vec<i32>,
    pub lower_bounds: Vec<i32>,
    /// Elements in row-major order
    pub elements: Vec<Option<Vec<u8>>>,
}

fn malformed(text: &str) -> Error {
    Error::Decode(format!("malformed array literal: {:?}", text))
}

impl FlatArray {
    /// Element count implied by the dimensions.
    fn count(dimensions: &[i32]) -> Result<usize> {
        dimensions.iter().try_fold(1_usize, |acc, &d| {
            usize::try_from(d)
                .ok()
                .and_then(|d| acc.checked_mul(d))
                .ok_or_else(|| Error::Decode(format!("invalid array dimension {}", d)))
        })
    }

    /// Distance between consecutive entries of dimension `dim`: the product
    /// of all trailing dimensions.
    pub fn stride(&self, dim: usize) -> usize {
        self.dimensions
            .iter()
            .skip(dim + 1)
            .map(|&d| d.max(0) as usize)
            .product()
    }

    /// Entries `index..index + count` of the outermost dimension, where
    /// `index` is in the array's own subscript numbering.
    pub fn sub_array(&self, index: i32, count: i32) -> Result<FlatArray> {
        let (Some(&len), Some(&lower)) = (self.dimensions.first(), self.lower_bounds.first())
        else {
            return Err(Error::CacheConsistency(
                "cannot slice a zero-dimensional array".into(),
            ));
        };
        let start = index - lower;
        if start < 0 || count < 0 || start + count > len {
            return Err(Error::CacheConsistency(format!(
                "array slice [{}:{}] outside bounds [{}:{}]",
                index,
                index + count - 1,
                lower,
                lower + len - 1
            )));
        }
        let stride = self.stride(0);
        let from = start as usize * stride;
        let to = from + count as usize * stride;
        let mut dimensions = self.dimensions.clone();
        dimensions[0] = count;
        let mut lower_bounds = self.lower_bounds.clone();
        lower_bounds[0] = 1;
        Ok(FlatArray {
            element_oid: self.element_oid,
            dimensions,
            lower_bounds,
            elements: self.elements.get(from..to).unwrap_or_default().to_vec(),
        })
    }

    /// Build nested [`ArrayValue`]s, one level per dimension.
    pub fn materialize(
        &self,
        decode: &mut dyn FnMut(Option<&[u8]>) -> Result<Value>,
    ) -> Result<ArrayValue> {
        if self.dimensions.is_empty() {
            return Ok(ArrayValue::new(Vec::new()));
        }
        self.materialize_level(0, 0, decode)
    }

    fn materialize_level(
        &self,
        dim: usize,
        offset: usize,
        decode: &mut dyn FnMut(Option<&[u8]>) -> Result<Value>,
    ) -> Result<ArrayValue> {
        let len = self.dimensions[dim].max(0) as usize;
        let stride = self.stride(dim);
        let mut elements = Vec::with_capacity(len);
        for i in 0..len {
            let at = offset + i * stride;
            if dim + 1 == self.dimensions.len() {
                let buffer = self
                    .elements
                    .get(at)
                    .ok_or_else(|| Error::Decode("array has fewer elements than dimensions".into()))?;
                elements.push(decode(buffer.as_deref())?);
            } else {
                elements.push(Value::Array(self.materialize_level(dim + 1, at, decode)?));
            }
        }
        Ok(ArrayValue {
            lower_bound: self.lower_bounds[dim],
            elements,
        })
    }

    /// Flatten a nested array value, encoding each leaf with `encode`.
    ///
    /// Rejects ragged input. NULL leaves become `None` buffers.
    pub fn from_value(
        element_oid: Oid,
        value: &ArrayValue,
        encode: &mut dyn FnMut(&Value) -> Result<Option<Vec<u8>>>,
    ) -> Result<FlatArray> {
        let shape = value.dimensions();
        if shape.len() > MAX_DIMENSIONS {
            return Err(Error::Encode(format!(
                "array has {} dimensions, at most {} are allowed",
                shape.len(),
                MAX_DIMENSIONS
            )));
        }
        let mut flat = FlatArray {
            element_oid,
            ..FlatArray::default()
        };
        if shape.contains(&0) {
            return Ok(flat);
        }
        let mut lower_bounds = Vec::with_capacity(shape.len());
        let mut level = value;
        lower_bounds.push(level.lower_bound);
        while let Some(Value::Array(inner)) = level.elements.first() {
            lower_bounds.push(inner.lower_bound);
            level = inner;
        }
        flatten(value, &shape, 0, encode, &mut flat.elements)?;
        flat.dimensions = shape
            .iter()
            .map(|&d| i32::try_from(d).map_err(|_| Error::Encode("array too large".into())))
            .collect::<Result<_>>()?;
        flat.lower_bounds = lower_bounds;
        Ok(flat)
    }

    pub fn parse_binary(bytes: &[u8]) -> Result<FlatArray> {
        let mut reader = Reader::new(bytes);
        let ndim = reader.read_i32()?;
        let _has_nulls = reader.read_i32()?;
        let element_oid = reader.read_u32()?;
        let ndim = usize::try_from(ndim)
            .ok()
            .filter(|n| *n <= MAX_DIMENSIONS)
            .ok_or_else(|| Error::Decode(format!("invalid array dimension count {}", ndim)))?;

        let mut dimensions = Vec::with_capacity(ndim);
        let mut lower_bounds = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            dimensions.push(reader.read_i32()?);
            lower_bounds.push(reader.read_i32()?);
        }
        let count = if ndim == 0 { 0 } else { Self::count(&dimensions)? };
        let mut elements = Vec::with_capacity(count.min(reader.remaining() / 4));
        for _ in 0..count {
            elements.push(reader.read_nullable()?.map(<[u8]>::to_vec));
        }
        Ok(FlatArray {
            element_oid,
            dimensions,
            lower_bounds,
            elements,
        })
    }

    pub fn write_binary(&self, out: &mut Vec<u8>) {
        let ndim = if self.elements.is_empty() { 0 } else { self.dimensions.len() };
        let has_nulls = self.elements.iter().any(Option::is_none);
        out.extend_from_slice(&(ndim as i32).to_be_bytes());
        out.extend_from_slice(&i32::from(has_nulls).to_be_bytes());
        out.extend_from_slice(&self.element_oid.to_be_bytes());
        for (dim, lower) in self.dimensions.iter().zip(&self.lower_bounds).take(ndim) {
            out.extend_from_slice(&dim.to_be_bytes());
            out.extend_from_slice(&lower.to_be_bytes());
        }
        for element in &self.elements {
            write_nullable(out, element.as_deref());
        }
    }

    /// Parse the text form, e.g. `{{1,2},{3,NULL}}` or `[0:1]={a,"b c"}`.
    pub fn parse_text(text: &str, delimiter: char) -> Result<FlatArray> {
        let mut parser = TextParser {
            chars: text.trim().chars().collect(),
            pos: 0,
            delimiter,
            source: text,
        };

        let explicit_bounds = parser.parse_bounds()?;
        let mut dimensions: Vec<Option<i32>> = Vec::new();
        let mut elements = Vec::new();
        parser.expect('{')?;
        parser.parse_level(0, &mut dimensions, &mut elements)?;
        parser.skip_whitespace();
        if parser.pos != parser.chars.len() {
            return Err(malformed(text));
        }

        let dimensions: Vec<i32> = dimensions.into_iter().map(|d| d.unwrap_or(0)).collect();
        if elements.is_empty() {
            return Ok(FlatArray::default());
        }
        let lower_bounds = match explicit_bounds {
            Some(bounds) => {
                if bounds.len() != dimensions.len()
                    || bounds.iter().zip(&dimensions).any(|((lo, hi), d)| hi - lo + 1 != *d)
                {
                    return Err(malformed(text));
                }
                bounds.into_iter().map(|(lo, _)| lo).collect()
            }
            None => vec![1; dimensions.len()],
        };
        Ok(FlatArray {
            element_oid: 0,
            dimensions,
            lower_bounds,
            elements: elements
                .into_iter()
                .map(|e: Option<String>| e.map(String::into_bytes))
                .collect(),
        })
    }

    /// Render the text form. Element buffers must hold element text.
    pub fn write_text(&self, delimiter: char) -> String {
        let mut out = String::new();
        if self.elements.is_empty() {
            out.push_str("{}");
            return out;
        }
        if self.lower_bounds.iter().any(|&lb| lb != 1) {
            for (lower, len) in self.lower_bounds.iter().zip(&self.dimensions) {
                out.push_str(&format!("[{}:{}]", lower, lower + len - 1));
            }
            out.push('=');
        }
        self.write_text_level(0, 0, delimiter, &mut out);
        out
    }

    fn write_text_level(&self, dim: usize, offset: usize, delimiter: char, out: &mut String) {
        out.push('{');
        let len = self.dimensions[dim].max(0) as usize;
        let stride = self.stride(dim);
        for i in 0..len {
            if i > 0 {
                out.push(delimiter);
            }
            let at = offset + i * stride;
            if dim + 1 == self.dimensions.len() {
                match self.elements.get(at) {
                    Some(Some(bytes)) => push_quoted(out, &String::from_utf8_lossy(bytes), delimiter),
                    _ => out.push_str("NULL"),
                }
            } else {
                self.write_text_level(dim + 1, at, delimiter, out);
            }
        }
        out.push('}');
    }
}

fn flatten(
    value: &ArrayValue,
    shape: &[usize],
    depth: usize,
    encode: &mut dyn FnMut(&Value) -> Result<Option<Vec<u8>>>,
    out: &mut Vec<Option<Vec<u8>>>,
) -> Result<()> {
    if value.elements.len() != shape[depth] {
        return Err(Error::Encode(
            "multidimensional arrays must have sub-arrays with matching dimensions".into(),
        ));
    }
    let leaf = depth + 1 == shape.len();
    for element in &value.elements {
        match (element, leaf) {
            (Value::Array(inner), false) => flatten(inner, shape, depth + 1, encode, out)?,
            (Value::Array(_), true) | (_, false) => {
                return Err(Error::Encode(
                    "multidimensional arrays must have sub-arrays with matching dimensions".into(),
                ));
            }
            (Value::Null, true) => out.push(None),
            (other, true) => out.push(encode(other)?),
        }
    }
    Ok(())
}

/// Quote an element if the server's parser would otherwise misread it.
fn push_quoted(out: &mut String, text: &str, delimiter: char) {
    let needs_quotes = text.is_empty()
        || text.eq_ignore_ascii_case("NULL")
        || text
            .chars()
            .any(|c| c == delimiter || matches!(c, '"' | '\\' | '{' | '}') || c.is_whitespace());
    if !needs_quotes {
        out.push_str(text);
        return;
    }
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

struct TextParser<'a> {
    chars: Vec<char>,
    pos: usize,
    delimiter: char,
    source: &'a str,
}

impl TextParser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_whitespace();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(malformed(self.source))
        }
    }

    fn integer(&mut self) -> Result<i32> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits.parse().map_err(|_| malformed(self.source))
    }

    /// Optional `[lo:hi][lo:hi]=` decoration.
    fn parse_bounds(&mut self) -> Result<Option<Vec<(i32, i32)>>> {
        self.skip_whitespace();
        if self.peek() != Some('[') {
            return Ok(None);
        }
        let mut bounds = Vec::new();
        while self.peek() == Some('[') {
            self.pos += 1;
            let lo = self.integer()?;
            self.expect(':')?;
            let hi = self.integer()?;
            self.expect(']')?;
            bounds.push((lo, hi));
        }
        self.expect('=')?;
        Ok(Some(bounds))
    }

    /// Parse after an opening brace through the matching closing brace.
    fn parse_level(
        &mut self,
        depth: usize,
        dimensions: &mut Vec<Option<i32>>,
        elements: &mut Vec<Option<String>>,
    ) -> Result<()> {
        if dimensions.len() <= depth {
            dimensions.push(None);
        }
        let mut count = 0;
        self.skip_whitespace();
        if self.peek() == Some('}') {
            self.pos += 1;
            return self.record_dimension(depth, count, dimensions);
        }
        loop {
            self.skip_whitespace();
            if self.peek() == Some('{') {
                if dimensions.len() == depth + 1 && count > 0 {
                    return Err(malformed(self.source));
                }
                self.pos += 1;
                self.parse_level(depth + 1, dimensions, elements)?;
            } else {
                if dimensions.len() > depth + 1 {
                    return Err(malformed(self.source));
                }
                elements.push(self.parse_element()?);
            }
            count += 1;
            self.skip_whitespace();
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    return self.record_dimension(depth, count, dimensions);
                }
                Some(c) if c == self.delimiter => self.pos += 1,
                _ => return Err(malformed(self.source)),
            }
        }
    }

    fn record_dimension(
        &self,
        depth: usize,
        count: i32,
        dimensions: &mut [Option<i32>],
    ) -> Result<()> {
        match dimensions[depth] {
            None => {
                dimensions[depth] = Some(count);
                Ok(())
            }
            Some(expected) if expected == count => Ok(()),
            Some(_) => Err(malformed(self.source)),
        }
    }

    fn parse_element(&mut self) -> Result<Option<String>> {
        let mut text = String::new();
        let mut quoted = false;
        let mut in_quotes = false;
        while let Some(c) = self.peek() {
            match c {
                '"' => {
                    quoted = true;
                    in_quotes = !in_quotes;
                }
                '\\' => {
                    self.pos += 1;
                    text.push(self.peek().ok_or_else(|| malformed(self.source))?);
                }
                '}' if !in_quotes => break,
                c if c == self.delimiter && !in_quotes => break,
                c => text.push(c),
            }
            self.pos += 1;
        }
        if in_quotes {
            return Err(malformed(self.source));
        }
        if quoted {
            return Ok(Some(text));
        }
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("NULL") {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_string()))
        }
    }
}

/// Decode an array value of type `ty`.
pub fn decode(ty: &Type, format: FieldFormat, bytes: &[u8], ctx: &Context) -> Result<Value> {
    let element = ty
        .element()
        .ok_or_else(|| Error::Decode(format!("type {} is not an array", ty.name)))?;
    let flat = match format {
        FieldFormat::Binary => FlatArray::parse_binary(bytes)?,
        FieldFormat::Text => {
            let text = simdutf8::basic::from_utf8(bytes)
                .map_err(|e| Error::Decode(format!("invalid UTF-8 in array: {e}")))?;
            FlatArray::parse_text(text, element.delimiter)?
        }
    };
    let element_type = match format {
        FieldFormat::Binary if flat.element_oid != element.oid && flat.element_oid != 0 => ctx
            .cached_type(flat.element_oid)
            .ok_or_else(|| Error::UnknownType(format!("oid {}", flat.element_oid)))?,
        _ => std::sync::Arc::clone(element),
    };
    let array = flat.materialize(&mut |buffer| super::decode(&element_type, format, buffer, ctx))?;
    Ok(Value::Array(array))
}

/// Encode an array value of type `ty`.
pub fn encode(ty: &Type, format: FieldFormat, value: &ArrayValue, ctx: &Context) -> Result<Vec<u8>> {
    let element = ty
        .element()
        .ok_or_else(|| Error::Encode(format!("type {} is not an array", ty.name)))?;
    let flat = FlatArray::from_value(element.oid, value, &mut |v| match format {
        FieldFormat::Binary => super::encode_binary(element, v, ctx).map(Some),
        FieldFormat::Text => super::encode_text(element, v, ctx).map(|s| Some(s.into_bytes())),
    })?;
    Ok(match format {
        FieldFormat::Binary => {
            let mut out = Vec::new();
            flat.write_binary(&mut out);
            out
        }
        FieldFormat::Text => flat.write_text(element.delimiter).into_bytes(),
    })
}

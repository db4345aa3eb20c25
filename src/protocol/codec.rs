//! Big-endian wire primitives.
//!
//! [`Reader`] walks backend payloads and binary value encodings alike;
//! [`MessageBuilder`] frames frontend messages.

use zerocopy::byteorder::big_endian::{F32, F64, I16, I32, I64, U16, U32};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};

/// Forward-only cursor over a byte slice.
#[derive(Debug, Clone, Copy)]
pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Bytes not consumed yet.
    pub fn rest(&self) -> &'a [u8] {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    fn take<T: FromBytes + KnownLayout + Immutable>(&mut self, what: &str) -> Result<T> {
        let (value, rest) = T::read_from_prefix(self.data).map_err(|_| {
            Error::Protocol(format!(
                "{}: buffer too short: {} < {}",
                what,
                self.data.len(),
                size_of::<T>()
            ))
        })?;
        self.data = rest;
        Ok(value)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let (&first, rest) = self
            .data
            .split_first()
            .ok_or_else(|| Error::Protocol("read_u8: empty buffer".into()))?;
        self.data = rest;
        Ok(first)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.take::<I16>("read_i16")?.get())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.take::<U16>("read_u16")?.get())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.take::<I32>("read_i32")?.get())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.take::<U32>("read_u32")?.get())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.take::<I64>("read_i64")?.get())
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(self.take::<F32>("read_f32")?.get())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(self.take::<F64>("read_f64")?.get())
    }

    /// Read `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let (head, rest) = self.data.split_at_checked(len).ok_or_else(|| {
            Error::Protocol(format!(
                "read_bytes: buffer too short: {} < {}",
                self.data.len(),
                len
            ))
        })?;
        self.data = rest;
        Ok(head)
    }

    /// Read a null-terminated string, without the terminator.
    pub fn read_cstring(&mut self) -> Result<&'a [u8]> {
        let pos = memchr::memchr(0, self.data)
            .ok_or_else(|| Error::Protocol("read_cstring: no null terminator found".into()))?;
        let bytes = self.read_bytes(pos)?;
        self.data = self.data.get(1..).unwrap_or_default();
        Ok(bytes)
    }

    /// Read a null-terminated UTF-8 string.
    pub fn read_cstr(&mut self) -> Result<&'a str> {
        let bytes = self.read_cstring()?;
        simdutf8::basic::from_utf8(bytes)
            .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))
    }

    /// Read an int32 length followed by that many bytes. Length -1 is NULL.
    pub fn read_nullable(&mut self) -> Result<Option<&'a [u8]>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        self.read_bytes(len as usize).map(Some)
    }
}

/// Append an int32 length and the bytes, or length -1 for NULL.
pub fn write_nullable(out: &mut Vec<u8>, value: Option<&[u8]>) {
    match value {
        Some(bytes) => {
            out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        None => out.extend_from_slice(&(-1_i32).to_be_bytes()),
    }
}

/// Message builder helper that handles the length field.
///
/// PostgreSQL message format:
/// - Type byte (1 byte) - NOT included in length
/// - Length (4 bytes) - includes itself
/// - Payload (Length - 4 bytes)
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start building a message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        Self::new_startup(buf)
    }

    /// Start building a message without a type byte (startup, SSL, cancel).
    pub fn new_startup(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_nullable(&mut self, value: Option<&[u8]>) {
        write_nullable(self.buf, value);
    }

    /// Write null-terminated string.
    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Finish building the message and fill in the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        if let Some(slot) = self.buf.get_mut(self.start..self.start + 4) {
            slot.copy_from_slice(&len.to_be_bytes());
        }
    }
}

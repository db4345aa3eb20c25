//! Query-related backend messages.

use zerocopy::byteorder::big_endian::{I16, I32, U16, U32};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::Reader;
use crate::protocol::types::{FieldFormat, Oid};

/// Fixed-size tail of a field description (18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
struct FieldDescriptionTail {
    table_oid: U32,
    column_id: I16,
    type_oid: U32,
    type_size: I16,
    type_modifier: I32,
    format: U16,
}

/// Column descriptor as sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    /// Table OID (0 if not a table column)
    pub table_oid: Oid,
    /// Column attribute number (0 if not a table column)
    pub column_id: i16,
    pub type_oid: Oid,
    /// Type size (-1 for variable, -2 for null-terminated)
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: FieldFormat,
}

/// RowDescription message - describes the columns in a result set.
pub struct RowDescription;

impl RowDescription {
    pub fn parse(payload: &[u8]) -> Result<Vec<FieldDescription>> {
        let mut reader = Reader::new(payload);
        let count = reader.read_u16()? as usize;
        let mut fields = Vec::with_capacity(count);

        for _ in 0..count {
            let name = reader.read_cstr()?.to_string();
            let tail_bytes = reader.read_bytes(size_of::<FieldDescriptionTail>())?;
            let tail = FieldDescriptionTail::ref_from_bytes(tail_bytes)?;
            fields.push(FieldDescription {
                name,
                table_oid: tail.table_oid.get(),
                column_id: tail.column_id.get(),
                type_oid: tail.type_oid.get(),
                type_size: tail.type_size.get(),
                type_modifier: tail.type_modifier.get(),
                format: FieldFormat::from_u16(tail.format.get()),
            });
        }

        Ok(fields)
    }
}

/// DataRow message - contains a single row of data.
pub struct DataRow;

impl DataRow {
    /// Copy every column out of the payload. `None` is SQL NULL.
    pub fn parse(payload: &[u8]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut reader = Reader::new(payload);
        let count = reader.read_u16()? as usize;
        (0..count)
            .map(|_| Ok(reader.read_nullable()?.map(<[u8]>::to_vec)))
            .collect()
    }
}

/// ParameterDescription message - parameter type OIDs of a statement.
pub struct ParameterDescription;

impl ParameterDescription {
    pub fn parse(payload: &[u8]) -> Result<Vec<Oid>> {
        let mut reader = Reader::new(payload);
        let count = reader.read_u16()? as usize;
        (0..count).map(|_| reader.read_u32()).collect()
    }
}

/// CommandComplete message - indicates successful completion of a command.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag (e.g., "SELECT 5", "INSERT 0 1", "UPDATE 10")
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let tag = Reader::new(payload).read_cstr()?;
        if tag.is_empty() {
            return Err(Error::Protocol("CommandComplete: empty tag".into()));
        }
        Ok(Self { tag })
    }

    /// Rows affected or returned, for tags that carry a count.
    pub fn rows_affected(&self) -> Option<u64> {
        let parts: Vec<&str> = self.tag.split_whitespace().collect();

        match parts.as_slice() {
            ["INSERT", _oid, count] => count.parse().ok(),
            [
                "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "COPY" | "MOVE" | "FETCH",
                count,
            ] => count.parse().ok(),
            _ => None,
        }
    }

    /// First word of the tag.
    pub fn command(&self) -> &'a str {
        self.tag.split_whitespace().next().unwrap_or(self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tags() {
        let insert = CommandComplete { tag: "INSERT 0 3" };
        assert_eq!(insert.rows_affected(), Some(3));
        assert_eq!(insert.command(), "INSERT");
        assert_eq!(CommandComplete { tag: "SELECT 5" }.rows_affected(), Some(5));
        assert_eq!(CommandComplete { tag: "CREATE TABLE" }.rows_affected(), None);
    }

    #[test]
    fn data_row_null_vs_empty() {
        let mut payload = 3_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_i32.to_be_bytes());
        payload.extend_from_slice(&2_i32.to_be_bytes());
        payload.extend_from_slice(b"hi");
        let row = DataRow::parse(&payload).unwrap();
        assert_eq!(row, vec![None, Some(vec![]), Some(b"hi".to_vec())]);
    }

    #[test]
    fn row_description() {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"id\0");
        payload.extend_from_slice(&16384_u32.to_be_bytes());
        payload.extend_from_slice(&1_i16.to_be_bytes());
        payload.extend_from_slice(&23_u32.to_be_bytes());
        payload.extend_from_slice(&4_i16.to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&1_u16.to_be_bytes());
        let fields = RowDescription::parse(&payload).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "id");
        assert_eq!(fields[0].type_oid, 23);
        assert_eq!(fields[0].table_oid, 16384);
        assert_eq!(fields[0].format, FieldFormat::Binary);
    }
}

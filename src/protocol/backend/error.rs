//! ErrorResponse and NoticeResponse field parsing.

use crate::error::{ErrorFields, Result};
use crate::protocol::codec::Reader;

/// Error field type codes from PostgreSQL protocol.
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    /// PostgreSQL 9.6+
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

/// Parse the field list shared by ErrorResponse and NoticeResponse.
pub fn parse_error_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut reader = Reader::new(payload);

    loop {
        let code = match reader.read_u8() {
            Ok(0) | Err(_) => break,
            Ok(code) => code,
        };
        let value = reader.read_cstr()?;
        let owned = || Some(value.to_string());

        match code {
            field_type::SEVERITY => fields.severity = owned(),
            field_type::SEVERITY_NON_LOCALIZED => fields.severity_non_localized = owned(),
            field_type::CODE => fields.code = owned(),
            field_type::MESSAGE => fields.message = owned(),
            field_type::DETAIL => fields.detail = owned(),
            field_type::HINT => fields.hint = owned(),
            field_type::POSITION => fields.position = value.parse().ok(),
            field_type::INTERNAL_POSITION => fields.internal_position = value.parse().ok(),
            field_type::INTERNAL_QUERY => fields.internal_query = owned(),
            field_type::WHERE => fields.where_ = owned(),
            field_type::SCHEMA => fields.schema = owned(),
            field_type::TABLE => fields.table = owned(),
            field_type::COLUMN => fields.column = owned(),
            field_type::DATA_TYPE => fields.data_type = owned(),
            field_type::CONSTRAINT => fields.constraint = owned(),
            field_type::FILE => fields.file = owned(),
            field_type::LINE => fields.line = value.parse().ok(),
            field_type::ROUTINE => fields.routine = owned(),
            _ => {
                tracing::debug!("Unknown error field type: {}", code as char);
            }
        }
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_fields() {
        let payload = b"SERROR\0VERROR\0C23505\0Mduplicate key\0sapp\0tusers\0nusers_pkey\0P12\0\0";
        let fields = parse_error_fields(payload).unwrap();
        assert_eq!(fields.severity(), Some("ERROR"));
        assert_eq!(fields.code.as_deref(), Some("23505"));
        assert_eq!(fields.message.as_deref(), Some("duplicate key"));
        assert_eq!(fields.schema.as_deref(), Some("app"));
        assert_eq!(fields.table.as_deref(), Some("users"));
        assert_eq!(fields.constraint.as_deref(), Some("users_pkey"));
        assert_eq!(fields.position, Some(12));
    }
}

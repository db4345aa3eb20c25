//! Query messages: simple Query plus the extended Parse/Bind/Describe/Execute/Close set.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FieldFormat, ObjectKind, Oid};

/// Write a Query message. The text may hold several `;`-separated statements.
pub fn write_query(buf: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(query);
    msg.finish();
}

/// Write a Parse message.
///
/// - `name`: statement name, empty for the unnamed statement
/// - `param_oids`: parameter types, 0 lets the server infer
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_u32(oid);
    }
    msg.finish();
}

/// Write a Bind message.
///
/// `params` holds already-encoded values; `None` is sent as SQL NULL.
pub fn write_bind(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    param_formats: &[FieldFormat],
    params: &[Option<Vec<u8>>],
    result_formats: &[FieldFormat],
) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
    msg.write_cstr(portal);
    msg.write_cstr(statement);

    // A single shared code covers every parameter when all agree.
    match param_formats {
        [] => msg.write_i16(0),
        [first, rest @ ..] if rest.iter().all(|f| f == first) => {
            msg.write_i16(1);
            msg.write_i16(first.code());
        }
        _ => {
            msg.write_i16(param_formats.len() as i16);
            for format in param_formats {
                msg.write_i16(format.code());
            }
        }
    }

    msg.write_i16(params.len() as i16);
    for value in params {
        msg.write_nullable(value.as_deref());
    }

    msg.write_i16(result_formats.len() as i16);
    for format in result_formats {
        msg.write_i16(format.code());
    }

    msg.finish();
}

/// Write an Execute message. `max_rows` 0 means no limit.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_u32(max_rows);
    msg.finish();
}

/// Write a Describe message for a statement or portal.
pub fn write_describe(buf: &mut Vec<u8>, kind: ObjectKind, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(kind.tag());
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Close message for a statement or portal.
pub fn write_close(buf: &mut Vec<u8>, kind: ObjectKind, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::CLOSE);
    msg.write_u8(kind.tag());
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Sync message; the server answers with ReadyForQuery.
pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::SYNC).finish();
}

/// Write a Flush message.
pub fn write_flush(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::FLUSH).finish();
}

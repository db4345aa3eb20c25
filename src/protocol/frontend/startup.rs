//! Untyped messages sent outside a session: startup, SSL and cancel requests.

use crate::protocol::codec::MessageBuilder;

/// Protocol version 3.0 (0x00030000)
pub const PROTOCOL_VERSION_3_0: i32 = 196608;

/// SSL request code
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Cancel request code
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Size of a CancelRequest, length field included.
pub const CANCEL_REQUEST_LEN: usize = 16;

/// Write an SSLRequest message.
///
/// Server responds with single byte: 'S' (accepted) or 'N' (rejected).
pub fn write_ssl_request(buf: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(SSL_REQUEST_CODE);
    msg.finish();
}

/// Write a StartupMessage with (name, value) parameters.
pub fn write_startup(buf: &mut Vec<u8>, params: &[(&str, &str)]) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(PROTOCOL_VERSION_3_0);

    for (name, value) in params {
        msg.write_cstr(name);
        msg.write_cstr(value);
    }

    msg.write_u8(0);
    msg.finish();
}

/// Write a CancelRequest message.
///
/// Sent on a NEW connection; the server closes it without replying.
pub fn write_cancel_request(buf: &mut Vec<u8>, pid: u32, secret_key: u32) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(CANCEL_REQUEST_CODE);
    msg.write_u32(pid);
    msg.write_u32(secret_key);
    msg.finish();
}

/// Write a Terminate message.
pub fn write_terminate(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::TERMINATE).finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_request_bytes() {
        let mut buf = Vec::new();
        write_cancel_request(&mut buf, 100, 200);

        assert_eq!(buf.len(), CANCEL_REQUEST_LEN);
        assert_eq!(
            buf,
            [
                0x00, 0x00, 0x00, 0x10, // length 16
                0x04, 0xd2, 0x16, 0x2e, // 80877102
                0x00, 0x00, 0x00, 0x64, // pid 100
                0x00, 0x00, 0x00, 0xc8, // secret 200
            ]
        );
    }

    #[test]
    fn ssl_request() {
        let mut buf = Vec::new();
        write_ssl_request(&mut buf);

        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &8_i32.to_be_bytes());
        assert_eq!(&buf[4..8], &SSL_REQUEST_CODE.to_be_bytes());
    }

    #[test]
    fn startup_params() {
        let mut buf = Vec::new();
        write_startup(&mut buf, &[("user", "postgres"), ("DateStyle", "ISO")]);

        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());
        assert_eq!(&buf[4..8], &PROTOCOL_VERSION_3_0.to_be_bytes());
        assert_eq!(&buf[8..], b"user\0postgres\0DateStyle\0ISO\0\0");
    }

    #[test]
    fn terminate() {
        let mut buf = Vec::new();
        write_terminate(&mut buf);
        assert_eq!(buf, [b'X', 0, 0, 0, 4]);
    }
}

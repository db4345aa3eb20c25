//! Authentication and session-level backend messages.

use zerocopy::byteorder::big_endian::U32;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::Reader;
use crate::protocol::types::TransactionStatus;

/// Authentication method constants.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const GSS: i32 = 7;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Authentication request from the server.
#[derive(Debug)]
pub enum AuthenticationMessage<'a> {
    Ok,
    CleartextPassword,
    /// MD5 password required (with 4-byte salt)
    Md5Password { salt: [u8; 4] },
    /// SASL authentication required (with list of mechanisms)
    Sasl { mechanisms: Vec<&'a str> },
    /// server-first-message
    SaslContinue { data: &'a [u8] },
    /// server-final-message
    SaslFinal { data: &'a [u8] },
    /// A method this client does not implement (Kerberos, GSS, SSPI).
    Unsupported(i32),
}

impl<'a> AuthenticationMessage<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut reader = Reader::new(payload);
        let kind = reader.read_i32()?;

        Ok(match kind {
            auth_type::OK => AuthenticationMessage::Ok,
            auth_type::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
            auth_type::MD5_PASSWORD => {
                let salt = reader.read_bytes(4)?;
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(salt);
                AuthenticationMessage::Md5Password { salt: bytes }
            }
            auth_type::SASL => {
                let mut mechanisms = Vec::new();
                while reader.rest().first().is_some_and(|&b| b != 0) {
                    mechanisms.push(reader.read_cstr()?);
                }
                AuthenticationMessage::Sasl { mechanisms }
            }
            auth_type::SASL_CONTINUE => AuthenticationMessage::SaslContinue {
                data: reader.rest(),
            },
            auth_type::SASL_FINAL => AuthenticationMessage::SaslFinal {
                data: reader.rest(),
            },
            auth_type::KERBEROS_V5 | auth_type::GSS | auth_type::SSPI => {
                AuthenticationMessage::Unsupported(kind)
            }
            _ => {
                return Err(Error::Protocol(format!(
                    "Unknown authentication type: {}",
                    kind
                )));
            }
        })
    }
}

/// Process id and secret key identifying a backend for cancellation.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct BackendKeyData {
    pid: U32,
    secret_key: U32,
}

impl BackendKeyData {
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(payload).map_err(|e| Error::Protocol(format!("BackendKeyData: {e:?}")))
    }

    pub fn process_id(&self) -> u32 {
        self.pid.get()
    }

    pub fn secret(&self) -> u32 {
        self.secret_key.get()
    }
}

/// ParameterStatus message - server parameter name and value.
#[derive(Debug, Clone)]
pub struct ParameterStatus<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut reader = Reader::new(payload);
        Ok(Self {
            name: reader.read_cstr()?,
            value: reader.read_cstr()?,
        })
    }
}

/// ReadyForQuery message - indicates server is ready for a new query.
#[derive(Debug, Clone, Copy)]
pub struct ReadyForQuery {
    pub status: TransactionStatus,
}

impl ReadyForQuery {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let byte = Reader::new(payload).read_u8()?;
        let status = TransactionStatus::from_byte(byte).ok_or_else(|| {
            Error::Protocol(format!("ReadyForQuery: unknown status {:?}", byte as char))
        })?;
        Ok(Self { status })
    }
}

/// NotificationResponse message - asynchronous notification from LISTEN/NOTIFY.
#[derive(Debug, Clone)]
pub struct NotificationResponse<'a> {
    /// PID of the notifying backend
    pub pid: u32,
    pub channel: &'a str,
    pub payload: &'a str,
}

impl<'a> NotificationResponse<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut reader = Reader::new(payload);
        Ok(Self {
            pid: reader.read_u32()?,
            channel: reader.read_cstr()?,
            payload: reader.read_cstr()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sasl_mechanisms() {
        let mut payload = 10_i32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"SCRAM-SHA-256\0SCRAM-SHA-256-PLUS\0\0");
        match AuthenticationMessage::parse(&payload).unwrap() {
            AuthenticationMessage::Sasl { mechanisms } => {
                assert_eq!(mechanisms, ["SCRAM-SHA-256", "SCRAM-SHA-256-PLUS"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn backend_key_data() {
        let mut payload = 100_u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&200_u32.to_be_bytes());
        let key = BackendKeyData::parse(&payload).unwrap();
        assert_eq!(key.process_id(), 100);
        assert_eq!(key.secret(), 200);
    }

    #[test]
    fn ready_for_query_status() {
        assert_eq!(
            ReadyForQuery::parse(b"T").unwrap().status,
            TransactionStatus::InTransaction
        );
        assert!(ReadyForQuery::parse(b"?").is_err());
    }
}

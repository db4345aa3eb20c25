//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result, Warning};
use crate::opts::{Opts, SslMode};
use crate::protocol::backend::{AuthenticationMessage, BackendKeyData, ReadyForQuery, msg_type};
use crate::protocol::frontend::auth::{SCRAM_SHA_256, ScramClient, md5_password};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_ssl_request,
    write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::action::{Action, AsyncMessage};
use super::{Interjection, StateMachine, interjection};

/// Application name sent when none is configured.
pub const DEFAULT_APPLICATION_NAME: &str = "pgcore";

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingSslResponse,
    SslHandshake,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Ready,
}

/// Cancellation key of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyData {
    pub process_id: u32,
    pub secret_key: u32,
}

/// Connection startup state machine.
pub struct ConnectionStateMachine {
    state: State,
    options: Opts,
    ssl_response: Option<u8>,
    key_data: Option<KeyData>,
    server_params: Vec<(String, String)>,
    notices: Vec<Warning>,
    transaction_status: TransactionStatus,
    scram_client: Option<ScramClient>,
}

impl ConnectionStateMachine {
    pub fn new(options: Opts) -> Self {
        Self {
            state: State::Initial,
            options,
            ssl_response: None,
            key_data: None,
            server_params: Vec::new(),
            notices: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            scram_client: None,
        }
    }

    /// Record the single byte answering an SSLRequest.
    pub fn set_ssl_response(&mut self, byte: u8) {
        self.ssl_response = Some(byte);
    }

    /// BackendKeyData, if the server sent one.
    pub fn key_data(&self) -> Option<KeyData> {
        self.key_data
    }

    /// ParameterStatus values reported during startup, in arrival order.
    pub fn take_server_params(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.server_params)
    }

    pub fn take_notices(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.notices)
    }

    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    fn password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("Password required but not provided".into()))
    }

    fn write_startup_message(&self, buffer_set: &mut BufferSet) {
        let options = &self.options;
        let mut params: Vec<(&str, &str)> = vec![
            ("user", &options.user),
            ("client_encoding", "UTF8"),
            ("DateStyle", "ISO"),
            ("extra_float_digits", "3"),
            (
                "application_name",
                options
                    .application_name
                    .as_deref()
                    .unwrap_or(DEFAULT_APPLICATION_NAME),
            ),
        ];
        if let Some(db) = &options.database {
            params.push(("database", db));
        }
        for (name, value) in &options.params {
            params.push((name, value));
        }

        write_startup(buffer_set.start_write(), &params);
    }

    fn send_startup(&mut self, buffer_set: &mut BufferSet) -> Action {
        self.write_startup_message(buffer_set);
        self.state = State::WaitingAuth;
        Action::WriteAndReadMessage
    }

    fn handle_ssl_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.ssl_response.take() {
            Some(b'S') => {
                self.state = State::SslHandshake;
                Ok(Action::TlsHandshake)
            }
            Some(b'N') if self.options.ssl_mode == SslMode::Require => Err(Error::Auth(
                "SSL required but not supported by server".into(),
            )),
            Some(b'N') => Ok(self.send_startup(buffer_set)),
            other => Err(Error::Protocol(format!(
                "Unexpected SSL response: {:?}",
                other
            ))),
        }
    }

    fn handle_auth(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let BufferSet {
            read_buffer,
            write_buffer,
            type_byte,
        } = buffer_set;
        if *type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "Expected Authentication message, got '{}'",
                *type_byte as char
            )));
        }

        let auth = AuthenticationMessage::parse(read_buffer)?;
        write_buffer.clear();
        let response = match (self.state, auth) {
            (State::WaitingAuth | State::WaitingAuthResult, AuthenticationMessage::Ok) => {
                self.state = State::WaitingReady;
                return Ok(Action::ReadMessage);
            }
            (State::WaitingAuth, AuthenticationMessage::CleartextPassword) => {
                let password = self.password()?.to_string();
                write_password(write_buffer, &password);
                State::WaitingAuthResult
            }
            (State::WaitingAuth, AuthenticationMessage::Md5Password { salt }) => {
                let hashed = md5_password(&self.options.user, self.password()?, &salt);
                write_password(write_buffer, &hashed);
                State::WaitingAuthResult
            }
            (State::WaitingAuth, AuthenticationMessage::Sasl { mechanisms }) => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "No supported SASL mechanism. Server offers: {:?}",
                        mechanisms
                    )));
                }
                let scram = ScramClient::new(self.password()?);
                write_sasl_initial_response(
                    write_buffer,
                    SCRAM_SHA_256,
                    scram.client_first_message().as_bytes(),
                );
                self.scram_client = Some(scram);
                State::SaslInProgress
            }
            (State::SaslInProgress, AuthenticationMessage::SaslContinue { data }) => {
                let scram = self
                    .scram_client
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;
                let server_first = simdutf8::basic::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-first-message: {}", e)))?;
                let client_final = scram.process_server_first(server_first)?;
                write_sasl_response(write_buffer, client_final.as_bytes());
                State::SaslInProgress
            }
            (State::SaslInProgress, AuthenticationMessage::SaslFinal { data }) => {
                let scram = self
                    .scram_client
                    .take()
                    .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;
                let server_final = simdutf8::basic::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-final-message: {}", e)))?;
                scram.verify_server_final(server_final)?;
                self.state = State::WaitingAuthResult;
                return Ok(Action::ReadMessage);
            }
            (_, AuthenticationMessage::Unsupported(code)) => {
                return Err(Error::Unsupported(format!(
                    "Unsupported authentication method: {}",
                    code
                )));
            }
            (state, auth) => {
                return Err(Error::Protocol(format!(
                    "Unexpected {:?} in state {:?}",
                    auth, state
                )));
            }
        };

        self.state = response;
        Ok(Action::WriteAndReadMessage)
    }

    fn handle_ready(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(payload)?;
                self.key_data = Some(KeyData {
                    process_id: key.process_id(),
                    secret_key: key.secret(),
                });
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                self.transaction_status = ReadyForQuery::parse(payload)?.status;
                self.state = State::Ready;
                Ok(Action::Finished)
            }
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                tracing::debug!("server negotiated protocol version");
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected message during startup: '{}'",
                other as char
            ))),
        }
    }
}

impl StateMachine for ConnectionStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => {
                if self.options.ssl_mode == SslMode::Disable {
                    return Ok(self.send_startup(buffer_set));
                }
                write_ssl_request(buffer_set.start_write());
                self.state = State::WaitingSslResponse;
                return Ok(Action::WriteAndReadByte);
            }
            State::WaitingSslResponse => return self.handle_ssl_response(buffer_set),
            State::SslHandshake => return Ok(self.send_startup(buffer_set)),
            State::Ready => return Ok(Action::Finished),
            _ => {}
        }

        match interjection(buffer_set)? {
            Some(Interjection::Error(fields)) => return Err(Error::Server(fields)),
            Some(Interjection::Notice(notice)) => {
                self.notices.push(notice);
                return Ok(Action::ReadMessage);
            }
            Some(Interjection::Async(AsyncMessage::ParameterChanged { name, value })) => {
                self.server_params.push((name, value));
                return Ok(Action::ReadMessage);
            }
            Some(Interjection::Async(message)) => {
                return Ok(Action::HandleAsyncMessageAndReadMessage(message));
            }
            None => {}
        }

        match self.state {
            State::WaitingAuth | State::SaslInProgress | State::WaitingAuthResult => {
                self.handle_auth(buffer_set)
            }
            State::WaitingReady => self.handle_ready(buffer_set),
            state => Err(Error::Protocol(format!(
                "Unexpected message in state {:?}",
                state
            ))),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

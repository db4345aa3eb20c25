//! Simple query protocol state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, ErrorFields, Result, Warning};
use crate::protocol::backend::{
    CommandComplete, DataRow, FieldDescription, ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::frontend::write_query;
use crate::protocol::types::TransactionStatus;

use super::action::Action;
use super::{Interjection, StateMachine, interjection};

/// Raw rows of one statement, before any decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOutcome {
    /// Empty when the statement returns no rows.
    pub fields: Vec<FieldDescription>,
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
    /// Command tag, empty for an empty query
    pub command: String,
    pub rows_affected: Option<u64>,
}

impl QueryOutcome {
    pub(crate) fn complete(&mut self, payload: &[u8]) -> Result<()> {
        let complete = CommandComplete::parse(payload)?;
        self.command = complete.tag.to_string();
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponse,
    Finished,
}

/// Simple query protocol state machine.
///
/// Each statement of a multi-statement query yields one [`QueryOutcome`].
/// A server error stops the remaining statements and is reported once the
/// server is ready again, so the connection stays in sync.
pub struct SimpleQueryStateMachine {
    state: State,
    sql: String,
    current: Option<QueryOutcome>,
    outcomes: Vec<QueryOutcome>,
    warnings: Vec<Warning>,
    error: Option<ErrorFields>,
    transaction_status: TransactionStatus,
}

impl SimpleQueryStateMachine {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            state: State::Initial,
            sql: sql.into(),
            current: None,
            outcomes: Vec::new(),
            warnings: Vec::new(),
            error: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    pub fn take_outcomes(&mut self) -> Vec<QueryOutcome> {
        std::mem::take(&mut self.outcomes)
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    fn handle_response(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let payload = buffer_set.read_buffer.as_slice();

        match buffer_set.type_byte {
            msg_type::ROW_DESCRIPTION => {
                self.current = Some(QueryOutcome {
                    fields: RowDescription::parse(payload)?,
                    ..QueryOutcome::default()
                });
            }
            msg_type::DATA_ROW => {
                let current = self.current.as_mut().ok_or_else(|| {
                    Error::Protocol("DataRow without RowDescription".into())
                })?;
                current.rows.push(DataRow::parse(payload)?);
            }
            msg_type::COMMAND_COMPLETE => {
                let mut outcome = self.current.take().unwrap_or_default();
                outcome.complete(payload)?;
                self.outcomes.push(outcome);
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                self.outcomes.push(QueryOutcome::default());
            }
            msg_type::READY_FOR_QUERY => {
                self.transaction_status = ReadyForQuery::parse(payload)?.status;
                self.state = State::Finished;
                return match self.error.take() {
                    Some(fields) => Err(Error::Server(fields)),
                    None => Ok(Action::Finished),
                };
            }
            msg_type::COPY_IN_RESPONSE | msg_type::COPY_OUT_RESPONSE => {
                return Err(Error::Unsupported("COPY is not supported".into()));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Unexpected message in query response: '{}'",
                    other as char
                )));
            }
        }
        Ok(Action::ReadMessage)
    }
}

impl StateMachine for SimpleQueryStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => {
                write_query(buffer_set.start_write(), &self.sql);
                self.state = State::WaitingResponse;
                return Ok(Action::WriteAndReadMessage);
            }
            State::Finished => return Ok(Action::Finished),
            State::WaitingResponse => {}
        }

        match interjection(buffer_set)? {
            Some(Interjection::Error(fields)) => {
                self.current = None;
                self.error = Some(fields);
                Ok(Action::ReadMessage)
            }
            Some(Interjection::Notice(notice)) => {
                self.warnings.push(notice);
                Ok(Action::ReadMessage)
            }
            Some(Interjection::Async(message)) => {
                Ok(Action::HandleAsyncMessageAndReadMessage(message))
            }
            None => self.handle_response(buffer_set),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_description(name: &str, oid: u32) -> Vec<u8> {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&0_u32.to_be_bytes());
        payload.extend_from_slice(&0_i16.to_be_bytes());
        payload.extend_from_slice(&oid.to_be_bytes());
        payload.extend_from_slice(&4_i16.to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_u16.to_be_bytes());
        payload
    }

    fn data_row(value: &[u8]) -> Vec<u8> {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&(value.len() as i32).to_be_bytes());
        payload.extend_from_slice(value);
        payload
    }

    #[test]
    fn multi_statement_results() {
        let mut sm = SimpleQueryStateMachine::new("SELECT 1; UPDATE t SET x = 1");
        let mut buffers = BufferSet::new();
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::WriteAndReadMessage));
        assert_eq!(buffers.write_buffer[0], b'Q');

        buffers.feed(msg_type::ROW_DESCRIPTION, &row_description("n", 23));
        sm.step(&mut buffers).unwrap();
        buffers.feed(msg_type::DATA_ROW, &data_row(b"1"));
        sm.step(&mut buffers).unwrap();
        buffers.feed(msg_type::COMMAND_COMPLETE, b"SELECT 1\0");
        sm.step(&mut buffers).unwrap();
        buffers.feed(msg_type::NOTICE_RESPONSE, b"SNOTICE\0Mheads up\0\0");
        sm.step(&mut buffers).unwrap();
        buffers.feed(msg_type::COMMAND_COMPLETE, b"UPDATE 4\0");
        sm.step(&mut buffers).unwrap();
        buffers.feed(msg_type::READY_FOR_QUERY, b"I");
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::Finished));

        let outcomes = sm.take_outcomes();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].fields[0].name, "n");
        assert_eq!(outcomes[0].rows, vec![vec![Some(b"1".to_vec())]]);
        assert_eq!(outcomes[1].rows_affected, Some(4));
        assert!(outcomes[1].fields.is_empty());
        assert_eq!(sm.take_warnings().len(), 1);
    }

    #[test]
    fn error_reported_after_ready() {
        let mut sm = SimpleQueryStateMachine::new("SELECT boom");
        let mut buffers = BufferSet::new();
        sm.step(&mut buffers).unwrap();

        buffers.feed(msg_type::ERROR_RESPONSE, b"SERROR\0C42703\0Mno such column\0\0");
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::ReadMessage));

        buffers.feed(msg_type::READY_FOR_QUERY, b"I");
        let err = sm.step(&mut buffers).unwrap_err();
        assert_eq!(err.sqlstate(), Some("42703"));
        assert!(!err.is_connection_broken());
    }

    #[test]
    fn parameter_status_is_forwarded() {
        let mut sm = SimpleQueryStateMachine::new("SET TimeZone = 'UTC'");
        let mut buffers = BufferSet::new();
        sm.step(&mut buffers).unwrap();
        buffers.feed(msg_type::PARAMETER_STATUS, b"TimeZone\0UTC\0");
        assert!(matches!(
            sm.step(&mut buffers).unwrap(),
            Action::HandleAsyncMessageAndReadMessage(_)
        ));
    }
}

//! Extended query protocol state machine.
//!
//! One machine sends a list of [`ExtendedStep`]s followed by a single Sync and
//! gathers every reply until ReadyForQuery. Prepare, execute, close and
//! one-shot execution are all expressed as step lists.

use crate::buffer_set::BufferSet;
use crate::error::{Error, ErrorFields, Result, Warning};
use crate::protocol::backend::{
    DataRow, FieldDescription, ParameterDescription, ReadyForQuery, RowDescription, msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_close, write_describe, write_execute, write_parse, write_sync,
};
use crate::protocol::types::{FieldFormat, ObjectKind, Oid, TransactionStatus};

use super::action::Action;
use super::simple_query::QueryOutcome;
use super::{Interjection, StateMachine, interjection};

/// One frontend message of an extended-protocol exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendedStep {
    Parse {
        name: String,
        sql: String,
        /// 0 lets the server infer the type
        param_oids: Vec<Oid>,
    },
    Bind {
        portal: String,
        statement: String,
        param_formats: Vec<FieldFormat>,
        params: Vec<Option<Vec<u8>>>,
        result_formats: Vec<FieldFormat>,
    },
    Describe(ObjectKind, String),
    Execute {
        portal: String,
        /// 0 = unlimited
        max_rows: u32,
    },
    Close(ObjectKind, String),
}

impl ExtendedStep {
    fn write(&self, buf: &mut Vec<u8>) {
        match self {
            ExtendedStep::Parse {
                name,
                sql,
                param_oids,
            } => write_parse(buf, name, sql, param_oids),
            ExtendedStep::Bind {
                portal,
                statement,
                param_formats,
                params,
                result_formats,
            } => write_bind(
                buf,
                portal,
                statement,
                param_formats,
                params,
                result_formats,
            ),
            ExtendedStep::Describe(kind, name) => write_describe(buf, *kind, name),
            ExtendedStep::Execute { portal, max_rows } => write_execute(buf, portal, *max_rows),
            ExtendedStep::Close(kind, name) => write_close(buf, *kind, name),
        }
    }
}

/// Everything the server replied to one step list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedOutcome {
    /// From ParameterDescription
    pub param_oids: Option<Vec<Oid>>,
    /// From RowDescription; `Some(vec![])` after NoData
    pub described_fields: Option<Vec<FieldDescription>>,
    /// Rows and command tag of an Execute
    pub result: QueryOutcome,
    /// Execute stopped at its row limit
    pub suspended: bool,
    pub closed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponse,
    Finished,
}

/// Extended query protocol state machine.
pub struct ExtendedStateMachine {
    state: State,
    steps: Vec<ExtendedStep>,
    outcome: ExtendedOutcome,
    warnings: Vec<Warning>,
    error: Option<ErrorFields>,
    transaction_status: TransactionStatus,
}

impl ExtendedStateMachine {
    pub fn new(steps: Vec<ExtendedStep>) -> Self {
        Self {
            state: State::Initial,
            steps,
            outcome: ExtendedOutcome::default(),
            warnings: Vec::new(),
            error: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    pub fn take_outcome(&mut self) -> ExtendedOutcome {
        std::mem::take(&mut self.outcome)
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    fn handle_response(&mut self, buffer_set: &BufferSet) -> Result<Action> {
        let payload = buffer_set.read_buffer.as_slice();
        let outcome = &mut self.outcome;

        match buffer_set.type_byte {
            msg_type::PARSE_COMPLETE | msg_type::BIND_COMPLETE => {}
            msg_type::CLOSE_COMPLETE => outcome.closed += 1,
            msg_type::PARAMETER_DESCRIPTION => {
                outcome.param_oids = Some(ParameterDescription::parse(payload)?);
            }
            msg_type::ROW_DESCRIPTION => {
                outcome.described_fields = Some(RowDescription::parse(payload)?);
            }
            msg_type::NO_DATA => outcome.described_fields = Some(Vec::new()),
            msg_type::DATA_ROW => outcome.result.rows.push(DataRow::parse(payload)?),
            msg_type::COMMAND_COMPLETE => outcome.result.complete(payload)?,
            msg_type::EMPTY_QUERY_RESPONSE => {}
            msg_type::PORTAL_SUSPENDED => outcome.suspended = true,
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
                    "Unexpected message in extended query response: '{}'",
                    other as char
                )));
            }
        }
        Ok(Action::ReadMessage)
    }
}

impl StateMachine for ExtendedStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => {
                let buf = buffer_set.start_write();
                for step in &self.steps {
                    step.write(buf);
                }
                write_sync(buf);
                self.state = State::WaitingResponse;
                return Ok(Action::WriteAndReadMessage);
            }
            State::Finished => return Ok(Action::Finished),
            State::WaitingResponse => {}
        }

        match interjection(buffer_set)? {
            // The server skips to Sync after an error
            Some(Interjection::Error(fields)) => {
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

    #[test]
    fn prepare_collects_description() {
        let mut sm = ExtendedStateMachine::new(vec![
            ExtendedStep::Parse {
                name: "s1".into(),
                sql: "UPDATE t SET a = $1".into(),
                param_oids: vec![0],
            },
            ExtendedStep::Describe(ObjectKind::Statement, "s1".into()),
        ]);
        let mut buffers = BufferSet::new();
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::WriteAndReadMessage));
        assert_eq!(buffers.write_buffer[0], b'P');
        assert_eq!(buffers.write_buffer[buffers.write_buffer.len() - 5], b'S');

        buffers.feed(msg_type::PARSE_COMPLETE, b"");
        sm.step(&mut buffers).unwrap();
        let mut params = 1_u16.to_be_bytes().to_vec();
        params.extend_from_slice(&25_u32.to_be_bytes());
        buffers.feed(msg_type::PARAMETER_DESCRIPTION, &params);
        sm.step(&mut buffers).unwrap();
        buffers.feed(msg_type::NO_DATA, b"");
        sm.step(&mut buffers).unwrap();
        buffers.feed(msg_type::READY_FOR_QUERY, b"I");
        assert!(matches!(sm.step(&mut buffers).unwrap(), Action::Finished));

        let outcome = sm.take_outcome();
        assert_eq!(outcome.param_oids, Some(vec![25]));
        assert_eq!(outcome.described_fields, Some(vec![]));
    }

    #[test]
    fn execute_collects_rows_and_suspension() {
        let mut sm = ExtendedStateMachine::new(vec![ExtendedStep::Execute {
            portal: "c1".into(),
            max_rows: 1,
        }]);
        let mut buffers = BufferSet::new();
        sm.step(&mut buffers).unwrap();

        let mut row = 1_u16.to_be_bytes().to_vec();
        row.extend_from_slice(&(-1_i32).to_be_bytes());
        buffers.feed(msg_type::DATA_ROW, &row);
        sm.step(&mut buffers).unwrap();
        buffers.feed(msg_type::PORTAL_SUSPENDED, b"");
        sm.step(&mut buffers).unwrap();
        buffers.feed(msg_type::READY_FOR_QUERY, b"T");
        sm.step(&mut buffers).unwrap();

        let outcome = sm.take_outcome();
        assert!(outcome.suspended);
        assert_eq!(outcome.result.rows, vec![vec![None]]);
        assert_eq!(sm.transaction_status(), TransactionStatus::InTransaction);
    }

    #[test]
    fn warnings_survive_error() {
        let mut sm = ExtendedStateMachine::new(vec![ExtendedStep::Close(
            ObjectKind::Statement,
            "gone".into(),
        )]);
        let mut buffers = BufferSet::new();
        sm.step(&mut buffers).unwrap();

        buffers.feed(msg_type::NOTICE_RESPONSE, b"SWARNING\0Mcareful\0\0");
        sm.step(&mut buffers).unwrap();
        buffers.feed(msg_type::ERROR_RESPONSE, b"SERROR\0C26000\0Mmissing\0\0");
        sm.step(&mut buffers).unwrap();
        buffers.feed(msg_type::READY_FOR_QUERY, b"I");
        assert!(sm.step(&mut buffers).is_err());
        assert_eq!(sm.take_warnings()[0].message.as_deref(), Some("careful"));
    }
}

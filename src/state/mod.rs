//! Sans-I/O state machines for PostgreSQL protocol.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! They produce `Action` values that tell the caller what to do next.

pub mod action;
pub mod connection;
pub mod extended;
pub mod simple_query;

pub use action::{Action, AsyncMessage};
pub use connection::ConnectionStateMachine;
pub use extended::{ExtendedOutcome, ExtendedStateMachine, ExtendedStep};
pub use simple_query::{QueryOutcome, SimpleQueryStateMachine};

use crate::buffer_set::BufferSet;
use crate::error::{ErrorFields, Result, Warning};
use crate::protocol::backend::{NotificationResponse, ParameterStatus, msg_type, parse_error_fields};
use crate::protocol::types::TransactionStatus;

/// A protocol exchange driven by a transport.
///
/// The first `step()` call writes the request; later calls consume the
/// message the transport placed in the buffer set.
pub trait StateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Transaction status from the last ReadyForQuery seen.
    fn transaction_status(&self) -> TransactionStatus;
}

/// Backend messages every query state machine must accept at any point.
pub(crate) enum Interjection {
    Async(AsyncMessage),
    Notice(Warning),
    Error(ErrorFields),
}

/// Classify the message in `buffer_set` as an interjection, if it is one.
pub(crate) fn interjection(buffer_set: &BufferSet) -> Result<Option<Interjection>> {
    let payload = buffer_set.read_buffer.as_slice();
    Ok(Some(match buffer_set.type_byte {
        msg_type::NOTICE_RESPONSE => Interjection::Notice(parse_error_fields(payload)?),
        msg_type::ERROR_RESPONSE => Interjection::Error(parse_error_fields(payload)?),
        msg_type::PARAMETER_STATUS => {
            let param = ParameterStatus::parse(payload)?;
            Interjection::Async(AsyncMessage::ParameterChanged {
                name: param.name.to_string(),
                value: param.value.to_string(),
            })
        }
        msg_type::NOTIFICATION_RESPONSE => {
            let notification = NotificationResponse::parse(payload)?;
            Interjection::Async(AsyncMessage::Notification {
                pid: notification.pid,
                channel: notification.channel.to_string(),
                payload: notification.payload.to_string(),
            })
        }
        _ => return Ok(None),
    }))
}

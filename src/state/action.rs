//! Action types for state machine I/O requests.

/// Action requested by a state machine.
///
/// The caller performs the requested I/O and then calls `step()` again.
#[derive(Debug)]
pub enum Action {
    /// Write `buffer_set.write_buffer`, then read a single byte.
    ///
    /// Used for SSL negotiation: write SSL request, then read response ('S' or 'N').
    WriteAndReadByte,

    /// Read one message into the buffer set.
    ReadMessage,

    /// Write `buffer_set.write_buffer` and flush.
    Write,

    /// Write `buffer_set.write_buffer`, then read a message.
    WriteAndReadMessage,

    /// Perform TLS handshake.
    TlsHandshake,

    /// An asynchronous message was received.
    ///
    /// The caller should handle the message, read the next message,
    /// then call `step()` again.
    HandleAsyncMessageAndReadMessage(AsyncMessage),

    /// The state machine has finished.
    Finished,
}

/// Asynchronous message from the server.
///
/// Notices are not listed here: state machines collect them as warnings
/// of the request they arrive in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification {
        /// PID of the notifying backend process
        pid: u32,
        channel: String,
        payload: String,
    },

    /// Server parameter value changed.
    ParameterChanged { name: String, value: String },
}

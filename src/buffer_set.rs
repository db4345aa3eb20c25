//! Buffers shared by the transport and the state machines.

use crate::protocol::backend::RawMessage;

/// Read and write buffers owned by one connection.
///
/// The transport fills `type_byte` and `read_buffer` with the last backend
/// message; state machines append outgoing messages to `write_buffer`.
pub struct BufferSet {
    /// Payload of the last message read (length field stripped)
    pub read_buffer: Vec<u8>,
    /// Outgoing bytes for the next write
    pub write_buffer: Vec<u8>,
    /// Type byte of the last message read
    pub type_byte: u8,
}

impl BufferSet {
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            type_byte: 0,
        }
    }

    /// The last message read.
    pub fn message(&self) -> RawMessage<'_> {
        RawMessage::new(self.type_byte, &self.read_buffer)
    }

    /// Clear the write buffer and hand it out for a fresh request.
    pub fn start_write(&mut self) -> &mut Vec<u8> {
        self.write_buffer.clear();
        &mut self.write_buffer
    }

    /// Stage a backend message, as the transport would after a read.
    #[cfg(test)]
    pub(crate) fn feed(&mut self, type_byte: u8, payload: &[u8]) {
        self.type_byte = type_byte;
        self.read_buffer.clear();
        self.read_buffer.extend_from_slice(payload);
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}

//! Error types for pgcore.

use std::time::Duration;

use thiserror::Error;

/// Result type for pgcore operations.
pub type Result<T> = core::result::Result<T, Error>;

/// SQLSTATE class used for connection establishment failures.
pub const SQLSTATE_CONNECTION_FAILURE: &str = "08001";

/// PostgreSQL error/notice fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Position in internal query
    pub internal_position: Option<u32>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Severity, preferring the non-localized variant.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        if let Some(where_) = &self.where_ {
            write!(f, "\nWHERE: {}", where_)?;
        }
        Ok(())
    }
}

/// Structured server error.
pub type ServerError = ErrorFields;

/// Non-fatal notice reported by the server.
pub type Warning = ErrorFields;

/// Ordered chain of warnings gathered across one logical operation.
///
/// A describe, prepare and execute of the same statement all append to
/// the same chain; nothing is dropped between steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Warnings {
    chain: Vec<Warning>,
}

impl Warnings {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single warning.
    pub fn push(&mut self, warning: Warning) {
        self.chain.push(warning);
    }

    /// Append every warning of `other`, keeping order.
    pub fn chain(&mut self, other: Vec<Warning>) {
        self.chain.extend(other);
    }

    /// Drop all collected warnings.
    pub fn clear(&mut self) {
        self.chain.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.chain.iter()
    }

    /// First warning in the chain.
    pub fn first(&self) -> Option<&Warning> {
        self.chain.first()
    }
}

/// Error type for pgcore.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// TLS error
    #[cfg(feature = "tokio-tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Unable to reach or handshake with a server address
    #[error("Connection Error: {message}")]
    Connection {
        /// SQLSTATE-style class code
        code: &'static str,
        /// Human readable reason
        message: String,
    },

    /// A request did not complete in time. The connection stays usable.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Cached or batched state does not agree with what is being executed
    #[error("Cache consistency error: {0}")]
    CacheConsistency(String),

    /// Type could not be resolved from the catalog
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Value could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Value could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Invalid usage (e.g., fetching from a closed cursor)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Build a connection error with the connection-failure class code.
    pub fn connection(message: impl Into<String>) -> Self {
        Error::Connection {
            code: SQLSTATE_CONNECTION_FAILURE,
            message: message.into(),
        }
    }

    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionBroken | Error::Protocol(_) => true,
            Error::Server(fields) => {
                // FATAL and PANIC errors indicate connection is broken
                matches!(fields.severity(), Some("FATAL") | Some("PANIC"))
            }
            _ => false,
        }
    }

    /// Returns true for a request-scoped timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Get the SQLSTATE code if this is a server or connection error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            Error::Connection { code, .. } => Some(code),
            _ => None,
        }
    }

    pub(crate) fn type_mismatch(expected: &str, got: &str) -> Self {
        Error::Decode(format!("cannot convert {} value into {}", got, expected))
    }

    pub(crate) fn overflow(from: &str, to: &str) -> Self {
        Error::Decode(format!("value of type {} overflows {}", from, to))
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

/// `Opts` converts into itself without failing.
impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_recoverable() {
        let err = Error::Timeout(Duration::from_millis(10));
        assert!(err.is_timeout());
        assert!(!err.is_connection_broken());
    }

    #[test]
    fn test_fatal_breaks_connection() {
        let err = Error::Server(ErrorFields {
            severity: Some("FATAL".into()),
            code: Some("57P01".into()),
            ..Default::default()
        });
        assert!(err.is_connection_broken());
        assert_eq!(err.sqlstate(), Some("57P01"));
    }

    #[test]
    fn test_connection_error_code() {
        let err = Error::connection("address 'db' is unresolved");
        assert_eq!(err.sqlstate(), Some("08001"));
        assert_eq!(
            err.to_string(),
            "Connection Error: address 'db' is unresolved"
        );
    }

    #[test]
    fn test_warning_chain_keeps_order() {
        let mut warnings = Warnings::new();
        warnings.push(ErrorFields {
            message: Some("first".into()),
            ..Default::default()
        });
        warnings.chain(vec![ErrorFields {
            message: Some("second".into()),
            ..Default::default()
        }]);
        let messages: Vec<_> = warnings
            .iter()
            .filter_map(|w| w.message.as_deref())
            .collect();
        assert_eq!(messages, ["first", "second"]);
    }
}

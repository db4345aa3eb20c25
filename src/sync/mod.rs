//! Blocking PostgreSQL client.
//!
//! Each call runs the asynchronous client to completion on a runtime owned
//! by the connection.

mod cancel;
mod conn;
mod statement;

pub use cancel::CancelHandle;
pub use conn::Conn;
pub use statement::PreparedQuery;

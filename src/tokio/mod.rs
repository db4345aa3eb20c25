//! Asynchronous PostgreSQL client using Tokio.

mod cancel;
mod conn;
mod executor;
mod loader;
mod stream;
mod worker;

pub use cancel::{CancelHandle, DEFAULT_CANCEL_TIMEOUT, cancel, cancel_request};
pub use conn::Conn;
pub use executor::{Pending, RequestExecutor, WeakRequestExecutor};
pub use loader::CatalogLoader;
pub use stream::Stream;
pub use worker::Response;

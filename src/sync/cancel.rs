//! Cancelling a blocking connection from another thread.

use tokio::runtime::Builder;

use crate::tokio::CancelHandle as AsyncCancelHandle;

/// Cancel target of a blocking [`Conn`](super::Conn).
///
/// The connection's thread is stuck inside the request it runs, so the
/// handle is `Send` and is used from another thread. It must not be used
/// from inside an async runtime.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    inner: AsyncCancelHandle,
}

impl CancelHandle {
    pub(crate) fn new(inner: AsyncCancelHandle) -> Self {
        Self { inner }
    }

    /// Ask the server to cancel the running request. Never fails.
    pub fn cancel(&self) {
        match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(self.inner.cancel()),
            Err(err) => tracing::warn!("cannot cancel: failed to start a runtime: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::Duration;

    use super::*;
    use crate::opts::ServerAddress;
    use crate::state::connection::KeyData;

    fn assert_send<T: Send + Sync>() {}

    #[test]
    fn handle_crosses_threads() {
        assert_send::<CancelHandle>();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = CancelHandle::new(AsyncCancelHandle::new(
            ServerAddress::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            Some(KeyData {
                process_id: 7,
                secret_key: 9,
            }),
            Duration::from_millis(500),
        ));

        let canceller = std::thread::spawn(move || handle.cancel());
        let (mut socket, _) = listener.accept().unwrap();
        let mut packet = [0u8; 16];
        socket.read_exact(&mut packet).unwrap();
        drop(socket);
        canceller.join().unwrap();

        assert_eq!(packet[8..12], 7_u32.to_be_bytes());
        assert_eq!(packet[12..], 9_u32.to_be_bytes());
    }
}

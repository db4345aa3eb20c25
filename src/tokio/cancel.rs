//! Out-of-band query cancellation.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::opts::ServerAddress;
use crate::protocol::frontend::write_cancel_request;
use crate::state::connection::KeyData;

use super::stream::Stream;

/// The 16-byte CancelRequest packet for `key`.
pub fn cancel_request(key: KeyData) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    write_cancel_request(&mut buf, key.process_id, key.secret_key);
    buf
}

/// Limit for a cancel exchange when the connection has none configured.
pub const DEFAULT_CANCEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Ask the server at `address` to cancel whatever the session of `key` runs.
///
/// Best effort: a missing key or any I/O failure is logged and ignored.
/// Connecting and waiting for the server to hang up each get `timeout`;
/// zero means [`DEFAULT_CANCEL_TIMEOUT`].
pub async fn cancel(address: &ServerAddress, key: Option<KeyData>, timeout: Duration) {
    let Some(key) = key else {
        tracing::warn!("cannot cancel: the server sent no BackendKeyData");
        return;
    };
    let timeout = if timeout.is_zero() {
        DEFAULT_CANCEL_TIMEOUT
    } else {
        timeout
    };
    if let Err(err) = send_cancel(address, key, timeout).await {
        tracing::warn!("cancel request to {} failed: {}", address, err);
    }
}

/// Detached cancel target of a connection, usable while the connection is
/// busy in another task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    address: ServerAddress,
    key: Option<KeyData>,
    timeout: Duration,
}

impl CancelHandle {
    pub(crate) fn new(address: ServerAddress, key: Option<KeyData>, timeout: Duration) -> Self {
        Self {
            address,
            key,
            timeout,
        }
    }

    pub async fn cancel(&self) {
        cancel(&self.address, self.key, self.timeout).await
    }
}

async fn send_cancel(address: &ServerAddress, key: KeyData, timeout: Duration) -> Result<()> {
    let mut stream = match tokio::time::timeout(timeout, Stream::connect(address)).await {
        Ok(stream) => stream?,
        Err(_elapsed) => return Err(Error::Timeout(timeout)),
    };
    stream.write_all(&cancel_request(key)).await?;
    stream.flush().await?;
    // The server closes the socket once it has read the request. EOF or a
    // server that keeps it open past the timeout both end the exchange.
    let mut rest = [0u8; 1];
    match tokio::time::timeout(timeout, stream.read_exact(&mut rest)).await {
        Ok(Ok(_)) => tracing::debug!("unexpected reply to a cancel request"),
        Ok(Err(_eof)) => {}
        Err(_elapsed) => tracing::debug!("server kept the cancel socket open, closing it"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, UnixListener};

    use super::*;

    const KEY: KeyData = KeyData {
        process_id: 100,
        secret_key: 200,
    };

    const EXPECTED: [u8; 16] = [
        0, 0, 0, 16, // length
        0x04, 0xd2, 0x16, 0x2e, // 80877102
        0, 0, 0, 100, // process id
        0, 0, 0, 200, // secret key
    ];

    #[test]
    fn packet_layout() {
        assert_eq!(cancel_request(KEY), EXPECTED);
    }

    #[tokio::test]
    async fn tcp_and_unix_send_the_same_bytes() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = tcp.local_addr().unwrap().port();
        let path = std::env::temp_dir().join(format!("pgcore-cancel-{}.sock", std::process::id()));
        let _ignored = std::fs::remove_file(&path);
        let unix = UnixListener::bind(&path).unwrap();

        let tcp_server = tokio::spawn(async move {
            let (mut socket, _) = tcp.accept().await.unwrap();
            let mut buf = [0u8; 16];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });
        let unix_server = tokio::spawn(async move {
            let (mut socket, _) = unix.accept().await.unwrap();
            let mut buf = [0u8; 16];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let tcp_address = ServerAddress::Tcp {
            host: "127.0.0.1".into(),
            port,
        };
        let unix_address = ServerAddress::Unix(path.clone());
        let (tcp_sent, unix_sent) = tokio::join!(
            async {
                cancel(&tcp_address, Some(KEY), Duration::ZERO).await;
                tcp_server.await.unwrap()
            },
            async {
                cancel(&unix_address, Some(KEY), Duration::ZERO).await;
                unix_server.await.unwrap()
            },
        );
        assert_eq!(tcp_sent, EXPECTED);
        assert_eq!(unix_sent, EXPECTED);
        let _ignored = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        cancel(
            &ServerAddress::Unix("/nonexistent/.s.PGSQL.1".into()),
            Some(KEY),
            Duration::ZERO,
        )
        .await;
        cancel(
            &ServerAddress::Tcp {
                host: "127.0.0.1".into(),
                port: 1,
            },
            None,
            Duration::ZERO,
        )
        .await;
    }

    #[tokio::test]
    async fn servers_that_never_hang_up_are_left_behind() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (read_tx, read_rx) = tokio::sync::oneshot::channel();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            socket.read_exact(&mut buf).await.unwrap();
            let _ignored = read_tx.send(buf);
            // Keep the socket open well past the client's timeout.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let address = ServerAddress::Tcp {
            host: "127.0.0.1".into(),
            port,
        };
        let handle = CancelHandle::new(address, Some(KEY), Duration::from_millis(100));
        tokio::time::timeout(Duration::from_secs(5), handle.cancel())
            .await
            .unwrap();
        assert_eq!(read_rx.await.unwrap(), EXPECTED);
        server.abort();
    }
}

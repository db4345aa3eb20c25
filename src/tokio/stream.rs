//! Async stream abstraction for tokio.

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};

#[cfg(feature = "tokio-tls")]
use tokio_native_tls::TlsStream;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::ServerAddress;

pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "tokio-tls")]
    Tls(BufReader<TlsStream<TcpStream>>),
    Unix(BufReader<UnixStream>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(BufReader::new(stream))
    }

    /// Open a socket to `address`.
    ///
    /// An unresolvable host or a missing socket file is reported as a
    /// connection error rather than a bare I/O error.
    pub async fn connect(address: &ServerAddress) -> Result<Self> {
        match address {
            ServerAddress::Tcp { host, port } => {
                let addrs: Vec<_> = tokio::net::lookup_host((host.as_str(), *port))
                    .await
                    .map_err(|e| Error::connection(format!("address '{}' is unresolved: {}", host, e)))?
                    .collect();
                if addrs.is_empty() {
                    return Err(Error::connection(format!("address '{}' is unresolved", host)));
                }
                let tcp = TcpStream::connect(addrs.as_slice())
                    .await
                    .map_err(|e| Error::connection(format!("{}: {}", address, e)))?;
                tcp.set_nodelay(true)?;
                Ok(Stream::tcp(tcp))
            }
            ServerAddress::Unix(path) => {
                if !path.exists() {
                    return Err(Error::connection(format!(
                        "socket '{}' does not exist",
                        path.display()
                    )));
                }
                let unix = UnixStream::connect(path)
                    .await
                    .map_err(|e| Error::connection(format!("{}: {}", address, e)))?;
                Ok(Stream::unix(unix))
            }
        }
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.read_exact(buf).await.map(|_| ()),
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.read_exact(buf).await.map(|_| ()),
            Stream::Unix(r) => r.read_exact(buf).await.map(|_| ()),
        }
    }

    pub async fn read_u8(&mut self) -> std::io::Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte).await?;
        Ok(byte[0])
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().write_all(buf).await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.get_mut().write_all(buf).await,
            Stream::Unix(r) => r.get_mut().write_all(buf).await,
        }
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().flush().await,
            #[cfg(feature = "tokio-tls")]
            Stream::Tls(r) => r.get_mut().flush().await,
            Stream::Unix(r) => r.get_mut().flush().await,
        }
    }

    /// Write the pending frontend messages and flush.
    pub async fn send(&mut self, buffer_set: &BufferSet) -> std::io::Result<()> {
        self.write_all(&buffer_set.write_buffer).await?;
        self.flush().await
    }

    /// Read one backend message into `buffer_set`.
    pub async fn read_message(&mut self, buffer_set: &mut BufferSet) -> Result<()> {
        let mut header = [0u8; 5];
        self.read_exact(&mut header).await?;
        buffer_set.type_byte = header[0];

        let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        if length < 4 {
            return Err(Error::Protocol(format!(
                "Invalid message length: {}",
                length
            )));
        }

        let payload_len = (length - 4) as usize;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.resize(payload_len, 0);
        self.read_exact(&mut buffer_set.read_buffer).await?;
        Ok(())
    }

    #[cfg(feature = "tokio-tls")]
    pub async fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        let tcp = match self {
            Stream::Tcp(r) => r.into_inner(),
            Stream::Tls(_) => return Err(Error::Protocol("stream is already TLS".into())),
            Stream::Unix(_) => {
                return Err(Error::Unsupported("TLS over a Unix-domain socket".into()));
            }
        };
        let connector = native_tls::TlsConnector::new()?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let tls = connector.connect(host, tcp).await?;
        Ok(Stream::Tls(BufReader::new(tls)))
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Stream::Unix(_))
    }
}

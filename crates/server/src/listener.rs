//! Listening sockets.

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
#[cfg(unix)]
use tokio::net::UnixListener;

use crate::connection::SocketAddress;

/// A bidirectional byte stream: TCP, unix or TLS.
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncIo for T {}

pub type BoxedIo = Box<dyn AsyncIo>;

enum Inner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// A TCP or unix listening socket, optionally serving TLS.
pub struct Listener {
    inner: Inner,
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl Listener {
    pub async fn bind(address: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self::from_tcp(TcpListener::bind(address).await?))
    }

    pub fn from_tcp(listener: TcpListener) -> Self {
        Self { inner: Inner::Tcp(listener), tls: None }
    }

    #[cfg(unix)]
    pub fn bind_unix(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        Ok(Self::from_unix(UnixListener::bind(path)?))
    }

    #[cfg(unix)]
    pub fn from_unix(listener: UnixListener) -> Self {
        Self { inner: Inner::Unix(listener), tls: None }
    }

    /// Serves TLS with `config`. Its ALPN list is replaced when the server
    /// starts, see [`ClientHandler::set_up_listener`](crate::ClientHandler::set_up_listener).
    #[must_use]
    pub fn with_tls(mut self, config: rustls::ServerConfig) -> Self {
        self.tls = Some(Arc::new(config));
        self
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn tls_config(&self) -> Option<&rustls::ServerConfig> {
        self.tls.as_deref()
    }

    /// Replaces the protocols offered during ALPN. Has no effect on plaintext listeners.
    pub fn set_alpn_protocols(&mut self, protocols: Vec<Vec<u8>>) {
        if let Some(config) = self.tls.as_mut() {
            Arc::make_mut(config).alpn_protocols = protocols;
        }
    }

    pub fn local_address(&self) -> io::Result<SocketAddress> {
        match &self.inner {
            Inner::Tcp(listener) => listener.local_addr().map(SocketAddress::Inet),
            #[cfg(unix)]
            Inner::Unix(listener) => listener.local_addr().map(|addr| unix_address(&addr)),
        }
    }

    /// Waits for the next client. The TLS handshake, if any, is left to the caller.
    pub async fn accept(&self) -> io::Result<AcceptedSocket> {
        let (io, remote_address, local_address) = match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, remote) = listener.accept().await?;
                let local = stream.local_addr()?;
                let io: BoxedIo = Box::new(stream);
                (io, SocketAddress::Inet(remote), SocketAddress::Inet(local))
            }
            #[cfg(unix)]
            Inner::Unix(listener) => {
                let (stream, remote) = listener.accept().await?;
                let local = stream.local_addr()?;
                let io: BoxedIo = Box::new(stream);
                (io, unix_address(&remote), unix_address(&local))
            }
        };

        Ok(AcceptedSocket { io, remote_address, local_address, tls: self.tls.clone() })
    }
}

#[cfg(unix)]
fn unix_address(addr: &tokio::net::unix::SocketAddr) -> SocketAddress {
    SocketAddress::Unix(addr.as_pathname().map(ToOwned::to_owned))
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = self.local_address().map(|address| address.to_string());
        f.debug_struct("Listener").field("address", &address).field("tls", &self.is_tls()).finish()
    }
}

/// A freshly accepted socket, before any TLS handshake.
pub struct AcceptedSocket {
    pub io: BoxedIo,
    pub remote_address: SocketAddress,
    pub local_address: SocketAddress,
    /// Handshake config of the listener, `None` for plaintext.
    pub tls: Option<Arc<rustls::ServerConfig>>,
}

impl AcceptedSocket {
    pub fn new(io: impl AsyncIo + 'static, remote_address: SocketAddress, local_address: SocketAddress) -> Self {
        Self { io: Box::new(io), remote_address, local_address, tls: None }
    }

    #[must_use]
    pub fn with_tls(mut self, config: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(config);
        self
    }
}

impl fmt::Debug for AcceptedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptedSocket")
            .field("remote_address", &self.remote_address)
            .field("local_address", &self.local_address)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

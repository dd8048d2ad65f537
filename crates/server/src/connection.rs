//! One accepted client connection.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::trace;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Address of either end of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SocketAddress {
    Inet(SocketAddr),
    /// A unix domain socket; unnamed sockets have no path.
    Unix(Option<PathBuf>),
}

impl SocketAddress {
    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Self::Inet(addr) => Some(addr.ip()),
            Self::Unix(_) => None,
        }
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Self::Unix(_))
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::Inet(addr)
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(addr) => addr.fmt(f),
            Self::Unix(Some(path)) => write!(f, "unix:{}", path.display()),
            Self::Unix(None) => f.write_str("unix:<unnamed>"),
        }
    }
}

/// What the TLS handshake negotiated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsInfo {
    protocol_version: Option<String>,
    cipher_suite: Option<String>,
    alpn_protocol: Option<Vec<u8>>,
    server_name: Option<String>,
}

impl TlsInfo {
    pub(crate) fn from_session(session: &rustls::ServerConnection) -> Self {
        Self {
            protocol_version: session.protocol_version().map(|version| format!("{version:?}")),
            cipher_suite: session.negotiated_cipher_suite().map(|suite| format!("{:?}", suite.suite())),
            alpn_protocol: session.alpn_protocol().map(<[u8]>::to_vec),
            server_name: session.server_name().map(str::to_owned),
        }
    }

    #[must_use]
    pub fn with_alpn_protocol(mut self, protocol: impl Into<Vec<u8>>) -> Self {
        self.alpn_protocol = Some(protocol.into());
        self
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    pub fn cipher_suite(&self) -> Option<&str> {
        self.cipher_suite.as_deref()
    }

    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.alpn_protocol.as_deref()
    }

    /// The SNI host name the client asked for.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }
}

type CloseListener = Box<dyn FnOnce(&Connection) + Send>;

/// An accepted socket after TLS negotiation, as seen by an
/// [`HttpDriver`](crate::driver::HttpDriver).
///
/// The connection does not own the socket. Closing it signals the driver
/// through [`closed`](Self::closed) and runs the close listeners, each one
/// exactly once and in registration order.
pub struct Connection {
    id: u64,
    remote_address: SocketAddress,
    local_address: SocketAddress,
    tls_info: Option<TlsInfo>,
    close_token: CancellationToken,
    // `None` once closed
    close_listeners: Mutex<Option<Vec<CloseListener>>>,
}

impl Connection {
    /// Creates an open connection with a fresh id.
    ///
    /// Cancelling `shutdown` makes [`closed`](Self::closed) resolve, but only
    /// [`close`](Self::close) runs the listeners.
    pub fn new(
        remote_address: SocketAddress,
        local_address: SocketAddress,
        tls_info: Option<TlsInfo>,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote_address,
            local_address,
            tls_info,
            close_token: shutdown.child_token(),
            close_listeners: Mutex::new(Some(Vec::new())),
        }
    }

    /// Process-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_address(&self) -> &SocketAddress {
        &self.remote_address
    }

    pub fn local_address(&self) -> &SocketAddress {
        &self.local_address
    }

    /// `None` for plaintext connections.
    pub fn tls_info(&self) -> Option<&TlsInfo> {
        self.tls_info.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.listeners().is_none()
    }

    /// Closes the connection. Calling it again has no effect.
    pub fn close(&self) {
        let Some(listeners) = self.listeners().take() else {
            return;
        };

        trace!(id = self.id, remote_address = %self.remote_address, "closing connection");
        self.close_token.cancel();
        for listener in listeners {
            listener(self);
        }
    }

    /// Registers `listener` to run when the connection closes; it runs right
    /// away when the connection is already closed.
    pub fn on_close(&self, listener: impl FnOnce(&Connection) + Send + 'static) {
        let mut listeners = self.listeners();
        match listeners.as_mut() {
            Some(listeners) => listeners.push(Box::new(listener)),
            None => {
                drop(listeners);
                listener(self);
            }
        }
    }

    /// Resolves once the connection is closed or the server shuts connections down.
    pub async fn closed(&self) {
        self.close_token.cancelled().await;
    }

    fn listeners(&self) -> MutexGuard<'_, Option<Vec<CloseListener>>> {
        self.close_listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_address", &self.remote_address)
            .field("local_address", &self.local_address)
            .field("tls_info", &self.tls_info)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

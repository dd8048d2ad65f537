//! Turning accepted sockets into served connections.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harbor_http::handler::{ErrorHandler, Handler};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::{DEFAULT_TLS_HANDSHAKE_TIMEOUT, ServerConfig};
use crate::connection::{Connection, SocketAddress, TlsInfo};
use crate::driver::{HttpDriverFactory, Protocol};
use crate::error::ServerError;
use crate::listener::{AcceptedSocket, BoxedIo, Listener};

/// What every connection of a running server shares.
#[derive(Clone)]
pub struct ClientContext {
    pub handler: Arc<dyn Handler>,
    pub error_handler: Arc<dyn ErrorHandler>,
    /// Cancelled when the server closes its remaining connections.
    pub shutdown: CancellationToken,
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext").field("shutdown", &self.shutdown).finish_non_exhaustive()
    }
}

/// Handles one accepted socket for its whole lifetime.
///
/// Implementations are layered: [`ConnectionLimitingClientHandler`](crate::ConnectionLimitingClientHandler)
/// decides whether a socket is served at all and delegates to a
/// [`SocketClientHandler`], which negotiates TLS and runs a driver.
#[async_trait]
pub trait ClientHandler: Send + Sync {
    async fn handle_client(&self, socket: AcceptedSocket, context: &ClientContext) -> Result<(), ServerError>;

    /// Prepares a listener before its accept loop starts.
    fn set_up_listener(&self, _listener: &mut Listener) {}
}

/// Negotiates TLS and ALPN, then hands the connection to a driver.
pub struct SocketClientHandler {
    driver_factory: Arc<dyn HttpDriverFactory>,
    tls_handshake_timeout: Duration,
    alpn_protocols: Vec<String>,
}

impl SocketClientHandler {
    pub fn new(driver_factory: Arc<dyn HttpDriverFactory>, config: &ServerConfig) -> Self {
        Self {
            driver_factory,
            tls_handshake_timeout: config.tls_handshake_timeout,
            alpn_protocols: config.alpn_protocols.clone(),
        }
    }

    /// The configured ALPN protocols the driver factory can serve.
    pub fn offered_protocols(&self) -> Vec<Vec<u8>> {
        let supported = self.driver_factory.supported_protocols();
        self.alpn_protocols
            .iter()
            .filter(|id| Protocol::from_alpn(id.as_bytes()).is_some_and(|protocol| supported.contains(&protocol)))
            .map(|id| id.as_bytes().to_vec())
            .collect()
    }

    /// `Ok(None)` when the handshake timed out or the server shut down first.
    async fn negotiate(
        &self,
        io: BoxedIo,
        tls: Option<Arc<rustls::ServerConfig>>,
        remote_address: &SocketAddress,
        shutdown: &CancellationToken,
    ) -> Result<Option<(BoxedIo, Option<TlsInfo>)>, ServerError> {
        let Some(tls) = tls else {
            return Ok(Some((io, None)));
        };

        let acceptor = TlsAcceptor::from(tls);
        let handshake = tokio::time::timeout(self.tls_handshake_timeout, acceptor.accept(io));
        let accepted = tokio::select! {
            () = shutdown.cancelled() => {
                debug!(%remote_address, "server shutting down, tls handshake abandoned");
                return Ok(None);
            }
            accepted = handshake => accepted,
        };

        match accepted {
            Ok(Ok(stream)) => {
                let tls_info = TlsInfo::from_session(stream.get_ref().1);
                let io: BoxedIo = Box::new(stream);
                Ok(Some((io, Some(tls_info))))
            }
            Ok(Err(e)) => Err(ServerError::handshake(e)),
            Err(_elapsed) => {
                debug!(%remote_address, timeout = ?self.tls_handshake_timeout, "tls handshake timed out");
                Ok(None)
            }
        }
    }
}

impl Default for SocketClientHandler {
    fn default() -> Self {
        Self {
            driver_factory: Arc::new(crate::driver::DefaultHttpDriverFactory::default()),
            tls_handshake_timeout: DEFAULT_TLS_HANDSHAKE_TIMEOUT,
            alpn_protocols: ServerConfig::default().alpn_protocols,
        }
    }
}

#[async_trait]
impl ClientHandler for SocketClientHandler {
    async fn handle_client(&self, socket: AcceptedSocket, context: &ClientContext) -> Result<(), ServerError> {
        let AcceptedSocket { io, remote_address, local_address, tls } = socket;

        let Some((io, tls_info)) = self.negotiate(io, tls, &remote_address, &context.shutdown).await? else {
            return Ok(());
        };

        let protocol =
            tls_info.as_ref().and_then(TlsInfo::alpn_protocol).and_then(Protocol::from_alpn).unwrap_or(Protocol::Http1);

        let connection = Arc::new(Connection::new(remote_address, local_address, tls_info, &context.shutdown));
        let _close = CloseOnDrop(Arc::clone(&connection));
        trace!(id = connection.id(), remote_address = %connection.remote_address(), %protocol, "serving connection");

        let driver = self.driver_factory.create_driver(protocol)?;
        driver.handle_connection(Arc::clone(&connection), io, context).await
    }

    fn set_up_listener(&self, listener: &mut Listener) {
        if listener.is_tls() {
            listener.set_alpn_protocols(self.offered_protocols());
        }
    }
}

impl fmt::Debug for SocketClientHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketClientHandler")
            .field("tls_handshake_timeout", &self.tls_handshake_timeout)
            .field("alpn_protocols", &self.alpn_protocols)
            .finish_non_exhaustive()
    }
}

/// Closes the connection however the driver ends, panics included.
struct CloseOnDrop(Arc<Connection>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DefaultHttpDriverFactory, HttpDriver, MockHttpDriverFactory};
    use crate::test_support::{client_context, client_tls_config, server_tls_config};
    use rustls::pki_types::ServerName;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
    use tokio::net::TcpStream;
    use tokio_rustls::TlsConnector;

    fn unix_socket(io: tokio::io::DuplexStream) -> AcceptedSocket {
        AcceptedSocket::new(io, SocketAddress::Unix(None), SocketAddress::Unix(None))
    }

    struct PanickingDriver(Arc<AtomicBool>);

    #[async_trait]
    impl HttpDriver for PanickingDriver {
        async fn handle_connection(
            &self,
            connection: Arc<Connection>,
            _io: BoxedIo,
            _context: &ClientContext,
        ) -> Result<(), ServerError> {
            let closed = Arc::clone(&self.0);
            connection.on_close(move |_connection| closed.store(true, Ordering::SeqCst));
            panic!("driver failed");
        }
    }

    #[tokio::test]
    async fn handshake_timeout_never_creates_a_driver() {
        let mut factory = MockHttpDriverFactory::new();
        factory.expect_supported_protocols().return_const(vec![Protocol::Http1]);
        factory.expect_create_driver().never();

        let config = ServerConfig::default().with_tls_handshake_timeout(Duration::from_millis(50));
        let handler = SocketClientHandler::new(Arc::new(factory), &config);

        // the client connects but never sends a ClientHello
        let (_client, server) = duplex(4096);
        let socket = unix_socket(server).with_tls(Arc::new(server_tls_config()));

        let result = handler.handle_client(socket, &client_context()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn shutdown_abandons_a_pending_handshake() {
        let mut factory = MockHttpDriverFactory::new();
        factory.expect_supported_protocols().return_const(vec![Protocol::Http1]);
        factory.expect_create_driver().never();

        let config = ServerConfig::default().with_tls_handshake_timeout(Duration::from_secs(60));
        let handler = SocketClientHandler::new(Arc::new(factory), &config);

        let (_client, server) = duplex(4096);
        let socket = unix_socket(server).with_tls(Arc::new(server_tls_config()));
        let context = client_context();
        let shutdown = context.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), handler.handle_client(socket, &context)).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn failed_handshake_is_an_error() {
        let mut factory = MockHttpDriverFactory::new();
        factory.expect_create_driver().never();
        let handler = SocketClientHandler::new(Arc::new(factory), &ServerConfig::default());

        let (mut client, server) = duplex(4096);
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let socket = unix_socket(server).with_tls(Arc::new(server_tls_config()));

        let result = handler.handle_client(socket, &client_context()).await;
        assert!(matches!(result, Err(ServerError::Handshake { .. })));
    }

    #[tokio::test]
    async fn plaintext_uses_http1() {
        let mut factory = MockHttpDriverFactory::new();
        factory
            .expect_create_driver()
            .withf(|protocol| *protocol == Protocol::Http1)
            .times(1)
            .returning(|_protocol| Ok(Arc::new(crate::driver::Http1Driver::default())));
        let handler = SocketClientHandler::new(Arc::new(factory), &ServerConfig::default());

        let (mut client, server) = duplex(4096);
        client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();

        handler.handle_client(unix_socket(server), &client_context()).await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn connection_closes_when_driver_panics() {
        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        let mut factory = MockHttpDriverFactory::new();
        factory.expect_create_driver().returning(move |_protocol| Ok(Arc::new(PanickingDriver(Arc::clone(&flag)))));
        let handler = SocketClientHandler::new(Arc::new(factory), &ServerConfig::default());

        let (_client, server) = duplex(4096);
        let context = client_context();
        let result = tokio::spawn(async move { handler.handle_client(unix_socket(server), &context).await }).await;

        assert!(result.unwrap_err().is_panic());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn offered_protocols_follow_the_factory() {
        let handler = SocketClientHandler::new(
            Arc::new(DefaultHttpDriverFactory::default()),
            &ServerConfig::default().with_alpn_protocols(["h2", "spdy/3", "http/1.1"]),
        );
        assert_eq!(handler.offered_protocols(), [b"http/1.1".to_vec()]);

        let factory = DefaultHttpDriverFactory::default().with_http2(crate::driver::Http1Driver::default());
        let handler = SocketClientHandler::new(Arc::new(factory), &ServerConfig::default());
        assert_eq!(handler.offered_protocols(), [b"h2".to_vec(), b"http/1.1".to_vec()]);
    }

    #[tokio::test]
    async fn tls_negotiates_alpn_and_serves_http1() {
        let handler = SocketClientHandler::default();
        let mut listener = Listener::bind("127.0.0.1:0").await.unwrap().with_tls(server_tls_config());
        handler.set_up_listener(&mut listener);
        let SocketAddress::Inet(address) = listener.local_address().unwrap() else {
            panic!("expected an inet address");
        };

        let server = tokio::spawn(async move {
            let socket = listener.accept().await.unwrap();
            handler.handle_client(socket, &client_context()).await
        });

        let connector = TlsConnector::from(client_tls_config(&["h2", "http/1.1"]));
        let tcp = TcpStream::connect(address).await.unwrap();
        let mut tls = connector.connect(ServerName::try_from("localhost").unwrap(), tcp).await.unwrap();
        assert_eq!(tls.get_ref().1.alpn_protocol(), Some(&b"http/1.1"[..]));

        tls.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await.unwrap();
        let mut response = Vec::new();
        // the server may skip close_notify, so stop at the first read error
        let _ = tls.read_to_end(&mut response).await;

        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("Hello World!"));
        server.await.unwrap().unwrap();
    }
}

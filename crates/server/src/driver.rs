//! Protocol drivers.
//!
//! A driver owns the byte stream of one [`Connection`] and speaks one HTTP
//! version over it. The [`HttpDriverFactory`] picks the driver from the
//! protocol negotiated through ALPN.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use harbor_http::config::ParserConfig;
use harbor_http::connection::HttpConnection;
use tracing::debug;

use crate::client_handler::ClientContext;
use crate::connection::Connection;
use crate::error::ServerError;
use crate::listener::BoxedIo;

/// An application protocol a driver can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http1,
    Http2,
}

impl Protocol {
    /// The ALPN protocol id.
    pub fn alpn_id(self) -> &'static str {
        match self {
            Self::Http1 => "http/1.1",
            Self::Http2 => "h2",
        }
    }

    /// Maps an ALPN protocol id; `None` for ids no driver can serve.
    pub fn from_alpn(id: &[u8]) -> Option<Self> {
        match id {
            b"http/1.1" | b"http/1.0" => Some(Self::Http1),
            b"h2" => Some(Self::Http2),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.alpn_id())
    }
}

#[async_trait]
pub trait HttpDriver: Send + Sync {
    /// Serves `io` until the peer goes away, an error occurs or `connection` is closed.
    async fn handle_connection(
        &self,
        connection: Arc<Connection>,
        io: BoxedIo,
        context: &ClientContext,
    ) -> Result<(), ServerError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait HttpDriverFactory: Send + Sync {
    /// Protocols this factory can create drivers for, in order of preference.
    fn supported_protocols(&self) -> Vec<Protocol>;

    fn create_driver(&self, protocol: Protocol) -> Result<Arc<dyn HttpDriver>, ServerError>;
}

/// Serves HTTP/1.0 and HTTP/1.1 with an [`HttpConnection`].
#[derive(Debug, Clone, Default)]
pub struct Http1Driver {
    parser_config: ParserConfig,
}

impl Http1Driver {
    pub fn new(parser_config: ParserConfig) -> Self {
        Self { parser_config }
    }
}

#[async_trait]
impl HttpDriver for Http1Driver {
    async fn handle_connection(
        &self,
        connection: Arc<Connection>,
        io: BoxedIo,
        context: &ClientContext,
    ) -> Result<(), ServerError> {
        let (reader, writer) = tokio::io::split(io);
        let http_connection = HttpConnection::with_config(reader, writer, self.parser_config.clone());

        tokio::select! {
            result = http_connection.process(context.handler.as_ref(), context.error_handler.as_ref()) => {
                result.map_err(ServerError::from)
            }
            () = connection.closed() => {
                debug!(id = connection.id(), remote_address = %connection.remote_address(), "connection closed while serving");
                Ok(())
            }
        }
    }
}

/// Creates [`Http1Driver`]s, and HTTP/2 drivers once one is plugged in with
/// [`with_http2`](Self::with_http2).
pub struct DefaultHttpDriverFactory {
    http1: Arc<Http1Driver>,
    http2: Option<Arc<dyn HttpDriver>>,
}

impl DefaultHttpDriverFactory {
    pub fn new(parser_config: ParserConfig) -> Self {
        Self { http1: Arc::new(Http1Driver::new(parser_config)), http2: None }
    }

    #[must_use]
    pub fn with_http2(mut self, driver: impl HttpDriver + 'static) -> Self {
        self.http2 = Some(Arc::new(driver));
        self
    }
}

impl Default for DefaultHttpDriverFactory {
    fn default() -> Self {
        Self::new(ParserConfig::request())
    }
}

impl HttpDriverFactory for DefaultHttpDriverFactory {
    fn supported_protocols(&self) -> Vec<Protocol> {
        if self.http2.is_some() { vec![Protocol::Http2, Protocol::Http1] } else { vec![Protocol::Http1] }
    }

    fn create_driver(&self, protocol: Protocol) -> Result<Arc<dyn HttpDriver>, ServerError> {
        match protocol {
            Protocol::Http1 => Ok(Arc::clone(&self.http1) as Arc<dyn HttpDriver>),
            Protocol::Http2 => self.http2.clone().ok_or_else(|| ServerError::unsupported_protocol(protocol)),
        }
    }
}

impl fmt::Debug for DefaultHttpDriverFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultHttpDriverFactory").field("protocols", &self.supported_protocols()).finish()
    }
}

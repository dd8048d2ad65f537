//! Connection admission, TLS negotiation and lifecycle for harbor HTTP servers.
//!
//! An [`HttpServer`] owns a set of [`Listener`]s. Once started, every
//! accepted socket runs through a chain of [`ClientHandler`]s:
//!
//! 1. [`ConnectionLimitingClientHandler`] enforces the global and per-network
//!    connection limits
//! 2. [`SocketClientHandler`] performs the TLS handshake under a timeout and
//!    picks a driver from the ALPN protocol
//! 3. an [`HttpDriver`](driver::HttpDriver), by default the HTTP/1.x one,
//!    parses requests and calls the request handler
//!
//! ```no_run
//! use harbor_http::handler::{make_handler, BoxError};
//! use harbor_http::protocol::body::BodySink;
//! use harbor_server::{HttpServer, Listener, ServerConfig};
//! use http::{Request, Response};
//!
//! async fn hello(_request: Request<BodySink>) -> Result<Response<String>, BoxError> {
//!     Ok(Response::new("Hello World!\r\n".to_string()))
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = Listener::bind("127.0.0.1:8080").await?;
//! let mut server = HttpServer::builder(vec![listener]).config(ServerConfig::load("harbor.toml")?).build()?;
//!
//! server.start(make_handler(hello)).await?;
//! tokio::signal::ctrl_c().await?;
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

mod admission;
mod client_handler;
#[cfg(feature = "compression")]
mod compression;
mod connection;
mod error;
mod listener;
mod server;

pub mod config;
pub mod driver;

#[cfg(test)]
mod test_support;

pub use admission::{AdmissionGuard, AdmissionState, ConnectionLimitingClientHandler, NetworkKey, Rejection};
pub use client_handler::{ClientContext, ClientHandler, SocketClientHandler};
#[cfg(feature = "compression")]
pub use compression::{CompressionHandler, MIN_COMPRESSIBLE_LENGTH};
pub use config::{ConfigError, ServerConfig};
pub use connection::{Connection, SocketAddress, TlsInfo};
pub use error::{CompositeError, ServerError};
pub use listener::{AcceptedSocket, AsyncIo, BoxedIo, Listener};
pub use server::{HttpServer, HttpServerBuilder, ServerStatus};

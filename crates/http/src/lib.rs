//! Incremental HTTP/1.x message parsing and connection handling.
//!
//! This crate turns a byte stream that arrives in arbitrary pieces into
//! complete HTTP/1.x messages, and drives a server connection on top of that
//! parser.
//!
//! # Features
//!
//! - Resumable parser: any split of the input yields the same messages
//! - Request and response parsing (status lines, EOF-delimited bodies)
//! - Content-Length and chunked bodies, trailer fields
//! - Configurable limits answered with `413` and `431`
//! - Bodies spill from memory to a temporary file past a threshold
//! - Pipelining, keep-alive and `Expect: 100-continue`
//!
//! # Example
//!
//! ```no_run
//! use http::{Request, Response};
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn};
//! use harbor_http::connection::HttpConnection;
//! use harbor_http::handler::{make_handler, BoxError, DefaultErrorHandler};
//! use harbor_http::protocol::body::BodySink;
//!
//! #[tokio::main]
//! async fn main() {
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     loop {
//!         let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             let connection = HttpConnection::new(reader, writer);
//!             let handler = make_handler(hello_world);
//!             if let Err(e) = connection.process(&handler, &DefaultErrorHandler).await {
//!                 info!(%remote_addr, cause = %e, "connection closed with error");
//!             }
//!         });
//!     }
//! }
//!
//! async fn hello_world(request: Request<BodySink>) -> Result<Response<String>, BoxError> {
//!     info!(path = request.uri().path(), body_size = request.body().len(), "receiving request");
//!     Ok(Response::new("Hello World!\r\n".to_string()))
//! }
//! ```
//!
//! # Architecture
//!
//! - [`config`]: parser limits and switches
//! - [`codec`]: the [`MessageParser`](codec::MessageParser) and the response encoder
//! - [`protocol`]: parsed messages, body storage and error types
//! - [`handler`]: request and error handler traits
//! - [`connection`]: the HTTP/1.x connection driver
//!
//! # Errors
//!
//! - [`protocol::ParseError`]: malformed or oversized input, each variant
//!   mapped to the status code a server answers with
//! - [`protocol::SendError`]: failures while writing a response
//! - [`protocol::HttpError`]: either of the two

pub mod codec;
pub mod config;
pub mod connection;
pub mod handler;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;

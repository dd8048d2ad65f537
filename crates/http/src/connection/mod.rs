//! HTTP/1.x connection handling.
//!
//! [`HttpConnection`] drives one client connection: it reads requests with the
//! message parser, calls the request handler, and writes responses with the
//! response encoder, keeping the connection alive between requests when both
//! sides allow it.

mod http_connection;

pub use http_connection::HttpConnection;

//! HTTP/1.x codec: the incremental message parser and the response encoder.
//!
//! - [`MessageParser`] turns bytes into [`ParsedMessage`](crate::protocol::ParsedMessage)s.
//!   Header blocks are handled by the `header` module, bodies by the
//!   [`body`] decoders.
//! - [`ResponseEncoder`] writes response heads and bodies, choosing between
//!   `Content-Length` and chunked framing.
//!
//! Both implement the `tokio_util` codec traits, so they plug straight into
//! [`FramedRead`](tokio_util::codec::FramedRead) and
//! [`FramedWrite`](tokio_util::codec::FramedWrite).

pub mod body;
mod header;
mod message_parser;
mod response_encoder;

pub use message_parser::{MessageParser, ParseState};
pub use response_encoder::ResponseEncoder;

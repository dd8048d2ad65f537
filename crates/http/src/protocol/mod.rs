//! Protocol types shared by the codec and the connection layer.
//!
//! - [`ParsedMessage`]: a request or response produced by the parser, with
//!   its body held in a [`body::BodySink`]
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: the framing vocabulary the
//!   response encoder consumes
//! - [`ParseError`], [`SendError`], [`HttpError`]: error types, where every
//!   parse error knows the status code it should be answered with

mod message;
pub use message::Message;
pub use message::MessageHead;
pub use message::ParsedMessage;
pub use message::PayloadItem;
pub use message::PayloadSize;
pub use message::ResponseHead;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;

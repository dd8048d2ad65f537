//! HTTP message body storage.
//!
//! The parser writes decoded body bytes into a [`BodySink`] and hands the sink
//! to the caller once the message is complete. Small bodies stay in memory;
//! bodies larger than the configured swap threshold are moved to an anonymous
//! temporary file so that a slow upload cannot pin large amounts of memory.

mod sink;

pub use sink::BodySink;

//! Incremental HTTP/1.x message parser.
//!
//! [`MessageParser`] is a resumable state machine: it accepts bytes in
//! arbitrarily sized pieces and produces a [`ParsedMessage`] whenever a message
//! is complete. Unconsumed bytes stay buffered, so pipelined messages come out
//! one per call.
//!
//! The parser can be driven two ways:
//!
//! - [`MessageParser::feed`] and [`MessageParser::finish`], with the parser
//!   owning the buffer
//! - as a [`Decoder`], for example inside a
//!   [`FramedRead`](tokio_util::codec::FramedRead), where the caller owns the
//!   buffer and end of stream is signalled through [`Decoder::decode_eof`]
//!
//! # Example
//!
//! ```
//! use harbor_http::codec::MessageParser;
//! use harbor_http::config::ParserConfig;
//!
//! let mut parser = MessageParser::new(ParserConfig::request());
//! assert!(parser.feed(b"GET /foo HTTP/1.1\r\nHost: exa").unwrap().is_none());
//!
//! let message = parser.feed(b"mple.com\r\n\r\n").unwrap().unwrap();
//! assert_eq!(message.method(), Some(&http::Method::GET));
//! assert_eq!(message.headers()["host"], "example.com");
//! ```

use std::mem;

use bytes::{Buf, BytesMut};
use http::header::{CONTENT_LENGTH, TRAILER, TRANSFER_ENCODING};
use http::{HeaderMap, Version};
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use crate::codec::body::{ChunkedDecoder, LengthDecoder};
use crate::codec::header::{BodyFraming, body_framing, parse_fields, parse_head, skip_empty_lines, split_header_block};
use crate::config::ParserConfig;
use crate::ensure;
use crate::protocol::body::BodySink;
use crate::protocol::{MessageHead, ParseError, ParsedMessage, PayloadItem};

/// Where the parser currently is within a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Waiting for a complete header block. Initial state and the state after every message.
    AwaitingHeaders,
    /// Reading a body with a known length.
    BodyIdentity,
    /// Reading a body that ends when the connection closes.
    BodyIdentityEof,
    /// Reading chunked body segments.
    BodyChunks,
    /// The last chunk was read; checking whether trailer fields follow.
    TrailersStart,
    /// Reading the trailer block.
    Trailers,
}

#[derive(Debug)]
enum State {
    AwaitingHeaders,
    BodyIdentity(LengthDecoder),
    BodyIdentityEof,
    BodyChunks(ChunkedDecoder),
    TrailersStart,
    Trailers,
}

/// Per-message data, replaced as a whole when a message completes.
#[derive(Debug)]
struct PartialMessage {
    head: MessageHead,
    version: Version,
    headers: HeaderMap,
    body: Option<BodySink>,
    consumed: u64,
}

impl PartialMessage {
    fn into_parsed(self) -> Result<ParsedMessage, ParseError> {
        let mut body = self.body;
        if let Some(sink) = body.as_mut() {
            std::io::Seek::rewind(sink).map_err(ParseError::body_storage)?;
        }
        Ok(ParsedMessage::new(self.head, self.version, self.headers, body))
    }
}

/// Incremental parser for HTTP/1.x requests or responses.
#[derive(Debug)]
pub struct MessageParser {
    config: ParserConfig,
    state: State,
    buffer: BytesMut,
    message: Option<PartialMessage>,
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl MessageParser {
    /// Creates a parser that owns `config` for its whole lifetime.
    pub fn new(config: ParserConfig) -> Self {
        Self { config, state: State::AwaitingHeaders, buffer: BytesMut::new(), message: None }
    }

    #[inline]
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn state(&self) -> ParseState {
        match self.state {
            State::AwaitingHeaders => ParseState::AwaitingHeaders,
            State::BodyIdentity(_) => ParseState::BodyIdentity,
            State::BodyIdentityEof => ParseState::BodyIdentityEof,
            State::BodyChunks(_) => ParseState::BodyChunks,
            State::TrailersStart => ParseState::TrailersStart,
            State::Trailers => ParseState::Trailers,
        }
    }

    /// Returns true while a message is in progress or the internal buffer holds
    /// anything besides whitespace.
    pub fn has_unfinished_message(&self) -> bool {
        !matches!(self.state, State::AwaitingHeaders) || !self.buffer.iter().all(u8::is_ascii_whitespace)
    }

    /// Returns true if the internal buffer holds unconsumed bytes.
    pub fn has_buffer(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Appends `data` to the internal buffer and tries to produce a message.
    ///
    /// Returns `Ok(None)` when more data is needed. Several pipelined messages
    /// may be buffered at once; call `feed(&[])` to take the next one.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<ParsedMessage>, ParseError> {
        let mut buffer = mem::take(&mut self.buffer);
        buffer.extend_from_slice(data);
        let result = self.decode(&mut buffer);
        self.buffer = buffer;
        result
    }

    /// Signals that no more data will arrive.
    ///
    /// Completes a body that runs until end of stream. Fails with
    /// [`ParseError::IncompleteMessage`] when a message was cut off.
    pub fn finish(&mut self) -> Result<Option<ParsedMessage>, ParseError> {
        let mut buffer = mem::take(&mut self.buffer);
        let result = self.decode_eof(&mut buffer);
        self.buffer = buffer;
        result
    }

    fn start_message(&mut self, src: &mut BytesMut) -> Result<Option<ParsedMessage>, ParseError> {
        skip_empty_lines(src);
        let Some(block) = split_header_block(src, self.config.max_header_bytes)? else {
            return Ok(None);
        };

        let (head, version, headers) = parse_head(&block, self.config.mode)?;
        let framing = body_framing(&head, &headers)?;
        trace!(head = ?head, ?version, header_count = headers.len(), ?framing, "parsed header block");

        let mut message = PartialMessage { head, version, headers, body: None, consumed: 0 };

        self.state = match framing {
            BodyFraming::None | BodyFraming::Length(0) => return message.into_parsed().map(Some),
            BodyFraming::Length(length) => State::BodyIdentity(LengthDecoder::new(length)),
            BodyFraming::Chunked => State::BodyChunks(ChunkedDecoder::new()),
            BodyFraming::UntilEof => State::BodyIdentityEof,
        };
        message.body = Some(BodySink::new(self.config.body_swap_threshold));

        let early = self
            .config
            .emit_headers_before_body
            .then(|| ParsedMessage::headers_only(message.head.clone(), message.version, message.headers.clone()));
        self.message = Some(message);
        Ok(early)
    }

    fn add_to_body(&mut self, data: &[u8]) -> Result<(), ParseError> {
        let Some(message) = self.message.as_mut() else {
            return Ok(());
        };

        message.consumed += data.len() as u64;
        ensure!(
            !self.config.limits_body() || message.consumed <= self.config.max_body_bytes,
            ParseError::too_large_body(message.consumed, self.config.max_body_bytes)
        );

        if let Some(body) = message.body.as_mut() {
            body.append(data).map_err(ParseError::body_storage)?;
        }
        Ok(())
    }

    /// Appends trailer fields after any header fields of the same name.
    fn merge_trailers(&mut self, trailers: HeaderMap) -> Result<(), ParseError> {
        for forbidden in [TRANSFER_ENCODING, CONTENT_LENGTH, TRAILER] {
            ensure!(!trailers.contains_key(&forbidden), ParseError::forbidden_trailer(forbidden.as_str()));
        }

        if let Some(message) = self.message.as_mut() {
            let mut current = None;
            for (name, value) in trailers {
                // a `None` name repeats the previous field
                if name.is_some() {
                    current = name;
                }
                if let Some(name) = &current {
                    message.headers.append(name.clone(), value);
                }
            }
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<Option<ParsedMessage>, ParseError> {
        self.state = State::AwaitingHeaders;
        match self.message.take() {
            Some(message) => {
                trace!(body_size = message.consumed, "message complete");
                message.into_parsed().map(Some)
            }
            None => Ok(None),
        }
    }
}

impl Decoder for MessageParser {
    type Item = ParsedMessage;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match &mut self.state {
                State::AwaitingHeaders => {
                    if let Some(message) = self.start_message(src)? {
                        return Ok(Some(message));
                    }
                    if matches!(self.state, State::AwaitingHeaders) {
                        return Ok(None);
                    }
                }

                State::BodyIdentity(decoder) => match decoder.decode(src)? {
                    Some(PayloadItem::Chunk(bytes)) => self.add_to_body(&bytes)?,
                    Some(PayloadItem::Eof) => return self.complete(),
                    None => return Ok(None),
                },

                State::BodyIdentityEof => {
                    if !src.is_empty() {
                        let bytes = src.split();
                        self.add_to_body(&bytes)?;
                    }
                    return Ok(None);
                }

                State::BodyChunks(decoder) => match decoder.decode(src)? {
                    Some(PayloadItem::Chunk(bytes)) => self.add_to_body(&bytes)?,
                    Some(PayloadItem::Eof) => self.state = State::TrailersStart,
                    None => return Ok(None),
                },

                State::TrailersStart => {
                    if src.starts_with(b"\r\n") {
                        src.advance(2);
                        return self.complete();
                    }
                    if src.starts_with(b"\n") {
                        src.advance(1);
                        return self.complete();
                    }
                    if src.is_empty() || &src[..] == b"\r" {
                        return Ok(None);
                    }
                    self.state = State::Trailers;
                }

                State::Trailers => {
                    let Some(block) = split_header_block(src, self.config.max_header_bytes)? else {
                        return Ok(None);
                    };
                    let trailers = parse_fields(&block)?;
                    self.merge_trailers(trailers)?;
                    return self.complete();
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }

        match self.state {
            State::BodyIdentityEof => self.complete(),
            State::AwaitingHeaders if src.iter().all(u8::is_ascii_whitespace) => {
                src.clear();
                Ok(None)
            }
            _ => {
                debug!(state = ?self.state(), buffered = src.len(), "stream ended in the middle of a message");
                Err(ParseError::IncompleteMessage)
            }
        }
    }
}

use std::any::Any;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;

use bytes::Buf;
use futures::{FutureExt, SinkExt, StreamExt};
use http::header::{CONNECTION, CONTENT_LENGTH, EXPECT};
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode, Version};
use http_body::Body;
use http_body_util::BodyExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::codec::{MessageParser, ResponseEncoder};
use crate::config::{ParseMode, ParserConfig};
use crate::handler::{ErrorHandler, Handler};
use crate::protocol::{HttpError, Message, ParseError, ParsedMessage, PayloadItem, PayloadSize, ResponseHead, SendError};

/// Initial capacity of the read buffer.
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// An HTTP/1.x server connection.
///
/// Reads requests with a [`MessageParser`], hands each complete request to a
/// [`Handler`] and writes the responses back in order:
///
/// - a request carrying `Expect: 100-continue` gets an interim
///   `100 Continue` as soon as its headers are parsed
/// - a failing or panicking handler is answered with `500 Internal Server Error`
/// - a malformed request is answered with the parser's status code, after
///   which the connection closes
/// - `Connection: close` on either side, or an HTTP/1.0 request without
///   `keep-alive`, ends the connection after the response
///
/// # Type Parameters
///
/// * `R`: The async readable stream type
/// * `W`: The async writable stream type
#[derive(Debug)]
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, MessageParser>,
    framed_write: FramedWrite<W, ResponseEncoder>,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_config(reader, writer, ParserConfig::request())
    }

    /// Creates a connection whose parser uses `config`.
    ///
    /// The parser always runs in request mode here, and it always reports
    /// headers early so that `Expect: 100-continue` can be answered.
    pub fn with_config(reader: R, writer: W, config: ParserConfig) -> Self {
        let config = config.with_mode(ParseMode::Request).with_emit_headers_before_body(true);
        Self {
            framed_read: FramedRead::with_capacity(reader, MessageParser::new(config), READ_BUFFER_CAPACITY),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
        }
    }

    /// Serves requests until the peer goes away, a request asks to close, or an error occurs.
    pub async fn process(mut self, handler: &dyn Handler, error_handler: &dyn ErrorHandler) -> Result<(), HttpError> {
        loop {
            match self.framed_read.next().await {
                Some(Ok(message)) if message.is_headers_only() => {
                    if message.version() == Version::HTTP_11 && expects_continue(message.headers()) {
                        self.send_continue().await?;
                    }
                }

                Some(Ok(message)) => {
                    if !self.do_process(message, handler, error_handler).await? {
                        debug!("connection close requested, shutting down");
                        self.framed_write.get_mut().shutdown().await.map_err(SendError::io)?;
                        return Ok(());
                    }
                }

                Some(Err(e)) if e.is_io() => {
                    info!(cause = %e, "can't receive next request");
                    return Err(e.into());
                }

                Some(Err(e)) => {
                    warn!(cause = %e, status = %e.status_code(), "malformed request");
                    let mut response = error_handler.handle_error(e.status_code(), Some(&e.to_string()));
                    response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
                    self.do_send_response(response, false).await?;
                    return Err(e.into());
                }

                None => {
                    debug!("can't read more request, break this connection down");
                    return Ok(());
                }
            }
        }
    }

    async fn send_continue(&mut self) -> Result<(), HttpError> {
        let writer = self.framed_write.get_mut();
        writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
        writer.flush().await.map_err(SendError::io)?;
        debug!("receive expect request header, sent continue response");
        Ok(())
    }

    /// Returns whether the connection stays open afterwards.
    async fn do_process(
        &mut self,
        message: ParsedMessage,
        handler: &dyn Handler,
        error_handler: &dyn ErrorHandler,
    ) -> Result<bool, HttpError> {
        let request = message
            .into_request()
            .map_err(|_message| ParseError::invalid_start_line("expected a request line"))?;

        let is_head = request.method() == Method::HEAD;
        let mut keep_alive = wants_keep_alive(request.version(), request.headers());

        let mut response = match AssertUnwindSafe(handler.call(request)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(cause = %e, "handle response error");
                error_handler.handle_error(StatusCode::INTERNAL_SERVER_ERROR, None)
            }
            Err(panic) => {
                error!(cause = panic_message(panic.as_ref()), "request handler panicked");
                keep_alive = false;
                error_handler.handle_error(StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        if has_token(response.headers(), "close") {
            keep_alive = false;
        }
        if !keep_alive {
            response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
        }

        self.do_send_response(response, is_head).await?;
        Ok(keep_alive)
    }

    async fn do_send_response<T>(&mut self, response: Response<T>, is_head: bool) -> Result<(), HttpError>
    where
        T: Body + Unpin,
        T::Error: Display,
    {
        let (mut header_parts, mut body) = response.into_parts();

        let mut payload_size = match body.size_hint().exact() {
            Some(0) => PayloadSize::Empty,
            Some(length) => PayloadSize::Length(length),
            None => PayloadSize::Chunked,
        };

        if is_head {
            if let PayloadSize::Length(length) = payload_size {
                header_parts.headers.entry(CONTENT_LENGTH).or_insert_with(|| HeaderValue::from(length));
            }
            payload_size = PayloadSize::Empty;
        }

        let header = Message::<_, T::Data>::Header((ResponseHead::from_parts(header_parts, ()), payload_size));
        if payload_size.is_empty() {
            self.framed_write.feed(header).await?;
            self.framed_write.send(Message::Payload(PayloadItem::<T::Data>::Eof)).await?;
            return Ok(());
        }

        self.framed_write.feed(header).await?;
        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    // trailers have no representation in an HTTP/1.1 response here
                    let Ok(data) = frame.into_data() else { continue };
                    if data.has_remaining() {
                        self.framed_write.send(Message::Payload(PayloadItem::Chunk(data))).await?;
                    }
                }
                Some(Err(e)) => return Err(SendError::invalid_body(format!("resolve response body error: {e}")).into()),
                None => {
                    self.framed_write.send(Message::Payload(PayloadItem::<T::Data>::Eof)).await?;
                    return Ok(());
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn expects_continue(headers: &HeaderMap) -> bool {
    headers.get(EXPECT).is_some_and(|value| value.as_bytes().trim_ascii().eq_ignore_ascii_case(b"100-continue"))
}

fn has_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}

fn wants_keep_alive(version: Version, headers: &HeaderMap) -> bool {
    match version {
        Version::HTTP_11 => !has_token(headers, "close"),
        _ => has_token(headers, "keep-alive"),
    }
}

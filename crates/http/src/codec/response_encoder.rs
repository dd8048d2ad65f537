//! Encoder for HTTP/1.1 responses.
//!
//! A response is written as one [`Message::Header`] carrying the head and its
//! [`PayloadSize`], followed by payload items ending with [`PayloadItem::Eof`].
//! The framing headers (`Content-Length` or `Transfer-Encoding`) are set from
//! the payload size, replacing whatever the handler put there.

use std::io;
use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use http::{HeaderValue, StatusCode, header};
use tokio_util::codec::Encoder;
use tracing::error;

use crate::protocol::{Message, PayloadItem, PayloadSize, ResponseHead, SendError};

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 4 * 1024;

/// Serializes response heads and bodies.
#[derive(Debug, Default)]
pub struct ResponseEncoder {
    payload: Option<PayloadState>,
}

#[derive(Debug)]
enum PayloadState {
    Length(u64),
    Chunked,
    Empty,
}

impl ResponseEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while a body is being written.
    pub fn in_payload(&self) -> bool {
        self.payload.is_some()
    }
}

impl<D: Buf> Encoder<Message<(ResponseHead, PayloadSize), D>> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, item: Message<(ResponseHead, PayloadSize), D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                if self.payload.is_some() {
                    error!("expect payload item but receive response head");
                    return Err(SendError::invalid_body("response head while a body is still open"));
                }

                encode_head(head, payload_size, dst)?;
                self.payload = Some(match payload_size {
                    PayloadSize::Length(length) => PayloadState::Length(length),
                    PayloadSize::Chunked => PayloadState::Chunked,
                    PayloadSize::Empty => PayloadState::Empty,
                });
                Ok(())
            }

            Message::Payload(payload_item) => {
                let Some(state) = self.payload.as_mut() else {
                    error!("expect response header but receive payload item");
                    return Err(SendError::invalid_body("payload item before response head"));
                };

                match (state, payload_item) {
                    (PayloadState::Length(remaining), PayloadItem::Chunk(mut bytes)) => {
                        let len = bytes.remaining() as u64;
                        if len > *remaining {
                            return Err(SendError::invalid_body("body is longer than its content-length"));
                        }
                        *remaining -= len;
                        dst.put(&mut bytes);
                    }
                    (PayloadState::Length(remaining), PayloadItem::Eof) => {
                        let missing = *remaining;
                        self.payload = None;
                        if missing > 0 {
                            return Err(SendError::invalid_body(format!("body ended {missing} bytes short of its content-length")));
                        }
                    }
                    (PayloadState::Chunked, PayloadItem::Chunk(mut bytes)) => {
                        // an empty chunk would read as the last chunk
                        if bytes.has_remaining() {
                            write!(FastWrite(dst), "{:X}\r\n", bytes.remaining())?;
                            dst.put(&mut bytes);
                            dst.put_slice(b"\r\n");
                        }
                    }
                    (PayloadState::Chunked, PayloadItem::Eof) => {
                        dst.put_slice(b"0\r\n\r\n");
                        self.payload = None;
                    }
                    (PayloadState::Empty, PayloadItem::Chunk(_)) => {}
                    (PayloadState::Empty, PayloadItem::Eof) => self.payload = None,
                }
                Ok(())
            }
        }
    }
}

fn encode_head(mut head: ResponseHead, payload_size: PayloadSize, dst: &mut BytesMut) -> Result<(), SendError> {
    dst.reserve(INIT_HEADER_SIZE);

    let status = head.status();
    write!(FastWrite(dst), "HTTP/1.1 {} {}\r\n", status.as_str(), status.canonical_reason().unwrap_or(""))?;

    let headers = head.headers_mut();
    match payload_size {
        PayloadSize::Length(n) => {
            headers.remove(header::TRANSFER_ENCODING);
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(n));
        }
        PayloadSize::Chunked => {
            headers.remove(header::CONTENT_LENGTH);
            headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
        PayloadSize::Empty => {
            // a HEAD response keeps the length its GET counterpart would have
            if !headers.contains_key(header::CONTENT_LENGTH) && !never_has_body(status) {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
        }
    }

    for (header_name, header_value) in headers.iter() {
        dst.put_slice(header_name.as_ref());
        dst.put_slice(b": ");
        dst.put_slice(header_value.as_ref());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
    Ok(())
}

fn never_has_body(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

/// Writer for formatting straight into a `BytesMut`.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Response;

    fn head(status: StatusCode) -> ResponseHead {
        Response::builder().status(status).header("x-id", "7").body(()).unwrap()
    }

    fn encode(encoder: &mut ResponseEncoder, item: Message<(ResponseHead, PayloadSize)>, dst: &mut BytesMut) {
        encoder.encode(item, dst).unwrap();
    }

    #[test]
    fn length_body() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        encode(&mut encoder, Message::Header((head(StatusCode::OK), PayloadSize::Length(5))), &mut dst);
        encode(&mut encoder, Message::from(Bytes::from_static(b"hello")), &mut dst);
        encode(&mut encoder, Message::Payload(PayloadItem::Eof), &mut dst);

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\nx-id: 7\r\ncontent-length: 5\r\n\r\nhello");
        assert!(!encoder.in_payload());
    }

    #[test]
    fn chunked_body() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        encode(&mut encoder, Message::Header((head(StatusCode::OK), PayloadSize::Chunked)), &mut dst);
        encode(&mut encoder, Message::from(Bytes::from_static(b"0123456789abcdef!")), &mut dst);
        encode(&mut encoder, Message::from(Bytes::new()), &mut dst);
        encode(&mut encoder, Message::Payload(PayloadItem::Eof), &mut dst);

        assert_eq!(
            &dst[..],
            &b"HTTP/1.1 200 OK\r\nx-id: 7\r\ntransfer-encoding: chunked\r\n\r\n11\r\n0123456789abcdef!\r\n0\r\n\r\n"[..]
        );
    }

    #[test]
    fn empty_body_keeps_declared_length() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();

        let mut response = head(StatusCode::OK);
        response.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(42u64));
        encode(&mut encoder, Message::Header((response, PayloadSize::Empty)), &mut dst);
        encode(&mut encoder, Message::from(Bytes::from_static(b"ignored")), &mut dst);
        encode(&mut encoder, Message::Payload(PayloadItem::Eof), &mut dst);

        assert_eq!(&dst[..], b"HTTP/1.1 200 OK\r\nx-id: 7\r\ncontent-length: 42\r\n\r\n");
    }

    #[test]
    fn no_content_has_no_length() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        encode(&mut encoder, Message::Header((head(StatusCode::NO_CONTENT), PayloadSize::Empty)), &mut dst);
        assert_eq!(&dst[..], b"HTTP/1.1 204 No Content\r\nx-id: 7\r\n\r\n");
    }

    #[test]
    fn body_must_match_length() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        encode(&mut encoder, Message::Header((head(StatusCode::OK), PayloadSize::Length(2))), &mut dst);
        let result = encoder.encode(Message::<(ResponseHead, PayloadSize)>::from(Bytes::from_static(b"abc")), &mut dst);
        assert!(matches!(result, Err(SendError::InvalidBody { .. })));

        let mut encoder = ResponseEncoder::new();
        encode(&mut encoder, Message::Header((head(StatusCode::OK), PayloadSize::Length(2))), &mut dst);
        let result = encoder.encode(Message::<(ResponseHead, PayloadSize)>::Payload(PayloadItem::Eof), &mut dst);
        assert!(matches!(result, Err(SendError::InvalidBody { .. })));
    }

    #[test]
    fn payload_before_head_fails() {
        let mut encoder = ResponseEncoder::new();
        let mut dst = BytesMut::new();
        let result = encoder.encode(Message::<(ResponseHead, PayloadSize)>::Payload(PayloadItem::Eof), &mut dst);
        assert!(result.is_err());
    }
}

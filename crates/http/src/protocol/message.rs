use bytes::{Buf, Bytes};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri, Version};

use crate::protocol::body::BodySink;

/// The header portion of a response, before its body is attached.
pub type ResponseHead = Response<()>;

/// The first line of a parsed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageHead {
    Request { method: Method, uri: Uri },
    Response { status: StatusCode, reason: String },
}

/// A message produced by [`MessageParser`](crate::codec::MessageParser).
///
/// A message is either complete, in which case it owns the full body (if the
/// framing allowed one), or headers-only. Headers-only messages are only
/// produced when
/// [`emit_headers_before_body`](crate::config::ParserConfig::emit_headers_before_body)
/// is enabled; they carry no body and the parser keeps collecting the body for
/// the complete message that follows.
#[derive(Debug)]
pub struct ParsedMessage {
    head: MessageHead,
    version: Version,
    headers: HeaderMap,
    body: Option<BodySink>,
    headers_only: bool,
}

impl ParsedMessage {
    pub(crate) fn new(head: MessageHead, version: Version, headers: HeaderMap, body: Option<BodySink>) -> Self {
        Self { head, version, headers, body, headers_only: false }
    }

    pub(crate) fn headers_only(head: MessageHead, version: Version, headers: HeaderMap) -> Self {
        Self { head, version, headers, body: None, headers_only: true }
    }

    #[inline]
    pub fn head(&self) -> &MessageHead {
        &self.head
    }

    /// Request method, `None` for responses.
    pub fn method(&self) -> Option<&Method> {
        match &self.head {
            MessageHead::Request { method, .. } => Some(method),
            MessageHead::Response { .. } => None,
        }
    }

    /// Request target, `None` for responses.
    pub fn uri(&self) -> Option<&Uri> {
        match &self.head {
            MessageHead::Request { uri, .. } => Some(uri),
            MessageHead::Response { .. } => None,
        }
    }

    /// Response status, `None` for requests.
    pub fn status(&self) -> Option<StatusCode> {
        match &self.head {
            MessageHead::Response { status, .. } => Some(*status),
            MessageHead::Request { .. } => None,
        }
    }

    /// Response reason phrase as sent on the wire, `None` for requests.
    pub fn reason(&self) -> Option<&str> {
        match &self.head {
            MessageHead::Response { reason, .. } => Some(reason),
            MessageHead::Request { .. } => None,
        }
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Header fields, including any trailer fields merged in after a chunked body.
    ///
    /// Names are stored lowercased, lookups are case-insensitive.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn is_headers_only(&self) -> bool {
        self.headers_only
    }

    /// Returns true if the message framing allowed a body.
    #[inline]
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn body_mut(&mut self) -> Option<&mut BodySink> {
        self.body.as_mut()
    }

    pub fn take_body(&mut self) -> Option<BodySink> {
        self.body.take()
    }

    /// Converts a request message into an [`http::Request`].
    ///
    /// A message without a body gets an empty [`BodySink`]. Response messages
    /// are handed back unchanged in the error position.
    pub fn into_request(self) -> Result<Request<BodySink>, ParsedMessage> {
        let MessageHead::Request { method, uri } = self.head else {
            return Err(self);
        };

        let mut request = Request::new(self.body.unwrap_or_default());
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers;
        Ok(request)
    }
}

/// Represents a HTTP message that can either be a header or payload.
///
/// This is what the [`ResponseEncoder`](crate::codec::ResponseEncoder) consumes:
/// one header item followed by payload items ending with [`PayloadItem::Eof`].
#[derive(Debug)]
pub enum Message<T, Data: Buf = Bytes> {
    /// Contains the header information of type `T`
    Header(T),
    /// Contains a chunk of payload data or EOF marker
    Payload(PayloadItem<Data>),
}

/// Represents an item in a payload stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem<Data: Buf = Bytes> {
    /// A chunk of payload data
    Chunk(Data),
    /// Marks the end of the payload stream
    Eof,
}

/// How a payload is framed on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadSize {
    /// Payload with known length in bytes
    Length(u64),
    /// Payload using chunked transfer encoding
    Chunked,
    /// No payload
    Empty,
}

impl PayloadSize {
    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }
}

impl<T> From<Bytes> for Message<T> {
    fn from(bytes: Bytes) -> Self {
        Self::Payload(PayloadItem::Chunk(bytes))
    }
}

impl<D: Buf> PayloadItem<D> {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }
}

impl PayloadItem {
    /// Consumes the item and returns the contained bytes if this is a chunk
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HOST;
    use std::io::Read;

    #[test]
    fn request_conversion_keeps_parts() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, "example.com".parse().unwrap());
        let head = MessageHead::Request { method: Method::POST, uri: "/upload".parse().unwrap() };
        let message = ParsedMessage::new(head, Version::HTTP_10, headers, Some(BodySink::from_bytes("data")));

        let request = message.into_request().unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path(), "/upload");
        assert_eq!(request.version(), Version::HTTP_10);
        assert_eq!(request.headers()[HOST], "example.com");

        let mut body = String::new();
        request.into_body().read_to_string(&mut body).unwrap();
        assert_eq!(body, "data");
    }

    #[test]
    fn response_is_not_a_request() {
        let head = MessageHead::Response { status: StatusCode::NOT_FOUND, reason: "Not Found".into() };
        let message = ParsedMessage::new(head, Version::HTTP_11, HeaderMap::new(), None);

        assert_eq!(message.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(message.reason(), Some("Not Found"));
        assert!(message.method().is_none());
        assert!(message.into_request().is_err());
    }
}

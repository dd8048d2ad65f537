//! Gzip response compression.
//!
//! [`CompressionHandler`] wraps the request handler and gzips response
//! bodies for clients that send `Accept-Encoding: gzip`. Bodies are encoded
//! frame by frame as they stream out; small bodies, already encoded bodies
//! and bodiless statuses pass through untouched.

use std::fmt;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use flate2::Compression;
use flate2::write::GzEncoder;
use harbor_http::handler::{BoxError, Handler, ResponseBody, box_body};
use harbor_http::protocol::body::BodySink;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Request, Response, StatusCode};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use tracing::trace;

/// Bodies known to be smaller than this are sent as they are.
pub const MIN_COMPRESSIBLE_LENGTH: u64 = 860;

/// Growable output buffer for the encoder.
#[derive(Debug, Default)]
struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pin_project! {
    /// Gzips the data frames of the inner body.
    struct GzipBody<B> {
        #[pin]
        inner: B,
        // `None` once the gzip footer has been emitted
        encoder: Option<GzEncoder<Writer>>,
    }
}

impl<B> GzipBody<B> {
    fn new(inner: B) -> Self {
        Self { inner, encoder: Some(GzEncoder::new(Writer::default(), Compression::default())) }
    }
}

impl<B> Body for GzipBody<B>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            let Some(encoder) = this.encoder.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    let Ok(mut data) = frame.into_data() else {
                        trace!("dropping trailers of a compressed body");
                        continue;
                    };
                    while data.has_remaining() {
                        let chunk = data.chunk();
                        encoder.write_all(chunk)?;
                        let len = chunk.len();
                        data.advance(len);
                    }

                    let bytes = encoder.get_mut().take();
                    if !bytes.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(bytes))));
                    }
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                None => {
                    let Some(encoder) = this.encoder.take() else {
                        return Poll::Ready(None);
                    };
                    let bytes = encoder.finish()?.take();
                    return Poll::Ready(if bytes.is_empty() { None } else { Some(Ok(Frame::data(bytes))) });
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.encoder.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

/// A [`Handler`] that gzips the responses of another handler.
pub struct CompressionHandler {
    inner: Arc<dyn Handler>,
}

impl CompressionHandler {
    pub fn new(inner: Arc<dyn Handler>) -> Self {
        Self { inner }
    }
}

impl fmt::Debug for CompressionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl Handler for CompressionHandler {
    async fn call(&self, request: Request<BodySink>) -> Result<Response<ResponseBody>, BoxError> {
        let accepts_gzip = accepts_gzip(request.headers());
        let response = self.inner.call(request).await?;

        if !accepts_gzip || !should_compress(&response) {
            return Ok(response);
        }

        let (mut parts, body) = response.into_parts();
        parts.headers.remove(header::CONTENT_LENGTH);
        parts.headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        parts.headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));
        Ok(Response::from_parts(parts, box_body(GzipBody::new(body))))
    }
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|coding| {
            let mut params = coding.split(';').map(str::trim);
            let name = params.next().unwrap_or_default();
            let refused = params.any(|param| matches!(param.strip_prefix("q="), Some(q) if q.parse::<f32>().is_ok_and(|q| q <= 0.0)));
            (name.eq_ignore_ascii_case("gzip") || name == "*") && !refused
        })
}

fn should_compress(response: &Response<ResponseBody>) -> bool {
    let status = response.status();
    if status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return false;
    }

    let headers = response.headers();
    if headers.contains_key(header::CONTENT_ENCODING) {
        return false;
    }
    if let Some(content_type) = headers.get(header::CONTENT_TYPE).and_then(|value| value.to_str().ok())
        && !is_compressible(content_type)
    {
        return false;
    }

    let body = response.body();
    !body.is_end_stream() && body.size_hint().upper().is_none_or(|upper| upper >= MIN_COMPRESSIBLE_LENGTH)
}

fn is_compressible(content_type: &str) -> bool {
    let content_type = content_type.trim().to_ascii_lowercase();
    content_type.starts_with("text/")
        || content_type.contains("json")
        || content_type.contains("xml")
        || content_type.contains("javascript")
        || content_type.starts_with("image/svg")
}

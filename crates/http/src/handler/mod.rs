//! Request and error handler contracts.
//!
//! A [`Handler`] receives a complete request, with the body already collected
//! in a [`BodySink`], and produces a response whose body is any
//! [`http_body::Body`] boxed into a [`ResponseBody`]. Async functions become
//! handlers through [`make_handler`].
//!
//! An [`ErrorHandler`] renders the responses the server sends on its own, for
//! example `400 Bad Request` for a malformed message or `500` when a handler
//! fails.

use std::error::Error;
use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderValue, Request, Response, StatusCode, header};
use http_body::Body;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};

use crate::protocol::body::BodySink;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Type-erased response body.
pub type ResponseBody = BoxBody<Bytes, BoxError>;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: Request<BodySink>) -> Result<Response<ResponseBody>, BoxError>;
}

/// A [`Handler`] backed by an async function, see [`make_handler`].
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut, B, Err> Handler for HandlerFn<F>
where
    F: Fn(Request<BodySink>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<B>, Err>> + Send,
    B: Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
    Err: Into<BoxError>,
{
    async fn call(&self, request: Request<BodySink>) -> Result<Response<ResponseBody>, BoxError> {
        let response = (self.f)(request).await.map_err(Into::into)?;
        Ok(response.map(box_body))
    }
}

/// Wraps an async function into a [`Handler`].
///
/// ```
/// use harbor_http::handler::{make_handler, BoxError};
/// use harbor_http::protocol::body::BodySink;
/// use http::{Request, Response};
///
/// async fn hello(_request: Request<BodySink>) -> Result<Response<String>, BoxError> {
///     Ok(Response::new("Hello World!\r\n".to_string()))
/// }
///
/// let handler = make_handler(hello);
/// ```
pub fn make_handler<F, Fut, B, Err>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<BodySink>) -> Fut,
    Fut: Future<Output = Result<Response<B>, Err>>,
    B: Body<Data = Bytes>,
    Err: Into<BoxError>,
{
    HandlerFn { f }
}

/// Boxes any body with `Bytes` data into a [`ResponseBody`].
pub fn box_body<B>(body: B) -> ResponseBody
where
    B: Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(|e| -> BoxError { e.into() }).boxed()
}

pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

pub fn empty_body() -> ResponseBody {
    Empty::new().map_err(|never| match never {}).boxed()
}

/// Renders responses for failures the server answers on its own.
pub trait ErrorHandler: Send + Sync {
    /// `reason` carries a short description of the failure when one is known.
    fn handle_error(&self, status: StatusCode, reason: Option<&str>) -> Response<ResponseBody>;
}

/// Answers with the status line repeated as a small plain-text body.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle_error(&self, status: StatusCode, reason: Option<&str>) -> Response<ResponseBody> {
        let text = format!("{} {}", status.as_str(), status.canonical_reason().or(reason).unwrap_or("Error"));

        let mut response = Response::new(full_body(text.clone()));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(text.len()));
        response
    }
}

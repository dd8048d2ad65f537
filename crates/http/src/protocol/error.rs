use std::io;

use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },
}

/// Failure while turning bytes into a message.
///
/// Every variant except [`ParseError::Io`] maps to the HTTP status a server
/// should answer with, see [`ParseError::status_code`].
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("body size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeBody { current_size: u64, max_size: u64 },

    #[error("invalid start line: {reason}")]
    InvalidStartLine { reason: String },

    #[error("unsupported http version: {version}")]
    UnsupportedVersion { version: String },

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("forbidden trailer field: {name}")]
    ForbiddenTrailer { name: String },

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("connection closed before the message was complete")]
    IncompleteMessage,

    #[error("body storage error: {source}")]
    BodyStorage { source: io::Error },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_large_body(current_size: u64, max_size: u64) -> Self {
        Self::TooLargeBody { current_size, max_size }
    }

    pub fn invalid_start_line<S: ToString>(str: S) -> Self {
        Self::InvalidStartLine { reason: str.to_string() }
    }

    pub fn unsupported_version<S: ToString>(str: S) -> Self {
        Self::UnsupportedVersion { version: str.to_string() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn forbidden_trailer<S: ToString>(str: S) -> Self {
        Self::ForbiddenTrailer { name: str.to_string() }
    }

    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn body_storage(e: io::Error) -> Self {
        Self::BodyStorage { source: e }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    /// The status code a server answers this error with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TooLargeHeader { .. } => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            Self::TooLargeBody { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedVersion { .. } => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            Self::BodyStorage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidStartLine { .. }
            | Self::InvalidMethod
            | Self::InvalidUri
            | Self::InvalidHeader { .. }
            | Self::ForbiddenTrailer { .. }
            | Self::InvalidContentLength { .. }
            | Self::InvalidBody { .. }
            | Self::IncompleteMessage
            | Self::Io { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Transport failures carry no protocol meaning and get no response.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("invalid body: {reason}")]
    InvalidBody { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn invalid_body<S: ToString>(str: S) -> Self {
        Self::InvalidBody { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ParseError::too_large_header(9000, 8192).status_code().as_u16(), 431);
        assert_eq!(ParseError::too_large_body(11, 10).status_code().as_u16(), 413);
        assert_eq!(ParseError::unsupported_version("2.0").status_code().as_u16(), 505);
        assert_eq!(ParseError::forbidden_trailer("content-length").status_code().as_u16(), 400);
        assert_eq!(ParseError::InvalidMethod.status_code().as_u16(), 400);
        assert!(ParseError::io(io::Error::from(io::ErrorKind::BrokenPipe)).is_io());
    }
}

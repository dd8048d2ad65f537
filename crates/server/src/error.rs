use std::fmt;
use std::io;

use harbor_http::handler::BoxError;
use harbor_http::protocol::HttpError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::driver::Protocol;
use crate::server::ServerStatus;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("can't {action} the server while it is {status}")]
    InvalidStatus { action: &'static str, status: ServerStatus },

    #[error("listeners were closed by a previous stop")]
    ListenersClosed,

    #[error("a server needs at least one listener")]
    NoListeners,

    #[error("invalid server config: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error(transparent)]
    Lifecycle(#[from] CompositeError),

    #[error("tls handshake failed: {source}")]
    Handshake { source: io::Error },

    #[error("no driver available for {protocol}")]
    UnsupportedProtocol { protocol: Protocol },

    #[error("http error: {source}")]
    Http {
        #[from]
        source: HttpError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ServerError {
    pub fn invalid_status(action: &'static str, status: ServerStatus) -> Self {
        Self::InvalidStatus { action, status }
    }

    pub fn handshake(source: io::Error) -> Self {
        Self::Handshake { source }
    }

    pub fn unsupported_protocol(protocol: Protocol) -> Self {
        Self::UnsupportedProtocol { protocol }
    }
}

/// Every failure collected while running the start or stop hooks.
#[derive(Debug)]
pub struct CompositeError {
    phase: &'static str,
    errors: Vec<BoxError>,
}

impl CompositeError {
    pub(crate) fn new(phase: &'static str, errors: Vec<BoxError>) -> Self {
        Self { phase, errors }
    }

    /// `"start"` or `"stop"`.
    pub fn phase(&self) -> &'static str {
        self.phase
    }

    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<BoxError> {
        self.errors
    }
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} hook(s) failed", self.errors.len(), self.phase)?;
        for (i, e) in self.errors.iter().enumerate() {
            let separator = if i == 0 { ": " } else { "; " };
            write!(f, "{separator}{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompositeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_message_lists_every_failure() {
        let errors: Vec<BoxError> = vec!["database unreachable".into(), io::Error::other("port in use").into()];
        let error = CompositeError::new("start", errors);

        assert_eq!(error.phase(), "start");
        assert_eq!(error.errors().len(), 2);
        assert_eq!(error.to_string(), "2 start hook(s) failed: database unreachable; port in use");
    }

    #[test]
    fn invalid_status_message() {
        let error = ServerError::invalid_status("stop", ServerStatus::Starting);
        assert_eq!(error.to_string(), "can't stop the server while it is starting");
    }
}

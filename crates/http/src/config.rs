//! Parser configuration.
//!
//! [`ParserConfig`] is a fixed, explicitly enumerated set of limits and
//! switches. It can be built in code with the `with_*` methods or deserialized
//! from a configuration file; unknown keys are rejected during
//! deserialization rather than silently ignored.

use serde::Deserialize;

/// Default maximum size of a header block (start line plus header fields).
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;

/// Default maximum number of body bytes a single message may carry.
pub const DEFAULT_MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// Default number of body bytes kept in memory before spilling to a temporary file.
pub const DEFAULT_BODY_SWAP_THRESHOLD: usize = 2 * 1024 * 1024;

/// Which side of the conversation the parser reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// Parse request lines, as a server does.
    #[default]
    Request,
    /// Parse status lines, as a client or proxy does.
    Response,
}

/// Limits and behaviour switches for a [`MessageParser`](crate::codec::MessageParser).
///
/// The parser takes its own copy when it is constructed, so a config can no
/// longer change once parsing has begun.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParserConfig {
    /// Largest accepted header block; exceeding it fails with `431`.
    pub max_header_bytes: usize,
    /// Largest accepted body; exceeding it fails with `413`. `0` disables the limit.
    pub max_body_bytes: u64,
    /// Body bytes kept in memory before the body sink spills to disk.
    pub body_swap_threshold: usize,
    /// Deliver a headers-only message as soon as the header block is parsed.
    pub emit_headers_before_body: bool,
    /// Request or response parsing.
    pub mode: ParseMode,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            body_swap_threshold: DEFAULT_BODY_SWAP_THRESHOLD,
            emit_headers_before_body: false,
            mode: ParseMode::Request,
        }
    }
}

impl ParserConfig {
    /// Default configuration for parsing requests.
    pub fn request() -> Self {
        Self::default()
    }

    /// Default configuration for parsing responses.
    pub fn response() -> Self {
        Self { mode: ParseMode::Response, ..Self::default() }
    }

    #[must_use]
    pub fn with_max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.max_header_bytes = max_header_bytes;
        self
    }

    #[must_use]
    pub fn with_max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    #[must_use]
    pub fn with_body_swap_threshold(mut self, body_swap_threshold: usize) -> Self {
        self.body_swap_threshold = body_swap_threshold;
        self
    }

    #[must_use]
    pub fn with_emit_headers_before_body(mut self, emit: bool) -> Self {
        self.emit_headers_before_body = emit;
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ParseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns true when a body limit is configured.
    #[inline]
    pub fn limits_body(&self) -> bool {
        self.max_body_bytes != 0
    }
}

//! Body framing decoders used by the message parser.
//!
//! - [`ChunkedDecoder`]: chunked transfer coding up to the last-chunk line
//! - [`LengthDecoder`]: bodies with a known `Content-Length`

mod chunked_decoder;
mod length_decoder;

pub use chunked_decoder::ChunkedDecoder;
pub use length_decoder::LengthDecoder;

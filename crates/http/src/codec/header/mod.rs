//! Header block processing: locating the block, parsing the start line and
//! the header fields, and deciding how the body is framed.

mod header_decoder;

pub(crate) use header_decoder::{BodyFraming, body_framing, parse_fields, parse_head, skip_empty_lines, split_header_block};

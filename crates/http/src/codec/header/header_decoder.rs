//! Header block extraction and parsing.
//!
//! The decoder works in stages:
//!
//! 1. Skip empty lines in front of a message and locate the blank line that
//!    ends the header block ([`split_header_block`])
//! 2. Parse the start line, either a request line or a status line
//!    ([`parse_head`])
//! 3. Collapse obsolete line folding and tokenize the header fields with
//!    `httparse` ([`parse_fields`])
//! 4. Decide how the body is framed ([`body_framing`])
//!
//! Line endings may be `CRLF` or a bare `LF`; both are accepted everywhere.

use bytes::{Buf, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};
use httparse::Status;
use tracing::trace;

use crate::config::ParseMode;
use crate::ensure;
use crate::protocol::{MessageHead, ParseError};

/// How the body following a header block is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    /// The message has no body.
    None,
    /// Exactly this many bytes follow.
    Length(u64),
    /// Chunked transfer coding, followed by optional trailers.
    Chunked,
    /// Everything until the peer closes the connection.
    UntilEof,
}

/// Discards `CRLF` or `LF` lines in front of a message.
pub(crate) fn skip_empty_lines(src: &mut BytesMut) -> usize {
    let mut skipped = 0;
    loop {
        if src.starts_with(b"\r\n") {
            src.advance(2);
            skipped += 2;
        } else if src.starts_with(b"\n") {
            src.advance(1);
            skipped += 1;
        } else {
            return skipped;
        }
    }
}

/// Finds the earliest blank line in `src`.
///
/// Returns the length of the block up to and including the line break of
/// its last line, and the number of bytes the whole section occupies including
/// the terminating blank line.
fn find_block_end(src: &[u8]) -> Option<(usize, usize)> {
    let mut offset = 0;
    while let Some(pos) = src[offset..].iter().position(|b| *b == b'\n') {
        let lf = offset + pos;
        let rest = &src[lf + 1..];
        if rest.starts_with(b"\n") {
            return Some((lf + 1, lf + 2));
        }
        if rest.starts_with(b"\r\n") {
            return Some((lf + 1, lf + 3));
        }
        offset = lf + 1;
    }
    None
}

/// Splits a complete header block off the front of `src`.
///
/// The returned block ends with the line break of its last line; the blank
/// line is consumed but not returned. Returns `Ok(None)` while the terminator
/// has not arrived yet.
///
/// The size checked against `max_header_bytes` is the whole section including
/// the blank line. Before the terminator is seen, buffered bytes beyond the
/// limit already prove the section too large, so the outcome is the same no
/// matter how the input was split.
pub(crate) fn split_header_block(src: &mut BytesMut, max_header_bytes: usize) -> Result<Option<Bytes>, ParseError> {
    let Some((block_len, section_len)) = find_block_end(src) else {
        ensure!(src.len() <= max_header_bytes, ParseError::too_large_header(src.len(), max_header_bytes));
        return Ok(None);
    };

    ensure!(section_len <= max_header_bytes, ParseError::too_large_header(section_len, max_header_bytes));

    let block = src.split_to(section_len).freeze().slice(..block_len);
    trace!(header_size = section_len, "split header block");
    Ok(Some(block))
}

/// Parses a header block into its start line and header fields.
pub(crate) fn parse_head(block: &[u8], mode: ParseMode) -> Result<(MessageHead, Version, HeaderMap), ParseError> {
    let (start_line, raw_fields) = match block.iter().position(|b| *b == b'\n') {
        Some(pos) => (&block[..pos], &block[pos + 1..]),
        None => (block, &[][..]),
    };
    let start_line = start_line.strip_suffix(b"\r").unwrap_or(start_line);

    let (head, version) = match mode {
        ParseMode::Request => parse_request_line(start_line)?,
        ParseMode::Response => parse_status_line(start_line)?,
    };

    let headers = if raw_fields.is_empty() { HeaderMap::new() } else { parse_fields(raw_fields)? };
    Ok((head, version, headers))
}

/// `method SP target SP version`, nothing before or after.
fn parse_request_line(line: &[u8]) -> Result<(MessageHead, Version), ParseError> {
    let invalid = || ParseError::invalid_start_line(String::from_utf8_lossy(line));

    let mut parts = line.trim_ascii().split(|b| *b == b' ');
    let (Some(method), Some(target), Some(protocol), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    ensure!(!method.is_empty() && !target.is_empty() && !protocol.is_empty(), invalid());

    let method = Method::from_bytes(method).map_err(|_e| ParseError::InvalidMethod)?;
    let uri = Uri::try_from(target).map_err(|_e| ParseError::InvalidUri)?;

    let number = match protocol.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case(b"HTTP/") => &protocol[5..],
        _ => protocol,
    };
    let version = match number {
        b"1.1" => Version::HTTP_11,
        b"1.0" => Version::HTTP_10,
        other => return Err(ParseError::unsupported_version(String::from_utf8_lossy(other))),
    };

    Ok((MessageHead::Request { method, uri }, version))
}

/// `HTTP/<major>.<minor> SP+ <status> SP* <reason>`, where status is `1xx` to `5xx`.
fn parse_status_line(line: &[u8]) -> Result<(MessageHead, Version), ParseError> {
    let invalid = || ParseError::invalid_start_line(String::from_utf8_lossy(line));
    let is_blank = |b: &u8| *b == b' ' || *b == b'\t';

    let rest = match line.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case(b"HTTP/") => &line[5..],
        _ => return Err(invalid()),
    };

    let version_end = rest.iter().position(is_blank).ok_or_else(invalid)?;
    let version = response_version(&rest[..version_end]).ok_or_else(invalid)?;

    let rest = &rest[version_end..];
    let rest = &rest[rest.iter().take_while(|b| is_blank(b)).count()..];

    let code = rest.get(..3).ok_or_else(invalid)?;
    ensure!(matches!(code[0], b'1'..=b'5') && code[1].is_ascii_digit() && code[2].is_ascii_digit(), invalid());
    let status = StatusCode::from_bytes(code).map_err(|_e| invalid())?;

    let reason = &rest[3..];
    let reason = &reason[reason.iter().take_while(|b| is_blank(b)).count()..];
    ensure!(!reason.iter().any(|b| (*b < 0x20 && *b != b'\t') || *b == 0x7f), invalid());

    Ok((MessageHead::Response { status, reason: String::from_utf8_lossy(reason).into_owned() }, version))
}

fn response_version(number: &[u8]) -> Option<Version> {
    let dot = number.iter().position(|b| *b == b'.')?;
    let (major, minor) = (&number[..dot], &number[dot + 1..]);
    if major.is_empty() || minor.is_empty() || !major.iter().chain(minor).all(u8::is_ascii_digit) {
        return None;
    }

    match (major, minor) {
        (b"0", b"9") => Some(Version::HTTP_09),
        (b"1", b"0") => Some(Version::HTTP_10),
        (b"1", b"1") => Some(Version::HTTP_11),
        (b"2", _) => Some(Version::HTTP_2),
        (b"3", _) => Some(Version::HTTP_3),
        _ => None,
    }
}

/// Parses `name: value` lines, each ending in `CRLF` or `LF`.
///
/// Obsolete line folding is collapsed into a single space first. Names are
/// lowercased by [`HeaderName`]; repeated fields keep their arrival order.
pub(crate) fn parse_fields(raw: &[u8]) -> Result<HeaderMap, ParseError> {
    let mut unfolded = unfold(raw);
    if !unfolded.ends_with(b"\n") {
        unfolded.push(b'\n');
    }
    unfolded.extend_from_slice(b"\r\n");

    let line_count = unfolded.iter().filter(|b| **b == b'\n').count();
    let mut slots = vec![httparse::EMPTY_HEADER; line_count];

    let fields = match httparse::parse_headers(&unfolded, &mut slots) {
        Ok(Status::Complete((_, fields))) => fields,
        Ok(Status::Partial) => return Err(ParseError::invalid_header("unterminated header field")),
        Err(e) => return Err(ParseError::invalid_header(e)),
    };

    let mut headers = HeaderMap::with_capacity(fields.len());
    for field in fields {
        let name = HeaderName::from_bytes(field.name.as_bytes()).map_err(ParseError::invalid_header)?;
        let value = HeaderValue::from_bytes(field.value.trim_ascii()).map_err(ParseError::invalid_header)?;
        headers.append(name, value);
    }

    Ok(headers)
}

fn unfold(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 2);
    let mut i = 0;
    while i < raw.len() {
        let line_break = match &raw[i..] {
            [b'\r', b'\n', ..] => 2,
            [b'\n', ..] => 1,
            _ => 0,
        };

        if line_break > 0 && matches!(raw.get(i + line_break), Some(b' ' | b'\t')) {
            i += line_break;
            while matches!(raw.get(i), Some(b' ' | b'\t')) {
                i += 1;
            }
            out.push(b' ');
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

/// Decides how the body of a message is delimited.
///
/// `HEAD`, `TRACE` and `OPTIONS` requests and `1xx`, `204` and `304` responses
/// never have a body. Otherwise a `Transfer-Encoding` other than `identity`
/// means chunked, then `Content-Length` gives the exact size. Requests
/// without either have no body; responses run until EOF.
pub(crate) fn body_framing(head: &MessageHead, headers: &HeaderMap) -> Result<BodyFraming, ParseError> {
    let fallback = match head {
        MessageHead::Request { method, .. } => {
            if method == Method::HEAD || method == Method::TRACE || method == Method::OPTIONS {
                return Ok(BodyFraming::None);
            }
            BodyFraming::None
        }
        MessageHead::Response { status, .. } => {
            if *status == StatusCode::NO_CONTENT || *status == StatusCode::NOT_MODIFIED || status.is_informational() {
                return Ok(BodyFraming::None);
            }
            BodyFraming::UntilEof
        }
    };

    if let Some(te) = headers.get(TRANSFER_ENCODING)
        && !te.as_bytes().trim_ascii().eq_ignore_ascii_case(b"identity")
    {
        return Ok(BodyFraming::Chunked);
    }

    match content_length(headers)? {
        Some(length) => Ok(BodyFraming::Length(length)),
        None => Ok(fallback),
    }
}

fn content_length(headers: &HeaderMap) -> Result<Option<u64>, ParseError> {
    let mut length = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let text = value.to_str().map_err(|_e| ParseError::invalid_content_length("value is not visible ascii"))?;
        let trimmed = text.trim();
        ensure!(
            !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()),
            ParseError::invalid_content_length(format!("value {text} is not a non-negative integer"))
        );
        let parsed = trimmed
            .parse::<u64>()
            .map_err(|_e| ParseError::invalid_content_length(format!("value {text} is out of range")))?;

        match length {
            Some(previous) if previous != parsed => {
                return Err(ParseError::invalid_content_length(format!("conflicting values {previous} and {parsed}")));
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{ACCEPT, HOST, USER_AGENT};
    use indoc::indoc;

    fn head(str: &str, mode: ParseMode) -> Result<(MessageHead, Version, HeaderMap), ParseError> {
        parse_head(str.as_bytes(), mode)
    }

    #[test]
    fn split_waits_for_blank_line() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nHost: a\r\n\r");
        assert!(split_header_block(&mut buf, 8192).unwrap().is_none());

        buf.extend_from_slice(b"\nbody");
        let block = split_header_block(&mut buf, 8192).unwrap().unwrap();
        assert_eq!(&block[..], b"GET / HTTP/1.1\r\nHost: a\r\n");
        assert_eq!(&buf[..], b"body");
    }

    #[test]
    fn split_takes_earliest_terminator() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\nHost: a\n\nX: b\r\n\r\n");
        let block = split_header_block(&mut buf, 8192).unwrap().unwrap();
        assert_eq!(&block[..], b"GET / HTTP/1.1\nHost: a\n");
        assert_eq!(&buf[..], b"X: b\r\n\r\n");
    }

    #[test]
    fn skips_leading_empty_lines() {
        let mut buf = BytesMut::from("\r\n\n\r\nGET / HTTP/1.1\r\n\r\n");
        assert_eq!(skip_empty_lines(&mut buf), 5);
        assert!(buf.starts_with(b"GET"));
    }

    #[test]
    fn oversized_block() {
        let mut unterminated = BytesMut::from(&[b'a'; 33][..]);
        let err = split_header_block(&mut unterminated, 32).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);

        let mut terminated = BytesMut::from("GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
        let err = split_header_block(&mut terminated, 32).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);

        let exact = "GET / HTTP/1.1\r\nHost: a.com\r\n\r\n";
        let mut exact_buf = BytesMut::from(exact);
        assert!(split_header_block(&mut exact_buf, exact.len()).unwrap().is_some());
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*
        "##};

        let (head, version, headers) = head(str, ParseMode::Request).unwrap();
        let MessageHead::Request { method, uri } = head else { panic!("expected a request") };

        assert_eq!(method, Method::GET);
        assert_eq!(uri.path(), "/index.html");
        assert_eq!(version, Version::HTTP_11);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[HOST], "127.0.0.1:8080");
        assert_eq!(headers[USER_AGENT], "curl/7.79.1");
        assert_eq!(headers[ACCEPT], "*/*");
    }

    #[test]
    fn repeated_fields_keep_order() {
        let (_, _, headers) = head("GET / HTTP/1.0\r\nX-Tag: a\r\nx-tag: b\r\nX-TAG: c\r\n", ParseMode::Request).unwrap();
        let values: Vec<_> = headers.get_all("x-tag").iter().map(|v| v.to_str().unwrap()).collect();
        assert_eq!(values, ["a", "b", "c"]);
    }

    #[test]
    fn folded_header_is_collapsed() {
        let (_, _, headers) =
            head("GET / HTTP/1.1\r\nX-Long: first\r\n   second\r\n\tthird\r\nHost: a\r\n", ParseMode::Request).unwrap();
        assert_eq!(headers["x-long"], "first second third");
        assert_eq!(headers[HOST], "a");
    }

    #[test]
    fn invalid_request_lines() {
        for line in ["GET /\r\n", "GET  / HTTP/1.1\r\n", " \r\n", "GET / HTTP/1.1 extra\r\n", "G\u{1}T / HTTP/1.1\r\n"] {
            let err = head(line, ParseMode::Request).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST, "{line:?}");
        }
    }

    #[test]
    fn unsupported_versions() {
        for line in ["GET / HTTP/2.0\r\n", "GET / HTTP/0.9\r\n", "GET / FOO\r\n"] {
            let err = head(line, ParseMode::Request).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::HTTP_VERSION_NOT_SUPPORTED, "{line:?}");
        }

        let (_, version, _) = head("GET / http/1.0\r\n", ParseMode::Request).unwrap();
        assert_eq!(version, Version::HTTP_10);
    }

    #[test]
    fn invalid_header_field() {
        let err = head("GET / HTTP/1.1\r\nNo colon here\r\n", ParseMode::Request).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = head("GET / HTTP/1.1\r\nBad Name: x\r\n", ParseMode::Request).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn status_lines() {
        let (head, version, _) = head("HTTP/1.1 404 Not Found\r\n", ParseMode::Response).unwrap();
        assert_eq!(version, Version::HTTP_11);
        assert_eq!(head, MessageHead::Response { status: StatusCode::NOT_FOUND, reason: "Not Found".into() });

        let (head, _, _) = self::head("HTTP/1.0 204\r\n", ParseMode::Response).unwrap();
        assert_eq!(head, MessageHead::Response { status: StatusCode::NO_CONTENT, reason: String::new() });

        for line in ["HTTP/1.1 600 Nope\r\n", "HTTP/1.1 20 OK\r\n", "HTTP/x.1 200 OK\r\n", "HTTX/1.1 200 OK\r\n"] {
            let err = self::head(line, ParseMode::Response).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST, "{line:?}");
        }
    }

    #[test]
    fn request_framing() {
        let request = |method: Method| MessageHead::Request { method, uri: Uri::from_static("/") };
        let mut headers = HeaderMap::new();
        assert_eq!(body_framing(&request(Method::POST), &headers).unwrap(), BodyFraming::None);

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("12"));
        assert_eq!(body_framing(&request(Method::POST), &headers).unwrap(), BodyFraming::Length(12));
        assert_eq!(body_framing(&request(Method::HEAD), &headers).unwrap(), BodyFraming::None);

        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert_eq!(body_framing(&request(Method::POST), &headers).unwrap(), BodyFraming::Chunked);

        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("Identity"));
        assert_eq!(body_framing(&request(Method::POST), &headers).unwrap(), BodyFraming::Length(12));
    }

    #[test]
    fn response_framing() {
        let response = |status: StatusCode| MessageHead::Response { status, reason: String::new() };
        let mut headers = HeaderMap::new();
        assert_eq!(body_framing(&response(StatusCode::OK), &headers).unwrap(), BodyFraming::UntilEof);

        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("5"));
        assert_eq!(body_framing(&response(StatusCode::OK), &headers).unwrap(), BodyFraming::Length(5));
        assert_eq!(body_framing(&response(StatusCode::NOT_MODIFIED), &headers).unwrap(), BodyFraming::None);
        assert_eq!(body_framing(&response(StatusCode::CONTINUE), &headers).unwrap(), BodyFraming::None);
    }

    #[test]
    fn malformed_content_length() {
        let post = MessageHead::Request { method: Method::POST, uri: Uri::from_static("/") };
        for value in ["-1", "abc", "1 2", "", "99999999999999999999999"] {
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_LENGTH, HeaderValue::from_str(value).unwrap());
            let err = body_framing(&post, &headers).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST, "{value:?}");
        }

        let mut headers = HeaderMap::new();
        headers.append(CONTENT_LENGTH, HeaderValue::from_static("3"));
        headers.append(CONTENT_LENGTH, HeaderValue::from_static("4"));
        assert!(body_framing(&post, &headers).is_err());

        let mut headers = HeaderMap::new();
        headers.append(CONTENT_LENGTH, HeaderValue::from_static("3"));
        headers.append(CONTENT_LENGTH, HeaderValue::from_static(" 3 "));
        assert_eq!(body_framing(&post, &headers).unwrap(), BodyFraming::Length(3));
    }
}

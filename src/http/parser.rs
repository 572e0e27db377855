//! Incremental HTTP/1.1 request-head parser.
//!
//! Bytes are appended as they arrive; each call to [`RequestParser::next_event`]
//! re-tokenizes the buffered bytes with `httparse`, so the result does not
//! depend on how the input was chunked.

use thiserror::Error;

/// Why a request head was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The start-line or headers are not valid HTTP/1.x.
    #[error("malformed request head: {0}")]
    Malformed(String),
    /// More bytes were buffered than allowed without completing a head.
    #[error("request head exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl From<httparse::Error> for ParseError {
    fn from(e: httparse::Error) -> Self {
        ParseError::Malformed(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }
}

/// A fully parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub target: String,
    pub version: HttpVersion,
    /// Header names as sent, values as raw bytes, in wire order.
    pub headers: Vec<(String, Vec<u8>)>,
    /// Length of the head (start-line, headers and the blank line) in bytes.
    pub head_len: usize,
}

impl ParsedRequest {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

/// What the parser can say about the bytes seen so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// The head is incomplete; feed more bytes.
    NeedData,
    /// A complete request head.
    Request(ParsedRequest),
    /// The input can never become a valid request head.
    ProtocolError(ParseError),
}

/// Buffers client bytes until a request head is complete.
#[derive(Debug)]
pub struct RequestParser {
    buf: Vec<u8>,
    max_incomplete_event_size: usize,
    max_headers: usize,
}

impl RequestParser {
    pub fn new(max_incomplete_event_size: usize, max_headers: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_incomplete_event_size,
            max_headers: max_headers.max(1),
        }
    }

    pub fn receive_data(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Every byte received so far, including any past the end of the head.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    pub fn next_event(&self) -> ParseEvent {
        if self.buf.is_empty() {
            return ParseEvent::NeedData;
        }

        let mut headers = vec![httparse::EMPTY_HEADER; self.max_headers];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(&self.buf) {
            Ok(httparse::Status::Complete(head_len)) => {
                let version = match req.version {
                    Some(0) => HttpVersion::Http10,
                    _ => HttpVersion::Http11,
                };
                ParseEvent::Request(ParsedRequest {
                    method: req.method.unwrap_or_default().to_string(),
                    target: req.path.unwrap_or_default().to_string(),
                    version,
                    headers: req
                        .headers
                        .iter()
                        .map(|h| (h.name.to_string(), h.value.to_vec()))
                        .collect(),
                    head_len,
                })
            }
            Ok(httparse::Status::Partial) => {
                if self.buf.len() > self.max_incomplete_event_size {
                    ParseEvent::ProtocolError(ParseError::TooLarge {
                        limit: self.max_incomplete_event_size,
                    })
                } else {
                    ParseEvent::NeedData
                }
            }
            Err(e) => ParseEvent::ProtocolError(e.into()),
        }
    }
}

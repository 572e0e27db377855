//! Upstream target resolution from the `Host` header.
//!
//! `host` → port 80, `host:port` → explicit port, anything else is rejected.
//! Pure: no DNS, no shared state.

use thiserror::Error;

use crate::http::ParsedRequest;

/// Port used when the `Host` header names none.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Why a request could not be mapped to an upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("request has no Host header")]
    MissingHostHeader,
    #[error("malformed Host header: {0:?}")]
    MalformedHostHeader(String),
}

/// Where to dial.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolve the target of a parsed request. The first `Host` header wins.
pub fn resolve_target(request: &ParsedRequest) -> Result<Target, ResolveError> {
    let value = request.header("host").ok_or(ResolveError::MissingHostHeader)?;
    parse_host(value)
}

/// Split a raw `Host` header value into host and port.
pub fn parse_host(value: &[u8]) -> Result<Target, ResolveError> {
    let malformed = || ResolveError::MalformedHostHeader(String::from_utf8_lossy(value).into_owned());

    let value = std::str::from_utf8(value).map_err(|_| malformed())?.trim();

    let mut parts = value.split(':');
    let host = parts.next().unwrap_or_default();
    let port = match (parts.next(), parts.next()) {
        (None, _) => DEFAULT_HTTP_PORT,
        (Some(port), None) => port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(malformed)?,
        (Some(_), Some(_)) => return Err(malformed()),
    };

    if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(malformed());
    }

    Ok(Target::new(host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpVersion;

    fn request_with(headers: &[(&str, &[u8])]) -> ParsedRequest {
        ParsedRequest {
            method: "GET".to_string(),
            target: "/".to_string(),
            version: HttpVersion::Http11,
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_vec()))
                .collect(),
            head_len: 0,
        }
    }

    #[test]
    fn bare_host_defaults_to_port_80() {
        assert_eq!(parse_host(b"example.com"), Ok(Target::new("example.com", 80)));
    }

    #[test]
    fn explicit_port_is_used() {
        assert_eq!(parse_host(b"example.com:8080"), Ok(Target::new("example.com", 8080)));
    }

    #[test]
    fn missing_header_is_reported() {
        let request = request_with(&[("Accept", b"*/*")]);
        assert_eq!(resolve_target(&request), Err(ResolveError::MissingHostHeader));
    }

    #[test]
    fn header_lookup_is_case_insensitive_and_first_wins() {
        let request = request_with(&[("HOST", b"a.test:81"), ("host", b"b.test")]);
        assert_eq!(resolve_target(&request), Ok(Target::new("a.test", 81)));
    }

    #[test]
    fn malformed_values_are_rejected() {
        for value in [
            &b"a:b:c"[..],
            b"[::1]:8080",
            b"example.com:",
            b"example.com:http",
            b"example.com:0",
            b"example.com:70000",
            b":8080",
            b"",
            b"exa mple.com",
            b"\xff\xfe",
        ] {
            assert!(
                matches!(parse_host(value), Err(ResolveError::MalformedHostHeader(_))),
                "{:?} should be malformed",
                String::from_utf8_lossy(value)
            );
        }
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(parse_host(b" localhost:9000 "), Ok(Target::new("localhost", 9000)));
    }

    #[test]
    fn display_is_host_colon_port() {
        assert_eq!(Target::new("localhost", 9000).to_string(), "localhost:9000");
    }
}

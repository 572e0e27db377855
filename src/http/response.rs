//! Minimal synthetic responses sent before dropping a failed connection.

/// The error responses the proxy can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorResponse {
    /// Unparsable request head or unusable Host header.
    BadRequest,
    /// Upstream refused or was unreachable.
    BadGateway,
    /// Upstream did not accept before the dial deadline.
    GatewayTimeout,
}

impl ErrorResponse {
    pub fn status(&self) -> u16 {
        match self {
            ErrorResponse::BadRequest => 400,
            ErrorResponse::BadGateway => 502,
            ErrorResponse::GatewayTimeout => 504,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ErrorResponse::BadRequest => "Bad Request",
            ErrorResponse::BadGateway => "Bad Gateway",
            ErrorResponse::GatewayTimeout => "Gateway Timeout",
        }
    }

    /// Serialized response with a plain-text body naming the status.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.reason();
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status(),
            self.reason(),
            body.len(),
            body
        )
        .into_bytes()
    }
}

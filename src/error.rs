//! Error types for a proxied connection.

use std::time::Duration;
use thiserror::Error;

use crate::http::response::ErrorResponse;
use crate::http::ParseError;
use crate::net::registry::RegistryError;
use crate::net::relay::RelayError;
use crate::resilience::DialError;
use crate::routing::ResolveError;

/// Result type alias for connection handling.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Everything that can end a connection early.
///
/// Each variant is contained to the connection it happened on.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Dial(#[from] DialError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The client hung up before sending a complete request head.
    #[error("client closed before sending a complete request")]
    ClientClosed,

    /// No bytes arrived while waiting for a request head.
    #[error("no request within keep-alive timeout of {0:?}")]
    KeepAliveExpired(Duration),

    /// Reading the request head failed.
    #[error("client read failed: {0}")]
    ClientIo(std::io::Error),
}

impl ProxyError {
    /// Response to send the client before closing, if any.
    pub fn error_response(&self) -> Option<ErrorResponse> {
        match self {
            ProxyError::Parse(_) | ProxyError::Resolve(_) => Some(ErrorResponse::BadRequest),
            ProxyError::Dial(DialError::Connect(_)) => Some(ErrorResponse::BadGateway),
            ProxyError::Dial(DialError::Timeout(_)) => Some(ErrorResponse::GatewayTimeout),
            ProxyError::Relay(_)
            | ProxyError::Registry(_)
            | ProxyError::ClientClosed
            | ProxyError::KeepAliveExpired(_)
            | ProxyError::ClientIo(_) => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Parse(_) => "parse_error",
            ProxyError::Resolve(ResolveError::MissingHostHeader) => "missing_host_header",
            ProxyError::Resolve(ResolveError::MalformedHostHeader(_)) => "malformed_host_header",
            ProxyError::Dial(DialError::Connect(_)) => "dial_error",
            ProxyError::Dial(DialError::Timeout(_)) => "dial_timeout",
            ProxyError::Relay(_) => "relay_error",
            ProxyError::Registry(_) => "registry",
            ProxyError::ClientClosed => "client_closed",
            ProxyError::KeepAliveExpired(_) => "keep_alive_expired",
            ProxyError::ClientIo(_) => "client_io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_follow_failure_kind() {
        let parse: ProxyError = ParseError::TooLarge { limit: 1 }.into();
        assert_eq!(parse.error_response(), Some(ErrorResponse::BadRequest));

        let host: ProxyError = ResolveError::MissingHostHeader.into();
        assert_eq!(host.error_response(), Some(ErrorResponse::BadRequest));
        assert_eq!(host.kind(), "missing_host_header");

        let refused: ProxyError =
            DialError::Connect(std::io::ErrorKind::ConnectionRefused.into()).into();
        assert_eq!(refused.error_response(), Some(ErrorResponse::BadGateway));

        let timeout: ProxyError = DialError::Timeout(Duration::from_secs(1)).into();
        assert_eq!(timeout.error_response(), Some(ErrorResponse::GatewayTimeout));
    }

    #[test]
    fn idle_and_eof_close_silently() {
        assert_eq!(ProxyError::ClientClosed.error_response(), None);
        assert_eq!(
            ProxyError::KeepAliveExpired(Duration::from_secs(5)).error_response(),
            None
        );
    }
}

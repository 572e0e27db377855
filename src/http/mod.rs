//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept loop, task spawning, drain on shutdown)
//!     → handler.rs (per-connection state machine)
//!     → parser.rs (incremental request-head parsing)
//!     → [routing resolves the upstream, net::relay moves raw bytes]
//!     → response.rs (synthetic error responses on failure)
//! ```

pub mod handler;
pub mod parser;
pub mod response;
pub mod server;

pub use handler::ConnectionHandler;
pub use parser::{HttpVersion, ParseError, ParseEvent, ParsedRequest, RequestParser};
pub use response::ErrorResponse;
pub use server::ProxyServer;

//! Forward HTTP proxy.
//!
//! Accepts client connections, reads one HTTP/1.x request head, connects to
//! the host named in its `Host` header and then relays raw bytes in both
//! directions until either side closes.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client                ┌──────────────────────────────────────────────┐
//!     ─────────────────────▶│ net::listener → http::server → http::handler │
//!                           │                                  │           │
//!                           │         http::parser ◀───────────┤           │
//!                           │         routing::target ◀────────┤           │
//!                           │         resilience::timeouts ◀───┤  dial     │
//!                           │                                  ▼           │
//!     ◀────────────────────▶│                            net::relay ◀──────┼────▶ Upstream
//!                           │                                              │
//!                           │  net::registry (live connections + tasks)    │
//!                           │  config · observability · lifecycle          │
//!                           └──────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod routing;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::ProxyServer;
pub use lifecycle::Shutdown;

//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Parsed request head
//!     → target.rs (Host header → host, port)
//!     → Target handed to the dialer
//! ```
//!
//! # Design Decisions
//! - The Host header is the only routing input
//! - Resolution is pure; DNS happens inside the dial, under its deadline

pub mod target;

pub use target::{parse_host, resolve_target, ResolveError, Target, DEFAULT_HTTP_PORT};

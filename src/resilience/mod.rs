//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dial to upstream:
//!     → timeouts.rs (enforce dial deadline, drop the half-open socket on expiry)
//! ```
//!
//! # Design Decisions
//! - Every dial has a deadline unless explicitly disabled
//! - Single attempt: a failed or expired dial closes the client connection

pub mod timeouts;

pub use timeouts::{with_dial_timeout, DialError};

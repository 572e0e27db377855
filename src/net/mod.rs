//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → registry.rs (membership + task table for shutdown)
//!     → connection.rs (identity, lifecycle states, upstream link)
//!     → Hand off to HTTP layer until the target is known
//!     → relay.rs (raw bytes in both directions)
//!
//! Connection States:
//!     Accepted → AwaitingRequest → ResolvingTarget → DialingUpstream → Relaying → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - The upstream link refers to its client by id only

pub mod connection;
pub mod listener;
pub mod registry;
pub mod relay;

pub use connection::{ConnectionId, ConnectionInfo, ConnectionState, Scheme, UpstreamLink};
pub use listener::{ClientStream, ConnectionPermit, Listener, ListenerError};
pub use registry::{ConnectionRegistry, Registration, RegistryError};
pub use relay::{relay, RelayError, RelayOutcome, RelayStats, Side};

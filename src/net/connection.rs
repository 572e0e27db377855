//! Connection identity, state machine states, and per-connection metadata.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Name the states a proxied connection moves through
//! - Describe a client connection (addresses, scheme, timestamps)
//! - Describe the upstream side once a dial succeeds

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::routing::Target;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its lifecycle.
///
/// ```text
/// Accepted → AwaitingRequest → ResolvingTarget → DialingUpstream → Relaying
///     any state → Closing → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Registered, nothing read yet.
    Accepted,
    /// Buffering bytes until the request head parses.
    AwaitingRequest,
    /// Extracting the destination from the request head.
    ResolvingTarget,
    /// Upstream connect in flight under the dial deadline.
    DialingUpstream,
    /// Raw bytes flowing in both directions.
    Relaying,
    /// Tearing down both legs.
    Closing,
    /// Finished; about to leave the registry.
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::AwaitingRequest => "awaiting_request",
            ConnectionState::ResolvingTarget => "resolving_target",
            ConnectionState::DialingUpstream => "dialing_upstream",
            ConnectionState::Relaying => "relaying",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }

    /// Whether moving to `next` follows the lifecycle order.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (*self, next),
            (Accepted, AwaitingRequest)
                | (AwaitingRequest, ResolvingTarget)
                | (ResolvingTarget, DialingUpstream)
                | (DialingUpstream, Relaying)
                | (Accepted | AwaitingRequest | ResolvingTarget | DialingUpstream | Relaying, Closing)
                | (Closing, Closed)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// URL scheme the client spoke to us with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn from_tls(is_tls: bool) -> Self {
        if is_tls {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Metadata describing one accepted client connection.
///
/// The registry stores a copy of this; it never holds the client stream.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
    pub scheme: Scheme,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub state: ConnectionState,
}

impl ConnectionInfo {
    pub fn new(peer_addr: Option<SocketAddr>, local_addr: Option<SocketAddr>, scheme: Scheme) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            peer_addr,
            local_addr,
            scheme,
            created_at: now,
            last_activity: now,
            state: ConnectionState::Accepted,
        }
    }
}

/// The upstream half of a proxied connection.
///
/// `client` is a lookup key only; the link never keeps the client stream alive.
#[derive(Debug)]
pub struct UpstreamLink {
    pub stream: TcpStream,
    pub target: Target,
    pub client: ConnectionId,
    pub established_at: Instant,
}

impl UpstreamLink {
    pub fn new(stream: TcpStream, target: Target, client: ConnectionId) -> Self {
        Self {
            stream,
            target,
            client,
            established_at: Instant::now(),
        }
    }
}

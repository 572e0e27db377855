//! Bidirectional byte relay between a client and its upstream.
//!
//! # Data Flow
//! ```text
//! client ──read──▶ pump ──write_all──▶ upstream
//! client ◀──write_all── pump ◀──read── upstream
//! ```
//!
//! # Design Decisions
//! - Each pump awaits its write before reading again, so a slow destination
//!   stops reads from its source
//! - The relay ends as soon as either pump sees EOF or an error
//! - Bytes are never inspected or re-framed

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::observability::metrics;

/// Which leg of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Upstream,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Upstream => "upstream",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// I/O failure on one leg of the relay.
#[derive(Debug, Error)]
#[error("{side} leg failed: {source}")]
pub struct RelayError {
    pub side: Side,
    #[source]
    pub source: std::io::Error,
}

impl RelayError {
    pub fn new(side: Side, source: std::io::Error) -> Self {
        Self { side, source }
    }
}

/// Bytes moved in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// How a relay finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// The side whose end-of-stream stopped the relay.
    pub closed_by: Side,
    pub stats: RelayStats,
}

/// Run both pumps until either side closes.
///
/// Write halves are shut down afterwards on a best-effort basis; the caller
/// still owns and drops both streams.
pub async fn relay<C, U>(
    client: &mut C,
    upstream: &mut U,
    buffer_size: usize,
) -> Result<RelayOutcome, RelayError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let mut stats = RelayStats::default();

    let result = {
        let (mut client_read, mut client_write) = tokio::io::split(&mut *client);
        let (mut upstream_read, mut upstream_write) = tokio::io::split(&mut *upstream);

        let to_upstream = pump(
            &mut client_read,
            &mut upstream_write,
            buffer_size,
            Side::Client,
            &mut stats.client_to_upstream,
        );
        let to_client = pump(
            &mut upstream_read,
            &mut client_write,
            buffer_size,
            Side::Upstream,
            &mut stats.upstream_to_client,
        );
        tokio::pin!(to_upstream, to_client);

        tokio::select! {
            res = &mut to_upstream => res.map(|()| Side::Client),
            res = &mut to_client => res.map(|()| Side::Upstream),
        }
    };

    let _ = upstream.shutdown().await;
    let _ = client.shutdown().await;

    metrics::record_relay_bytes("client_to_upstream", stats.client_to_upstream);
    metrics::record_relay_bytes("upstream_to_client", stats.upstream_to_client);

    result.map(|closed_by| RelayOutcome { closed_by, stats })
}

/// Copy from `source` into `sink` until EOF, counting bytes into `moved`.
///
/// `source_side` names the leg being read; write failures belong to the other leg.
async fn pump<R, W>(
    source: &mut R,
    sink: &mut W,
    buffer_size: usize,
    source_side: Side,
    moved: &mut u64,
) -> Result<(), RelayError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let sink_side = match source_side {
        Side::Client => Side::Upstream,
        Side::Upstream => Side::Client,
    };
    let mut buf = vec![0u8; buffer_size.max(1)];

    loop {
        let n = source
            .read(&mut buf)
            .await
            .map_err(|e| RelayError::new(source_side, e))?;
        if n == 0 {
            return Ok(());
        }
        sink.write_all(&buf[..n])
            .await
            .map_err(|e| RelayError::new(sink_side, e))?;
        sink.flush().await.map_err(|e| RelayError::new(sink_side, e))?;
        *moved += n as u64;
    }
}

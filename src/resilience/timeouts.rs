//! Timeout enforcement for upstream dials.
//!
//! # Responsibilities
//! - Wrap the upstream connect with a deadline
//! - Cancel the connect cleanly on expiry
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Non-positive or absent delays mean "wait forever"
//! - Delays above 5 seconds round the deadline up to a whole second of the
//!   timer clock, so many connections dialled at once share expiry instants
//! - On expiry the dial future is dropped, which closes any half-open socket

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Delays at or below this many seconds keep their exact deadline.
pub const CEIL_THRESHOLD_SECS: f64 = 5.0;

/// Reference point for whole-second deadline boundaries.
static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

fn clock_epoch() -> Instant {
    *CLOCK_EPOCH.get_or_init(Instant::now)
}

/// Failure to establish an upstream connection.
#[derive(Debug, Error)]
pub enum DialError {
    /// The upstream refused or was unreachable.
    #[error("upstream connect failed: {0}")]
    Connect(#[from] std::io::Error),
    /// The connect did not finish before the deadline.
    #[error("upstream connect timed out after {0:?}")]
    Timeout(Duration),
}

impl DialError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            DialError::Connect(_) => "connect",
            DialError::Timeout(_) => "timeout",
        }
    }
}

/// Compute the deadline for a dial started at `now`.
///
/// Returns `None` when no timeout applies.
pub fn dial_deadline(delay_secs: Option<f64>, now: Instant) -> Option<Instant> {
    let delay = delay_secs.filter(|d| d.is_finite() && *d > 0.0)?;
    let when = now + Duration::from_secs_f64(delay);
    if delay <= CEIL_THRESHOLD_SECS {
        return Some(when);
    }

    // Deadlines before the epoch can only come from a paused test clock; keep them exact.
    let epoch = clock_epoch();
    match when.checked_duration_since(epoch) {
        Some(since) => {
            let secs = since.as_secs_f64().ceil();
            Some(epoch + Duration::from_secs_f64(secs))
        }
        None => Some(when),
    }
}

/// Run `dial` under the deadline derived from `delay_secs`.
pub async fn with_dial_timeout<F, T>(delay_secs: Option<f64>, dial: F) -> Result<T, DialError>
where
    F: Future<Output = std::io::Result<T>>,
{
    let now = Instant::now();
    match dial_deadline(delay_secs, now) {
        None => Ok(dial.await?),
        Some(deadline) => match tokio::time::timeout_at(deadline, dial).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DialError::Timeout(deadline.saturating_duration_since(now))),
        },
    }
}

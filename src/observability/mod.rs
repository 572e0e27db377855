//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every per-connection event carries `connection_id`
//! - Metrics are cheap (atomic increments)
//! - The metrics endpoint is off unless enabled in config

pub mod logging;
pub mod metrics;

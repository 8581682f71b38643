//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout via the fmt layer
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through log fields of every forwarded exchange
//! - Metric updates are fire-and-forget; with no recorder installed they are no-ops

pub mod logging;
pub mod metrics;

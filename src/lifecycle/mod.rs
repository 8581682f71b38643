//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → metrics exporter → gateway context → listener → admin → accept
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Close pairs
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: fail fast on any error before the listener accepts
//! - Shutdown has a deadline: pairs still open after it are closed immediately

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{run, StartupError};

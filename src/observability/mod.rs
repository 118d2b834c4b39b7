//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through the request span
//! - A session logs one record per state transition and at most one
//!   diagnostic when it is aborted

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;

//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Sessions, auth gate, probes:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (plain or JSON)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Session IDs and request IDs are attached as structured fields
//! - Metrics are cheap (atomic increments behind the facade)

pub mod logging;
pub mod metrics;

//! Health probe subsystem.
//!
//! # Data Flow
//! ```text
//! GET /Availability | /Health
//!     → probes.rs (exact path lookup)
//!     → injected async predicate
//!     → 200 {"Value": true} | 404 {"Value": false}
//! ```
//!
//! # Design Decisions
//! - Probes bypass the authentication gate
//! - Probe mode (availability, health, dual) is chosen at startup

pub mod probes;

pub use probes::{
    always_ok, check_fn, endpoint_check_fn, pass_unknown, EndpointCheck, ProbeCheck, ProbeChecks,
    ProbeKind, ProbeTable,
};

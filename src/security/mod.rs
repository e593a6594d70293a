//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Issuance (auth path):
//!     → issuance.rs (parse credentials, ask Authenticator)
//!     → token.rs (sign "<uri>\n<expiry>")
//!     → {"access_token", "token_type": "bearer"}
//!
//! Upgrade request:
//!     → gate.rs (bearer header → token.rs decompose/verify)
//!     → AuthContext extension → session
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any check failure
//! - No internal failure detail in responses

pub mod gate;
pub mod issuance;
pub mod token;

pub use gate::{require_bearer, AuthContext, AuthFailure, AuthGate, GateSettings};
pub use issuance::{
    AccessTokenResponse, AuthenticationRequest, Authenticator, DenyAll, IssuanceState,
    StaticCredentials,
};
pub use token::TokenError;

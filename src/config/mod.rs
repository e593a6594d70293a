//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → watcher.rs compares with the config in effect
//!     → server swaps gate settings atomically (auth changes only)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Only authentication settings are hot-reloaded; listener, paths and
//!   session timing apply at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuthConfig, ListenerConfig, ObservabilityConfig, ProbeConfig, ProbeMode, ServiceConfig,
    TlsConfig, UserCredential, WebSocketConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::ConfigWatcher;

//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Token issuance and validation.
    pub auth: AuthConfig,

    /// Duplex session endpoint.
    pub websocket: WebSocketConfig,

    /// Liveness/readiness probe endpoints.
    pub probes: ProbeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Timeout for ordinary (non-upgrade) requests.
    pub request_timeout_secs: u64,

    /// Maximum concurrently open connections, duplex sessions included.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            request_timeout_secs: 30,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Authentication gate configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Require a bearer token on the duplex endpoint.
    pub enabled: bool,

    /// HMAC key tokens are signed with.
    pub signing_key: String,

    /// Policy name tokens must carry.
    pub policy_name: String,

    /// Lifetime of issued tokens.
    pub token_ttl_secs: u64,

    /// Path of the token issuance endpoint.
    pub authentication_path: String,

    /// Header carrying the bearer token.
    pub authorization_header: String,

    /// Static credentials accepted by the built-in authentication policy.
    pub users: Vec<UserCredential>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            signing_key: String::new(),
            policy_name: "default".to_string(),
            token_ttl_secs: 3600,
            authentication_path: "/auth".to_string(),
            authorization_header: "Authorization".to_string(),
            users: Vec::new(),
        }
    }
}

/// One username/password pair.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserCredential {
    pub username: String,
    pub password: String,
}

/// Duplex session endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Upgrade path.
    pub path: String,

    /// Idle time after which a session is closed.
    pub session_timeout_ms: u64,

    /// Bounded wait of each receive.
    pub poll_interval_ms: u64,

    /// Delay of the default per-iteration tick.
    pub tick_interval_ms: u64,

    /// Size of each pooled receive buffer.
    pub receive_buffer_size: usize,

    /// Origins allowed to upgrade. Empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            session_timeout_ms: 30_000,
            poll_interval_ms: 250,
            tick_interval_ms: 100,
            receive_buffer_size: 4096,
            allowed_origins: Vec::new(),
        }
    }
}

/// Which probe endpoints are served.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    Availability,
    Health,
    #[default]
    Dual,
}

/// Probe endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub mode: ProbeMode,
    pub availability_path: String,
    pub health_path: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            mode: ProbeMode::Dual,
            availability_path: "/Availability".to_string(),
            health_path: "/Health".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.auth.token_ttl_secs, 3600);
        assert_eq!(config.websocket.session_timeout_ms, 30_000);
        assert_eq!(config.probes.health_path, "/Health");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [auth]
            signing_key = "k"
            policy_name = "devices"

            [[auth.users]]
            username = "alice"
            password = "secret"

            [websocket]
            session_timeout_ms = 500
            allowed_origins = ["https://app.example"]

            [probes]
            mode = "health"
            "#,
        )
        .unwrap();

        assert_eq!(config.auth.policy_name, "devices");
        assert_eq!(config.auth.authentication_path, "/auth");
        assert_eq!(config.auth.users.len(), 1);
        assert_eq!(config.websocket.session_timeout_ms, 500);
        assert_eq!(config.websocket.poll_interval_ms, 250);
        assert_eq!(config.probes.mode, ProbeMode::Health);
    }
}

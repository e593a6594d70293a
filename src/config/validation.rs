//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, buffer size > 0)
//! - Detect conflicting endpoint paths
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ServiceConfig;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "listener.request_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be at least 1",
        ));
    }

    let auth = &config.auth;
    if auth.enabled && auth.signing_key.is_empty() {
        errors.push(ValidationError::new(
            "auth.signing_key",
            "required when authentication is enabled",
        ));
    }
    if auth.policy_name.is_empty() {
        errors.push(ValidationError::new("auth.policy_name", "must not be empty"));
    }
    if auth.token_ttl_secs == 0 {
        errors.push(ValidationError::new(
            "auth.token_ttl_secs",
            "must be greater than zero",
        ));
    }
    if axum::http::HeaderName::from_bytes(auth.authorization_header.as_bytes()).is_err() {
        errors.push(ValidationError::new(
            "auth.authorization_header",
            format!("'{}' is not a valid header name", auth.authorization_header),
        ));
    }

    let ws = &config.websocket;
    if ws.session_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "websocket.session_timeout_ms",
            "must be greater than zero",
        ));
    }
    if ws.poll_interval_ms == 0 {
        errors.push(ValidationError::new(
            "websocket.poll_interval_ms",
            "must be greater than zero",
        ));
    } else if ws.poll_interval_ms >= ws.session_timeout_ms {
        errors.push(ValidationError::new(
            "websocket.poll_interval_ms",
            "must be smaller than session_timeout_ms",
        ));
    }
    if ws.tick_interval_ms == 0 {
        errors.push(ValidationError::new(
            "websocket.tick_interval_ms",
            "must be greater than zero",
        ));
    }
    if ws.receive_buffer_size == 0 {
        errors.push(ValidationError::new(
            "websocket.receive_buffer_size",
            "must be greater than zero",
        ));
    }

    let paths = [
        ("auth.authentication_path", auth.authentication_path.as_str()),
        ("websocket.path", ws.path.as_str()),
        ("probes.availability_path", config.probes.availability_path.as_str()),
        ("probes.health_path", config.probes.health_path.as_str()),
    ];
    for (i, &(field, path)) in paths.iter().enumerate() {
        if !path.starts_with('/') {
            errors.push(ValidationError::new(field, "must start with '/'"));
        }
        // Probe and issuance paths match ignoring ASCII case.
        if paths[..i].iter().any(|&(_, other)| other.eq_ignore_ascii_case(path)) {
            errors.push(ValidationError::new(
                field,
                format!("path '{path}' is already used by another endpoint"),
            ));
        }
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.auth.signing_key = "key".into();
        config
    }

    #[test]
    fn defaults_with_key_are_valid() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn missing_signing_key_is_rejected_only_when_enabled() {
        let mut config = valid();
        config.auth.signing_key.clear();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "auth.signing_key");

        config.auth.enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn all_errors_are_reported() {
        let mut config = valid();
        config.websocket.session_timeout_ms = 200;
        config.websocket.poll_interval_ms = 250;
        config.websocket.receive_buffer_size = 0;
        config.probes.health_path = "/ws".into();
        config.probes.availability_path = "Availability".into();

        let fields: Vec<&str> = validate_config(&config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect();

        assert_eq!(
            fields,
            vec![
                "websocket.poll_interval_ms",
                "websocket.receive_buffer_size",
                "probes.availability_path",
                "probes.health_path",
            ]
        );
    }

    #[test]
    fn paths_differing_only_in_case_collide() {
        let mut config = valid();
        config.probes.health_path = "/AUTH".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "probes.health_path");
    }

    #[test]
    fn zero_connection_limit_is_rejected() {
        let mut config = valid();
        config.listener.max_connections = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "listener.max_connections");
    }
}

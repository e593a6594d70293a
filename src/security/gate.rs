//! Bearer token authentication gate.
//!
//! # Responsibilities
//! - Validate the bearer token presented on a duplex upgrade request
//! - Attach the authorized resource and policy to the request as `AuthContext`
//! - Hold the signing settings so they can be rotated without restart
//!
//! # Data Flow
//! ```text
//! Upgrade request
//!     → header present? scheme "Bearer"?
//!     → token::decompose
//!     → policy matches? signature valid? expiry in the future?
//!     → AuthContext inserted into request extensions → next handler
//!
//! Any failure → 401 {"Value": false}
//! ```
//!
//! # Design Decisions
//! - Every failure produces the same response; the reason goes only to logs
//!   and the `reason` label of `sas_validation_failure_total`
//! - Settings live in an `ArcSwap` so reloads never block validation

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName};
use axum::middleware::Next;
use axum::response::Response;
use thiserror::Error;

use crate::config::AuthConfig;
use crate::http::response;
use crate::observability::metrics;
use crate::security::token::{self, TokenError};

const BEARER_PREFIX: &str = "Bearer ";

/// Outcome of a successful validation, carried as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub resource_uri: String,
    pub policy_name: String,
    /// Token expiry, seconds since the Unix epoch.
    pub expires_at: u64,
}

/// Why a presented token was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("authorization header missing")]
    MissingHeader,

    #[error("authorization header does not use the bearer scheme")]
    WrongScheme,

    #[error("malformed token: {0}")]
    Malformed(#[from] TokenError),

    #[error("token policy does not match")]
    PolicyMismatch,

    #[error("token signature is invalid")]
    SignatureInvalid,

    #[error("token has expired")]
    Expired,
}

impl AuthFailure {
    /// Stable metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::MissingHeader => "missing_header",
            AuthFailure::WrongScheme => "wrong_scheme",
            AuthFailure::Malformed(_) => "malformed",
            AuthFailure::PolicyMismatch => "policy_mismatch",
            AuthFailure::SignatureInvalid => "signature_invalid",
            AuthFailure::Expired => "expired",
        }
    }
}

/// Signing and validation parameters.
#[derive(Clone)]
pub struct GateSettings {
    pub enabled: bool,
    pub signing_key: Vec<u8>,
    pub policy_name: String,
    pub token_ttl: Duration,
    pub header: HeaderName,
}

impl std::fmt::Debug for GateSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateSettings")
            .field("enabled", &self.enabled)
            .field("signing_key", &"<redacted>")
            .field("policy_name", &self.policy_name)
            .field("token_ttl", &self.token_ttl)
            .field("header", &self.header)
            .finish()
    }
}

impl GateSettings {
    pub fn from_config(config: &AuthConfig) -> Self {
        let header = HeaderName::from_bytes(config.authorization_header.as_bytes())
            .unwrap_or_else(|_| {
                tracing::warn!(
                    header = %config.authorization_header,
                    "Invalid authorization header name, using Authorization"
                );
                header::AUTHORIZATION
            });

        Self {
            enabled: config.enabled,
            signing_key: config.signing_key.as_bytes().to_vec(),
            policy_name: config.policy_name.clone(),
            token_ttl: Duration::from_secs(config.token_ttl_secs),
            header,
        }
    }
}

/// Validates bearer tokens against the current settings.
#[derive(Debug)]
pub struct AuthGate {
    settings: ArcSwap<GateSettings>,
}

impl AuthGate {
    pub fn new(settings: GateSettings) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(GateSettings::from_config(config))
    }

    pub fn settings(&self) -> Arc<GateSettings> {
        self.settings.load_full()
    }

    /// Replace the settings; in-flight validations finish with the old ones.
    pub fn update(&self, settings: GateSettings) {
        tracing::info!(
            policy = %settings.policy_name,
            enabled = settings.enabled,
            "Authentication settings updated"
        );
        self.settings.store(Arc::new(settings));
    }

    /// Issue a token for `resource_uri` under the current settings.
    pub fn issue(&self, resource_uri: &str) -> Result<String, TokenError> {
        let settings = self.settings.load();
        token::issue(
            resource_uri,
            &settings.signing_key,
            &settings.policy_name,
            settings.token_ttl,
        )
    }

    /// Validate a raw header value at time `now` (Unix seconds).
    pub fn validate_header(
        &self,
        value: Option<&str>,
        now: u64,
    ) -> Result<AuthContext, AuthFailure> {
        let value = value.ok_or(AuthFailure::MissingHeader)?;

        // Scheme is matched exactly; the token follows one space, untrimmed.
        let token = value
            .strip_prefix(BEARER_PREFIX)
            .ok_or(AuthFailure::WrongScheme)?;

        self.validate_token(token, now)
    }

    /// Validate a token string at time `now` (Unix seconds).
    pub fn validate_token(&self, token: &str, now: u64) -> Result<AuthContext, AuthFailure> {
        let settings = self.settings.load();
        let parts = token::decompose(token)?;

        if parts.policy_name != settings.policy_name {
            return Err(AuthFailure::PolicyMismatch);
        }
        if !token::is_signature_valid(&parts.signature, &settings.signing_key, &parts.canonical) {
            return Err(AuthFailure::SignatureInvalid);
        }
        if parts.expires_at <= now {
            return Err(AuthFailure::Expired);
        }

        Ok(AuthContext {
            resource_uri: parts.resource_uri,
            policy_name: parts.policy_name,
            expires_at: parts.expires_at,
        })
    }

    /// Validate the configured header of a request, recording metrics.
    ///
    /// Returns `Ok(None)` when the gate is disabled.
    pub fn check(&self, headers: &HeaderMap) -> Result<Option<AuthContext>, AuthFailure> {
        let settings = self.settings.load();
        if !settings.enabled {
            return Ok(None);
        }

        let value = headers
            .get(&settings.header)
            .map(|v| v.to_str().unwrap_or_default());

        match self.validate_header(value, token::unix_now()) {
            Ok(context) => {
                metrics::record_validation_success();
                tracing::debug!(
                    resource_uri = %context.resource_uri,
                    policy = %context.policy_name,
                    "Bearer token accepted"
                );
                Ok(Some(context))
            }
            Err(failure) => {
                metrics::record_validation_failure(failure.reason());
                tracing::info!(reason = failure.reason(), error = %failure, "Bearer token rejected");
                Err(failure)
            }
        }
    }
}

/// Middleware guarding routes behind a valid bearer token.
///
/// On success the request continues with an `AuthContext` extension.
pub async fn require_bearer(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request,
    next: Next,
) -> Response {
    match gate.check(request.headers()) {
        Ok(Some(context)) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(_) => response::unauthorized(),
    }
}

//! Token issuance endpoint.
//!
//! Reads a JSON credential payload, asks the injected `Authenticator`
//! whether the caller may have a token and, if so, issues one for
//! `"<policy>://<username>"`.
//!
//! Malformed bodies are authentication failures (401), not protocol errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

use crate::config::UserCredential;
use crate::http::response;
use crate::observability::metrics;
use crate::security::gate::AuthGate;

/// Credential payload posted to the issuance endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationRequest {
    #[serde(default)]
    pub meta: Option<String>,
    #[serde(default)]
    pub grant_type: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Successful issuance body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
}

/// Decides whether a credential payload earns a token.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate<'a>(
        &'a self,
        headers: &'a HeaderMap,
        request: &'a AuthenticationRequest,
    ) -> BoxFuture<'a, bool>;
}

/// Accepts a fixed set of username/password pairs.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new(users: &[UserCredential]) -> Self {
        Self {
            users: users
                .iter()
                .map(|u| (u.username.clone(), u.password.clone()))
                .collect(),
        }
    }

    fn matches(&self, request: &AuthenticationRequest) -> bool {
        match (&request.username, &request.password) {
            (Some(username), Some(password)) => self
                .users
                .get(username)
                .is_some_and(|expected| expected == password),
            _ => false,
        }
    }
}

impl Authenticator for StaticCredentials {
    fn authenticate<'a>(
        &'a self,
        _headers: &'a HeaderMap,
        request: &'a AuthenticationRequest,
    ) -> BoxFuture<'a, bool> {
        futures_util::future::ready(self.matches(request)).boxed()
    }
}

/// Rejects every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl Authenticator for DenyAll {
    fn authenticate<'a>(
        &'a self,
        _headers: &'a HeaderMap,
        _request: &'a AuthenticationRequest,
    ) -> BoxFuture<'a, bool> {
        futures_util::future::ready(false).boxed()
    }
}

/// State of the issuance endpoint.
#[derive(Clone)]
pub struct IssuanceState {
    pub gate: Arc<AuthGate>,
    pub authenticator: Arc<dyn Authenticator>,
}

/// Issuance handler. The whole body is read before any response is written.
pub async fn issue_token(
    State(state): State<IssuanceState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let (success, response) = authenticate_and_issue(&state, &headers, &body).await;
    metrics::record_authentication(success, started.elapsed());
    response
}

async fn authenticate_and_issue(
    state: &IssuanceState,
    headers: &HeaderMap,
    body: &[u8],
) -> (bool, Response) {
    let request: AuthenticationRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => {
            tracing::info!(error = %e, "Authentication payload is not valid JSON");
            return (false, response::unauthorized());
        }
    };

    if !state.authenticator.authenticate(headers, &request).await {
        tracing::info!(
            username = request.username.as_deref().unwrap_or(""),
            "Authentication rejected"
        );
        return (false, response::unauthorized());
    }

    let settings = state.gate.settings();
    let resource_uri = format!(
        "{}://{}",
        settings.policy_name,
        request.username.as_deref().unwrap_or("")
    );

    match state.gate.issue(&resource_uri) {
        Ok(access_token) => {
            tracing::info!(resource_uri = %resource_uri, "Access token issued");
            (
                true,
                (
                    StatusCode::OK,
                    Json(AccessTokenResponse {
                        access_token,
                        token_type: "bearer".to_string(),
                    }),
                )
                    .into_response(),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to issue access token");
            (false, response::unauthorized())
        }
    }
}

//! Fixed response payloads.
//!
//! # Responsibilities
//! - Build the `{"Value": bool}` success/failure bodies
//! - Provide the configurable response for unhandled requests, with an
//!   optional hook that may claim the request first
//!
//! # Design Decisions
//! - Every rejection carries the same generic failure body; internal reasons
//!   stay in logs and metrics

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

/// Body of every probe and failure response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuePayload {
    #[serde(rename = "Value")]
    pub value: bool,
}

/// `200 {"Value": true}`.
pub fn success() -> Response {
    (StatusCode::OK, Json(ValuePayload { value: true })).into_response()
}

/// `{"Value": false}` with the given status.
pub fn failure(status: StatusCode) -> Response {
    (status, Json(ValuePayload { value: false })).into_response()
}

/// `401 {"Value": false}`.
pub fn unauthorized() -> Response {
    failure(StatusCode::UNAUTHORIZED)
}

/// Hook run before the unhandled response is written.
///
/// Returning `Some` claims the request and that response is sent instead.
pub type UnhandledHook = Arc<dyn Fn(Request) -> BoxFuture<'static, Option<Response>> + Send + Sync>;

/// Box an async closure as an `UnhandledHook`.
pub fn unhandled_hook<F, Fut>(f: F) -> UnhandledHook
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<Response>> + Send + 'static,
{
    Arc::new(move |request| f(request).boxed())
}

/// Response written for requests no endpoint handles.
#[derive(Clone)]
pub struct UnhandledResponse {
    status: StatusCode,
    content_type: HeaderValue,
    body: Bytes,
    hook: Option<UnhandledHook>,
}

impl fmt::Debug for UnhandledResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnhandledResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("body_len", &self.body.len())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl Default for UnhandledResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            content_type: HeaderValue::from_static("application/json"),
            body: Bytes::from_static(br#"{"Value":false}"#),
            hook: None,
        }
    }
}

impl UnhandledResponse {
    pub fn new(status: StatusCode, content_type: HeaderValue, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type,
            body: body.into(),
            hook: None,
        }
    }

    /// Let `hook` see unhandled requests before the fixed response is written.
    pub fn with_hook(mut self, hook: UnhandledHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The fixed response, ignoring any hook.
    pub fn respond(&self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, self.content_type.clone())],
            self.body.clone(),
        )
            .into_response()
    }

    /// Offer `request` to the hook, then fall back to the fixed response.
    pub async fn handle(&self, request: Request) -> Response {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        if let Some(hook) = &self.hook {
            if let Some(response) = hook(request).await {
                tracing::debug!(%method, path = %path, status = %response.status(), "Unhandled request claimed by hook");
                return response;
            }
        }

        tracing::info!(%method, path = %path, status = %self.status, "Unhandled request");
        self.respond()
    }
}

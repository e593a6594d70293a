//! Endpoint resolution ahead of routing.
//!
//! # Responsibilities
//! - Rewrite probe and issuance paths to their registered spelling so they
//!   route regardless of ASCII case
//! - Apply the unknown-endpoint policy to every path that is not a probe
//!
//! # Design Decisions
//! - Wraps the whole router: middleware added with `Router::layer` would
//!   only run after a route had already been chosen
//! - The duplex path keeps exact matching

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::uri::PathAndQuery;
use axum::http::{StatusCode, Uri};
use axum::middleware::Next;
use axum::response::Response;

use crate::health::probes::{EndpointCheck, ProbeTable};
use crate::http::response;

/// Known endpoint spellings plus the policy for everything else.
#[derive(Clone)]
pub struct EndpointResolver {
    probes: Arc<Vec<String>>,
    folded: Arc<Vec<String>>,
    unknown_endpoint: EndpointCheck,
}

impl EndpointResolver {
    /// `folded` lists non-probe paths that also match ignoring case.
    pub fn new(
        probes: &ProbeTable,
        folded: impl IntoIterator<Item = String>,
        unknown_endpoint: EndpointCheck,
    ) -> Self {
        Self {
            probes: Arc::new(probes.paths().map(str::to_string).collect()),
            folded: Arc::new(folded.into_iter().collect()),
            unknown_endpoint,
        }
    }

    pub fn probe_path(&self, path: &str) -> Option<&str> {
        lookup(&self.probes, path)
    }

    pub fn folded_path(&self, path: &str) -> Option<&str> {
        lookup(&self.folded, path)
    }
}

fn lookup<'a>(known: &'a [String], path: &str) -> Option<&'a str> {
    known
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(path))
        .map(String::as_str)
}

/// Replace the path of `request`, keeping its query.
fn rewrite_path(request: &mut Request, path: &str) {
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };

    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = match PathAndQuery::try_from(path_and_query) {
        Ok(pq) => Some(pq),
        Err(e) => {
            tracing::warn!(path, error = %e, "Could not rewrite request path");
            return;
        }
    };

    match Uri::from_parts(parts) {
        Ok(uri) => *request.uri_mut() = uri,
        Err(e) => tracing::warn!(path, error = %e, "Could not rebuild request URI"),
    }
}

/// Middleware applying `EndpointResolver` before the router sees a request.
pub async fn resolve_endpoint(
    State(resolver): State<EndpointResolver>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if let Some(canonical) = resolver.probe_path(&path) {
        if canonical != path {
            rewrite_path(&mut request, canonical);
        }
        return next.run(request).await;
    }

    if !(resolver.unknown_endpoint)(&path).await {
        tracing::info!(path = %path, "Unknown endpoint rejected");
        return response::failure(StatusCode::BAD_REQUEST);
    }

    if let Some(canonical) = resolver.folded_path(&path) {
        if canonical != path {
            rewrite_path(&mut request, canonical);
        }
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::probes::{endpoint_check_fn, pass_unknown, ProbeChecks};
    use crate::config::ProbeConfig;
    use axum::body::Body;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn app(unknown_endpoint: EndpointCheck) -> Router {
        let table = ProbeTable::from_config(&ProbeConfig::default(), ProbeChecks::default());
        let resolver = EndpointResolver::new(&table, ["/Auth".to_string()], unknown_endpoint);

        let routes = Router::new()
            .route("/Health", get(|| async { "health" }))
            .route("/Auth", get(|uri: Uri| async move { format!("auth {uri}") }))
            .route("/ws", get(|| async { "ws" }));

        Router::new()
            .fallback_service(routes)
            .layer(axum::middleware::from_fn_with_state(resolver, resolve_endpoint))
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn registered_and_folded_paths_ignore_case() {
        let (status, body) = get_body(app(pass_unknown()), "/HEALTH").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "health");

        let (status, body) = get_body(app(pass_unknown()), "/auth?grant=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "auth /Auth?grant=1");
    }

    #[tokio::test]
    async fn other_paths_keep_exact_matching() {
        let (status, _) = get_body(app(pass_unknown()), "/WS").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get_body(app(pass_unknown()), "/ws").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ws");
    }

    #[tokio::test]
    async fn rejecting_policy_answers_bad_request() {
        let only_auth = endpoint_check_fn(|path| async move { path.eq_ignore_ascii_case("/auth") });

        let (status, body) = get_body(app(only_auth.clone()), "/ws").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, r#"{"Value":false}"#);

        let (status, _) = get_body(app(only_auth.clone()), "/Auth").await;
        assert_eq!(status, StatusCode::OK);

        // Health checks are answered before the policy runs.
        let (status, _) = get_body(app(only_auth), "/health").await;
        assert_eq!(status, StatusCode::OK);
    }
}

//! Liveness/readiness probe dispatch.
//!
//! # Responsibilities
//! - Map request paths to named boolean checks
//! - Answer `200 {"Value": true}` or `404 {"Value": false}`
//! - Decide whether unknown paths continue to the rest of the router
//!
//! # Design Decisions
//! - Checks are boxed async predicates; the kind only labels logs and metrics
//! - Paths match whole and ASCII case-insensitively (`/health` finds
//!   `/Health`, `/Health/` does not)
//! - A check that panics counts as failed

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::config::{ProbeConfig, ProbeMode};
use crate::http::response::{self, UnhandledResponse};
use crate::observability::metrics;

/// A no-argument async predicate.
pub type ProbeCheck = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Box an async closure as a `ProbeCheck`.
pub fn check_fn<F, Fut>(f: F) -> ProbeCheck
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// A check that always passes.
pub fn always_ok() -> ProbeCheck {
    check_fn(|| async { true })
}

/// Async predicate over a request path that matched no probe.
///
/// `true` lets the request continue; `false` answers it with
/// `400 {"Value": false}`.
pub type EndpointCheck = Arc<dyn Fn(&str) -> BoxFuture<'static, bool> + Send + Sync>;

/// Box an async closure as an `EndpointCheck`.
pub fn endpoint_check_fn<F, Fut>(f: F) -> EndpointCheck
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    Arc::new(move |path: &str| f(path.to_string()).boxed())
}

/// Let every unknown path through, logging it.
pub fn pass_unknown() -> EndpointCheck {
    endpoint_check_fn(|path| async move {
        tracing::debug!(path = %path, "Request for a path that is not a probe");
        true
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    Availability,
    Health,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Availability => "availability",
            ProbeKind::Health => "health",
        }
    }
}

/// The predicates behind each probe kind, plus the unknown-path policy.
#[derive(Clone)]
pub struct ProbeChecks {
    pub availability: ProbeCheck,
    pub health: ProbeCheck,
    pub unknown_endpoint: EndpointCheck,
}

impl Default for ProbeChecks {
    fn default() -> Self {
        Self {
            availability: always_ok(),
            health: always_ok(),
            unknown_endpoint: pass_unknown(),
        }
    }
}

#[derive(Clone)]
struct ProbeEntry {
    kind: ProbeKind,
    check: ProbeCheck,
}

/// Path → probe lookup.
#[derive(Clone, Default)]
pub struct ProbeTable {
    entries: BTreeMap<String, ProbeEntry>,
}

impl ProbeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table the configured mode asks for.
    pub fn from_config(config: &ProbeConfig, checks: ProbeChecks) -> Self {
        let table = Self::new();
        match config.mode {
            ProbeMode::Availability => {
                table.register(&config.availability_path, ProbeKind::Availability, checks.availability)
            }
            ProbeMode::Health => table.register(&config.health_path, ProbeKind::Health, checks.health),
            ProbeMode::Dual => table
                .register(&config.availability_path, ProbeKind::Availability, checks.availability)
                .register(&config.health_path, ProbeKind::Health, checks.health),
        }
    }

    /// Add or replace the probe at `path`.
    pub fn register(mut self, path: &str, kind: ProbeKind, check: ProbeCheck) -> Self {
        self.entries
            .insert(path.to_string(), ProbeEntry { kind, check });
        self
    }

    fn find(&self, path: &str) -> Option<(&str, &ProbeEntry)> {
        if let Some((key, entry)) = self.entries.get_key_value(path) {
            return Some((key.as_str(), entry));
        }
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(path))
            .map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn kind_of(&self, path: &str) -> Option<ProbeKind> {
        self.find(path).map(|(_, e)| e.kind)
    }

    /// The registered spelling of `path`, if it names a probe.
    pub fn canonical_path(&self, path: &str) -> Option<&str> {
        self.find(path).map(|(key, _)| key)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the check registered at `path`. `None` if nothing is registered.
    pub async fn evaluate(&self, path: &str) -> Option<bool> {
        let (_, entry) = self.find(path)?;

        let healthy = match AssertUnwindSafe((entry.check)()).catch_unwind().await {
            Ok(healthy) => healthy,
            Err(_) => {
                tracing::error!(probe = entry.kind.as_str(), path, "Probe check panicked");
                false
            }
        };

        metrics::record_probe(entry.kind.as_str(), healthy);
        tracing::debug!(probe = entry.kind.as_str(), path, healthy, "Probe evaluated");
        Some(healthy)
    }

    /// Answer a probe request for `path`.
    pub async fn respond(&self, path: &str) -> Response {
        match self.evaluate(path).await {
            Some(true) => response::success(),
            // Failed and unknown checks both answer 404, not 503.
            _ => response::failure(StatusCode::NOT_FOUND),
        }
    }

    /// One GET route per probe, at its registered spelling; other methods
    /// get the unhandled response.
    pub fn into_router<S>(self, unhandled: UnhandledResponse) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let table = Arc::new(self);
        let mut router = Router::new();

        for path in table.paths().map(str::to_string).collect::<Vec<_>>() {
            let probes = Arc::clone(&table);
            let probe_path = path.clone();
            let fallback = unhandled.clone();
            router = router.route(
                &path,
                get(move || {
                    let probes = Arc::clone(&probes);
                    let probe_path = probe_path.clone();
                    async move { probes.respond(&probe_path).await }
                })
                .fallback(move |request: Request| {
                    let fallback = fallback.clone();
                    async move { fallback.handle(request).await }
                }),
            );
        }
        router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    fn dual() -> ProbeConfig {
        ProbeConfig::default()
    }

    #[tokio::test]
    async fn dual_mode_registers_both_paths() {
        let table = ProbeTable::from_config(&dual(), ProbeChecks::default());
        assert_eq!(table.kind_of("/Availability"), Some(ProbeKind::Availability));
        assert_eq!(table.kind_of("/Health"), Some(ProbeKind::Health));
        assert_eq!(table.evaluate("/Health").await, Some(true));
    }

    #[tokio::test]
    async fn single_modes_register_one_path() {
        let mut config = dual();
        config.mode = ProbeMode::Health;
        let table = ProbeTable::from_config(&config, ProbeChecks::default());
        assert_eq!(table.kind_of("/Availability"), None);
        assert_eq!(table.kind_of("/Health"), Some(ProbeKind::Health));

        config.mode = ProbeMode::Availability;
        let table = ProbeTable::from_config(&config, ProbeChecks::default());
        assert_eq!(table.paths().collect::<Vec<_>>(), vec!["/Availability"]);
    }

    #[tokio::test]
    async fn match_is_whole_path_ignoring_case() {
        let table = ProbeTable::from_config(&dual(), ProbeChecks::default());
        assert_eq!(table.evaluate("/health").await, Some(true));
        assert_eq!(table.kind_of("/AVAILABILITY"), Some(ProbeKind::Availability));
        assert_eq!(table.canonical_path("/hEaLtH"), Some("/Health"));
        assert_eq!(table.evaluate("/Health/").await, None);
        assert_eq!(table.evaluate("/Healthz").await, None);
        assert_eq!(table.canonical_path("/Health/live"), None);
    }

    #[tokio::test]
    async fn default_unknown_endpoint_policy_passes() {
        let checks = ProbeChecks::default();
        assert!((checks.unknown_endpoint)("/anything").await);

        let strict = endpoint_check_fn(|path| async move { path.starts_with("/api") });
        assert!(strict("/api/items").await);
        assert!(!strict("/other").await);
    }

    #[tokio::test]
    async fn panicking_check_reads_as_failure() {
        let checks = ProbeChecks {
            health: check_fn(|| async {
                let driver: Option<bool> = None;
                driver.expect("database driver exploded")
            }),
            ..ProbeChecks::default()
        };
        let table = ProbeTable::from_config(&dual(), checks);
        assert_eq!(table.evaluate("/Health").await, Some(false));
        assert_eq!(table.evaluate("/Availability").await, Some(true));
    }

    #[tokio::test]
    async fn failing_check_answers_not_found() {
        let ready = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ready);
        let checks = ProbeChecks {
            availability: check_fn(move || {
                let flag = Arc::clone(&flag);
                async move { flag.load(Ordering::SeqCst) }
            }),
            ..ProbeChecks::default()
        };
        let router: Router = ProbeTable::from_config(&dual(), checks)
            .into_router(UnhandledResponse::default());

        let request = || {
            Request::builder()
                .uri("/Availability")
                .body(Body::empty())
                .unwrap()
        };

        let response = router.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], br#"{"Value":false}"#);

        ready.store(true, Ordering::SeqCst);
        let response = router.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], br#"{"Value":true}"#);
    }

    #[tokio::test]
    async fn non_get_on_probe_path_is_unhandled() {
        let router: Router =
            ProbeTable::from_config(&dual(), ProbeChecks::default())
                .into_router(UnhandledResponse::default());
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/Health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

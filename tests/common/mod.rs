//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use probe_gate::config::{ServiceConfig, UserCredential};
use probe_gate::http::{HttpServer, ServerError};
use probe_gate::lifecycle::Shutdown;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const SIGNING_KEY: &str = "integration-signing-key";
pub const POLICY: &str = "devices";
pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "wonderland";

pub type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Config with short session timings and one known user.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.auth.signing_key = SIGNING_KEY.into();
    config.auth.policy_name = POLICY.into();
    config.auth.users = vec![UserCredential {
        username: USERNAME.into(),
        password: PASSWORD.into(),
    }];
    config.websocket.session_timeout_ms = 5_000;
    config.websocket.poll_interval_ms = 50;
    config.websocket.tick_interval_ms = 20;
    config.websocket.receive_buffer_size = 64;
    config.observability.metrics_enabled = false;
    config
}

/// A server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub config_tx: mpsc::UnboundedSender<ServiceConfig>,
    task: JoinHandle<Result<(), ServerError>>,
}

pub async fn spawn_server(server: HttpServer) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (config_tx, config_rx) = mpsc::unbounded_channel();
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();

    let task = tokio::spawn(async move { server.run(listener, config_rx, signal).await });

    TestServer {
        addr,
        shutdown,
        config_tx,
        task,
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Trigger shutdown and wait for the server to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Obtain a token through the issuance endpoint.
pub async fn fetch_token(server: &TestServer) -> String {
    let response = reqwest::Client::new()
        .post(server.url("/auth"))
        .json(&serde_json::json!({
            "username": USERNAME,
            "password": PASSWORD,
            "grant_type": "password",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    body["access_token"].as_str().unwrap().to_string()
}

/// Open a WebSocket with optional bearer token and origin.
pub async fn connect(
    server: &TestServer,
    token: Option<&str>,
    origin: Option<&str>,
) -> Result<Client, tokio_tungstenite::tungstenite::Error> {
    let mut request = server.ws_url().into_client_request()?;
    if let Some(token) = token {
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
    }
    if let Some(origin) = origin {
        request
            .headers_mut()
            .insert("Origin", HeaderValue::from_str(origin).unwrap());
    }
    tokio_tungstenite::connect_async(request)
        .await
        .map(|(stream, _)| stream)
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

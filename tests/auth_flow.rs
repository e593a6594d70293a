//! Token issuance and bearer validation against a live server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use probe_gate::http::HttpServer;
use probe_gate::security::gate::GateSettings;
use probe_gate::security::token::{issue_with_expiry, unix_now};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

mod common;

use common::{connect, fetch_token, spawn_server, test_config, POLICY, SIGNING_KEY};

fn rejected_status(result: Result<common::Client, WsError>) -> u16 {
    match result {
        Err(WsError::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("upgrade unexpectedly accepted"),
    }
}

#[tokio::test]
async fn issued_token_opens_session() {
    let server = spawn_server(HttpServer::new(test_config())).await;
    let token = fetch_token(&server).await;

    let mut client = connect(&server, Some(&token), None).await.unwrap();
    client.send(Message::text("ping")).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, Message::text("ping"));

    client.close(None).await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let server = spawn_server(HttpServer::new(test_config())).await;
    assert_eq!(rejected_status(connect(&server, None, None).await), 401);
    server.stop().await;
}

#[tokio::test]
async fn expired_token_is_unauthorized() {
    let server = spawn_server(HttpServer::new(test_config())).await;
    let expired = issue_with_expiry(
        "devices://alice",
        SIGNING_KEY.as_bytes(),
        POLICY,
        unix_now() - 1,
    )
    .unwrap();

    assert_eq!(
        rejected_status(connect(&server, Some(&expired), None).await),
        401
    );
    server.stop().await;
}

#[tokio::test]
async fn token_for_other_policy_is_unauthorized() {
    let server = spawn_server(HttpServer::new(test_config())).await;
    let token = issue_with_expiry(
        "devices://alice",
        SIGNING_KEY.as_bytes(),
        "devicez",
        unix_now() + 600,
    )
    .unwrap();

    assert_eq!(
        rejected_status(connect(&server, Some(&token), None).await),
        401
    );
    server.stop().await;
}

#[tokio::test]
async fn rejection_body_is_generic() {
    let server = spawn_server(HttpServer::new(test_config())).await;

    let response = reqwest::Client::new()
        .post(server.url("/auth"))
        .json(&serde_json::json!({ "username": "alice", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(
        response.headers()["content-type"],
        "application/json"
    );
    assert_eq!(response.text().await.unwrap(), r#"{"Value":false}"#);

    let response = reqwest::Client::new()
        .post(server.url("/auth"))
        .body("definitely not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(response.text().await.unwrap(), r#"{"Value":false}"#);

    server.stop().await;
}

#[tokio::test]
async fn reloaded_signing_key_invalidates_old_tokens() {
    let http = HttpServer::new(test_config());
    let gate = http.gate();
    let server = spawn_server(http).await;
    let old_token = fetch_token(&server).await;

    let mut rotated = test_config();
    rotated.auth.signing_key = "rotated-signing-key".into();
    server.config_tx.send(rotated.clone()).unwrap();

    let expected = GateSettings::from_config(&rotated.auth).signing_key;
    common::wait_for(|| gate.settings().signing_key == expected).await;

    assert_eq!(
        rejected_status(connect(&server, Some(&old_token), None).await),
        401
    );

    let new_token = fetch_token(&server).await;
    let client = connect(&server, Some(&new_token), None).await;
    assert!(client.is_ok());

    server.stop().await;
}

#[tokio::test]
async fn disallowed_origin_is_forbidden() {
    let mut config = test_config();
    config.websocket.allowed_origins = vec!["https://app.example".into()];
    let server = spawn_server(HttpServer::new(config)).await;
    let token = fetch_token(&server).await;

    assert_eq!(
        rejected_status(connect(&server, Some(&token), Some("https://evil.example")).await),
        403
    );
    assert!(connect(&server, Some(&token), Some("https://app.example"))
        .await
        .is_ok());

    server.stop().await;
}

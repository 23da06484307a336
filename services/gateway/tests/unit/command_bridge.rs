//! Redis command store tests against a store that never answers

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use std::time::Duration;
use tokio::{net::TcpListener, task::JoinHandle, time::timeout};

use engine_gateway::{
    command_bridge::{
        AuxiliaryCommand, CommandStore, RedisCommandStore, StoreError, handle_command,
    },
    config::RedisConfig,
};

use super::helpers::body_json;

/// Accept connections and hold them open without ever replying
async fn silent_store() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let task = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    (address, task)
}

fn store_config(address: String) -> RedisConfig {
    RedisConfig {
        enabled: true,
        address,
        connect_timeout_ms: 200,
        response_timeout_ms: 200,
        reconnect_attempts: 0,
        ..RedisConfig::default()
    }
}

#[tokio::test]
async fn test_silent_store_fails_within_timeouts() {
    let (address, server) = silent_store().await;
    let store = RedisCommandStore::new(&store_config(address)).unwrap();
    let command = AuxiliaryCommand::from_path("/redis/get/foo").unwrap();

    let outcome = timeout(Duration::from_secs(5), store.execute(&command))
        .await
        .expect("store call should be bounded by its timeouts");

    assert_matches!(outcome, Err(StoreError::Failed(_)));
    server.abort();
}

#[tokio::test]
async fn test_silent_store_is_reported_as_client_error() {
    let (address, server) = silent_store().await;
    let store = RedisCommandStore::new(&store_config(address)).unwrap();

    let response = timeout(
        Duration::from_secs(5),
        handle_command(&store, &Method::GET, "/redis/get/foo", b""),
    )
    .await
    .expect("bridge should answer once the store times out");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].is_string());
    server.abort();
}

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
};
use bayeux::{Config, Server};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

/// Short windows so held polls resolve within test time: polls hold for at
/// most half the idle window (100ms) and bursts quiesce after 50ms.
pub fn test_config() -> Config {
    Config::default()
        .with_max_session_idle(Duration::from_millis(200))
        .with_quiescence(Duration::from_millis(50))
}

pub const ENDPOINT: &str = "/comet";

/// Drives batches through the axum boundary without a socket.
#[derive(Clone)]
pub struct TestClient {
    router: axum::Router,
}

impl TestClient {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(cfg: Config) -> Self {
        Self {
            router: Server::with_config(cfg).into_axum(ENDPOINT),
        }
    }

    /// POST a raw body and return status, headers, and body text.
    pub async fn post_raw(&self, body: &str) -> (StatusCode, HeaderMap, String) {
        let request = Request::builder()
            .method("POST")
            .uri(ENDPOINT)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    /// POST a batch and parse the reply array.
    pub async fn send(&self, batch: Value) -> Vec<Value> {
        let (status, _, body) = self.post_raw(&batch.to_string()).await;
        assert_eq!(status, StatusCode::OK, "unexpected status, body: {body}");
        serde_json::from_str(&body).unwrap()
    }

    /// Handshake and return the issued client id.
    pub async fn handshake(&self) -> String {
        let reply = self
            .send(json!([{
                "channel": "/meta/handshake",
                "version": "1.0",
                "supportedConnectionTypes": ["long-polling"],
            }]))
            .await;
        assert_eq!(reply.len(), 1);
        let resp = &reply[0];
        assert_eq!(resp["successful"], json!(true), "handshake failed: {resp}");
        resp["clientId"].as_str().unwrap().to_owned()
    }

    /// Subscribe `client` to `pattern`, asserting success.
    pub async fn subscribe(&self, client: &str, pattern: &str) {
        let reply = self
            .send(json!([{
                "channel": "/meta/subscribe",
                "clientId": client,
                "subscription": pattern,
            }]))
            .await;
        let resp = reply.last().unwrap();
        assert_eq!(resp["successful"], json!(true), "subscribe failed: {resp}");
    }
}

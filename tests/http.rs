mod common;
use common::TestClient;

use axum::http::StatusCode;
use serde_json::{json, Value};
use std::time::{Duration, Instant};

#[tokio::test]
async fn handshake_issues_an_identity() {
    let client = TestClient::new();
    let reply = client
        .send(json!([{
            "channel": "/meta/handshake",
            "version": "1.0",
            "supportedConnectionTypes": ["long-polling"],
        }]))
        .await;

    assert_eq!(reply.len(), 1);
    let resp = &reply[0];
    assert_eq!(resp["channel"], json!("/meta/handshake"));
    assert_eq!(resp["successful"], json!(true));
    assert_eq!(resp["version"], json!("1.0"));
    assert_eq!(resp["supportedConnectionTypes"], json!(["long-polling"]));
    assert_eq!(resp["advice"]["reconnect"], json!("retry"));
    assert_eq!(resp["advice"]["timeout"], json!(200));
    assert!(resp["clientId"].as_str().is_some_and(|id| !id.is_empty()));
}

#[tokio::test]
async fn content_type_is_pinned() {
    let client = TestClient::new();
    let (status, headers, _) = client
        .post_raw(r#"[{"channel":"/meta/handshake"}]"#)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers["content-type"].to_str().unwrap(),
        "application/json;charset=UTF-8"
    );
}

#[tokio::test]
async fn transport_errors_are_400s() {
    let client = TestClient::new();

    let (status, _, _) = client.post_raw("not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // a single bare object is not a batch
    let (status, _, _) = client.post_raw(r#"{"channel":"/meta/handshake"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = client.post_raw("[]").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "found no message");
}

#[tokio::test]
async fn publish_without_data_is_a_bad_request() {
    let client = TestClient::new();
    let id = client.handshake().await;
    let reply = client
        .send(json!([{"channel": "/foo/bar", "clientId": id}]))
        .await;

    let resp = &reply[0];
    assert_eq!(resp["successful"], json!(false));
    assert_eq!(resp["error"], json!("400:/foo/bar:Bad request"));
}

#[tokio::test]
async fn unknown_client_is_told_to_rehandshake() {
    let client = TestClient::new();
    let reply = client
        .send(json!([{"channel": "/meta/connect", "clientId": "ghost"}]))
        .await;

    let resp = &reply[0];
    assert_eq!(resp["successful"], json!(false));
    assert_eq!(resp["advice"]["reconnect"], json!("handshake"));
}

#[tokio::test]
async fn empty_connect_returns_after_half_the_idle_window() {
    let client = TestClient::new();
    let id = client.handshake().await;

    let start = Instant::now();
    let reply = client
        .send(json!([{"channel": "/meta/connect", "clientId": id}]))
        .await;
    let held = start.elapsed();

    assert_eq!(reply.len(), 1, "no events expected: {reply:?}");
    assert_eq!(reply[0]["successful"], json!(true));
    assert!(held >= Duration::from_millis(100), "held only {held:?}");
    assert!(held < Duration::from_millis(400), "held too long: {held:?}");
}

#[tokio::test]
async fn publish_is_delivered_to_a_held_poll() {
    let client = TestClient::new();
    let publisher = client.handshake().await;
    let subscriber = client.handshake().await;
    client.subscribe(&subscriber, "/foo/bar").await;

    let holder = client.clone();
    let sub = subscriber.clone();
    let poll = tokio::spawn(async move {
        holder
            .send(json!([{"channel": "/meta/connect", "clientId": sub}]))
            .await
    });

    // let the poll attach before publishing
    tokio::time::sleep(Duration::from_millis(30)).await;
    let reply = client
        .send(json!([{
            "channel": "/foo/bar",
            "clientId": publisher,
            "data": "ping",
        }]))
        .await;
    assert_eq!(reply[0]["successful"], json!(true));

    let reply = poll.await.unwrap();
    assert_eq!(reply.len(), 2, "one event, one response: {reply:?}");
    assert_eq!(reply[0]["channel"], json!("/foo/bar"));
    assert_eq!(reply[0]["data"], json!("ping"));
    assert_eq!(reply[1]["channel"], json!("/meta/connect"));
    assert_eq!(reply[1]["successful"], json!(true));
}

#[tokio::test]
async fn events_precede_responses_in_request_order() {
    let client = TestClient::new();
    let id = client.handshake().await;
    client.subscribe(&id, "/self").await;

    // the publish in the same batch loops back through the held connect
    let reply = client
        .send(json!([
            {"channel": "/meta/connect", "clientId": id},
            {"channel": "/self", "clientId": id, "data": "loop"},
        ]))
        .await;

    assert_eq!(reply.len(), 3, "event then two responses: {reply:?}");
    assert_eq!(reply[0]["data"], json!("loop"));
    assert_eq!(reply[1]["channel"], json!("/meta/connect"));
    assert_eq!(reply[2]["channel"], json!("/self"));
    assert_eq!(reply[2]["successful"], json!(true));
}

#[tokio::test]
async fn whisper_requires_no_identity() {
    let client = TestClient::new();
    let subscriber = client.handshake().await;
    client.subscribe(&subscriber, "/news/**").await;

    // no clientId: the publish is a whisper
    let reply = client
        .send(json!([{"channel": "/news/today", "data": "anon"}]))
        .await;
    assert_eq!(reply[0]["successful"], json!(true));

    let reply = client
        .send(json!([{"channel": "/meta/connect", "clientId": subscriber}]))
        .await;
    assert_eq!(reply[0]["data"], json!("anon"));
}

#[tokio::test]
async fn disconnect_flushes_the_mailbox() {
    let client = TestClient::new();
    let id = client.handshake().await;
    client.subscribe(&id, "/x").await;

    // two whispers buffer in the mailbox; no poller is attached
    client
        .send(json!([{"channel": "/x", "data": "one"}]))
        .await;
    client
        .send(json!([{"channel": "/x", "data": "two"}]))
        .await;

    let reply = client
        .send(json!([{"channel": "/meta/disconnect", "clientId": id}]))
        .await;

    assert_eq!(reply.len(), 3, "two events, one response: {reply:?}");
    assert_eq!(reply[0]["data"], json!("one"));
    assert_eq!(reply[1]["data"], json!("two"));
    assert_eq!(reply[2]["channel"], json!("/meta/disconnect"));
    assert_eq!(reply[2]["successful"], json!(true));

    // the session is gone; connecting again demands a fresh handshake
    let reply = client
        .send(json!([{"channel": "/meta/connect", "clientId": id}]))
        .await;
    assert_eq!(reply[0]["successful"], json!(false));
    assert_eq!(reply[0]["advice"]["reconnect"], json!("handshake"));
}

#[tokio::test]
async fn subscription_is_echoed() {
    let client = TestClient::new();
    let id = client.handshake().await;

    let reply = client
        .send(json!([{
            "channel": "/meta/subscribe",
            "clientId": id,
            "subscription": "/foo/*",
        }]))
        .await;
    let resp = reply.last().unwrap();
    assert_eq!(resp["subscription"], json!("/foo/*"));
    assert_eq!(resp["successful"], json!(true));

    let reply = client
        .send(json!([{
            "channel": "/meta/unsubscribe",
            "clientId": id,
            "subscription": "/foo/*",
        }]))
        .await;
    assert_eq!(reply.last().unwrap()["successful"], json!(true));

    // not subscribed any more
    let reply = client
        .send(json!([{
            "channel": "/meta/unsubscribe",
            "clientId": id,
            "subscription": "/foo/*",
        }]))
        .await;
    assert_eq!(reply.last().unwrap()["successful"], json!(false));
}

#[tokio::test]
async fn batch_mixes_good_and_bad_messages() {
    let client = TestClient::new();
    let id = client.handshake().await;

    let reply = client
        .send(json!([
            {"channel": "/bad", "clientId": id},
            {"channel": "/meta/subscribe", "clientId": id, "subscription": "/ok"},
        ]))
        .await;

    assert_eq!(reply.len(), 2);
    assert_eq!(reply[0]["error"], json!("400:/bad:Bad request"));
    assert_eq!(reply[1]["successful"], json!(true));
}

#[tokio::test]
async fn quiescence_batches_a_burst() {
    let client = TestClient::new();
    let publisher = client.handshake().await;
    let subscriber = client.handshake().await;
    client.subscribe(&subscriber, "/burst").await;

    let holder = client.clone();
    let sub = subscriber.clone();
    let poll = tokio::spawn(async move {
        holder
            .send(json!([{"channel": "/meta/connect", "clientId": sub}]))
            .await
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    for data in ["a", "b"] {
        client
            .send(json!([{
                "channel": "/burst",
                "clientId": publisher,
                "data": data,
            }]))
            .await;
    }

    let reply = poll.await.unwrap();
    let events: Vec<&Value> = reply
        .iter()
        .filter(|m| m.get("successful").is_none())
        .collect();
    assert_eq!(events.len(), 2, "burst not batched: {reply:?}");
    assert_eq!(events[0]["data"], json!("a"));
    assert_eq!(events[1]["data"], json!("b"));
}

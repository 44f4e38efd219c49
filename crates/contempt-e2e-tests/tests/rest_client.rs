//! End-to-end tests for the REST client against a local server.
//!
//! These tests verify:
//! 1. Disguise and authorization headers on every request
//! 2. Per-bucket 429 suspension and the single retry
//! 3. Bounded 5xx retries and verbatim 4xx errors
//! 4. Message sending and history paging

mod helpers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use contempt::http::{HttpClient, HttpConfig, MessageHistory, MessageQuery};
use contempt::{ClientError, LogStore, LogVariant};
use contempt_proto::{Nonce, Snowflake};
use helpers::*;
use serde_json::json;

fn http_client(api: &TestApi) -> HttpClient {
    let config = HttpConfig::new(api.base_url(), TEST_TOKEN).with_retries(3, Duration::from_millis(20));
    HttpClient::new(config).unwrap()
}

fn ids(messages: &[contempt_proto::Message]) -> Vec<u64> {
    messages.iter().map(|m| m.id.get()).collect()
}

// ============================================================================
// Headers and Decoding
// ============================================================================

#[tokio::test]
async fn test_fetch_sends_identity_headers() {
    let api = TestApi::start().await;
    api.seed_messages(1, 10, 3);
    let http = http_client(&api);

    let page = http
        .fetch_messages(Snowflake::new(1), MessageQuery::latest(50))
        .await
        .unwrap();
    assert_eq!(ids(&page), vec![12, 11, 10]);

    let hit = &api.hits()[0];
    assert_eq!(hit.authorization.as_deref(), Some(TEST_TOKEN));
    assert_eq!(
        hit.user_agent.as_deref(),
        Some(http.config().disguise.user_agent.as_str())
    );
    assert!(hit.super_properties);
    assert_eq!(hit.query.get("limit").map(String::as_str), Some("50"));

    api.shutdown();
}

// ============================================================================
// Rate Limits
// ============================================================================

#[tokio::test]
async fn test_429_suspends_only_its_bucket() {
    let api = TestApi::start().await;
    api.seed_messages(1, 10, 1);
    api.seed_messages(2, 20, 1);
    api.enqueue(
        "GET",
        1,
        StatusCode::TOO_MANY_REQUESTS,
        json!({"message": "You are being rate limited.", "retry_after": 0.4, "global": false}),
    );
    let http = Arc::new(http_client(&api));

    let limited = tokio::spawn({
        let http = Arc::clone(&http);
        async move { http.fetch_messages(Snowflake::new(1), MessageQuery::latest(1)).await }
    });
    eventually(|| async { api.hits_for("GET", 1).len() == 1 }).await;

    // Another bucket is unaffected.
    let started = Instant::now();
    http.fetch_messages(Snowflake::new(2), MessageQuery::latest(1))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(300));

    // A second request on the limited bucket waits out the delay.
    let queued = http
        .fetch_messages(Snowflake::new(1), MessageQuery::latest(1))
        .await
        .unwrap();
    assert_eq!(ids(&queued), vec![10]);
    assert_eq!(ids(&limited.await.unwrap().unwrap()), vec![10]);

    let hits = api.hits_for("GET", 1);
    assert_eq!(hits.len(), 3);
    for later in &hits[1..] {
        assert!(later.at.duration_since(hits[0].at) >= Duration::from_millis(400));
    }

    api.shutdown();
}

#[tokio::test]
async fn test_second_429_is_surfaced() {
    let api = TestApi::start().await;
    for _ in 0..2 {
        api.enqueue("GET", 1, StatusCode::TOO_MANY_REQUESTS, json!({"retry_after": 0.25}));
    }
    let http = http_client(&api);

    let err = http
        .fetch_messages(Snowflake::new(1), MessageQuery::latest(1))
        .await
        .unwrap_err();
    match err {
        ClientError::RateLimited {
            bucket,
            retry_after,
        } => {
            assert_eq!(bucket, "GET /channels/1/messages");
            assert_eq!(retry_after, Duration::from_millis(250));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert_eq!(api.hits_for("GET", 1).len(), 2);

    api.shutdown();
}

// ============================================================================
// Retries and Errors
// ============================================================================

#[tokio::test]
async fn test_server_errors_retried_until_success() {
    let api = TestApi::start().await;
    api.seed_messages(1, 10, 1);
    api.enqueue("GET", 1, StatusCode::BAD_GATEWAY, json!({"message": "bad gateway"}));
    api.enqueue("GET", 1, StatusCode::SERVICE_UNAVAILABLE, json!({"message": "unavailable"}));
    let http = http_client(&api);

    let page = http
        .fetch_messages(Snowflake::new(1), MessageQuery::latest(1))
        .await
        .unwrap();
    assert_eq!(ids(&page), vec![10]);
    assert_eq!(api.hits_for("GET", 1).len(), 3);

    api.shutdown();
}

#[tokio::test]
async fn test_server_errors_bounded() {
    let api = TestApi::start().await;
    for _ in 0..5 {
        api.enqueue("GET", 1, StatusCode::INTERNAL_SERVER_ERROR, json!({"message": "boom"}));
    }
    let http = http_client(&api);

    let err = http
        .fetch_messages(Snowflake::new(1), MessageQuery::latest(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Http { status: 500, .. }));
    // One attempt plus three retries.
    assert_eq!(api.hits_for("GET", 1).len(), 4);

    api.shutdown();
}

#[tokio::test]
async fn test_client_error_not_retried_and_verbatim() {
    let api = TestApi::start().await;
    api.enqueue(
        "POST",
        1,
        StatusCode::FORBIDDEN,
        json!({"message": "Missing Access", "code": 50001}),
    );
    let http = http_client(&api);

    let err = http.send_message(Snowflake::new(1), "hello").await.unwrap_err();
    match err {
        ClientError::Http { status, body } => {
            assert_eq!(status, 403);
            let body: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(body["code"], 50001);
        }
        other => panic!("expected Http, got {other:?}"),
    }
    assert_eq!(api.hits_for("POST", 1).len(), 1);

    api.shutdown();
}

// ============================================================================
// Messages
// ============================================================================

#[tokio::test]
async fn test_send_message_echoes_nonce_and_is_logged() {
    let api = TestApi::start().await;
    let log = Arc::new(LogStore::default());
    let http = http_client(&api).with_log_store(Arc::clone(&log));

    let message = http.send_message(Snowflake::new(7), "hello").await.unwrap();
    assert_eq!(message.content, "hello");
    assert_eq!(message.channel_id, Snowflake::new(7));
    let Some(Nonce::Text(nonce)) = message.nonce else {
        panic!("nonce not echoed");
    };
    assert!(nonce.parse::<u64>().is_ok());

    let entries = log.entries();
    assert_eq!(entries.len(), 1);
    match &entries[0].variant {
        LogVariant::Http {
            method,
            url,
            status,
        } => {
            assert_eq!(method, "POST");
            assert!(url.ends_with("/api/v9/channels/7/messages"));
            assert_eq!(*status, Some(200));
        }
        other => panic!("expected an HTTP entry, got {other:?}"),
    }

    api.shutdown();
}

#[tokio::test]
async fn test_history_pages_backwards_until_exhausted() {
    let api = TestApi::start().await;
    api.seed_messages(5, 1, 120);
    let history = MessageHistory::new(Arc::new(http_client(&api)), Snowflake::new(5));

    let newest = history.load_older().await.unwrap();
    assert_eq!(ids(&newest), (71..=120).collect::<Vec<_>>());
    assert!(!history.is_exhausted());

    let older = history.load_older().await.unwrap();
    assert_eq!(ids(&older), (21..=70).collect::<Vec<_>>());
    assert_eq!(
        api.hits_for("GET", 5)[1].query.get("before").map(String::as_str),
        Some("71")
    );

    let oldest = history.load_older().await.unwrap();
    assert_eq!(ids(&oldest), (1..=20).collect::<Vec<_>>());
    assert!(history.is_exhausted());

    assert!(history.load_older().await.unwrap().is_empty());
    assert_eq!(api.hits_for("GET", 5).len(), 3);
    assert_eq!(ids(&history.messages()), (1..=120).collect::<Vec<_>>());

    api.shutdown();
}

#[tokio::test]
async fn test_concurrent_history_load_refused() {
    let api = TestApi::start().await;
    api.seed_messages(5, 1, 10);
    // Hold the first load in its retry backoff.
    api.enqueue("GET", 5, StatusCode::BAD_GATEWAY, json!({}));
    let history = MessageHistory::new(Arc::new(http_client(&api)), Snowflake::new(5));

    let (first, second) = tokio::join!(history.load_older(), async {
        eventually(|| async { history.is_loading() }).await;
        history.load_older().await
    });

    assert_eq!(first.unwrap().len(), 10);
    assert!(matches!(second, Err(ClientError::LoadInProgress)));

    api.shutdown();
}

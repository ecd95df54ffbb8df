use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;

use maxx_adapter::{AdapterRegistry, CanonicalRequest, HttpClient};
use maxx_common::{ClientType, RequestStatus};
use maxx_core::engine::{ProxyEngine, ServeBody};
use maxx_core::events::EventHub;
use maxx_storage::{SnapshotCache, Store};

async fn engine_with(store: Store) -> ProxyEngine {
    let cache = Arc::new(SnapshotCache::load(store.clone()).await.unwrap());
    ProxyEngine::new(
        store,
        cache,
        AdapterRegistry::with_defaults(),
        HttpClient::new(None).unwrap(),
        EventHub::new(),
        "test-instance".into(),
    )
}

async fn fresh_store() -> Store {
    let db = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
    let store = Store::from_connection(db);
    store.sync_schema().await.unwrap();
    store.migrate().await.unwrap();
    store
}

fn claude_request() -> CanonicalRequest {
    let req: maxx_protocol::claude::CreateMessageRequest =
        serde_json::from_value(serde_json::json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
    CanonicalRequest::from_claude(req, None)
}

async fn seed_route(store: &Store) -> (i64, i64) {
    let provider_id = store
        .create_provider(
            "acct",
            "antigravity",
            serde_json::json!({"type": "antigravity", "refresh_token": "rt"}),
            &[ClientType::Claude],
        )
        .await
        .unwrap();
    let route_id = store
        .create_route(0, ClientType::Claude, provider_id, true, None, 10_000)
        .await
        .unwrap();
    (provider_id, route_id)
}

#[tokio::test]
async fn no_routes_is_503_no_upstream() {
    let store = fresh_store().await;
    let engine = engine_with(store.clone()).await;
    let (tx, _rx) = mpsc::channel(8);

    let outcome = engine.serve(claude_request(), None, None, tx).await;
    assert_eq!(outcome.status, 503);
    match outcome.body {
        ServeBody::Complete(body) => {
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["error"], "no upstream available");
        }
        other => panic!("unexpected body: {other:?}"),
    }
}

#[tokio::test]
async fn cooled_down_provider_is_never_attempted() {
    let store = fresh_store().await;
    let (provider_id, _) = seed_route(&store).await;
    store
        .upsert_cooldown(
            provider_id,
            ClientType::Claude,
            OffsetDateTime::now_utc() + Duration::hours(1),
            "rate_limit",
        )
        .await
        .unwrap();

    let engine = engine_with(store.clone()).await;
    let (tx, _rx) = mpsc::channel(8);
    let outcome = engine.serve(claude_request(), None, None, tx).await;
    assert_eq!(outcome.status, 503);

    // Cooldown respect: the sole candidate was skipped, so the request
    // row exists but has no attempt children.
    let requests = store
        .list_terminal_attempts_between(
            OffsetDateTime::now_utc() - Duration::minutes(5),
            OffsetDateTime::now_utc() + Duration::minutes(5),
        )
        .await
        .unwrap();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn unusable_credentials_fail_the_attempt_and_fall_through() {
    let store = fresh_store().await;
    // No access token in config: prepare fails before any dial.
    let (_, _) = seed_route(&store).await;

    let engine = engine_with(store.clone()).await;
    let (tx, _rx) = mpsc::channel(8);
    let outcome = engine.serve(claude_request(), None, None, tx).await;
    assert_eq!(outcome.status, 503);

    let attempts = store
        .list_terminal_attempts_between(
            OffsetDateTime::now_utc() - Duration::minutes(5),
            OffsetDateTime::now_utc() + Duration::minutes(5),
        )
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
}

#[tokio::test]
async fn request_row_records_terminal_failure() {
    let store = fresh_store().await;
    let engine = engine_with(store.clone()).await;
    let (tx, _rx) = mpsc::channel(8);
    engine.serve(claude_request(), None, None, tx).await;

    // Exactly one request row, FAILED with a 503.
    let request = store.get_proxy_request(1).await.unwrap();
    assert_eq!(request.status, RequestStatus::Failed.as_str());
    assert_eq!(request.status_code, Some(503));
    assert!(request.end_time.is_some());
}

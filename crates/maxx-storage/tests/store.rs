use time::{Duration, OffsetDateTime};

use maxx_common::{ClientType, RequestStatus};
use maxx_storage::store::{
    BucketUpsert, NewAttempt, NewProxyRequest, Store, StoreError, UsageFilter, UsageGranularity,
};

async fn fresh_store() -> Store {
    let db = sea_orm::Database::connect("sqlite::memory:")
        .await
        .expect("connect in-memory sqlite");
    let store = Store::from_connection(db);
    store.sync_schema().await.expect("sync schema");
    store.migrate().await.expect("migrate");
    store
}

async fn seed_provider(store: &Store) -> i64 {
    store
        .create_provider(
            "acct-a",
            "antigravity",
            serde_json::json!({"type": "antigravity", "refresh_token": "rt"}),
            &[ClientType::Claude, ClientType::Gemini],
        )
        .await
        .expect("create provider")
}

#[tokio::test]
async fn live_slug_uniqueness_and_reuse_after_delete() {
    let store = fresh_store().await;
    let first = store.create_project("Team A", None, &[]).await.unwrap();

    let dup = store.create_project("Team A", None, &[]).await;
    assert!(matches!(dup, Err(StoreError::Conflict(_))));

    store.delete_project(first).await.unwrap();
    // Soft delete frees the slug for reuse.
    store.create_project("Team A", None, &[]).await.unwrap();
}

#[tokio::test]
async fn route_positions_stay_dense() {
    let store = fresh_store().await;
    let provider_id = seed_provider(&store).await;
    let project_id = store.create_project("p", None, &[]).await.unwrap();

    let mut route_ids = Vec::new();
    for _ in 0..3 {
        route_ids.push(
            store
                .create_route(project_id, ClientType::Claude, provider_id, true, None, 10_000)
                .await
                .unwrap(),
        );
    }

    let routes = store
        .list_routes_for_scope(project_id, ClientType::Claude)
        .await
        .unwrap();
    let positions: Vec<i32> = routes.iter().map(|route| route.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);

    store.delete_route(route_ids[1]).await.unwrap();
    let routes = store
        .list_routes_for_scope(project_id, ClientType::Claude)
        .await
        .unwrap();
    let positions: Vec<i32> = routes.iter().map(|route| route.position).collect();
    assert_eq!(positions, vec![1, 2]);
}

#[tokio::test]
async fn batch_update_rejects_sparse_numbering() {
    let store = fresh_store().await;
    let provider_id = seed_provider(&store).await;
    let project_id = store.create_project("p", None, &[]).await.unwrap();
    let a = store
        .create_route(project_id, ClientType::Claude, provider_id, true, None, 10_000)
        .await
        .unwrap();
    let b = store
        .create_route(project_id, ClientType::Claude, provider_id, true, None, 10_000)
        .await
        .unwrap();

    let sparse = store
        .batch_update_positions(project_id, ClientType::Claude, &[(a, 1), (b, 3)])
        .await;
    assert!(matches!(sparse, Err(StoreError::Conflict(_))));

    store
        .batch_update_positions(project_id, ClientType::Claude, &[(a, 2), (b, 1)])
        .await
        .unwrap();
    let routes = store
        .list_routes_for_scope(project_id, ClientType::Claude)
        .await
        .unwrap();
    assert_eq!(routes[0].id, b);
    assert_eq!(routes[1].id, a);
}

#[tokio::test]
async fn deleting_provider_cascades_to_routes() {
    let store = fresh_store().await;
    let provider_id = seed_provider(&store).await;
    let other_id = seed_provider(&store).await;
    let project_id = store.create_project("p", None, &[]).await.unwrap();
    store
        .create_route(project_id, ClientType::Claude, provider_id, true, None, 10_000)
        .await
        .unwrap();
    store
        .create_route(project_id, ClientType::Claude, other_id, true, None, 10_000)
        .await
        .unwrap();

    store.delete_provider(provider_id).await.unwrap();

    let provider = store.get_provider(provider_id).await.unwrap();
    assert!(provider.deleted_at.is_some());
    let routes = store
        .list_routes_for_scope(project_id, ClientType::Claude)
        .await
        .unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].provider_id, other_id);
    assert_eq!(routes[0].position, 1);
}

#[tokio::test]
async fn cooldown_upsert_and_expiry() {
    let store = fresh_store().await;
    let provider_id = seed_provider(&store).await;
    let now = OffsetDateTime::now_utc();

    store
        .upsert_cooldown(provider_id, ClientType::Claude, now + Duration::hours(1), "rate_limit")
        .await
        .unwrap();
    // Same key again replaces, never duplicates.
    store
        .upsert_cooldown(provider_id, ClientType::Claude, now + Duration::hours(2), "rate_limit")
        .await
        .unwrap();

    let active = store.active_cooldowns(now).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].until_time, now + Duration::hours(2));

    assert!(store
        .active_cooldowns(now + Duration::hours(3))
        .await
        .unwrap()
        .is_empty());

    store
        .clear_cooldown(provider_id, ClientType::Claude)
        .await
        .unwrap();
    assert!(store.active_cooldowns(now).await.unwrap().is_empty());
}

#[tokio::test]
async fn failure_counts_accumulate_per_reason() {
    let store = fresh_store().await;
    let provider_id = seed_provider(&store).await;

    assert_eq!(
        store
            .increment_failure(provider_id, ClientType::Claude, "upstream_5xx")
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        store
            .increment_failure(provider_id, ClientType::Claude, "upstream_5xx")
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        store
            .increment_failure(provider_id, ClientType::Claude, "timeout")
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn usage_bucket_upsert_is_idempotent() {
    let store = fresh_store().await;
    let bucket = BucketUpsert {
        granularity: UsageGranularity::Minute,
        time_bucket: OffsetDateTime::from_unix_timestamp(1_700_000_040).unwrap(),
        route_id: 1,
        provider_id: 2,
        project_id: 3,
        api_token_id: 4,
        client_type: "claude".into(),
        model: "claude-sonnet-4-5".into(),
        request_count: 5,
        input_token_count: 100,
        output_token_count: 50,
        cache_read_token_count: 0,
        cache_5m_write_token_count: 0,
        cache_1h_write_token_count: 0,
        cost: 1_000,
    };
    store.upsert_usage_buckets(&[bucket.clone()]).await.unwrap();
    store.upsert_usage_buckets(&[bucket.clone()]).await.unwrap();

    let rows = store
        .list_usage_between(
            UsageGranularity::Minute,
            bucket.time_bucket - Duration::minutes(1),
            bucket.time_bucket + Duration::minutes(1),
            &UsageFilter::default(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].request_count, 5);
    assert_eq!(rows[0].cost, 1_000);
}

#[tokio::test]
async fn stale_requests_fail_over_on_restart() {
    let store = fresh_store().await;
    let request_id = store
        .create_proxy_request(NewProxyRequest {
            instance_id: "dead-instance".into(),
            request_id: "req-1".into(),
            session_id: None,
            client_type: ClientType::Claude,
            request_model: Some("claude-sonnet-4-5".into()),
            is_stream: true,
            project_id: None,
            api_token_id: None,
            request_info: None,
        })
        .await
        .unwrap();
    store
        .create_attempt(NewAttempt {
            proxy_request_id: request_id,
            instance_id: "dead-instance".into(),
            client_type: ClientType::Claude,
            request_model: Some("claude-sonnet-4-5".into()),
            mapped_model: None,
            project_id: None,
            route_id: 1,
            provider_id: 1,
            api_token_id: None,
        })
        .await
        .unwrap();

    let marked = store
        .mark_stale_as_failed("live-instance", OffsetDateTime::now_utc() - Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(marked, 1);

    let request = store.get_proxy_request(request_id).await.unwrap();
    assert_eq!(request.status, RequestStatus::Failed.as_str());
    assert!(request.end_time.is_some());
    let attempts = store.list_attempts_for_request(request_id).await.unwrap();
    assert_eq!(attempts[0].status, RequestStatus::Failed.as_str());
}

#[tokio::test]
async fn token_use_count_only_increases() {
    let store = fresh_store().await;
    let (token_id, token) = store.create_api_token("ci", None, None).await.unwrap();
    assert!(token.starts_with("maxx_"));

    let now = OffsetDateTime::now_utc();
    store.bump_api_token_usage(token_id, now).await.unwrap();
    store.bump_api_token_usage(token_id, now).await.unwrap();

    let stored = store.get_api_token(&token).await.unwrap().unwrap();
    assert_eq!(stored.use_count, 2);
    assert!(stored.last_used_at.is_some());
}

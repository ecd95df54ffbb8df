use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::get;
use clap::Parser;
use tracing::{info, warn};

use maxx_adapter::{AdapterRegistry, HttpClient};
use maxx_core::auth::TokenAuth;
use maxx_core::engine::ProxyEngine;
use maxx_core::events::EventHub;
use maxx_core::janitor::Janitor;
use maxx_core::quota::QuotaManager;
use maxx_router::{AdminState, ProxyState};
use maxx_stats::StatsService;
use maxx_storage::{SnapshotCache, Store};

mod cli;
mod oauth_callback;

const AGGREGATION_TICK: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maxx=info,warn".into()),
        )
        .init();

    let args = cli::Cli::parse();
    let instance_id = maxx_common::new_instance_id();
    info!(instance_id, "starting");

    let store = Store::connect(&args.dsn).await?;
    store.sync_schema().await?;
    store.migrate().await?;
    let live_requests = store.sync_request_count().await?;
    info!(live_requests, "store ready");
    maxx_storage::set_global_store(store.clone());

    let cache = Arc::new(SnapshotCache::load(store.clone()).await?);
    let registry = AdapterRegistry::with_defaults();
    let http = HttpClient::new(args.outbound_proxy.as_deref())
        .map_err(|err| anyhow::anyhow!("http client: {err}"))?;
    let events = EventHub::new();
    let stats = StatsService::new(store.clone());

    let engine = Arc::new(ProxyEngine::new(
        store.clone(),
        cache.clone(),
        registry.clone(),
        http.clone(),
        events.clone(),
        instance_id.clone(),
    ));
    let auth = Arc::new(TokenAuth::new(cache.clone(), store.clone()));

    // Background loops: janitor (with a startup pass), aggregation,
    // quota polling, and the local OAuth callback listener.
    let janitor = Arc::new(Janitor::new(store.clone(), stats.clone(), instance_id.clone()));
    janitor.run_once(time::OffsetDateTime::now_utc()).await;
    tokio::spawn(janitor.run_loop());

    let aggregation_stats = stats.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(AGGREGATION_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = time::OffsetDateTime::now_utc();
            if let Err(err) = aggregation_stats.run_minute_pass(now).await {
                warn!(error = %err, "minute aggregation failed");
            }
            if let Err(err) = aggregation_stats.run_rollups(now).await {
                warn!(error = %err, "rollup pass failed");
            }
        }
    });

    let quota = Arc::new(QuotaManager::new(
        store.clone(),
        cache.clone(),
        registry.clone(),
        http.clone(),
        events.clone(),
    ));
    tokio::spawn(quota.run_loop());

    if args.oauth_callback_port != 0 {
        tokio::spawn(oauth_callback::run(args.oauth_callback_port, events.clone()));
    }

    let admin_password = (!args.admin_password.is_empty()).then(|| Arc::new(args.admin_password));
    let app = axum::Router::new()
        .merge(maxx_router::proxy_router(ProxyState {
            engine: engine.clone(),
            auth,
        }))
        .nest(
            "/admin",
            maxx_router::admin_router(AdminState {
                engine,
                events: events.clone(),
                password: admin_password,
            }),
        )
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .route("/healthz", get(|| async { "ok" }));

    let bind = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(%bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("drained, bye");
    Ok(())
}

/// Drain inbound on ctrl-c; in-flight rows a crash leaves behind are
/// failed over by the next startup's janitor pass.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "shutdown signal listener failed");
    }
}

//! Read-through cache over the hot catalog tables.
//!
//! Single writer (admin mutations trigger `reload`), many readers. The
//! cache is authoritative for reads on the data plane; the store remains
//! the source of truth.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use maxx_common::ClientType;

use crate::entities;
use crate::store::{Store, StoreResult};

#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub tokens_by_value: HashMap<String, entities::api_tokens::Model>,
    pub providers_by_id: HashMap<i64, entities::providers::Model>,
    /// (project_id, client_type) → routes ordered by position.
    pub routes_by_scope: HashMap<(i64, String), Vec<entities::routes::Model>>,
    pub retry_configs_by_id: HashMap<i64, entities::retry_configs::Model>,
    /// Enabled mappings in priority order (ascending).
    pub mappings: Vec<entities::model_mappings::Model>,
    pub prices: Vec<entities::model_prices::Model>,
}

pub struct SnapshotCache {
    store: Store,
    snapshot: ArcSwap<StoreSnapshot>,
}

impl SnapshotCache {
    pub async fn load(store: Store) -> StoreResult<Self> {
        let snapshot = build_snapshot(&store).await?;
        Ok(Self {
            store,
            snapshot: ArcSwap::from_pointee(snapshot),
        })
    }

    pub fn current(&self) -> Arc<StoreSnapshot> {
        self.snapshot.load_full()
    }

    /// Invalidate-on-write: admin surfaces call this after any catalog
    /// mutation.
    pub async fn reload(&self) -> StoreResult<()> {
        let snapshot = build_snapshot(&self.store).await?;
        self.snapshot.store(Arc::new(snapshot));
        Ok(())
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

async fn build_snapshot(store: &Store) -> StoreResult<StoreSnapshot> {
    let tokens = store.list_api_tokens().await?;
    let providers = store.list_providers(true).await?;
    let routes = store.list_routes().await?;
    let retry_configs = store.list_retry_configs().await?;
    let mappings = store.list_enabled_mappings().await?;
    let prices = store.list_model_prices().await?;

    let mut snapshot = StoreSnapshot {
        mappings,
        prices,
        ..Default::default()
    };
    for token in tokens {
        snapshot.tokens_by_value.insert(token.token.clone(), token);
    }
    for provider in providers {
        snapshot.providers_by_id.insert(provider.id, provider);
    }
    for route in routes {
        snapshot
            .routes_by_scope
            .entry((route.project_id, route.client_type.clone()))
            .or_default()
            .push(route);
    }
    for routes in snapshot.routes_by_scope.values_mut() {
        routes.sort_by_key(|route| route.position);
    }
    for config in retry_configs {
        snapshot.retry_configs_by_id.insert(config.id, config);
    }
    Ok(snapshot)
}

impl StoreSnapshot {
    pub fn routes_for(&self, project_id: i64, client_type: ClientType) -> &[entities::routes::Model] {
        self.routes_by_scope
            .get(&(project_id, client_type.as_str().to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

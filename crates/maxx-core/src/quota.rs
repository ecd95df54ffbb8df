//! Quota polling and route auto-sort.
//!
//! Both loops are gated on "a request was served in the last 10 minutes"
//! so an idle deployment does not burn vendor quota checks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use maxx_adapter::{AdapterRegistry, HttpClient};
use maxx_common::{ClientType, ProviderConfig, ProviderType, QuotaSnapshot};
use maxx_storage::store::settings::{
    AUTO_SORT_ANTIGRAVITY, AUTO_SORT_CODEX, QUOTA_REFRESH_INTERVAL,
};
use maxx_storage::{SnapshotCache, Store};

use crate::events::{Event, EventHub};

const IDLE_MINUTES: i64 = 10;
const TICK: Duration = Duration::from_secs(60);

pub struct QuotaManager {
    store: Store,
    cache: Arc<SnapshotCache>,
    registry: AdapterRegistry,
    http: HttpClient,
    events: EventHub,
}

impl QuotaManager {
    pub fn new(
        store: Store,
        cache: Arc<SnapshotCache>,
        registry: AdapterRegistry,
        http: HttpClient,
        events: EventHub,
    ) -> Self {
        Self {
            store,
            cache,
            registry,
            http,
            events,
        }
    }

    /// Periodic driver. The refresh interval is re-read from settings
    /// every tick; zero disables polling without stopping the loop.
    pub async fn run_loop(self: Arc<Self>) {
        let mut ticker = time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_poll: Option<OffsetDateTime> = None;
        loop {
            ticker.tick().await;
            let interval = match self.store.setting_i64(QUOTA_REFRESH_INTERVAL, 300).await {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, "quota interval read failed");
                    continue;
                }
            };
            if interval <= 0 {
                continue;
            }
            let now = OffsetDateTime::now_utc();
            if let Some(last) = last_poll
                && (now - last).whole_seconds() < interval
            {
                continue;
            }
            if !self.recently_active(now).await {
                debug!("no traffic in the idle window, skipping quota poll");
                continue;
            }
            last_poll = Some(now);
            if let Err(err) = self.poll_once(now).await {
                warn!(error = %err, "quota poll pass failed");
            }
        }
    }

    async fn recently_active(&self, now: OffsetDateTime) -> bool {
        match self.store.last_request_at().await {
            Ok(Some(at)) => (now - at).whole_minutes() < IDLE_MINUTES,
            Ok(None) => false,
            Err(err) => {
                warn!(error = %err, "activity probe failed");
                false
            }
        }
    }

    /// One refresh pass: credential freshness, quota fetch, persistence,
    /// then auto-sort for each enabled family.
    pub async fn poll_once(&self, now: OffsetDateTime) -> Result<(), maxx_storage::StoreError> {
        let providers = self.store.list_providers(false).await?;
        let mut config_changed = false;

        for provider in &providers {
            let Some(provider_type) = ProviderType::parse(&provider.provider_type) else {
                continue;
            };
            if !matches!(provider_type, ProviderType::Antigravity | ProviderType::Codex) {
                continue;
            }
            let Some(adapter) = self.registry.get(provider_type) else {
                continue;
            };
            let Ok(mut config) =
                serde_json::from_value::<ProviderConfig>(provider.config.clone())
            else {
                warn!(provider_id = provider.id, "undecodable provider config");
                continue;
            };

            match adapter.refresh_credentials(&self.http, &config).await {
                Ok(Some(updated)) => {
                    if let Ok(json) = serde_json::to_value(&updated) {
                        self.store.update_provider_config(provider.id, json).await?;
                        config_changed = true;
                    }
                    config = updated;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(provider_id = provider.id, error = %err, "credential refresh failed");
                    continue;
                }
            }

            match adapter.fetch_quota(&self.http, &config).await {
                Ok(snapshot) => {
                    if let Ok(json) = serde_json::to_value(&snapshot) {
                        self.store.upsert_quota(provider.id, json).await?;
                    }
                    let event = match provider_type {
                        ProviderType::Codex => Event::CodexQuotaUpdated {
                            provider_id: provider.id,
                        },
                        _ => Event::QuotaUpdated {
                            provider_id: provider.id,
                        },
                    };
                    self.events.publish(event);
                }
                Err(err) => {
                    warn!(provider_id = provider.id, error = %err, "quota fetch failed");
                }
            }
        }

        if config_changed && let Err(err) = self.cache.reload().await {
            warn!(error = %err, "snapshot reload failed");
        }

        if self.store.setting_bool(AUTO_SORT_ANTIGRAVITY, false).await? {
            self.auto_sort(ProviderType::Antigravity, now).await?;
        }
        if self.store.setting_bool(AUTO_SORT_CODEX, false).await? {
            self.auto_sort(ProviderType::Codex, now).await?;
        }
        Ok(())
    }

    /// Reorder one family's routes per scope: family routes permute among
    /// the position slots they already occupy, everything else keeps its
    /// relative order, and the result is a dense 1..N renumber.
    pub async fn auto_sort(
        &self,
        family: ProviderType,
        now: OffsetDateTime,
    ) -> Result<(), maxx_storage::StoreError> {
        let observed_at = now.unix_timestamp();
        let quotas: HashMap<i64, QuotaSnapshot> = self
            .store
            .list_quotas()
            .await?
            .into_iter()
            .filter_map(|row| {
                serde_json::from_value(row.snapshot)
                    .ok()
                    .map(|snapshot| (row.provider_id, snapshot))
            })
            .collect();

        let snapshot = self.cache.current();
        let routes = self.store.list_routes().await?;
        let mut scopes: HashMap<(i64, String), Vec<maxx_storage::entities::routes::Model>> =
            HashMap::new();
        for route in routes {
            scopes
                .entry((route.project_id, route.client_type.clone()))
                .or_default()
                .push(route);
        }

        for ((project_id, client_type_raw), mut scope_routes) in scopes {
            scope_routes.sort_by_key(|route| route.position);
            let family_slots: Vec<usize> = scope_routes
                .iter()
                .enumerate()
                .filter(|(_, route)| {
                    snapshot
                        .providers_by_id
                        .get(&route.provider_id)
                        .map(|provider| provider.provider_type == family.as_str())
                        .unwrap_or(false)
                })
                .map(|(index, _)| index)
                .collect();
            if family_slots.len() < 2 {
                continue;
            }

            let mut family_routes: Vec<_> = family_slots
                .iter()
                .map(|index| scope_routes[*index].clone())
                .collect();
            family_routes.sort_by_key(|route| {
                sort_key(family, quotas.get(&route.provider_id), observed_at)
            });

            let mut reordered = scope_routes.clone();
            for (slot, route) in family_slots.iter().zip(family_routes) {
                reordered[*slot] = route;
            }

            let positions: Vec<(i64, i32)> = reordered
                .iter()
                .enumerate()
                .map(|(index, route)| (route.id, index as i32 + 1))
                .collect();
            let unchanged = reordered
                .iter()
                .zip(&scope_routes)
                .all(|(new, old)| new.id == old.id);
            if unchanged {
                continue;
            }

            let Some(client_type) = ClientType::parse(&client_type_raw) else {
                continue;
            };
            self.store
                .batch_update_positions(project_id, client_type, &positions)
                .await?;
            info!(project_id, client_type = %client_type, family = %family, "routes re-sorted");
            self.events.publish(Event::RoutesUpdated {
                project_id,
                client_type: client_type_raw.clone(),
            });
        }

        if let Err(err) = self.cache.reload().await {
            warn!(error = %err, "snapshot reload failed");
        }
        Ok(())
    }
}

/// Lower sorts earlier.
///
/// Antigravity orders by the claude model's reset time, nil last. Codex
/// orders by reset time, then quota-less routes by remaining percentage
/// descending, forbidden or unknown routes last.
fn sort_key(
    family: ProviderType,
    quota: Option<&QuotaSnapshot>,
    observed_at: i64,
) -> (u8, i64, i64) {
    match family {
        ProviderType::Antigravity => match quota.and_then(|q| q.claude_model_reset_at()) {
            Some(reset_at) => (0, reset_at, 0),
            None => (1, i64::MAX, 0),
        },
        ProviderType::Codex => {
            let Some(quota) = quota else {
                return (3, i64::MAX, 0);
            };
            if quota.is_forbidden {
                return (3, i64::MAX, 0);
            }
            if let Some(reset_at) = quota.effective_reset_at(observed_at) {
                return (0, reset_at, 0);
            }
            match quota.remaining_percent {
                // Descending remaining: negate into the ascending key.
                Some(remaining) => (1, -(remaining * 100.0) as i64, 0),
                None => (3, i64::MAX, 0),
            }
        }
        _ => (2, 0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codex_reset_times_order_first() {
        let quota = |reset: Option<i64>, remaining: Option<f64>, forbidden: bool| QuotaSnapshot {
            reset_at: reset,
            remaining_percent: remaining,
            is_forbidden: forbidden,
            ..Default::default()
        };
        let with_reset_30 = quota(Some(1_800), None, false);
        let with_reset_5 = quota(Some(300), None, false);
        let with_reset_60 = quota(Some(3_600), None, false);

        let mut keys = vec![
            ("a", sort_key(ProviderType::Codex, Some(&with_reset_30), 0)),
            ("b", sort_key(ProviderType::Codex, Some(&with_reset_5), 0)),
            ("c", sort_key(ProviderType::Codex, Some(&with_reset_60), 0)),
        ];
        keys.sort_by_key(|(_, key)| *key);
        let order: Vec<&str> = keys.iter().map(|(name, _)| *name).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn codex_quota_less_routes_order_by_remaining() {
        let rich = QuotaSnapshot {
            remaining_percent: Some(90.0),
            ..Default::default()
        };
        let poor = QuotaSnapshot {
            remaining_percent: Some(10.0),
            ..Default::default()
        };
        let forbidden = QuotaSnapshot {
            is_forbidden: true,
            remaining_percent: Some(99.0),
            ..Default::default()
        };
        let key_rich = sort_key(ProviderType::Codex, Some(&rich), 0);
        let key_poor = sort_key(ProviderType::Codex, Some(&poor), 0);
        let key_forbidden = sort_key(ProviderType::Codex, Some(&forbidden), 0);
        assert!(key_rich < key_poor);
        assert!(key_poor < key_forbidden);
        assert_eq!(sort_key(ProviderType::Codex, None, 0), key_forbidden);
    }

    #[test]
    fn antigravity_nil_reset_goes_last() {
        let with_reset = QuotaSnapshot {
            models: vec![maxx_common::ModelQuota {
                model: "claude-sonnet-4-5".into(),
                remaining_percent: None,
                reset_at: Some(500),
            }],
            ..Default::default()
        };
        let without = QuotaSnapshot::default();
        assert!(
            sort_key(ProviderType::Antigravity, Some(&with_reset), 0)
                < sort_key(ProviderType::Antigravity, Some(&without), 0)
        );
    }
}

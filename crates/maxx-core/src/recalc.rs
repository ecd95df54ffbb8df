//! Admin-triggered cost recalculation over the attempt log. Batches of
//! 500 in one transaction each; per-batch errors are reported in the
//! summary and the job keeps going.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use maxx_common::TokenMetrics;
use maxx_pricing::Pricing;
use maxx_storage::{SnapshotCache, Store};

use crate::engine::pricing_from_snapshot;
use crate::events::{Event, EventHub};

const BATCH_SIZE: u64 = 500;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RecalcSummary {
    pub scanned: u64,
    pub updated: u64,
    pub batch_errors: u64,
}

pub async fn recalculate_costs(
    store: &Store,
    cache: &Arc<SnapshotCache>,
    events: &EventHub,
) -> RecalcSummary {
    let snapshot = cache.current();
    let pricing: Pricing = pricing_from_snapshot(&snapshot);
    let multipliers: std::collections::HashMap<i64, i64> = snapshot
        .routes_by_scope
        .values()
        .flatten()
        .map(|route| (route.id, route.cost_multiplier))
        .collect();

    let mut summary = RecalcSummary::default();
    let mut cursor = 0i64;
    loop {
        let page = match store.list_attempts_page(cursor, BATCH_SIZE).await {
            Ok(page) => page,
            Err(err) => {
                warn!(error = %err, "recalc page read failed");
                summary.batch_errors += 1;
                break;
            }
        };
        if page.is_empty() {
            break;
        }
        cursor = page.last().map(|row| row.id).unwrap_or(cursor);
        summary.scanned += page.len() as u64;

        let updates: Vec<(i64, i64, i64)> = page
            .iter()
            .map(|attempt| {
                let model = attempt
                    .response_model
                    .as_deref()
                    .or(attempt.mapped_model.as_deref())
                    .or(attempt.request_model.as_deref())
                    .unwrap_or_default();
                let metrics = TokenMetrics {
                    input_tokens: attempt.input_token_count,
                    output_tokens: attempt.output_token_count,
                    cache_read_tokens: attempt.cache_read_token_count,
                    cache_5m_write_tokens: attempt.cache_5m_write_token_count,
                    cache_1h_write_tokens: attempt.cache_1h_write_token_count,
                    cache_creation_total: 0,
                };
                let multiplier = attempt
                    .route_id
                    .and_then(|route_id| multipliers.get(&route_id).copied())
                    .unwrap_or(10_000);
                let quote = pricing.quote(model, &metrics, multiplier);
                (attempt.id, quote.cost, quote.price_id)
            })
            .collect();

        match store.apply_attempt_costs(&updates).await {
            Ok(()) => summary.updated += updates.len() as u64,
            Err(err) => {
                // Partial success is a valid outcome; keep going.
                warn!(error = %err, "recalc batch failed");
                summary.batch_errors += 1;
            }
        }

        events.publish(Event::RecalculateCostsProgress {
            done: summary.scanned,
            total: 0,
            errors: summary.batch_errors,
        });

        if (page.len() as u64) < BATCH_SIZE {
            break;
        }
    }
    summary
}

use std::collections::HashMap;

use chrono_tz::Tz;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use maxx_storage::Store;
use maxx_storage::entities;
use maxx_storage::store::{AttemptAggregate, BucketUpsert, UsageFilter, UsageGranularity};

use crate::bucket::truncate;
use crate::{Counters, DimKey, StatsResult};

/// Overlap absorbed on each minute pass so late-arriving attempt writes
/// still land in their bucket.
pub const MINUTE_OVERLAP: Duration = Duration::minutes(2);
/// Backfill window when no minute bucket exists yet.
const FIRST_PASS_LOOKBACK: Duration = Duration::hours(2);

pub const MINUTE_RETENTION: Duration = Duration::hours(2);
pub const HOUR_RETENTION: Duration = Duration::days(7);
pub const DAY_RETENTION: Duration = Duration::days(90);

#[derive(Clone)]
pub struct StatsService {
    store: Store,
}

impl StatsService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Timezone is re-read from settings per pass; a bad value falls back
    /// to the stored default rather than stopping aggregation.
    pub async fn timezone(&self) -> StatsResult<Tz> {
        let name = self.store.timezone().await?;
        Ok(name.parse().unwrap_or(chrono_tz::Asia::Shanghai))
    }

    /// Minute pass: fold terminal attempts with
    /// `end_time ∈ [latest_bucket − overlap, floor_minute(now))` into
    /// minute buckets. Upserts replace counters, so re-running over the
    /// same window is idempotent.
    pub async fn run_minute_pass(&self, now: OffsetDateTime) -> StatsResult<usize> {
        let tz = self.timezone().await?;
        let end = truncate(now, UsageGranularity::Minute, tz);
        let start = match self
            .store
            .latest_bucket_start(UsageGranularity::Minute)
            .await?
        {
            Some(latest) => latest - MINUTE_OVERLAP,
            None => end - FIRST_PASS_LOOKBACK,
        };
        if start >= end {
            return Ok(0);
        }

        let attempts = self.store.list_terminal_attempts_between(start, end).await?;
        let grouped = fold_attempts(&attempts, UsageGranularity::Minute, tz, &UsageFilter::default());
        let upserts = to_upserts(UsageGranularity::Minute, grouped);
        let count = upserts.len();
        self.store.upsert_usage_buckets(&upserts).await?;
        debug!(buckets = count, "minute aggregation pass");
        Ok(count)
    }

    /// Rollups minute→hour→day→month. Day and month targets re-truncate
    /// source bucket starts in the configured timezone.
    pub async fn run_rollups(&self, now: OffsetDateTime) -> StatsResult<()> {
        let tz = self.timezone().await?;
        let steps = [
            (UsageGranularity::Minute, UsageGranularity::Hour),
            (UsageGranularity::Hour, UsageGranularity::Day),
            (UsageGranularity::Day, UsageGranularity::Month),
        ];
        for (source, target) in steps {
            self.rollup_step(now, source, target, tz).await?;
        }
        Ok(())
    }

    async fn rollup_step(
        &self,
        now: OffsetDateTime,
        source: UsageGranularity,
        target: UsageGranularity,
        tz: Tz,
    ) -> StatsResult<()> {
        let target_now = truncate(now, target, tz);
        let start = match self.store.latest_bucket_start(target).await? {
            Some(latest) => latest,
            None => match self.store.earliest_bucket_start(source).await? {
                Some(earliest) => truncate(earliest, target, tz),
                None => return Ok(()),
            },
        };
        let rows = self
            .store
            .list_usage_between(source, start, target_now, &UsageFilter::default())
            .await?;
        if rows.is_empty() {
            return Ok(());
        }

        let mut grouped: HashMap<(OffsetDateTime, DimKey), Counters> = HashMap::new();
        for row in rows {
            let bucket = truncate(row.time_bucket, target, tz);
            let (key, counters) = split_row(&row);
            grouped.entry((bucket, key)).or_default().add(&counters);
        }
        let upserts = to_upserts(target, grouped);
        self.store.upsert_usage_buckets(&upserts).await?;
        Ok(())
    }

    /// Bucket TTLs, invoked from the janitor loop.
    pub async fn enforce_retention(&self, now: OffsetDateTime) -> StatsResult<()> {
        self.store
            .delete_usage_before(UsageGranularity::Minute, now - MINUTE_RETENTION)
            .await?;
        self.store
            .delete_usage_before(UsageGranularity::Hour, now - HOUR_RETENTION)
            .await?;
        self.store
            .delete_usage_before(UsageGranularity::Day, now - DAY_RETENTION)
            .await?;
        Ok(())
    }
}

/// Group attempts into `(bucket, dimension)` counter cells, applying the
/// dimension filter the raw table cannot.
pub(crate) fn fold_attempts(
    attempts: &[AttemptAggregate],
    granularity: UsageGranularity,
    tz: Tz,
    filter: &UsageFilter,
) -> HashMap<(OffsetDateTime, DimKey), Counters> {
    let mut grouped: HashMap<(OffsetDateTime, DimKey), Counters> = HashMap::new();
    for attempt in attempts {
        if !matches_filter(attempt, filter) {
            continue;
        }
        let bucket = truncate(attempt.end_time, granularity, tz);
        let key = DimKey {
            route_id: attempt.route_id,
            provider_id: attempt.provider_id,
            project_id: attempt.project_id,
            api_token_id: attempt.api_token_id,
            client_type: attempt.client_type.clone(),
            model: attempt.model.clone(),
        };
        grouped.entry((bucket, key)).or_default().add(&Counters {
            request_count: 1,
            input_token_count: attempt.input_token_count,
            output_token_count: attempt.output_token_count,
            cache_read_token_count: attempt.cache_read_token_count,
            cache_5m_write_token_count: attempt.cache_5m_write_token_count,
            cache_1h_write_token_count: attempt.cache_1h_write_token_count,
            cost: attempt.cost,
        });
    }
    grouped
}

fn matches_filter(attempt: &AttemptAggregate, filter: &UsageFilter) -> bool {
    if let Some(project_id) = filter.project_id
        && attempt.project_id != project_id
    {
        return false;
    }
    if let Some(route_id) = filter.route_id
        && attempt.route_id != route_id
    {
        return false;
    }
    if let Some(provider_id) = filter.provider_id
        && attempt.provider_id != provider_id
    {
        return false;
    }
    if let Some(api_token_id) = filter.api_token_id
        && attempt.api_token_id != api_token_id
    {
        return false;
    }
    if let Some(client_type) = filter.client_type
        && attempt.client_type != client_type.as_str()
    {
        return false;
    }
    if let Some(model) = &filter.model
        && &attempt.model != model
    {
        return false;
    }
    true
}

pub(crate) fn split_row(row: &entities::usage_stats::Model) -> (DimKey, Counters) {
    (
        DimKey {
            route_id: row.route_id,
            provider_id: row.provider_id,
            project_id: row.project_id,
            api_token_id: row.api_token_id,
            client_type: row.client_type.clone(),
            model: row.model.clone(),
        },
        Counters {
            request_count: row.request_count,
            input_token_count: row.input_token_count,
            output_token_count: row.output_token_count,
            cache_read_token_count: row.cache_read_token_count,
            cache_5m_write_token_count: row.cache_5m_write_token_count,
            cache_1h_write_token_count: row.cache_1h_write_token_count,
            cost: row.cost,
        },
    )
}

pub(crate) fn to_upserts(
    granularity: UsageGranularity,
    grouped: HashMap<(OffsetDateTime, DimKey), Counters>,
) -> Vec<BucketUpsert> {
    grouped
        .into_iter()
        .map(|((time_bucket, key), counters)| BucketUpsert {
            granularity,
            time_bucket,
            route_id: key.route_id,
            provider_id: key.provider_id,
            project_id: key.project_id,
            api_token_id: key.api_token_id,
            client_type: key.client_type,
            model: key.model,
            request_count: counters.request_count,
            input_token_count: counters.input_token_count,
            output_token_count: counters.output_token_count,
            cache_read_token_count: counters.cache_read_token_count,
            cache_5m_write_token_count: counters.cache_5m_write_token_count,
            cache_1h_write_token_count: counters.cache_1h_write_token_count,
            cost: counters.cost,
        })
        .collect()
}

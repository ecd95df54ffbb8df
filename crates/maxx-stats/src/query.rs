use std::collections::HashMap;

use chrono_tz::Tz;
use time::{Duration, OffsetDateTime};

use maxx_storage::entities;
use maxx_storage::store::{UsageFilter, UsageGranularity};

use crate::aggregate::{StatsService, fold_attempts, split_row};
use crate::bucket::truncate;
use crate::{Counters, DimKey, StatsError, StatsResult};

/// Raw attempts are only consulted for this trailing window; everything
/// older is served from buckets.
const LIVE_TAIL: Duration = Duration::minutes(2);

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub granularity: UsageGranularity,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    pub filter: UsageFilter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsBucket {
    pub time_bucket: OffsetDateTime,
    pub key: DimKey,
    pub counters: Counters,
}

impl From<entities::usage_stats::Model> for StatsBucket {
    fn from(row: entities::usage_stats::Model) -> Self {
        let (key, counters) = split_row(&row);
        StatsBucket {
            time_bucket: row.time_bucket,
            key,
            counters,
        }
    }
}

impl StatsService {
    /// Dashboard query: complete *and* fresh buckets over the window.
    ///
    /// The portion strictly before the current G-bucket is served from
    /// `usage_stats(G)`; the current bucket is stitched from finer
    /// sources plus a live tail over raw attempts. The four sub-queries
    /// run concurrently.
    pub async fn query(
        &self,
        request: QueryRequest,
        now: OffsetDateTime,
    ) -> StatsResult<Vec<StatsBucket>> {
        if request.start > request.end {
            return Err(StatsError::Range);
        }
        let tz = self.timezone().await?;
        let granularity = request.granularity;

        if granularity == UsageGranularity::Minute {
            return self.query_minute(request, now, tz).await;
        }

        let current_start = truncate(now, granularity, tz);

        // Historical pass: strict less-than on the current bucket's start,
        // so the stitched bucket can never double-count.
        let hist_end = request.end.min(current_start);
        let mut rows: Vec<StatsBucket> = if request.start < hist_end {
            self.store()
                .list_usage_between(granularity, request.start, hist_end, &request.filter)
                .await?
                .into_iter()
                .map(StatsBucket::from)
                .collect()
        } else {
            Vec::new()
        };

        if request.end <= current_start {
            return Ok(rows);
        }

        let synthetic = self
            .stitch_current_bucket(granularity, current_start, now, tz, &request.filter)
            .await?;

        rows.retain(|row| row.time_bucket != current_start);
        for (key, counters) in synthetic {
            rows.push(StatsBucket {
                time_bucket: current_start,
                key,
                counters,
            });
        }
        rows.sort_by(|a, b| a.time_bucket.cmp(&b.time_bucket));
        Ok(rows)
    }

    /// One synthetic cell per dimension key for the current G-bucket,
    /// assembled from progressively finer sources.
    async fn stitch_current_bucket(
        &self,
        granularity: UsageGranularity,
        current_start: OffsetDateTime,
        now: OffsetDateTime,
        tz: Tz,
        filter: &UsageFilter,
    ) -> StatsResult<HashMap<DimKey, Counters>> {
        let day_start = truncate(now, UsageGranularity::Day, tz);
        let hour_start = truncate(now, UsageGranularity::Hour, tz);
        let tail_start = truncate(now - LIVE_TAIL, UsageGranularity::Minute, tz);

        let store = self.store();

        // Day buckets participate only for month queries.
        let day_range = (granularity == UsageGranularity::Month && day_start > current_start)
            .then_some((current_start, day_start));
        let hour_range = (hour_start > day_start.max(current_start))
            .then_some((day_start.max(current_start), hour_start));
        let minute_range = (tail_start > hour_start).then_some((hour_start, tail_start));

        let (days, hours, minutes, tail) = tokio::join!(
            async {
                match day_range {
                    Some((from, to)) => {
                        store
                            .list_usage_between(UsageGranularity::Day, from, to, filter)
                            .await
                    }
                    None => Ok(Vec::new()),
                }
            },
            async {
                match hour_range {
                    Some((from, to)) => {
                        store
                            .list_usage_between(UsageGranularity::Hour, from, to, filter)
                            .await
                    }
                    None => Ok(Vec::new()),
                }
            },
            async {
                match minute_range {
                    Some((from, to)) => {
                        store
                            .list_usage_between(UsageGranularity::Minute, from, to, filter)
                            .await
                    }
                    None => Ok(Vec::new()),
                }
            },
            async { store.list_terminal_attempts_between(tail_start, now).await },
        );

        let mut merged: HashMap<DimKey, Counters> = HashMap::new();
        for row in days?.into_iter().chain(hours?).chain(minutes?) {
            let (key, counters) = split_row(&row);
            merged.entry(key).or_default().add(&counters);
        }
        for ((_, key), counters) in fold_attempts(&tail?, UsageGranularity::Minute, tz, filter) {
            merged.entry(key).or_default().add(&counters);
        }
        Ok(merged)
    }

    /// Minute queries keep per-minute resolution: the live tail replaces
    /// only the minutes it actually covers.
    async fn query_minute(
        &self,
        request: QueryRequest,
        now: OffsetDateTime,
        tz: Tz,
    ) -> StatsResult<Vec<StatsBucket>> {
        let tail_start = truncate(now - LIVE_TAIL, UsageGranularity::Minute, tz);
        let hist_end = request.end.min(tail_start);

        let mut rows: Vec<StatsBucket> = if request.start < hist_end {
            self.store()
                .list_usage_between(UsageGranularity::Minute, request.start, hist_end, &request.filter)
                .await?
                .into_iter()
                .map(StatsBucket::from)
                .collect()
        } else {
            Vec::new()
        };

        // A window ending before the tail never reads raw attempts.
        if request.end > tail_start {
            let attempts = self
                .store()
                .list_terminal_attempts_between(tail_start.max(request.start), request.end.min(now))
                .await?;
            let folded = fold_attempts(&attempts, UsageGranularity::Minute, tz, &request.filter);
            rows.retain(|row| row.time_bucket < tail_start);
            for ((bucket, key), counters) in folded {
                rows.push(StatsBucket {
                    time_bucket: bucket,
                    key,
                    counters,
                });
            }
        }

        rows.sort_by(|a, b| a.time_bucket.cmp(&b.time_bucket));
        Ok(rows)
    }
}

use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use time::OffsetDateTime;

use maxx_common::{ClientType, RequestStatus};

use super::{Store, StoreResult};
use crate::entities;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageGranularity {
    Minute,
    Hour,
    Day,
    Month,
}

impl UsageGranularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageGranularity::Minute => "minute",
            UsageGranularity::Hour => "hour",
            UsageGranularity::Day => "day",
            UsageGranularity::Month => "month",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "minute" => Some(UsageGranularity::Minute),
            "hour" => Some(UsageGranularity::Hour),
            "day" => Some(UsageGranularity::Day),
            "month" => Some(UsageGranularity::Month),
            _ => None,
        }
    }

    /// Next-coarser granularity for roll-up, if any.
    pub fn coarser(&self) -> Option<UsageGranularity> {
        match self {
            UsageGranularity::Minute => Some(UsageGranularity::Hour),
            UsageGranularity::Hour => Some(UsageGranularity::Day),
            UsageGranularity::Day => Some(UsageGranularity::Month),
            UsageGranularity::Month => None,
        }
    }
}

/// One fully-specified bucket row; upserts replace counters so a repeated
/// aggregation pass over the same window is idempotent.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketUpsert {
    pub granularity: UsageGranularity,
    pub time_bucket: OffsetDateTime,
    pub route_id: i64,
    pub provider_id: i64,
    pub project_id: i64,
    pub api_token_id: i64,
    pub client_type: String,
    pub model: String,
    pub request_count: i64,
    pub input_token_count: i64,
    pub output_token_count: i64,
    pub cache_read_token_count: i64,
    pub cache_5m_write_token_count: i64,
    pub cache_1h_write_token_count: i64,
    pub cost: i64,
}

/// Slim attempt view the aggregator folds into buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptAggregate {
    pub end_time: OffsetDateTime,
    pub route_id: i64,
    pub provider_id: i64,
    pub project_id: i64,
    pub api_token_id: i64,
    pub client_type: String,
    pub model: String,
    pub input_token_count: i64,
    pub output_token_count: i64,
    pub cache_read_token_count: i64,
    pub cache_5m_write_token_count: i64,
    pub cache_1h_write_token_count: i64,
    pub cost: i64,
}

/// Dimension filters for dashboard queries; `None` means "any".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageFilter {
    pub project_id: Option<i64>,
    pub route_id: Option<i64>,
    pub provider_id: Option<i64>,
    pub api_token_id: Option<i64>,
    pub client_type: Option<ClientType>,
    pub model: Option<String>,
}

impl Store {
    /// Terminal attempts whose end time falls in `[start, end)`.
    pub async fn list_terminal_attempts_between(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> StoreResult<Vec<AttemptAggregate>> {
        use entities::proxy_upstream_attempts::Column;
        let terminal = [
            RequestStatus::Completed.as_str(),
            RequestStatus::Failed.as_str(),
            RequestStatus::Cancelled.as_str(),
        ];
        let rows = entities::ProxyUpstreamAttempts::find()
            .filter(Column::Status.is_in(terminal))
            .filter(Column::EndTime.gte(start))
            .filter(Column::EndTime.lt(end))
            .all(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let end_time = row.end_time?;
                let model = row
                    .response_model
                    .or(row.mapped_model)
                    .or(row.request_model)
                    .unwrap_or_default();
                Some(AttemptAggregate {
                    end_time,
                    route_id: row.route_id.unwrap_or(0),
                    provider_id: row.provider_id.unwrap_or(0),
                    project_id: row.project_id.unwrap_or(0),
                    api_token_id: row.api_token_id.unwrap_or(0),
                    client_type: row.client_type,
                    model,
                    input_token_count: row.input_token_count,
                    output_token_count: row.output_token_count,
                    cache_read_token_count: row.cache_read_token_count,
                    cache_5m_write_token_count: row.cache_5m_write_token_count,
                    cache_1h_write_token_count: row.cache_1h_write_token_count,
                    cost: row.cost,
                })
            })
            .collect())
    }

    pub async fn upsert_usage_buckets(&self, buckets: &[BucketUpsert]) -> StoreResult<()> {
        use entities::usage_stats::Column;
        if buckets.is_empty() {
            return Ok(());
        }
        let now = OffsetDateTime::now_utc();
        let txn = self.db.begin().await?;
        for bucket in buckets {
            let active = entities::usage_stats::ActiveModel {
                id: ActiveValue::NotSet,
                granularity: ActiveValue::Set(bucket.granularity.as_str().to_string()),
                time_bucket: ActiveValue::Set(bucket.time_bucket),
                route_id: ActiveValue::Set(bucket.route_id),
                provider_id: ActiveValue::Set(bucket.provider_id),
                project_id: ActiveValue::Set(bucket.project_id),
                api_token_id: ActiveValue::Set(bucket.api_token_id),
                client_type: ActiveValue::Set(bucket.client_type.clone()),
                model: ActiveValue::Set(bucket.model.clone()),
                request_count: ActiveValue::Set(bucket.request_count),
                input_token_count: ActiveValue::Set(bucket.input_token_count),
                output_token_count: ActiveValue::Set(bucket.output_token_count),
                cache_read_token_count: ActiveValue::Set(bucket.cache_read_token_count),
                cache_5m_write_token_count: ActiveValue::Set(bucket.cache_5m_write_token_count),
                cache_1h_write_token_count: ActiveValue::Set(bucket.cache_1h_write_token_count),
                cost: ActiveValue::Set(bucket.cost),
                updated_at: ActiveValue::Set(now),
            };
            entities::UsageStats::insert(active)
                .on_conflict(
                    OnConflict::columns([
                        Column::Granularity,
                        Column::TimeBucket,
                        Column::RouteId,
                        Column::ProviderId,
                        Column::ProjectId,
                        Column::ApiTokenId,
                        Column::ClientType,
                        Column::Model,
                    ])
                    .update_columns([
                        Column::RequestCount,
                        Column::InputTokenCount,
                        Column::OutputTokenCount,
                        Column::CacheReadTokenCount,
                        Column::Cache5mWriteTokenCount,
                        Column::Cache1hWriteTokenCount,
                        Column::Cost,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
                )
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;
        Ok(())
    }

    /// Buckets with `time_bucket` in `[start, end)` at one granularity.
    pub async fn list_usage_between(
        &self,
        granularity: UsageGranularity,
        start: OffsetDateTime,
        end: OffsetDateTime,
        filter: &UsageFilter,
    ) -> StoreResult<Vec<entities::usage_stats::Model>> {
        use entities::usage_stats::Column;
        let mut query = entities::UsageStats::find()
            .filter(Column::Granularity.eq(granularity.as_str()))
            .filter(Column::TimeBucket.gte(start))
            .filter(Column::TimeBucket.lt(end));
        if let Some(project_id) = filter.project_id {
            query = query.filter(Column::ProjectId.eq(project_id));
        }
        if let Some(route_id) = filter.route_id {
            query = query.filter(Column::RouteId.eq(route_id));
        }
        if let Some(provider_id) = filter.provider_id {
            query = query.filter(Column::ProviderId.eq(provider_id));
        }
        if let Some(api_token_id) = filter.api_token_id {
            query = query.filter(Column::ApiTokenId.eq(api_token_id));
        }
        if let Some(client_type) = filter.client_type {
            query = query.filter(Column::ClientType.eq(client_type.as_str()));
        }
        if let Some(model) = &filter.model {
            query = query.filter(Column::Model.eq(model.as_str()));
        }
        Ok(query.order_by_asc(Column::TimeBucket).all(&self.db).await?)
    }

    pub async fn latest_bucket_start(
        &self,
        granularity: UsageGranularity,
    ) -> StoreResult<Option<OffsetDateTime>> {
        use entities::usage_stats::Column;
        let row = entities::UsageStats::find()
            .filter(Column::Granularity.eq(granularity.as_str()))
            .order_by_desc(Column::TimeBucket)
            .limit(1)
            .one(&self.db)
            .await?;
        Ok(row.map(|row| row.time_bucket))
    }

    pub async fn earliest_bucket_start(
        &self,
        granularity: UsageGranularity,
    ) -> StoreResult<Option<OffsetDateTime>> {
        use entities::usage_stats::Column;
        let row = entities::UsageStats::find()
            .filter(Column::Granularity.eq(granularity.as_str()))
            .order_by_asc(Column::TimeBucket)
            .limit(1)
            .one(&self.db)
            .await?;
        Ok(row.map(|row| row.time_bucket))
    }

    pub async fn delete_usage_before(
        &self,
        granularity: UsageGranularity,
        cutoff: OffsetDateTime,
    ) -> StoreResult<u64> {
        use entities::usage_stats::Column;
        let result = entities::UsageStats::delete_many()
            .filter(Column::Granularity.eq(granularity.as_str()))
            .filter(Column::TimeBucket.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

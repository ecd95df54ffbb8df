use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue, ColumnTrait, Condition, EntityTrait, ExprTrait, QueryFilter, QueryOrder,
    QuerySelect, TransactionTrait,
};
use time::OffsetDateTime;

use maxx_common::{ClientType, RequestStatus, TokenMetrics};

use super::{Store, StoreError, StoreResult};
use crate::entities;

/// Fields fixed at request admission.
#[derive(Debug, Clone)]
pub struct NewProxyRequest {
    pub instance_id: String,
    pub request_id: String,
    pub session_id: Option<String>,
    pub client_type: ClientType,
    pub request_model: Option<String>,
    pub is_stream: bool,
    pub project_id: Option<i64>,
    pub api_token_id: Option<i64>,
    pub request_info: Option<serde_json::Value>,
}

/// Terminal patch applied when a request settles.
#[derive(Debug, Clone, Default)]
pub struct RequestPatch {
    pub status: Option<RequestStatus>,
    pub status_code: Option<i32>,
    pub error: Option<String>,
    pub response_model: Option<String>,
    pub end_time: Option<OffsetDateTime>,
    pub ttft_ms: Option<i64>,
    pub route_id: Option<i64>,
    pub provider_id: Option<i64>,
    pub final_attempt_id: Option<i64>,
    pub metrics: Option<TokenMetrics>,
    pub cost: Option<i64>,
    pub response_info: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub proxy_request_id: i64,
    pub instance_id: String,
    pub client_type: ClientType,
    pub request_model: Option<String>,
    pub mapped_model: Option<String>,
    pub project_id: Option<i64>,
    pub route_id: i64,
    pub provider_id: i64,
    pub api_token_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct AttemptPatch {
    pub status: Option<RequestStatus>,
    pub status_code: Option<i32>,
    pub error: Option<String>,
    pub response_model: Option<String>,
    pub end_time: Option<OffsetDateTime>,
    pub ttft_ms: Option<i64>,
    pub metrics: Option<TokenMetrics>,
    pub cost: Option<i64>,
    pub price_id: Option<i64>,
}

impl Store {
    // ---- proxy requests ----

    pub async fn create_proxy_request(&self, new: NewProxyRequest) -> StoreResult<i64> {
        let now = OffsetDateTime::now_utc();
        let active = entities::proxy_requests::ActiveModel {
            id: ActiveValue::NotSet,
            instance_id: ActiveValue::Set(new.instance_id),
            request_id: ActiveValue::Set(new.request_id),
            session_id: ActiveValue::Set(new.session_id),
            client_type: ActiveValue::Set(new.client_type.as_str().to_string()),
            request_model: ActiveValue::Set(new.request_model),
            response_model: ActiveValue::Set(None),
            start_time: ActiveValue::Set(now),
            end_time: ActiveValue::Set(None),
            duration_ms: ActiveValue::Set(None),
            ttft_ms: ActiveValue::Set(None),
            is_stream: ActiveValue::Set(new.is_stream),
            status: ActiveValue::Set(RequestStatus::InProgress.as_str().to_string()),
            status_code: ActiveValue::Set(None),
            error: ActiveValue::Set(None),
            request_info: ActiveValue::Set(new.request_info),
            response_info: ActiveValue::Set(None),
            input_token_count: ActiveValue::Set(0),
            output_token_count: ActiveValue::Set(0),
            cache_read_token_count: ActiveValue::Set(0),
            cache_5m_write_token_count: ActiveValue::Set(0),
            cache_1h_write_token_count: ActiveValue::Set(0),
            cost: ActiveValue::Set(0),
            project_id: ActiveValue::Set(new.project_id),
            route_id: ActiveValue::Set(None),
            provider_id: ActiveValue::Set(None),
            api_token_id: ActiveValue::Set(new.api_token_id),
            final_attempt_id: ActiveValue::Set(None),
        };
        let result = entities::ProxyRequests::insert(active).exec(&self.db).await?;
        self.bump_request_count(1);
        Ok(result.last_insert_id)
    }

    pub async fn get_proxy_request(
        &self,
        id: i64,
    ) -> StoreResult<entities::proxy_requests::Model> {
        entities::ProxyRequests::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("proxy request {id}")))
    }

    pub async fn update_proxy_request(&self, id: i64, patch: RequestPatch) -> StoreResult<()> {
        let existing = self.get_proxy_request(id).await?;
        let mut active = entities::proxy_requests::ActiveModel {
            id: ActiveValue::Set(id),
            ..Default::default()
        };
        if let Some(status) = patch.status {
            active.status = ActiveValue::Set(status.as_str().to_string());
        }
        if let Some(code) = patch.status_code {
            active.status_code = ActiveValue::Set(Some(code));
        }
        if let Some(error) = patch.error {
            active.error = ActiveValue::Set(Some(error));
        }
        if let Some(model) = patch.response_model {
            active.response_model = ActiveValue::Set(Some(model));
        }
        if let Some(end) = patch.end_time {
            active.end_time = ActiveValue::Set(Some(end));
            let duration = (end - existing.start_time).whole_milliseconds() as i64;
            active.duration_ms = ActiveValue::Set(Some(Ord::max(duration, 0)));
        }
        if let Some(ttft) = patch.ttft_ms
            && existing.ttft_ms.is_none()
        {
            active.ttft_ms = ActiveValue::Set(Some(ttft));
        }
        if let Some(route_id) = patch.route_id {
            active.route_id = ActiveValue::Set(Some(route_id));
        }
        if let Some(provider_id) = patch.provider_id {
            active.provider_id = ActiveValue::Set(Some(provider_id));
        }
        if let Some(attempt_id) = patch.final_attempt_id {
            active.final_attempt_id = ActiveValue::Set(Some(attempt_id));
        }
        if let Some(metrics) = patch.metrics {
            active.input_token_count = ActiveValue::Set(metrics.input_tokens);
            active.output_token_count = ActiveValue::Set(metrics.output_tokens);
            active.cache_read_token_count = ActiveValue::Set(metrics.cache_read_tokens);
            active.cache_5m_write_token_count = ActiveValue::Set(metrics.cache_5m_write_tokens);
            active.cache_1h_write_token_count = ActiveValue::Set(metrics.cache_1h_write_tokens);
        }
        if let Some(cost) = patch.cost {
            active.cost = ActiveValue::Set(cost);
        }
        if let Some(info) = patch.response_info {
            active.response_info = ActiveValue::Set(Some(info));
        }
        entities::ProxyRequests::update(active).exec(&self.db).await?;
        Ok(())
    }

    pub async fn last_request_at(&self) -> StoreResult<Option<OffsetDateTime>> {
        let row = entities::ProxyRequests::find()
            .order_by_desc(entities::proxy_requests::Column::StartTime)
            .limit(1)
            .one(&self.db)
            .await?;
        Ok(row.map(|row| row.start_time))
    }

    // ---- attempts ----

    /// Attempts are serialized per parent request by the executor, so ids
    /// within one request are monotone.
    pub async fn create_attempt(&self, new: NewAttempt) -> StoreResult<i64> {
        let now = OffsetDateTime::now_utc();
        let active = entities::proxy_upstream_attempts::ActiveModel {
            id: ActiveValue::NotSet,
            proxy_request_id: ActiveValue::Set(new.proxy_request_id),
            instance_id: ActiveValue::Set(new.instance_id),
            client_type: ActiveValue::Set(new.client_type.as_str().to_string()),
            request_model: ActiveValue::Set(new.request_model),
            mapped_model: ActiveValue::Set(new.mapped_model),
            response_model: ActiveValue::Set(None),
            start_time: ActiveValue::Set(now),
            end_time: ActiveValue::Set(None),
            duration_ms: ActiveValue::Set(None),
            ttft_ms: ActiveValue::Set(None),
            status: ActiveValue::Set(RequestStatus::InProgress.as_str().to_string()),
            status_code: ActiveValue::Set(None),
            error: ActiveValue::Set(None),
            input_token_count: ActiveValue::Set(0),
            output_token_count: ActiveValue::Set(0),
            cache_read_token_count: ActiveValue::Set(0),
            cache_5m_write_token_count: ActiveValue::Set(0),
            cache_1h_write_token_count: ActiveValue::Set(0),
            cost: ActiveValue::Set(0),
            price_id: ActiveValue::Set(0),
            project_id: ActiveValue::Set(new.project_id),
            route_id: ActiveValue::Set(Some(new.route_id)),
            provider_id: ActiveValue::Set(Some(new.provider_id)),
            api_token_id: ActiveValue::Set(new.api_token_id),
            ..Default::default()
        };
        let result = entities::ProxyUpstreamAttempts::insert(active)
            .exec(&self.db)
            .await?;
        Ok(result.last_insert_id)
    }

    pub async fn update_attempt(&self, id: i64, patch: AttemptPatch) -> StoreResult<()> {
        let existing = entities::ProxyUpstreamAttempts::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("attempt {id}")))?;
        let mut active = entities::proxy_upstream_attempts::ActiveModel {
            id: ActiveValue::Set(id),
            ..Default::default()
        };
        if let Some(status) = patch.status {
            active.status = ActiveValue::Set(status.as_str().to_string());
        }
        if let Some(code) = patch.status_code {
            active.status_code = ActiveValue::Set(Some(code));
        }
        if let Some(error) = patch.error {
            active.error = ActiveValue::Set(Some(error));
        }
        if let Some(model) = patch.response_model {
            active.response_model = ActiveValue::Set(Some(model));
        }
        if let Some(end) = patch.end_time {
            active.end_time = ActiveValue::Set(Some(end));
            let duration = (end - existing.start_time).whole_milliseconds() as i64;
            active.duration_ms = ActiveValue::Set(Some(Ord::max(duration, 0)));
        }
        if let Some(ttft) = patch.ttft_ms
            && existing.ttft_ms.is_none()
        {
            active.ttft_ms = ActiveValue::Set(Some(ttft));
        }
        if let Some(metrics) = patch.metrics {
            active.input_token_count = ActiveValue::Set(metrics.input_tokens);
            active.output_token_count = ActiveValue::Set(metrics.output_tokens);
            active.cache_read_token_count = ActiveValue::Set(metrics.cache_read_tokens);
            active.cache_5m_write_token_count = ActiveValue::Set(metrics.cache_5m_write_tokens);
            active.cache_1h_write_token_count = ActiveValue::Set(metrics.cache_1h_write_tokens);
        }
        if let Some(cost) = patch.cost {
            active.cost = ActiveValue::Set(cost);
        }
        if let Some(price_id) = patch.price_id {
            active.price_id = ActiveValue::Set(price_id);
        }
        entities::ProxyUpstreamAttempts::update(active)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn list_attempts_for_request(
        &self,
        proxy_request_id: i64,
    ) -> StoreResult<Vec<entities::proxy_upstream_attempts::Model>> {
        Ok(entities::ProxyUpstreamAttempts::find()
            .filter(
                entities::proxy_upstream_attempts::Column::ProxyRequestId.eq(proxy_request_id),
            )
            .order_by_asc(entities::proxy_upstream_attempts::Column::Id)
            .all(&self.db)
            .await?)
    }

    /// Id-ordered page for batch jobs (cost recalculation).
    pub async fn list_attempts_page(
        &self,
        after_id: i64,
        limit: u64,
    ) -> StoreResult<Vec<entities::proxy_upstream_attempts::Model>> {
        Ok(entities::ProxyUpstreamAttempts::find()
            .filter(entities::proxy_upstream_attempts::Column::Id.gt(after_id))
            .order_by_asc(entities::proxy_upstream_attempts::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    /// Rewrite costs for one batch atomically, then re-sum the parent
    /// requests so the cost invariant holds.
    pub async fn apply_attempt_costs(
        &self,
        updates: &[(i64, i64, i64)],
    ) -> StoreResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin().await?;
        let mut request_ids: Vec<i64> = Vec::new();
        for (attempt_id, cost, price_id) in updates {
            let Some(attempt) = entities::ProxyUpstreamAttempts::find_by_id(*attempt_id)
                .one(&txn)
                .await?
            else {
                continue;
            };
            request_ids.push(attempt.proxy_request_id);
            let active = entities::proxy_upstream_attempts::ActiveModel {
                id: ActiveValue::Set(*attempt_id),
                cost: ActiveValue::Set(*cost),
                price_id: ActiveValue::Set(*price_id),
                ..Default::default()
            };
            entities::ProxyUpstreamAttempts::update(active).exec(&txn).await?;
        }
        request_ids.sort_unstable();
        request_ids.dedup();
        for request_id in request_ids {
            #[derive(sea_orm::FromQueryResult)]
            struct CostSum {
                total: Option<i64>,
            }
            let total = entities::ProxyUpstreamAttempts::find()
                .select_only()
                .column_as(
                    Expr::col(entities::proxy_upstream_attempts::Column::Cost).sum(),
                    "total",
                )
                .filter(
                    entities::proxy_upstream_attempts::Column::ProxyRequestId.eq(request_id),
                )
                .into_model::<CostSum>()
                .one(&txn)
                .await?
                .and_then(|row| row.total)
                .unwrap_or(0);
            let active = entities::proxy_requests::ActiveModel {
                id: ActiveValue::Set(request_id),
                cost: ActiveValue::Set(total),
                ..Default::default()
            };
            entities::ProxyRequests::update(active).exec(&txn).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    pub async fn sum_attempt_costs(&self, proxy_request_id: i64) -> StoreResult<i64> {
        #[derive(sea_orm::FromQueryResult)]
        struct CostSum {
            total: Option<i64>,
        }
        let row = entities::ProxyUpstreamAttempts::find()
            .select_only()
            .column_as(
                Expr::col(entities::proxy_upstream_attempts::Column::Cost).sum(),
                "total",
            )
            .filter(
                entities::proxy_upstream_attempts::Column::ProxyRequestId.eq(proxy_request_id),
            )
            .into_model::<CostSum>()
            .one(&self.db)
            .await?;
        Ok(row.and_then(|row| row.total).unwrap_or(0))
    }

    // ---- janitor support ----

    /// Crash recovery: requests owned by another instance, or stuck
    /// in flight past the cutoff, become FAILED with a synthesized end.
    /// Live attempts of those rows get the same treatment.
    pub async fn mark_stale_as_failed(
        &self,
        own_instance_id: &str,
        stuck_cutoff: OffsetDateTime,
    ) -> StoreResult<u64> {
        use entities::proxy_requests::Column;
        let now = OffsetDateTime::now_utc();
        let live = [
            RequestStatus::Pending.as_str(),
            RequestStatus::InProgress.as_str(),
        ];

        let stale: Vec<entities::proxy_requests::Model> = entities::ProxyRequests::find()
            .filter(Column::Status.is_in(live))
            .filter(
                Condition::any()
                    .add(Column::InstanceId.ne(own_instance_id))
                    .add(Column::StartTime.lt(stuck_cutoff)),
            )
            .all(&self.db)
            .await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i64> = stale.iter().map(|row| row.id).collect();
        let txn = self.db.begin().await?;
        entities::ProxyRequests::update_many()
            .col_expr(
                Column::Status,
                Expr::value(RequestStatus::Failed.as_str()),
            )
            .col_expr(Column::EndTime, Expr::value(Some(now)))
            .col_expr(
                Column::Error,
                Expr::value(Some("marked stale by janitor".to_string())),
            )
            .filter(Column::Id.is_in(ids.clone()))
            .exec(&txn)
            .await?;
        entities::ProxyUpstreamAttempts::update_many()
            .col_expr(
                entities::proxy_upstream_attempts::Column::Status,
                Expr::value(RequestStatus::Failed.as_str()),
            )
            .col_expr(
                entities::proxy_upstream_attempts::Column::EndTime,
                Expr::value(Some(now)),
            )
            .filter(entities::proxy_upstream_attempts::Column::ProxyRequestId.is_in(ids))
            .filter(entities::proxy_upstream_attempts::Column::Status.is_in(live))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(stale.len() as u64)
    }

    pub async fn delete_requests_before(&self, cutoff: OffsetDateTime) -> StoreResult<u64> {
        let result = entities::ProxyRequests::delete_many()
            .filter(entities::proxy_requests::Column::StartTime.lt(cutoff))
            .exec(&self.db)
            .await?;
        self.bump_request_count(-(result.rows_affected as i64));
        Ok(result.rows_affected)
    }

    pub async fn strip_request_details_before(
        &self,
        cutoff: OffsetDateTime,
    ) -> StoreResult<u64> {
        use entities::proxy_requests::Column;
        let result = entities::ProxyRequests::update_many()
            .col_expr(Column::RequestInfo, Expr::value(Option::<serde_json::Value>::None))
            .col_expr(Column::ResponseInfo, Expr::value(Option::<serde_json::Value>::None))
            .filter(Column::StartTime.lt(cutoff))
            .filter(
                Condition::any()
                    .add(Column::RequestInfo.is_not_null())
                    .add(Column::ResponseInfo.is_not_null()),
            )
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    // ---- cooldowns ----

    pub async fn upsert_cooldown(
        &self,
        provider_id: i64,
        client_type: ClientType,
        until_time: OffsetDateTime,
        reason: &str,
    ) -> StoreResult<()> {
        use entities::cooldowns::Column;
        let active = entities::cooldowns::ActiveModel {
            id: ActiveValue::NotSet,
            provider_id: ActiveValue::Set(provider_id),
            client_type: ActiveValue::Set(client_type.as_str().to_string()),
            until_time: ActiveValue::Set(until_time),
            reason: ActiveValue::Set(reason.to_string()),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        entities::Cooldowns::insert(active)
            .on_conflict(
                OnConflict::columns([Column::ProviderId, Column::ClientType])
                    .update_columns([Column::UntilTime, Column::Reason, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Cooldowns still in force at `now`.
    pub async fn active_cooldowns(
        &self,
        now: OffsetDateTime,
    ) -> StoreResult<Vec<entities::cooldowns::Model>> {
        Ok(entities::Cooldowns::find()
            .filter(entities::cooldowns::Column::UntilTime.gt(now))
            .all(&self.db)
            .await?)
    }

    pub async fn clear_cooldown(
        &self,
        provider_id: i64,
        client_type: ClientType,
    ) -> StoreResult<()> {
        entities::Cooldowns::delete_many()
            .filter(entities::cooldowns::Column::ProviderId.eq(provider_id))
            .filter(entities::cooldowns::Column::ClientType.eq(client_type.as_str()))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn delete_expired_cooldowns(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let result = entities::Cooldowns::delete_many()
            .filter(entities::cooldowns::Column::UntilTime.lte(now))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    // ---- failure counts ----

    /// Returns the new count after the increment.
    pub async fn increment_failure(
        &self,
        provider_id: i64,
        client_type: ClientType,
        reason: &str,
    ) -> StoreResult<i64> {
        use entities::failure_counts::Column;
        let now = OffsetDateTime::now_utc();
        let active = entities::failure_counts::ActiveModel {
            id: ActiveValue::NotSet,
            provider_id: ActiveValue::Set(provider_id),
            client_type: ActiveValue::Set(client_type.as_str().to_string()),
            reason: ActiveValue::Set(reason.to_string()),
            count: ActiveValue::Set(1),
            last_failure_at: ActiveValue::Set(now),
        };
        entities::FailureCounts::insert(active)
            .on_conflict(
                OnConflict::columns([Column::ProviderId, Column::ClientType, Column::Reason])
                    .value(Column::Count, Expr::col(Column::Count).add(1))
                    .value(Column::LastFailureAt, Expr::value(now))
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        let row = entities::FailureCounts::find()
            .filter(Column::ProviderId.eq(provider_id))
            .filter(Column::ClientType.eq(client_type.as_str()))
            .filter(Column::Reason.eq(reason))
            .one(&self.db)
            .await?;
        Ok(row.map(|row| row.count).unwrap_or(1))
    }

    pub async fn reset_failures(
        &self,
        provider_id: i64,
        client_type: ClientType,
    ) -> StoreResult<()> {
        entities::FailureCounts::delete_many()
            .filter(entities::failure_counts::Column::ProviderId.eq(provider_id))
            .filter(entities::failure_counts::Column::ClientType.eq(client_type.as_str()))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // ---- quotas ----

    pub async fn upsert_quota(
        &self,
        provider_id: i64,
        snapshot: serde_json::Value,
    ) -> StoreResult<()> {
        use entities::quotas::Column;
        let active = entities::quotas::ActiveModel {
            id: ActiveValue::NotSet,
            provider_id: ActiveValue::Set(provider_id),
            snapshot: ActiveValue::Set(snapshot),
            observed_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        entities::Quotas::insert(active)
            .on_conflict(
                OnConflict::column(Column::ProviderId)
                    .update_columns([Column::Snapshot, Column::ObservedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn list_quotas(&self) -> StoreResult<Vec<entities::quotas::Model>> {
        Ok(entities::Quotas::find().all(&self.db).await?)
    }

    pub async fn get_quota(&self, provider_id: i64) -> StoreResult<Option<entities::quotas::Model>> {
        Ok(entities::Quotas::find()
            .filter(entities::quotas::Column::ProviderId.eq(provider_id))
            .one(&self.db)
            .await?)
    }
}

use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "proxy_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Owner instance; lets a restarted instance spot orphaned rows.
    pub instance_id: String,
    #[sea_orm(unique)]
    pub request_id: String,
    pub session_id: Option<String>,
    pub client_type: String,
    pub request_model: Option<String>,
    pub response_model: Option<String>,
    pub start_time: OffsetDateTime,
    pub end_time: Option<OffsetDateTime>,
    pub duration_ms: Option<i64>,
    /// Time to first upstream byte, milliseconds.
    pub ttft_ms: Option<i64>,
    pub is_stream: bool,
    /// PENDING | IN_PROGRESS | COMPLETED | FAILED | CANCELLED
    pub status: String,
    pub status_code: Option<i32>,
    pub error: Option<String>,
    /// Bounded JSON blobs; the janitor nulls them after the detail
    /// retention window.
    pub request_info: Option<Json>,
    pub response_info: Option<Json>,
    pub input_token_count: i64,
    pub output_token_count: i64,
    pub cache_read_token_count: i64,
    pub cache_5m_write_token_count: i64,
    pub cache_1h_write_token_count: i64,
    /// nanoUSD; equals the sum of this request's attempt costs.
    pub cost: i64,
    pub project_id: Option<i64>,
    pub route_id: Option<i64>,
    pub provider_id: Option<i64>,
    pub api_token_id: Option<i64>,
    pub final_attempt_id: Option<i64>,
}

impl ActiveModelBehavior for ActiveModel {}

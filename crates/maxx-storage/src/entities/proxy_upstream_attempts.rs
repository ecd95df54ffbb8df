use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "proxy_upstream_attempts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub proxy_request_id: i64,
    pub instance_id: String,
    pub client_type: String,
    pub request_model: Option<String>,
    /// Model after mapping rules were applied.
    pub mapped_model: Option<String>,
    /// Model the upstream stream reported, when it differs.
    pub response_model: Option<String>,
    pub start_time: OffsetDateTime,
    pub end_time: Option<OffsetDateTime>,
    pub duration_ms: Option<i64>,
    pub ttft_ms: Option<i64>,
    pub status: String,
    pub status_code: Option<i32>,
    pub error: Option<String>,
    pub input_token_count: i64,
    pub output_token_count: i64,
    pub cache_read_token_count: i64,
    pub cache_5m_write_token_count: i64,
    pub cache_1h_write_token_count: i64,
    /// nanoUSD for this attempt alone.
    pub cost: i64,
    pub price_id: i64,
    pub project_id: Option<i64>,
    pub route_id: Option<i64>,
    pub provider_id: Option<i64>,
    pub api_token_id: Option<i64>,
    #[sea_orm(belongs_to, from = "proxy_request_id", to = "id", on_delete = "Cascade")]
    pub proxy_request: HasOne<super::proxy_requests::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}

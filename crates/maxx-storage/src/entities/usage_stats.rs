use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "usage_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// minute | hour | day | month
    #[sea_orm(unique_key = "bucket_key")]
    pub granularity: String,
    /// Bucket start (UTC instant; day/month starts reflect the
    /// configured timezone).
    #[sea_orm(unique_key = "bucket_key")]
    pub time_bucket: OffsetDateTime,
    #[sea_orm(unique_key = "bucket_key")]
    pub route_id: i64,
    #[sea_orm(unique_key = "bucket_key")]
    pub provider_id: i64,
    #[sea_orm(unique_key = "bucket_key")]
    pub project_id: i64,
    #[sea_orm(unique_key = "bucket_key")]
    pub api_token_id: i64,
    #[sea_orm(unique_key = "bucket_key")]
    pub client_type: String,
    #[sea_orm(unique_key = "bucket_key")]
    pub model: String,
    pub request_count: i64,
    pub input_token_count: i64,
    pub output_token_count: i64,
    pub cache_read_token_count: i64,
    pub cache_5m_write_token_count: i64,
    pub cache_1h_write_token_count: i64,
    pub cost: i64,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}

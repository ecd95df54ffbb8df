use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "model_prices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub model_id: String,
    /// All prices are microUSD per 1M tokens.
    pub input_price_micro: i64,
    pub output_price_micro: i64,
    /// Zero means "derive from input price defaults".
    pub cache_read_price_micro: i64,
    pub cache_5m_write_price_micro: i64,
    pub cache_1h_write_price_micro: i64,
    pub has_1m_context: bool,
    pub premium_threshold: i64,
    pub input_premium_num: i64,
    pub input_premium_denom: i64,
    pub output_premium_num: i64,
    pub output_premium_denom: i64,
    pub version: i32,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}

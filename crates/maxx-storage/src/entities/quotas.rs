use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "quotas")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub provider_id: i64,
    /// Serialized `QuotaSnapshot`.
    pub snapshot: Json,
    pub observed_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}

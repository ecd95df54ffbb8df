use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "routes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub project_id: i64,
    pub client_type: String,
    pub provider_id: i64,
    /// 1-based dense position within (project_id, client_type).
    pub position: i32,
    pub is_enabled: bool,
    /// Provider speaks this client type natively (no translation).
    pub is_native: bool,
    pub retry_config_id: Option<i64>,
    /// Basis points; 10000 = 1.00x.
    pub cost_multiplier: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "provider_id", to = "id", on_delete = "Cascade")]
    pub provider: HasOne<super::providers::Entity>,
    #[sea_orm(belongs_to, from = "project_id", to = "id", on_delete = "Cascade")]
    pub project: HasOne<super::projects::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}

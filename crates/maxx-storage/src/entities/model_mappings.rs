use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "model_mappings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// global | provider | project | route | api_token
    pub scope: String,
    pub scope_id: Option<i64>,
    pub client_type: Option<String>,
    pub provider_type: Option<String>,
    /// Glob over the incoming model id.
    pub pattern: String,
    pub target: String,
    /// Lower wins; ties break on scope specificity.
    pub priority: i32,
    pub is_enabled: bool,
    pub is_builtin: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}

use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue, ColumnTrait, EntityTrait, QueryFilter};
use time::OffsetDateTime;

use super::{Store, StoreResult};
use crate::entities;

pub const TIMEZONE: &str = "timezone";
pub const REQUEST_RETENTION_HOURS: &str = "request_retention_hours";
pub const REQUEST_DETAIL_RETENTION_SECONDS: &str = "request_detail_retention_seconds";
pub const API_TOKEN_AUTH_ENABLED: &str = "api_token_auth_enabled";
pub const AUTO_SORT_ANTIGRAVITY: &str = "auto_sort_antigravity";
pub const AUTO_SORT_CODEX: &str = "auto_sort_codex";
pub const QUOTA_REFRESH_INTERVAL: &str = "quota_refresh_interval";
pub const SCHEMA_VERSION: &str = "schema_version";

pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";
pub const DEFAULT_REQUEST_RETENTION_HOURS: i64 = 30 * 24;
pub const DEFAULT_REQUEST_DETAIL_RETENTION_SECONDS: i64 = 3600;

impl Store {
    pub async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let row = entities::SystemSettings::find()
            .filter(entities::system_settings::Column::Key.eq(key))
            .one(&self.db)
            .await?;
        Ok(row.map(|row| row.value))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let active = entities::system_settings::ActiveModel {
            id: ActiveValue::NotSet,
            key: ActiveValue::Set(key.to_string()),
            value: ActiveValue::Set(value.to_string()),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        entities::SystemSettings::insert(active)
            .on_conflict(
                OnConflict::column(entities::system_settings::Column::Key)
                    .update_columns([
                        entities::system_settings::Column::Value,
                        entities::system_settings::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn setting_bool(&self, key: &str, default: bool) -> StoreResult<bool> {
        Ok(self
            .get_setting(key)
            .await?
            .map(|value| matches!(value.as_str(), "true" | "1" | "on"))
            .unwrap_or(default))
    }

    pub async fn setting_i64(&self, key: &str, default: i64) -> StoreResult<i64> {
        Ok(self
            .get_setting(key)
            .await?
            .and_then(|value| value.parse().ok())
            .unwrap_or(default))
    }

    pub async fn timezone(&self) -> StoreResult<String> {
        Ok(self
            .get_setting(TIMEZONE)
            .await?
            .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()))
    }
}

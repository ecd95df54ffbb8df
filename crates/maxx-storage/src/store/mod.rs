mod catalog;
mod observe;
pub mod settings;
mod usage;

pub use observe::{AttemptPatch, NewAttempt, NewProxyRequest, RequestPatch};
pub use usage::{AttemptAggregate, BucketUpsert, UsageFilter, UsageGranularity};

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use sea_orm::{DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, Schema};
use thiserror::Error;

use crate::db::connect_shared;
use crate::entities;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable catalog + observation log. Every other component depends only
/// on this facade; entities never leak past the crate boundary except as
/// read models.
#[derive(Clone)]
pub struct Store {
    db: DatabaseConnection,
    /// Live proxy-request row count, synced from the table at startup.
    request_count: Arc<AtomicI64>,
}

pub const SCHEMA_VERSION: i64 = 2;

impl Store {
    pub async fn connect(dsn: &str) -> StoreResult<Self> {
        let db = connect_shared(dsn).await?;
        Ok(Self::from_connection(db))
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self {
            db,
            request_count: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn sync_schema(&self) -> StoreResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Providers)
            .register(entities::Projects)
            .register(entities::Routes)
            .register(entities::RetryConfigs)
            .register(entities::ApiTokens)
            .register(entities::ModelMappings)
            .register(entities::ModelPrices)
            .register(entities::ProxyRequests)
            .register(entities::ProxyUpstreamAttempts)
            .register(entities::Cooldowns)
            .register(entities::FailureCounts)
            .register(entities::Quotas)
            .register(entities::UsageStats)
            .register(entities::Sessions)
            .register(entities::SystemSettings)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    /// Forward-only idempotent migrations keyed by the `schema_version`
    /// setting. Each step may run more than once without harm.
    pub async fn migrate(&self) -> StoreResult<()> {
        let current = self
            .get_setting(settings::SCHEMA_VERSION)
            .await?
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(0);

        if current < 1 {
            self.seed_builtin_mappings().await?;
        }
        if current < 2 {
            self.ensure_default_retry_config().await?;
        }
        if current < SCHEMA_VERSION {
            self.set_setting(settings::SCHEMA_VERSION, &SCHEMA_VERSION.to_string())
                .await?;
        }
        Ok(())
    }

    /// Refresh the in-memory request counter from the table.
    pub async fn sync_request_count(&self) -> StoreResult<i64> {
        let count = entities::ProxyRequests::find().count(&self.db).await? as i64;
        self.request_count.store(count, Ordering::Relaxed);
        Ok(count)
    }

    pub fn cached_request_count(&self) -> i64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub(crate) fn bump_request_count(&self, delta: i64) {
        self.request_count.fetch_add(delta, Ordering::Relaxed);
    }
}

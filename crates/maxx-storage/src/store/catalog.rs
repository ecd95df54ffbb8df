use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue, ColumnTrait, EntityTrait, ExprTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use time::OffsetDateTime;

use maxx_common::{ClientType, display_prefix, generate_api_token, slugify};

use super::{Store, StoreError, StoreResult};
use crate::entities;

impl Store {
    // ---- providers ----

    pub async fn list_providers(&self, include_deleted: bool) -> StoreResult<Vec<entities::providers::Model>> {
        let mut query = entities::Providers::find();
        if !include_deleted {
            query = query.filter(entities::providers::Column::DeletedAt.is_null());
        }
        Ok(query.all(&self.db).await?)
    }

    pub async fn get_provider(&self, id: i64) -> StoreResult<entities::providers::Model> {
        entities::Providers::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("provider {id}")))
    }

    pub async fn create_provider(
        &self,
        name: &str,
        provider_type: &str,
        config: serde_json::Value,
        supported_client_types: &[ClientType],
    ) -> StoreResult<i64> {
        let now = OffsetDateTime::now_utc();
        let supported = serde_json::to_value(supported_client_types)
            .map_err(|err| StoreError::InvalidInput(err.to_string()))?;
        let active = entities::providers::ActiveModel {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(name.to_string()),
            provider_type: ActiveValue::Set(provider_type.to_string()),
            config: ActiveValue::Set(config),
            supported_client_types: ActiveValue::Set(supported),
            deleted_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let result = entities::Providers::insert(active).exec(&self.db).await?;
        Ok(result.last_insert_id)
    }

    pub async fn update_provider_config(
        &self,
        id: i64,
        config: serde_json::Value,
    ) -> StoreResult<()> {
        let active = entities::providers::ActiveModel {
            id: ActiveValue::Set(id),
            config: ActiveValue::Set(config),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::Providers::update(active).exec(&self.db).await?;
        Ok(())
    }

    /// Soft-delete a provider; its routes are removed outright and the
    /// affected scopes renumbered so positions stay dense.
    pub async fn delete_provider(&self, id: i64) -> StoreResult<()> {
        let txn = self.db.begin().await?;

        let routes = entities::Routes::find()
            .filter(entities::routes::Column::ProviderId.eq(id))
            .all(&txn)
            .await?;
        entities::Routes::delete_many()
            .filter(entities::routes::Column::ProviderId.eq(id))
            .exec(&txn)
            .await?;

        let active = entities::providers::ActiveModel {
            id: ActiveValue::Set(id),
            deleted_at: ActiveValue::Set(Some(OffsetDateTime::now_utc())),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::Providers::update(active).exec(&txn).await?;

        let mut scopes: Vec<(i64, String)> = routes
            .into_iter()
            .map(|route| (route.project_id, route.client_type))
            .collect();
        scopes.sort();
        scopes.dedup();
        for (project_id, client_type) in scopes {
            renumber_scope(&txn, project_id, &client_type).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    // ---- projects ----

    pub async fn list_projects(&self) -> StoreResult<Vec<entities::projects::Model>> {
        Ok(entities::Projects::find()
            .filter(entities::projects::Column::DeletedAt.is_null())
            .all(&self.db)
            .await?)
    }

    pub async fn get_project(&self, id: i64) -> StoreResult<entities::projects::Model> {
        entities::Projects::find_by_id(id)
            .one(&self.db)
            .await?
            .filter(|project| project.deleted_at.is_none())
            .ok_or_else(|| StoreError::NotFound(format!("project {id}")))
    }

    pub async fn get_project_by_slug(
        &self,
        slug: &str,
    ) -> StoreResult<Option<entities::projects::Model>> {
        Ok(entities::Projects::find()
            .filter(entities::projects::Column::Slug.eq(slug))
            .filter(entities::projects::Column::DeletedAt.is_null())
            .one(&self.db)
            .await?)
    }

    /// Slug uniqueness holds only among live rows, so a slug freed by a
    /// soft delete can be reused.
    pub async fn create_project(
        &self,
        name: &str,
        slug: Option<&str>,
        enabled_custom_routes: &[ClientType],
    ) -> StoreResult<i64> {
        let slug = match slug {
            Some(slug) if !slug.is_empty() => slug.to_string(),
            _ => slugify(name),
        };
        if slug.is_empty() {
            return Err(StoreError::InvalidInput("project slug is empty".into()));
        }
        if self.get_project_by_slug(&slug).await?.is_some() {
            return Err(StoreError::Conflict(format!("slug {slug} already in use")));
        }

        let now = OffsetDateTime::now_utc();
        let enabled = serde_json::to_value(enabled_custom_routes)
            .map_err(|err| StoreError::InvalidInput(err.to_string()))?;
        let active = entities::projects::ActiveModel {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(name.to_string()),
            slug: ActiveValue::Set(slug),
            enabled_custom_routes: ActiveValue::Set(enabled),
            deleted_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let result = entities::Projects::insert(active).exec(&self.db).await?;
        Ok(result.last_insert_id)
    }

    pub async fn delete_project(&self, id: i64) -> StoreResult<()> {
        let active = entities::projects::ActiveModel {
            id: ActiveValue::Set(id),
            deleted_at: ActiveValue::Set(Some(OffsetDateTime::now_utc())),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::Projects::update(active).exec(&self.db).await?;
        Ok(())
    }

    // ---- routes ----

    pub async fn list_routes_for_scope(
        &self,
        project_id: i64,
        client_type: ClientType,
    ) -> StoreResult<Vec<entities::routes::Model>> {
        Ok(entities::Routes::find()
            .filter(entities::routes::Column::ProjectId.eq(project_id))
            .filter(entities::routes::Column::ClientType.eq(client_type.as_str()))
            .order_by_asc(entities::routes::Column::Position)
            .all(&self.db)
            .await?)
    }

    pub async fn list_routes(&self) -> StoreResult<Vec<entities::routes::Model>> {
        Ok(entities::Routes::find()
            .order_by_asc(entities::routes::Column::ProjectId)
            .order_by_asc(entities::routes::Column::ClientType)
            .order_by_asc(entities::routes::Column::Position)
            .all(&self.db)
            .await?)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_route(
        &self,
        project_id: i64,
        client_type: ClientType,
        provider_id: i64,
        is_native: bool,
        retry_config_id: Option<i64>,
        cost_multiplier: i64,
    ) -> StoreResult<i64> {
        let txn = self.db.begin().await?;
        let existing = entities::Routes::find()
            .filter(entities::routes::Column::ProjectId.eq(project_id))
            .filter(entities::routes::Column::ClientType.eq(client_type.as_str()))
            .all(&txn)
            .await?;
        let position = existing.len() as i32 + 1;
        let now = OffsetDateTime::now_utc();
        let active = entities::routes::ActiveModel {
            id: ActiveValue::NotSet,
            project_id: ActiveValue::Set(project_id),
            client_type: ActiveValue::Set(client_type.as_str().to_string()),
            provider_id: ActiveValue::Set(provider_id),
            position: ActiveValue::Set(position),
            is_enabled: ActiveValue::Set(true),
            is_native: ActiveValue::Set(is_native),
            retry_config_id: ActiveValue::Set(retry_config_id),
            cost_multiplier: ActiveValue::Set(cost_multiplier),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        let result = entities::Routes::insert(active).exec(&txn).await?;
        txn.commit().await?;
        Ok(result.last_insert_id)
    }

    pub async fn set_route_enabled(&self, id: i64, enabled: bool) -> StoreResult<()> {
        let active = entities::routes::ActiveModel {
            id: ActiveValue::Set(id),
            is_enabled: ActiveValue::Set(enabled),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::Routes::update(active).exec(&self.db).await?;
        Ok(())
    }

    pub async fn delete_route(&self, id: i64) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        let route = entities::Routes::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("route {id}")))?;
        entities::Routes::delete_by_id(id).exec(&txn).await?;
        renumber_scope(&txn, route.project_id, &route.client_type).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Commit a full re-ordering of one scope atomically. `positions`
    /// must cover every route in the scope with a dense 1..N numbering;
    /// anything else is rejected so the density invariant cannot break.
    pub async fn batch_update_positions(
        &self,
        project_id: i64,
        client_type: ClientType,
        positions: &[(i64, i32)],
    ) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        let existing = entities::Routes::find()
            .filter(entities::routes::Column::ProjectId.eq(project_id))
            .filter(entities::routes::Column::ClientType.eq(client_type.as_str()))
            .all(&txn)
            .await?;

        if existing.len() != positions.len() {
            return Err(StoreError::InvalidInput(format!(
                "position set covers {} of {} routes",
                positions.len(),
                existing.len()
            )));
        }
        let mut sorted: Vec<i32> = positions.iter().map(|(_, position)| *position).collect();
        sorted.sort_unstable();
        if sorted
            .iter()
            .enumerate()
            .any(|(i, position)| *position != i as i32 + 1)
        {
            return Err(StoreError::Conflict("positions are not dense 1..N".into()));
        }

        let now = OffsetDateTime::now_utc();
        for (route_id, position) in positions {
            let active = entities::routes::ActiveModel {
                id: ActiveValue::Set(*route_id),
                position: ActiveValue::Set(*position),
                updated_at: ActiveValue::Set(now),
                ..Default::default()
            };
            entities::Routes::update(active).exec(&txn).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    // ---- retry configs ----

    pub async fn get_retry_config(
        &self,
        id: i64,
    ) -> StoreResult<Option<entities::retry_configs::Model>> {
        Ok(entities::RetryConfigs::find_by_id(id).one(&self.db).await?)
    }

    pub async fn list_retry_configs(&self) -> StoreResult<Vec<entities::retry_configs::Model>> {
        Ok(entities::RetryConfigs::find().all(&self.db).await?)
    }

    pub(super) async fn ensure_default_retry_config(&self) -> StoreResult<()> {
        let existing = entities::RetryConfigs::find()
            .filter(entities::retry_configs::Column::Name.eq("default"))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Ok(());
        }
        let active = entities::retry_configs::ActiveModel {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set("default".into()),
            max_retries: ActiveValue::Set(3),
            initial_interval_ms: ActiveValue::Set(500),
            backoff_rate: ActiveValue::Set(2000),
            max_interval_ms: ActiveValue::Set(10_000),
        };
        entities::RetryConfigs::insert(active).exec(&self.db).await?;
        Ok(())
    }

    // ---- api tokens ----

    pub async fn get_api_token(
        &self,
        token: &str,
    ) -> StoreResult<Option<entities::api_tokens::Model>> {
        Ok(entities::ApiTokens::find()
            .filter(entities::api_tokens::Column::Token.eq(token))
            .one(&self.db)
            .await?)
    }

    pub async fn list_api_tokens(&self) -> StoreResult<Vec<entities::api_tokens::Model>> {
        Ok(entities::ApiTokens::find().all(&self.db).await?)
    }

    pub async fn create_api_token(
        &self,
        name: &str,
        project_id: Option<i64>,
        expires_at: Option<OffsetDateTime>,
    ) -> StoreResult<(i64, String)> {
        let token = generate_api_token();
        let now = OffsetDateTime::now_utc();
        let active = entities::api_tokens::ActiveModel {
            id: ActiveValue::NotSet,
            token: ActiveValue::Set(token.clone()),
            token_prefix: ActiveValue::Set(display_prefix(&token)),
            name: ActiveValue::Set(name.to_string()),
            project_id: ActiveValue::Set(project_id),
            is_enabled: ActiveValue::Set(true),
            expires_at: ActiveValue::Set(expires_at),
            use_count: ActiveValue::Set(0),
            last_used_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let result = entities::ApiTokens::insert(active).exec(&self.db).await?;
        Ok((result.last_insert_id, token))
    }

    /// `use_count` only moves forward; the bump is an atomic SQL add so
    /// concurrent writers never lose increments.
    pub async fn bump_api_token_usage(&self, id: i64, at: OffsetDateTime) -> StoreResult<()> {
        entities::ApiTokens::update_many()
            .col_expr(
                entities::api_tokens::Column::UseCount,
                Expr::col(entities::api_tokens::Column::UseCount).add(1),
            )
            .col_expr(
                entities::api_tokens::Column::LastUsedAt,
                Expr::value(at),
            )
            .filter(entities::api_tokens::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn delete_api_token(&self, id: i64) -> StoreResult<()> {
        entities::ApiTokens::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    // ---- model mappings ----

    pub async fn list_enabled_mappings(&self) -> StoreResult<Vec<entities::model_mappings::Model>> {
        Ok(entities::ModelMappings::find()
            .filter(entities::model_mappings::Column::IsEnabled.eq(true))
            .order_by_asc(entities::model_mappings::Column::Priority)
            .all(&self.db)
            .await?)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_mapping(
        &self,
        scope: &str,
        scope_id: Option<i64>,
        client_type: Option<ClientType>,
        provider_type: Option<&str>,
        pattern: &str,
        target: &str,
        priority: i32,
    ) -> StoreResult<i64> {
        if pattern.is_empty() || target.is_empty() {
            return Err(StoreError::InvalidInput("empty mapping pattern/target".into()));
        }
        let now = OffsetDateTime::now_utc();
        let active = entities::model_mappings::ActiveModel {
            id: ActiveValue::NotSet,
            scope: ActiveValue::Set(scope.to_string()),
            scope_id: ActiveValue::Set(scope_id),
            client_type: ActiveValue::Set(client_type.map(|ct| ct.as_str().to_string())),
            provider_type: ActiveValue::Set(provider_type.map(str::to_string)),
            pattern: ActiveValue::Set(pattern.to_string()),
            target: ActiveValue::Set(target.to_string()),
            priority: ActiveValue::Set(priority),
            is_enabled: ActiveValue::Set(true),
            is_builtin: ActiveValue::Set(false),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let result = entities::ModelMappings::insert(active).exec(&self.db).await?;
        Ok(result.last_insert_id)
    }

    pub async fn delete_mapping(&self, id: i64) -> StoreResult<()> {
        entities::ModelMappings::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    pub(super) async fn seed_builtin_mappings(&self) -> StoreResult<()> {
        let builtin: &[(&str, &str, i32)] = &[
            ("*sonnet*", "claude-sonnet-4-5", 1000),
            ("gpt-4o-mini*", "gemini-2.5-flash", 1000),
        ];
        let now = OffsetDateTime::now_utc();
        for (pattern, target, priority) in builtin {
            let exists = entities::ModelMappings::find()
                .filter(entities::model_mappings::Column::Pattern.eq(*pattern))
                .filter(entities::model_mappings::Column::IsBuiltin.eq(true))
                .one(&self.db)
                .await?;
            if exists.is_some() {
                continue;
            }
            let active = entities::model_mappings::ActiveModel {
                id: ActiveValue::NotSet,
                scope: ActiveValue::Set("global".into()),
                scope_id: ActiveValue::Set(None),
                client_type: ActiveValue::Set(None),
                provider_type: ActiveValue::Set(None),
                pattern: ActiveValue::Set(pattern.to_string()),
                target: ActiveValue::Set(target.to_string()),
                priority: ActiveValue::Set(*priority),
                is_enabled: ActiveValue::Set(true),
                is_builtin: ActiveValue::Set(true),
                created_at: ActiveValue::Set(now),
                updated_at: ActiveValue::Set(now),
            };
            entities::ModelMappings::insert(active).exec(&self.db).await?;
        }
        Ok(())
    }

    // ---- model prices ----

    pub async fn list_model_prices(&self) -> StoreResult<Vec<entities::model_prices::Model>> {
        Ok(entities::ModelPrices::find().all(&self.db).await?)
    }

    pub async fn upsert_model_price(
        &self,
        price: entities::model_prices::Model,
    ) -> StoreResult<()> {
        use entities::model_prices::Column;
        let active = entities::model_prices::ActiveModel {
            id: match price.id {
                0 => ActiveValue::NotSet,
                id => ActiveValue::Set(id),
            },
            model_id: ActiveValue::Set(price.model_id),
            input_price_micro: ActiveValue::Set(price.input_price_micro),
            output_price_micro: ActiveValue::Set(price.output_price_micro),
            cache_read_price_micro: ActiveValue::Set(price.cache_read_price_micro),
            cache_5m_write_price_micro: ActiveValue::Set(price.cache_5m_write_price_micro),
            cache_1h_write_price_micro: ActiveValue::Set(price.cache_1h_write_price_micro),
            has_1m_context: ActiveValue::Set(price.has_1m_context),
            premium_threshold: ActiveValue::Set(price.premium_threshold),
            input_premium_num: ActiveValue::Set(price.input_premium_num),
            input_premium_denom: ActiveValue::Set(price.input_premium_denom),
            output_premium_num: ActiveValue::Set(price.output_premium_num),
            output_premium_denom: ActiveValue::Set(price.output_premium_denom),
            version: ActiveValue::Set(price.version),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        entities::ModelPrices::insert(active)
            .on_conflict(
                OnConflict::column(Column::ModelId)
                    .update_columns([
                        Column::InputPriceMicro,
                        Column::OutputPriceMicro,
                        Column::CacheReadPriceMicro,
                        Column::Cache5mWritePriceMicro,
                        Column::Cache1hWritePriceMicro,
                        Column::Has1mContext,
                        Column::PremiumThreshold,
                        Column::InputPremiumNum,
                        Column::InputPremiumDenom,
                        Column::OutputPremiumNum,
                        Column::OutputPremiumDenom,
                        Column::Version,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // ---- sessions ----

    /// Record a session id on first sight; later sights are no-ops.
    pub async fn ensure_session(&self, session_id: &str) -> StoreResult<()> {
        use entities::sessions::Column;
        let active = entities::sessions::ActiveModel {
            id: ActiveValue::NotSet,
            session_id: ActiveValue::Set(session_id.to_string()),
            project_id: ActiveValue::Set(None),
            first_seen_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        entities::Sessions::insert(active)
            .on_conflict(OnConflict::column(Column::SessionId).do_nothing().to_owned())
            .do_nothing()
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Adopt a session into a project, retroactively rewriting its
    /// requests.
    pub async fn adopt_session(&self, session_id: &str, project_id: i64) -> StoreResult<()> {
        let txn = self.db.begin().await?;
        entities::Sessions::update_many()
            .col_expr(
                entities::sessions::Column::ProjectId,
                Expr::value(Some(project_id)),
            )
            .filter(entities::sessions::Column::SessionId.eq(session_id))
            .exec(&txn)
            .await?;
        entities::ProxyRequests::update_many()
            .col_expr(
                entities::proxy_requests::Column::ProjectId,
                Expr::value(Some(project_id)),
            )
            .filter(entities::proxy_requests::Column::SessionId.eq(session_id))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(())
    }
}

/// Rewrite positions of a scope to a dense 1..N, keeping current order.
async fn renumber_scope(
    txn: &sea_orm::DatabaseTransaction,
    project_id: i64,
    client_type: &str,
) -> StoreResult<()> {
    let routes = entities::Routes::find()
        .filter(entities::routes::Column::ProjectId.eq(project_id))
        .filter(entities::routes::Column::ClientType.eq(client_type))
        .order_by_asc(entities::routes::Column::Position)
        .all(txn)
        .await?;
    let now = OffsetDateTime::now_utc();
    for (i, route) in routes.into_iter().enumerate() {
        let wanted = i as i32 + 1;
        if route.position == wanted {
            continue;
        }
        let active = entities::routes::ActiveModel {
            id: ActiveValue::Set(route.id),
            position: ActiveValue::Set(wanted),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        entities::Routes::update(active).exec(txn).await?;
    }
    Ok(())
}

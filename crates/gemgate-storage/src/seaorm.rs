use std::collections::HashSet;

use async_trait::async_trait;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, ExprTrait, QueryFilter, QueryOrder, Schema,
};
use time::OffsetDateTime;

use gemgate_common::GlobalConfig;
use gemgate_provider_core::{
    ApiKey, BulkAddOutcome, Event, KeyId, KeyStore, MappingSource, ModelMapping, SettingsSource,
    StoreError, StoreResult,
};

use crate::entities;
use crate::storage::{NewModelMapping, Storage, StorageError, StorageResult};

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn request_logs(&self) -> StorageResult<Vec<entities::request_logs::Model>> {
        use entities::request_logs::Column;
        Ok(entities::RequestLogs::find()
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn error_logs(&self) -> StorageResult<Vec<entities::error_logs::Model>> {
        use entities::error_logs::Column;
        Ok(entities::ErrorLogs::find()
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?)
    }

    /// One `UPDATE api_keys SET ... WHERE id = ?`.
    async fn update_key(
        &self,
        id: KeyId,
        exprs: Vec<(entities::api_keys::Column, Expr)>,
    ) -> StoreResult<()> {
        use entities::api_keys::Column;
        let mut update = entities::ApiKeys::update_many().filter(Column::Id.eq(id));
        for (column, expr) in exprs {
            update = update.col_expr(column, expr);
        }
        let result = update.exec(&self.db).await.map_err(StorageError::from)?;
        if result.rows_affected == 0 {
            return Err(StoreError::KeyNotFound(id));
        }
        Ok(())
    }
}

fn key_from_model(model: entities::api_keys::Model) -> ApiKey {
    ApiKey {
        id: model.id,
        value: model.key_value,
        enabled: model.enabled,
        fail_count: u32::try_from(model.fail_count).unwrap_or(0),
        disabled_until: model.disabled_until,
        last_used: model.last_used,
        last_checked: model.last_checked,
        last_failed_at: model.last_failed_at,
        created_at: model.created_at,
    }
}

fn mapping_from_model(model: entities::model_mappings::Model) -> Result<ModelMapping, String> {
    Ok(ModelMapping {
        id: model.id,
        source_protocol: model.source_protocol.parse()?,
        target_method: model.target_method.parse()?,
        source_name: model.source_name,
        priority: model.priority,
        target_name: model.target_name,
        capabilities: model.capabilities,
        constraints: model.constraints,
    })
}

#[async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::GlobalConfig)
            .register(entities::ApiKeys)
            .register(entities::Settings)
            .register(entities::ModelMappings)
            .register(entities::RequestLogs)
            .register(entities::ErrorLogs)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfig>> {
        use entities::global_config::Column;
        let row = entities::GlobalConfig::find()
            .order_by_asc(Column::Id)
            .one(&self.db)
            .await?;
        Ok(row.map(|m| GlobalConfig {
            host: m.host,
            port: u16::try_from(m.port).unwrap_or(8788),
            auth_key: m.auth_key,
            cron_secret: m.cron_secret,
            proxy: m.proxy,
            dsn: m.dsn,
            settings_ttl_secs: u64::try_from(m.settings_ttl_secs).unwrap_or(30),
            passthrough_unmapped: m.passthrough_unmapped,
        }))
    }

    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()> {
        use entities::global_config::ActiveModel as GlobalActive;

        let now = OffsetDateTime::now_utc();
        let id = 1_i64;
        let ttl = i64::try_from(config.settings_ttl_secs).unwrap_or(i64::MAX);

        match entities::GlobalConfig::find_by_id(id).one(&self.db).await? {
            Some(model) => {
                let mut active: GlobalActive = model.into();
                active.host = ActiveValue::Set(config.host.clone());
                active.port = ActiveValue::Set(i32::from(config.port));
                active.auth_key = ActiveValue::Set(config.auth_key.clone());
                active.cron_secret = ActiveValue::Set(config.cron_secret.clone());
                active.proxy = ActiveValue::Set(config.proxy.clone());
                active.dsn = ActiveValue::Set(config.dsn.clone());
                active.settings_ttl_secs = ActiveValue::Set(ttl);
                active.passthrough_unmapped = ActiveValue::Set(config.passthrough_unmapped);
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let active = GlobalActive {
                    id: ActiveValue::Set(id),
                    host: ActiveValue::Set(config.host.clone()),
                    port: ActiveValue::Set(i32::from(config.port)),
                    auth_key: ActiveValue::Set(config.auth_key.clone()),
                    cron_secret: ActiveValue::Set(config.cron_secret.clone()),
                    proxy: ActiveValue::Set(config.proxy.clone()),
                    dsn: ActiveValue::Set(config.dsn.clone()),
                    settings_ttl_secs: ActiveValue::Set(ttl),
                    passthrough_unmapped: ActiveValue::Set(config.passthrough_unmapped),
                    updated_at: ActiveValue::Set(now),
                };
                entities::GlobalConfig::insert(active).exec(&self.db).await?;
            }
        }
        Ok(())
    }

    async fn upsert_setting(&self, key: &str, value: &str) -> StorageResult<()> {
        use entities::settings::Column;
        let active = entities::settings::ActiveModel {
            key: ActiveValue::Set(key.to_string()),
            value: ActiveValue::Set(value.to_string()),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        entities::Settings::insert(active)
            .on_conflict(
                OnConflict::column(Column::Key)
                    .update_columns([Column::Value, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_mapping(&self, mapping: NewModelMapping) -> StorageResult<i64> {
        let active = entities::model_mappings::ActiveModel {
            id: ActiveValue::NotSet,
            source_name: ActiveValue::Set(mapping.source_name),
            source_protocol: ActiveValue::Set(mapping.source_protocol.as_str().to_string()),
            priority: ActiveValue::Set(mapping.priority),
            target_name: ActiveValue::Set(mapping.target_name),
            target_method: ActiveValue::Set(mapping.target_method.as_str().to_string()),
            capabilities: ActiveValue::Set(mapping.capabilities),
            constraints: ActiveValue::Set(mapping.constraints),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let result = entities::ModelMappings::insert(active).exec(&self.db).await?;
        Ok(result.last_insert_id)
    }

    async fn delete_mapping(&self, id: i64) -> StorageResult<()> {
        entities::ModelMappings::delete_by_id(id)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn append_event(&self, event: &Event) -> StorageResult<()> {
        match event {
            Event::Request(entry) => {
                let active = entities::request_logs::ActiveModel {
                    id: ActiveValue::NotSet,
                    trace_id: ActiveValue::Set(entry.trace_id.clone()),
                    at: ActiveValue::Set(entry.at),
                    key_id: ActiveValue::Set(entry.key_id),
                    masked_key: ActiveValue::Set(entry.masked_key.clone()),
                    model: ActiveValue::Set(entry.model.clone()),
                    method: ActiveValue::Set(entry.method.clone()),
                    status: ActiveValue::Set(entry.status.map(i32::from)),
                    success: ActiveValue::Set(entry.success),
                    latency_ms: ActiveValue::Set(i64::try_from(entry.latency_ms).unwrap_or(i64::MAX)),
                    attempt: ActiveValue::Set(i32::try_from(entry.attempt).unwrap_or(i32::MAX)),
                };
                entities::RequestLogs::insert(active).exec(&self.db).await?;
            }
            Event::Error(entry) => {
                let active = entities::error_logs::ActiveModel {
                    id: ActiveValue::NotSet,
                    trace_id: ActiveValue::Set(entry.trace_id.clone()),
                    at: ActiveValue::Set(entry.at),
                    key_id: ActiveValue::Set(entry.key_id),
                    masked_key: ActiveValue::Set(entry.masked_key.clone()),
                    model: ActiveValue::Set(entry.model.clone()),
                    status: ActiveValue::Set(entry.status.map(i32::from)),
                    error_type: ActiveValue::Set(entry.error_type.clone()),
                    message: ActiveValue::Set(entry.message.clone()),
                    details: ActiveValue::Set(entry.details.clone()),
                };
                entities::ErrorLogs::insert(active).exec(&self.db).await?;
            }
            // Cooldowns are already reflected in `api_keys`.
            Event::Cooldown(_) => {}
        }
        Ok(())
    }
}

#[async_trait]
impl KeyStore for SeaOrmStorage {
    async fn list_keys(&self) -> StoreResult<Vec<ApiKey>> {
        use entities::api_keys::Column;
        let rows = entities::ApiKeys::find()
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(key_from_model).collect())
    }

    async fn list_enabled(&self) -> StoreResult<Vec<ApiKey>> {
        use entities::api_keys::Column;
        let rows = entities::ApiKeys::find()
            .filter(Column::Enabled.eq(true))
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(key_from_model).collect())
    }

    async fn mark_failed(&self, id: KeyId, until: OffsetDateTime) -> StoreResult<()> {
        use entities::api_keys::Column;
        let now = OffsetDateTime::now_utc();
        self.update_key(
            id,
            vec![
                (Column::FailCount, Expr::col(Column::FailCount).add(1)),
                (Column::LastFailedAt, Expr::value(Some(now))),
                (Column::DisabledUntil, Expr::value(Some(until))),
            ],
        )
        .await
    }

    async fn mark_reset(&self, id: KeyId) -> StoreResult<()> {
        use entities::api_keys::Column;
        self.update_key(
            id,
            vec![
                (Column::FailCount, Expr::value(0)),
                (
                    Column::DisabledUntil,
                    Expr::value(Option::<OffsetDateTime>::None),
                ),
            ],
        )
        .await
    }

    async fn touch(&self, id: KeyId, at: OffsetDateTime) -> StoreResult<()> {
        use entities::api_keys::Column;
        self.update_key(id, vec![(Column::LastUsed, Expr::value(Some(at)))])
            .await
    }

    async fn mark_checked(&self, id: KeyId, at: OffsetDateTime) -> StoreResult<()> {
        use entities::api_keys::Column;
        self.update_key(id, vec![(Column::LastChecked, Expr::value(Some(at)))])
            .await
    }

    async fn add_keys(&self, values: &[String]) -> StoreResult<BulkAddOutcome> {
        let mut known: HashSet<String> = entities::ApiKeys::find()
            .all(&self.db)
            .await
            .map_err(StorageError::from)?
            .into_iter()
            .map(|row| row.key_value)
            .collect();
        let now = OffsetDateTime::now_utc();
        let mut outcome = BulkAddOutcome::default();
        for value in values {
            let value = value.trim();
            if value.is_empty() || !known.insert(value.to_string()) {
                outcome.skipped += 1;
                continue;
            }
            let active = entities::api_keys::ActiveModel {
                id: ActiveValue::NotSet,
                key_value: ActiveValue::Set(value.to_string()),
                enabled: ActiveValue::Set(true),
                fail_count: ActiveValue::Set(0),
                disabled_until: ActiveValue::Set(None),
                last_used: ActiveValue::Set(None),
                last_checked: ActiveValue::Set(None),
                last_failed_at: ActiveValue::Set(None),
                created_at: ActiveValue::Set(now),
            };
            entities::ApiKeys::insert(active)
                .exec(&self.db)
                .await
                .map_err(StorageError::from)?;
            outcome.added += 1;
        }
        Ok(outcome)
    }

    async fn delete_key(&self, id: KeyId) -> StoreResult<()> {
        let result = entities::ApiKeys::delete_by_id(id)
            .exec(&self.db)
            .await
            .map_err(StorageError::from)?;
        if result.rows_affected == 0 {
            return Err(StoreError::KeyNotFound(id));
        }
        Ok(())
    }

    async fn set_enabled(&self, id: KeyId, enabled: bool) -> StoreResult<()> {
        use entities::api_keys::Column;
        self.update_key(id, vec![(Column::Enabled, Expr::value(enabled))])
            .await
    }
}

#[async_trait]
impl SettingsSource for SeaOrmStorage {
    async fn load_settings(&self) -> StoreResult<Vec<(String, String)>> {
        let rows = entities::Settings::find()
            .all(&self.db)
            .await
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
    }
}

#[async_trait]
impl MappingSource for SeaOrmStorage {
    async fn load_mappings(&self) -> StoreResult<Vec<ModelMapping>> {
        use entities::model_mappings::Column;
        let rows = entities::ModelMappings::find()
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
            .map_err(StorageError::from)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                match mapping_from_model(row) {
                    Ok(mapping) => Some(mapping),
                    Err(err) => {
                        tracing::warn!(event = "mapping_row_invalid", rule_id = id, error = %err);
                        None
                    }
                }
            })
            .collect())
    }
}

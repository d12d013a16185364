use async_trait::async_trait;

use gemgate_common::GlobalConfig;
use gemgate_provider_core::{Event, ModelMapping, StoreError, TargetMethod};
use gemgate_transform::Proto;
use serde::Deserialize;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StorageError> for StoreError {
    fn from(value: StorageError) -> Self {
        StoreError::Backend(value.to_string())
    }
}

/// New mapping row; the id is assigned by the database.
///
/// Also the shape of one entry in a declared mapping list (`GEMGATE_MAPPINGS`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewModelMapping {
    pub source_name: String,
    pub source_protocol: Proto,
    #[serde(default)]
    pub priority: i32,
    pub target_name: String,
    pub target_method: TargetMethod,
    #[serde(default)]
    pub capabilities: Option<serde_json::Value>,
    #[serde(default)]
    pub constraints: Option<serde_json::Value>,
}

impl NewModelMapping {
    /// Same rule as a stored row, ignoring the id.
    pub fn same_rule(&self, stored: &ModelMapping) -> bool {
        self.source_name == stored.source_name
            && self.source_protocol == stored.source_protocol
            && self.priority == stored.priority
            && self.target_name == stored.target_name
            && self.target_method == stored.target_method
            && self.capabilities == stored.capabilities
            && self.constraints == stored.constraints
    }
}

/// Storage is used for:
/// - bootstrap (global config, schema sync)
/// - operator writes (settings, mappings)
/// - log persistence (append_event)
///
/// Key state, settings and mapping reads go through the provider-core traits.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync (SeaORM 2.0). Enabled by default at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    async fn load_global_config(&self) -> StorageResult<Option<GlobalConfig>>;
    async fn upsert_global_config(&self, config: &GlobalConfig) -> StorageResult<()>;

    async fn upsert_setting(&self, key: &str, value: &str) -> StorageResult<()>;

    async fn insert_mapping(&self, mapping: NewModelMapping) -> StorageResult<i64>;
    async fn delete_mapping(&self, id: i64) -> StorageResult<()>;

    async fn append_event(&self, event: &Event) -> StorageResult<()>;
}

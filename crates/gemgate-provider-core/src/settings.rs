use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gemgate_common::Settings;

use crate::cache::TtlCache;
use crate::errors::StoreResult;
use crate::mapping::{MappingSource, ModelResolver};

/// Flat `key -> value` rows backing [`Settings`].
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load_settings(&self) -> StoreResult<Vec<(String, String)>>;
}

/// Settings re-read from the source at most once per TTL.
pub struct SettingsCache {
    source: Arc<dyn SettingsSource>,
    cache: TtlCache<Settings>,
}

impl SettingsCache {
    pub fn new(source: Arc<dyn SettingsSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: TtlCache::new(ttl),
        }
    }

    /// Current settings. A failed reload keeps serving the last good copy,
    /// or the defaults when nothing was ever loaded.
    pub async fn get(&self) -> Arc<Settings> {
        if let Some(settings) = self.cache.fresh().await {
            return settings;
        }
        match self.source.load_settings().await {
            Ok(pairs) => self.cache.store(Settings::from_pairs(pairs)).await,
            Err(err) => {
                tracing::warn!(event = "settings_load_failed", error = %err);
                match self.cache.last().await {
                    Some(settings) => settings,
                    None => Arc::new(Settings::default()),
                }
            }
        }
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}

/// Compiled mapping snapshot, rebuilt when the TTL lapses or on invalidate.
pub struct MappingCache {
    source: Arc<dyn MappingSource>,
    passthrough_unmapped: bool,
    cache: TtlCache<ModelResolver>,
}

impl MappingCache {
    pub fn new(source: Arc<dyn MappingSource>, ttl: Duration, passthrough_unmapped: bool) -> Self {
        Self {
            source,
            passthrough_unmapped,
            cache: TtlCache::new(ttl),
        }
    }

    pub async fn resolver(&self) -> Arc<ModelResolver> {
        if let Some(resolver) = self.cache.fresh().await {
            return resolver;
        }
        match self.source.load_mappings().await {
            Ok(mappings) => {
                self.cache
                    .store(ModelResolver::new(mappings, self.passthrough_unmapped))
                    .await
            }
            Err(err) => {
                tracing::warn!(event = "mappings_load_failed", error = %err);
                match self.cache.last().await {
                    Some(resolver) => resolver,
                    None => Arc::new(ModelResolver::new(Vec::new(), self.passthrough_unmapped)),
                }
            }
        }
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}

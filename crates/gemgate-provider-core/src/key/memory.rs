use std::collections::BTreeMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{ApiKey, BulkAddOutcome, KeyId, KeyStore};
use crate::errors::{StoreError, StoreResult};

/// Process-local key store, used by tests and by deployments without a shared database.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: KeyId,
    keys: BTreeMap<KeyId, ApiKey>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = OffsetDateTime::now_utc();
        let mut inner = Inner::default();
        for value in values {
            inner.next_id += 1;
            inner
                .keys
                .insert(inner.next_id, ApiKey::new(inner.next_id, value, now));
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub async fn get(&self, id: KeyId) -> Option<ApiKey> {
        self.inner.read().await.keys.get(&id).cloned()
    }

    async fn update(&self, id: KeyId, apply: impl FnOnce(&mut ApiKey)) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let key = inner.keys.get_mut(&id).ok_or(StoreError::KeyNotFound(id))?;
        apply(key);
        Ok(())
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn list_keys(&self) -> StoreResult<Vec<ApiKey>> {
        Ok(self.inner.read().await.keys.values().cloned().collect())
    }

    async fn mark_failed(&self, id: KeyId, until: OffsetDateTime) -> StoreResult<()> {
        let now = OffsetDateTime::now_utc();
        self.update(id, |key| {
            key.fail_count = key.fail_count.saturating_add(1);
            key.last_failed_at = Some(now);
            key.disabled_until = Some(until);
        })
        .await
    }

    async fn mark_reset(&self, id: KeyId) -> StoreResult<()> {
        self.update(id, |key| {
            key.fail_count = 0;
            key.disabled_until = None;
        })
        .await
    }

    async fn touch(&self, id: KeyId, at: OffsetDateTime) -> StoreResult<()> {
        self.update(id, |key| key.last_used = Some(at)).await
    }

    async fn mark_checked(&self, id: KeyId, at: OffsetDateTime) -> StoreResult<()> {
        self.update(id, |key| key.last_checked = Some(at)).await
    }

    async fn add_keys(&self, values: &[String]) -> StoreResult<BulkAddOutcome> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.write().await;
        let mut outcome = BulkAddOutcome::default();
        for value in values {
            let value = value.trim();
            if value.is_empty() || inner.keys.values().any(|key| key.value == value) {
                outcome.skipped += 1;
                continue;
            }
            inner.next_id += 1;
            let id = inner.next_id;
            inner.keys.insert(id, ApiKey::new(id, value, now));
            outcome.added += 1;
        }
        Ok(outcome)
    }

    async fn delete_key(&self, id: KeyId) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .keys
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::KeyNotFound(id))
    }

    async fn set_enabled(&self, id: KeyId, enabled: bool) -> StoreResult<()> {
        self.update(id, |key| key.enabled = enabled).await
    }
}

mod memory;

pub use memory::MemoryKeyStore;

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;

use crate::errors::StoreResult;

pub type KeyId = i64;

/// One pooled upstream API key and its health state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub id: KeyId,
    pub value: String,
    pub enabled: bool,
    /// Recent failures since the last success. Informational only.
    pub fail_count: u32,
    pub disabled_until: Option<OffsetDateTime>,
    pub last_used: Option<OffsetDateTime>,
    pub last_checked: Option<OffsetDateTime>,
    pub last_failed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl ApiKey {
    pub fn new(id: KeyId, value: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            value: value.into(),
            enabled: true,
            fail_count: 0,
            disabled_until: None,
            last_used: None,
            last_checked: None,
            last_failed_at: None,
            created_at,
        }
    }

    pub fn is_cooling(&self, now: OffsetDateTime) -> bool {
        self.disabled_until.is_some_and(|until| until > now)
    }

    pub fn is_usable(&self, now: OffsetDateTime) -> bool {
        self.enabled && !self.is_cooling(now)
    }

    pub fn masked(&self) -> String {
        mask_key(&self.value)
    }

    pub fn stats(&self, now: OffsetDateTime, max_failures: u32) -> KeyStats {
        let cooldown_remaining_secs = self
            .disabled_until
            .filter(|until| *until > now)
            .map(|until| (until - now).whole_seconds().max(0) as u64)
            .unwrap_or(0);
        KeyStats {
            id: self.id,
            masked: self.masked(),
            enabled: self.enabled,
            usable: self.is_usable(now),
            cooldown_remaining_secs,
            fail_count: self.fail_count,
            too_many_failures: self.fail_count >= max_failures,
            last_used: self.last_used,
            last_failed_at: self.last_failed_at,
            last_checked: self.last_checked,
        }
    }
}

/// Only the last four characters of a key ever leave the process.
pub fn mask_key(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStats {
    pub id: KeyId,
    pub masked: String,
    pub enabled: bool,
    pub usable: bool,
    pub cooldown_remaining_secs: u64,
    pub fail_count: u32,
    pub too_many_failures: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_used: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_checked: Option<OffsetDateTime>,
}

/// Split a pasted key list on newlines or commas.
///
/// Whitespace is trimmed, blanks dropped and repeats removed (first wins).
pub fn parse_key_list(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(['\n', ','])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .filter(|value| seen.insert(value.to_string()))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkAddOutcome {
    pub added: usize,
    pub skipped: usize,
}

/// Persistent pool of upstream keys.
///
/// Every mutation is a single atomic update of one key.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn list_keys(&self) -> StoreResult<Vec<ApiKey>>;

    async fn list_enabled(&self) -> StoreResult<Vec<ApiKey>> {
        Ok(self
            .list_keys()
            .await?
            .into_iter()
            .filter(|key| key.enabled)
            .collect())
    }

    async fn key_stats(
        &self,
        now: OffsetDateTime,
        max_failures: u32,
    ) -> StoreResult<Vec<KeyStats>> {
        Ok(self
            .list_keys()
            .await?
            .iter()
            .map(|key| key.stats(now, max_failures))
            .collect())
    }

    /// Bump `fail_count`, set `last_failed_at` and cool the key down until `until`.
    async fn mark_failed(&self, id: KeyId, until: OffsetDateTime) -> StoreResult<()>;

    /// Clear cooldown and failure count after a success.
    async fn mark_reset(&self, id: KeyId) -> StoreResult<()>;

    async fn touch(&self, id: KeyId, at: OffsetDateTime) -> StoreResult<()>;

    async fn mark_checked(&self, id: KeyId, at: OffsetDateTime) -> StoreResult<()>;

    /// Insert values not already present. Input is expected to be trimmed.
    async fn add_keys(&self, values: &[String]) -> StoreResult<BulkAddOutcome>;

    async fn delete_key(&self, id: KeyId) -> StoreResult<()>;

    async fn set_enabled(&self, id: KeyId, enabled: bool) -> StoreResult<()>;
}

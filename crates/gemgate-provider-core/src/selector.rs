use std::collections::HashSet;
use std::sync::Arc;

use gemgate_common::SelectionStrategy;
use rand::Rng;
use time::OffsetDateTime;

use crate::errors::StoreError;
use crate::key::{ApiKey, KeyId, KeyStore};

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("no API keys available")]
    NoKeysAvailable,
    #[error("all API keys are in cooldown until {resume_at}")]
    CircuitBreakerTripped { resume_at: OffsetDateTime },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Picks the key for the next upstream attempt.
#[derive(Clone)]
pub struct KeySelector {
    store: Arc<dyn KeyStore>,
}

impl KeySelector {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    /// Select a usable key, preferring ones not in `exclude`.
    ///
    /// When every usable key is excluded the exclusion is ignored, so a
    /// single-key pool can still retry. The chosen key is touched before it
    /// is returned.
    pub async fn select_key(
        &self,
        strategy: SelectionStrategy,
        exclude: &HashSet<KeyId>,
    ) -> Result<ApiKey, SelectError> {
        let now = OffsetDateTime::now_utc();
        let enabled = self.store.list_enabled().await?;
        if enabled.is_empty() {
            return Err(SelectError::NoKeysAvailable);
        }

        let usable: Vec<&ApiKey> = enabled.iter().filter(|key| key.is_usable(now)).collect();
        if usable.is_empty() {
            let resume_at = enabled
                .iter()
                .filter_map(|key| key.disabled_until)
                .min()
                .unwrap_or(now);
            return Err(SelectError::CircuitBreakerTripped { resume_at });
        }

        let fresh: Vec<&ApiKey> = usable
            .iter()
            .copied()
            .filter(|key| !exclude.contains(&key.id))
            .collect();
        let candidates = if fresh.is_empty() { usable } else { fresh };

        let chosen = match strategy {
            SelectionStrategy::Random => {
                candidates[rand::rng().random_range(0..candidates.len())]
            }
            SelectionStrategy::Lru => candidates
                .iter()
                .copied()
                .min_by_key(|key| (key.last_used, key.id))
                .unwrap_or(candidates[0]),
        };

        let mut chosen = chosen.clone();
        self.store.touch(chosen.id, now).await?;
        chosen.last_used = Some(now);
        Ok(chosen)
    }
}

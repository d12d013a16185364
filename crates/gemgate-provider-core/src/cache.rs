use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

/// Single-value cache that goes stale after `ttl`.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    slot: RwLock<Option<(Instant, Arc<T>)>>,
}

impl<T> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// The cached value if it was stored less than `ttl` ago.
    pub async fn fresh(&self) -> Option<Arc<T>> {
        let slot = self.slot.read().await;
        slot.as_ref()
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    /// The cached value regardless of age.
    pub async fn last(&self) -> Option<Arc<T>> {
        self.slot.read().await.as_ref().map(|(_, value)| value.clone())
    }

    pub async fn store(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        *self.slot.write().await = Some((Instant::now(), value.clone()));
        value
    }

    pub async fn invalidate(&self) {
        self.slot.write().await.take();
    }
}

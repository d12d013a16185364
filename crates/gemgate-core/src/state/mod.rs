use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use gemgate_common::GlobalConfig;
use gemgate_provider_core::{
    EventHub, KeySelector, KeyStore, MappingCache, MappingSource, SettingsCache, SettingsSource,
};

use crate::dispatcher::Dispatcher;
use crate::gateway::Gateway;
use crate::upstream_client::UpstreamClient;

/// Everything a request handler needs. Runtime reads go through the caches;
/// `global` is swapped whole when the process config changes.
pub struct AppState {
    pub global: Arc<ArcSwap<GlobalConfig>>,
    pub keys: Arc<dyn KeyStore>,
    pub settings: Arc<SettingsCache>,
    pub mappings: Arc<MappingCache>,
    pub events: EventHub,
    pub dispatcher: Arc<Dispatcher>,
    pub gateway: Gateway,
}

pub struct AppStateParts {
    pub global: Arc<ArcSwap<GlobalConfig>>,
    pub keys: Arc<dyn KeyStore>,
    pub settings_source: Arc<dyn SettingsSource>,
    pub mapping_source: Arc<dyn MappingSource>,
    pub events: EventHub,
    pub client: Arc<dyn UpstreamClient>,
}

impl AppState {
    pub fn new(parts: AppStateParts) -> Self {
        let global = parts.global.load_full();
        let ttl = Duration::from_secs(global.settings_ttl_secs);
        let settings = Arc::new(SettingsCache::new(parts.settings_source, ttl));
        let mappings = Arc::new(MappingCache::new(
            parts.mapping_source,
            ttl,
            global.passthrough_unmapped,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            KeySelector::new(parts.keys.clone()),
            settings.clone(),
            parts.events.clone(),
            parts.client,
        ));
        let gateway = Gateway::new(mappings.clone(), dispatcher.clone());
        Self {
            global: parts.global,
            keys: parts.keys,
            settings,
            mappings,
            events: parts.events,
            dispatcher,
            gateway,
        }
    }

    pub fn global(&self) -> Arc<GlobalConfig> {
        self.global.load_full()
    }

    /// Drop cached settings and mappings so the next request re-reads them.
    pub async fn invalidate_caches(&self) {
        self.settings.invalidate().await;
        self.mappings.invalidate().await;
    }
}

mod settings;

pub use settings::{SelectionStrategy, Settings, SettingsKey};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged global configuration used by the running process.
///
/// Merge order (after DB connection): CLI > ENV > DB, then persist back to DB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Downstream access key. `None` lets every request through.
    pub auth_key: Option<String>,
    /// Bearer secret for `/cron/health-check`.
    pub cron_secret: Option<String>,
    /// Optional outbound proxy (for upstream egress).
    pub proxy: Option<String>,
    /// Database DSN used for this process.
    pub dsn: String,
    /// How long runtime settings stay cached before a re-read.
    pub settings_ttl_secs: u64,
    /// Route models with no mapping rules for their protocol straight through.
    pub passthrough_unmapped: bool,
}

/// Optional layer used for merging global config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub auth_key: Option<String>,
    pub cron_secret: Option<String>,
    pub proxy: Option<String>,
    pub dsn: Option<String>,
    pub settings_ttl_secs: Option<u64>,
    pub passthrough_unmapped: Option<bool>,
}

impl GlobalConfigPatch {
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.auth_key.is_some() {
            self.auth_key = other.auth_key;
        }
        if other.cron_secret.is_some() {
            self.cron_secret = other.cron_secret;
        }
        if other.proxy.is_some() {
            self.proxy = other.proxy;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.settings_ttl_secs.is_some() {
            self.settings_ttl_secs = other.settings_ttl_secs;
        }
        if other.passthrough_unmapped.is_some() {
            self.passthrough_unmapped = other.passthrough_unmapped;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8788),
            auth_key: self.auth_key,
            cron_secret: self.cron_secret,
            proxy: self.proxy,
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            settings_ttl_secs: self.settings_ttl_secs.unwrap_or(30),
            passthrough_unmapped: self.passthrough_unmapped.unwrap_or(true),
        })
    }
}

impl GlobalConfig {
    /// Neither a cron secret nor an auth key: anyone may trigger the health sweep.
    pub fn cron_is_open(&self) -> bool {
        self.cron_secret.is_none() && self.auth_key.is_none()
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            auth_key: value.auth_key,
            cron_secret: value.cron_secret,
            proxy: value.proxy,
            dsn: Some(value.dsn),
            settings_ttl_secs: Some(value.settings_ttl_secs),
            passthrough_unmapped: Some(value.passthrough_unmapped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_later_layer() {
        let mut base = GlobalConfigPatch {
            host: Some("127.0.0.1".to_string()),
            port: Some(9000),
            dsn: Some("sqlite::memory:".to_string()),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(9100),
            auth_key: Some("secret".to_string()),
            ..Default::default()
        });
        let config = base.into_config().unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9100);
        assert_eq!(config.auth_key.as_deref(), Some("secret"));
        assert!(config.passthrough_unmapped);
    }

    #[test]
    fn dsn_is_required() {
        let err = GlobalConfigPatch::default().into_config().unwrap_err();
        assert!(matches!(err, GlobalConfigError::MissingField("dsn")));
    }

    #[test]
    fn cron_is_open_only_without_any_secret() {
        let mut config = GlobalConfigPatch {
            dsn: Some("sqlite::memory:".to_string()),
            ..GlobalConfigPatch::default()
        }
        .into_config()
        .unwrap();
        assert!(config.cron_is_open());
        config.auth_key = Some("gateway-key".to_string());
        assert!(!config.cron_is_open());
        config.auth_key = None;
        config.cron_secret = Some("cron-secret".to_string());
        assert!(!config.cron_is_open());
    }
}

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_HEALTH_CHECK_MODEL: &str = "gemini-2.0-flash";

/// Names of the rows in the flat `settings` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsKey {
    MaxAttempts,
    BackoffBaseMs,
    FailureCooldownSecs,
    RateLimitCooldownSecs,
    MaxFailures,
    SelectionStrategy,
    HealthCheckModel,
    ProxyUrl,
    UpstreamBaseUrl,
}

impl SettingsKey {
    pub const ALL: [SettingsKey; 9] = [
        SettingsKey::MaxAttempts,
        SettingsKey::BackoffBaseMs,
        SettingsKey::FailureCooldownSecs,
        SettingsKey::RateLimitCooldownSecs,
        SettingsKey::MaxFailures,
        SettingsKey::SelectionStrategy,
        SettingsKey::HealthCheckModel,
        SettingsKey::ProxyUrl,
        SettingsKey::UpstreamBaseUrl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SettingsKey::MaxAttempts => "max_attempts",
            SettingsKey::BackoffBaseMs => "backoff_base_ms",
            SettingsKey::FailureCooldownSecs => "failure_cooldown_secs",
            SettingsKey::RateLimitCooldownSecs => "rate_limit_cooldown_secs",
            SettingsKey::MaxFailures => "max_failures",
            SettingsKey::SelectionStrategy => "selection_strategy",
            SettingsKey::HealthCheckModel => "health_check_model",
            SettingsKey::ProxyUrl => "proxy_url",
            SettingsKey::UpstreamBaseUrl => "upstream_base_url",
        }
    }
}

impl fmt::Display for SettingsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Uniform random among usable keys.
    #[default]
    Random,
    /// Oldest `last_used` first, persisted in the key store.
    Lru,
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(SelectionStrategy::Random),
            "lru" | "least_recently_used" => Ok(SelectionStrategy::Lru),
            other => Err(format!("unknown selection strategy: {other}")),
        }
    }
}

/// Runtime tunables. Stored as strings, parsed at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub failure_cooldown_secs: u64,
    pub rate_limit_cooldown_secs: u64,
    pub max_failures: u32,
    pub selection_strategy: SelectionStrategy,
    pub health_check_model: String,
    pub proxy_url: Option<String>,
    pub upstream_base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
            failure_cooldown_secs: 60,
            rate_limit_cooldown_secs: 60,
            max_failures: 3,
            selection_strategy: SelectionStrategy::Random,
            health_check_model: DEFAULT_HEALTH_CHECK_MODEL.to_string(),
            proxy_url: None,
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
        }
    }
}

impl Settings {
    /// Build settings from `key -> value` rows. Unknown keys are ignored and
    /// unparseable values keep their default.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().trim().to_string(), v.as_ref().trim().to_string()))
            .collect();
        let defaults = Settings::default();

        let failure_cooldown_secs = parse_or(
            &map,
            SettingsKey::FailureCooldownSecs,
            defaults.failure_cooldown_secs,
        );
        Self {
            max_attempts: parse_or(&map, SettingsKey::MaxAttempts, defaults.max_attempts).max(1),
            backoff_base_ms: parse_or(&map, SettingsKey::BackoffBaseMs, defaults.backoff_base_ms),
            failure_cooldown_secs,
            // Without an explicit value a 429 cools down as long as any other failure.
            rate_limit_cooldown_secs: parse_or(
                &map,
                SettingsKey::RateLimitCooldownSecs,
                failure_cooldown_secs,
            ),
            max_failures: parse_or(&map, SettingsKey::MaxFailures, defaults.max_failures),
            selection_strategy: parse_or(
                &map,
                SettingsKey::SelectionStrategy,
                defaults.selection_strategy,
            ),
            health_check_model: non_empty(&map, SettingsKey::HealthCheckModel)
                .unwrap_or(defaults.health_check_model),
            proxy_url: non_empty(&map, SettingsKey::ProxyUrl),
            upstream_base_url: non_empty(&map, SettingsKey::UpstreamBaseUrl)
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.upstream_base_url),
        }
    }

    /// Flatten back into the string rows the settings table stores.
    pub fn to_pairs(&self) -> Vec<(SettingsKey, String)> {
        let strategy = match self.selection_strategy {
            SelectionStrategy::Random => "random",
            SelectionStrategy::Lru => "lru",
        };
        vec![
            (SettingsKey::MaxAttempts, self.max_attempts.to_string()),
            (SettingsKey::BackoffBaseMs, self.backoff_base_ms.to_string()),
            (
                SettingsKey::FailureCooldownSecs,
                self.failure_cooldown_secs.to_string(),
            ),
            (
                SettingsKey::RateLimitCooldownSecs,
                self.rate_limit_cooldown_secs.to_string(),
            ),
            (SettingsKey::MaxFailures, self.max_failures.to_string()),
            (SettingsKey::SelectionStrategy, strategy.to_string()),
            (SettingsKey::HealthCheckModel, self.health_check_model.clone()),
            (
                SettingsKey::ProxyUrl,
                self.proxy_url.clone().unwrap_or_default(),
            ),
            (SettingsKey::UpstreamBaseUrl, self.upstream_base_url.clone()),
        ]
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }
}

fn parse_or<T>(map: &HashMap<String, String>, key: SettingsKey, default: T) -> T
where
    T: FromStr,
{
    let Some(raw) = map.get(key.as_str()).filter(|v| !v.is_empty()) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(event = "settings_parse_failed", key = %key, value = %raw);
            default
        }
    }
}

fn non_empty(map: &HashMap<String, String>, key: SettingsKey) -> Option<String> {
    map.get(key.as_str())
        .filter(|v| !v.is_empty())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_yields_defaults() {
        let settings = Settings::from_pairs(Vec::<(String, String)>::new());
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.backoff_base(), Duration::from_secs(1));
    }

    #[test]
    fn parses_values_and_ignores_garbage() {
        let settings = Settings::from_pairs([
            ("max_attempts", "5"),
            ("backoff_base_ms", "not-a-number"),
            ("failure_cooldown_secs", "120"),
            ("selection_strategy", "LRU"),
            ("proxy_url", ""),
            ("upstream_base_url", "http://localhost:9999/"),
        ]);
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.backoff_base_ms, 1000);
        assert_eq!(settings.failure_cooldown_secs, 120);
        assert_eq!(settings.rate_limit_cooldown_secs, 120);
        assert_eq!(settings.selection_strategy, SelectionStrategy::Lru);
        assert_eq!(settings.proxy_url, None);
        assert_eq!(settings.upstream_base_url, "http://localhost:9999");
    }

    #[test]
    fn explicit_rate_limit_cooldown_wins() {
        let settings = Settings::from_pairs([
            ("failure_cooldown_secs", "10"),
            ("rate_limit_cooldown_secs", "90"),
        ]);
        assert_eq!(settings.rate_limit_cooldown(), Duration::from_secs(90));
        assert_eq!(settings.failure_cooldown(), Duration::from_secs(10));
    }

    #[test]
    fn pairs_round_trip_through_the_table_shape() {
        let mut settings = Settings::default();
        settings.selection_strategy = SelectionStrategy::Lru;
        settings.proxy_url = Some("http://proxy:8080".to_string());
        let rows = settings
            .to_pairs()
            .into_iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect::<Vec<_>>();
        assert_eq!(Settings::from_pairs(rows), settings);
    }
}

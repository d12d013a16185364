use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use clap::Parser;

use gemgate_common::{GlobalConfig, GlobalConfigPatch, Settings};
use gemgate_provider_core::{
    EventHub, KeyStore, MappingSource, SettingsSource, TerminalEventSink, parse_key_list,
};
use gemgate_storage::{DbEventSink, NewModelMapping, SeaOrmStorage, Storage};

use crate::state::{AppState, AppStateParts};
use crate::upstream_client::{UpstreamClientConfig, WreqUpstreamClient};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "gemgate",
    version,
    about = "OpenAI, Anthropic and Gemini compatible gateway over a pooled Gemini key set"
)]
pub struct CliArgs {
    /// Database DSN (required to bootstrap the rest of config).
    #[arg(long, env = "GEMGATE_DSN")]
    pub dsn: Option<String>,

    /// Bind host.
    #[arg(long, env = "GEMGATE_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "GEMGATE_PORT")]
    pub port: Option<String>,

    /// Key downstream clients must present. Unset means open access.
    #[arg(long, env = "GEMGATE_AUTH_KEY")]
    pub auth_key: Option<String>,

    /// Bearer secret for the health-check cron endpoint.
    #[arg(long, env = "GEMGATE_CRON_SECRET")]
    pub cron_secret: Option<String>,

    /// Optional outbound proxy for upstream requests.
    #[arg(long, env = "GEMGATE_PROXY")]
    pub proxy: Option<String>,

    /// Upstream API keys to add to the pool, separated by commas or newlines.
    #[arg(long, env = "GEMGATE_KEYS")]
    pub keys: Option<String>,

    /// Seconds runtime settings and mappings stay cached.
    #[arg(long, env = "GEMGATE_SETTINGS_TTL_SECS")]
    pub settings_ttl_secs: Option<String>,

    /// Serve models with no mapping rules under their own name.
    #[arg(long, env = "GEMGATE_PASSTHROUGH_UNMAPPED")]
    pub passthrough_unmapped: Option<String>,

    /// Model mapping rules as a JSON array, or a path to a JSON file. When
    /// set, the stored rules are made to match it exactly.
    #[arg(long, env = "GEMGATE_MAPPINGS")]
    pub mappings: Option<String>,
}

pub struct Bootstrap {
    pub storage: Arc<SeaOrmStorage>,
    pub state: Arc<AppState>,
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let dsn = sanitize_dsn_value(args.dsn.clone());
    let cli_patch = GlobalConfigPatch {
        host: sanitize_optional_env_value(args.host.clone()),
        port: parse_u16_env_value(args.port.clone(), "GEMGATE_PORT")?,
        auth_key: sanitize_optional_env_value(args.auth_key.clone()),
        cron_secret: sanitize_optional_env_value(args.cron_secret.clone()),
        proxy: sanitize_optional_env_value(args.proxy.clone()),
        dsn: Some(dsn.clone()),
        settings_ttl_secs: parse_u64_env_value(
            args.settings_ttl_secs.clone(),
            "GEMGATE_SETTINGS_TTL_SECS",
        )?,
        passthrough_unmapped: parse_bool_env_value(
            args.passthrough_unmapped.clone(),
            "GEMGATE_PASSTHROUGH_UNMAPPED",
        )?,
    };

    ensure_sqlite_parent_dir(&dsn)?;

    // 1) connect DB from CLI/ENV DSN.
    let storage = Arc::new(
        SeaOrmStorage::connect(&dsn)
            .await
            .context("connect storage")?,
    );
    storage.sync().await.context("schema sync")?;

    // 2) merge once: CLI > ENV > DB. clap already resolves CLI over ENV.
    let db_global = storage
        .load_global_config()
        .await
        .context("load db global_config")?;
    let mut merged = db_global.map(GlobalConfigPatch::from).unwrap_or_default();
    merged.overlay(cli_patch);
    let global: GlobalConfig = merged
        .into_config()
        .context("finalize merged global config")?;

    // 3) persist merged global config back to DB.
    storage
        .upsert_global_config(&global)
        .await
        .context("upsert global_config")?;

    seed_default_settings(storage.as_ref()).await?;

    if let Some(raw) = sanitize_optional_env_value(args.keys.clone()) {
        let outcome = storage
            .add_keys(&parse_key_list(&raw))
            .await
            .context("seed api keys")?;
        tracing::info!(
            event = "keys_seeded",
            added = outcome.added,
            skipped = outcome.skipped
        );
    }

    if let Some(raw) = sanitize_optional_env_value(args.mappings.clone()) {
        let declared = parse_declared_mappings(&raw)?;
        apply_declared_mappings(storage.as_ref(), declared).await?;
    }

    if global.cron_is_open() {
        tracing::warn!(
            event = "cron_endpoint_open",
            "no cron secret or auth key set: /cron/health-check is open to anyone"
        );
    }

    // 4) in-memory runtime state.
    let events = EventHub::new(1024);
    events.add_sink(Arc::new(TerminalEventSink::new())).await;
    events
        .add_sink(Arc::new(DbEventSink::new(storage.clone())))
        .await;

    let global = Arc::new(ArcSwap::from_pointee(global));
    let proxy_source = global.clone();
    let client = WreqUpstreamClient::new(UpstreamClientConfig::default(), move || {
        proxy_source.load().proxy.clone()
    })
    .context("build upstream client")?;

    let state = AppState::new(AppStateParts {
        global,
        keys: storage.clone(),
        settings_source: storage.clone(),
        mapping_source: storage.clone(),
        events,
        client: Arc::new(client),
    });

    Ok(Bootstrap {
        storage,
        state: Arc::new(state),
    })
}

/// Write every default tunable that has no row yet, so the table lists all
/// of them for operators. Existing values are left alone.
async fn seed_default_settings(storage: &SeaOrmStorage) -> anyhow::Result<()> {
    let existing: HashSet<String> = storage
        .load_settings()
        .await
        .context("load settings")?
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    for (key, value) in Settings::default().to_pairs() {
        if existing.contains(key.as_str()) {
            continue;
        }
        storage
            .upsert_setting(key.as_str(), &value)
            .await
            .with_context(|| format!("seed setting {}", key.as_str()))?;
    }
    Ok(())
}

/// Inline JSON when the value looks like an array, otherwise a file path.
fn parse_declared_mappings(raw: &str) -> anyhow::Result<Vec<NewModelMapping>> {
    let text = if raw.starts_with('[') {
        raw.to_string()
    } else {
        std::fs::read_to_string(raw).with_context(|| format!("read mappings file {raw}"))?
    };
    serde_json::from_str(&text).context("parse GEMGATE_MAPPINGS")
}

/// Make the stored mapping table equal to `declared`. Rules already stored
/// keep their ids; stale ones are deleted and missing ones inserted.
async fn apply_declared_mappings(
    storage: &SeaOrmStorage,
    declared: Vec<NewModelMapping>,
) -> anyhow::Result<()> {
    let stored = storage
        .load_mappings()
        .await
        .context("load model mappings")?;
    let mut pending = declared;
    let mut kept = 0usize;
    let mut removed = 0usize;
    for rule in stored {
        if let Some(pos) = pending.iter().position(|new| new.same_rule(&rule)) {
            pending.swap_remove(pos);
            kept += 1;
            continue;
        }
        storage
            .delete_mapping(rule.id)
            .await
            .with_context(|| format!("delete mapping {}", rule.id))?;
        removed += 1;
    }
    let added = pending.len();
    for rule in pending {
        storage
            .insert_mapping(rule)
            .await
            .context("insert mapping")?;
    }
    tracing::info!(event = "mappings_applied", kept, added, removed);
    Ok(())
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    // PaaS templates sometimes leave `${VAR}` unresolved.
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn sanitize_dsn_value(value: Option<String>) -> String {
    sanitize_optional_env_value(value).unwrap_or_else(default_dsn)
}

fn default_dsn() -> String {
    if let Some(data_dir) = sanitize_optional_env_value(std::env::var("GEMGATE_DATA_DIR").ok()) {
        let dir = data_dir.trim_end_matches('/');
        return format!("sqlite://{dir}/gemgate.db?mode=rwc");
    }
    "sqlite://gemgate.db?mode=rwc".to_string()
}

fn ensure_sqlite_parent_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(db_path) = sqlite_file_path_from_dsn(dsn) else {
        return Ok(());
    };
    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    std::fs::create_dir_all(parent)
        .with_context(|| format!("create sqlite parent dir {}", parent.display()))?;
    Ok(())
}

fn sqlite_file_path_from_dsn(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next()?.trim();
    if path_part.is_empty() {
        return None;
    }

    let normalized = path_part.strip_prefix("//").unwrap_or(path_part);
    if normalized.eq_ignore_ascii_case(":memory:") {
        return None;
    }

    Some(PathBuf::from(normalized))
}

fn parse_u16_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u16>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u16>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_u64_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u64>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u64>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_bool_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<bool>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => return Err(anyhow::anyhow!("invalid {env_name} value: {raw}")),
    };
    Ok(Some(parsed))
}

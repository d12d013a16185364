use std::collections::HashSet;
use std::sync::Arc;

use gemgate_common::{GlobalConfig, SelectionStrategy};
use gemgate_provider_core::{
    Event, KeySelector, KeyStore, MappingSource, Proto, RequestLogEntry, SettingsSource,
    TargetMethod,
};
use gemgate_storage::{NewModelMapping, SeaOrmStorage, Storage};
use time::{Duration, OffsetDateTime};

async fn storage() -> SeaOrmStorage {
    let storage = SeaOrmStorage::connect("sqlite::memory:").await.unwrap();
    storage.sync().await.unwrap();
    storage
}

#[tokio::test]
async fn key_lifecycle() {
    let storage = storage().await;
    let outcome = storage
        .add_keys(&[
            "AIzaSy-first-0001".to_string(),
            "AIzaSy-second-0002".to_string(),
            "AIzaSy-first-0001".to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(outcome.added, 2);
    assert_eq!(outcome.skipped, 1);

    let again = storage
        .add_keys(&["AIzaSy-second-0002".to_string()])
        .await
        .unwrap();
    assert_eq!(again.added, 0);

    let keys = storage.list_keys().await.unwrap();
    assert_eq!(keys.len(), 2);
    let first = keys[0].id;

    let until = OffsetDateTime::now_utc() + Duration::seconds(60);
    storage.mark_failed(first, until).await.unwrap();
    storage.mark_failed(first, until).await.unwrap();
    let key = storage
        .list_keys()
        .await
        .unwrap()
        .into_iter()
        .find(|key| key.id == first)
        .unwrap();
    assert_eq!(key.fail_count, 2);
    assert!(key.is_cooling(OffsetDateTime::now_utc()));
    assert!(key.last_failed_at.is_some());

    storage.mark_reset(first).await.unwrap();
    let key = storage
        .list_keys()
        .await
        .unwrap()
        .into_iter()
        .find(|key| key.id == first)
        .unwrap();
    assert_eq!(key.fail_count, 0);
    assert_eq!(key.disabled_until, None);

    storage.set_enabled(first, false).await.unwrap();
    assert_eq!(storage.list_enabled().await.unwrap().len(), 1);

    storage.delete_key(first).await.unwrap();
    assert!(storage.delete_key(first).await.is_err());
    assert!(storage.mark_reset(first).await.is_err());
}

#[tokio::test]
async fn durable_lru_uses_stored_last_used() {
    let storage = Arc::new(storage().await);
    storage
        .add_keys(&["key-aaaa-0001".to_string(), "key-bbbb-0002".to_string()])
        .await
        .unwrap();
    let selector = KeySelector::new(storage.clone());
    let first = selector
        .select_key(SelectionStrategy::Lru, &HashSet::new())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = selector
        .select_key(SelectionStrategy::Lru, &HashSet::new())
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
    assert!(storage.list_keys().await.unwrap().iter().all(|key| key.last_used.is_some()));
}

#[tokio::test]
async fn settings_and_mappings_round_through_the_tables() {
    let storage = storage().await;
    storage.upsert_setting("max_attempts", "5").await.unwrap();
    storage.upsert_setting("max_attempts", "4").await.unwrap();
    let rows = storage.load_settings().await.unwrap();
    assert_eq!(rows, vec![("max_attempts".to_string(), "4".to_string())]);

    let id = storage
        .insert_mapping(NewModelMapping {
            source_name: "gpt-4*".to_string(),
            source_protocol: Proto::OpenAIChat,
            priority: 10,
            target_name: "gemini-2.5-flash".to_string(),
            target_method: TargetMethod::StreamGenerateContent,
            capabilities: Some(serde_json::json!({"vision": true})),
            constraints: None,
        })
        .await
        .unwrap();
    let mappings = storage.load_mappings().await.unwrap();
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].id, id);
    assert_eq!(mappings[0].source_protocol, Proto::OpenAIChat);
    assert_eq!(mappings[0].target_method, TargetMethod::StreamGenerateContent);

    storage.delete_mapping(id).await.unwrap();
    assert!(storage.load_mappings().await.unwrap().is_empty());
}

#[tokio::test]
async fn global_config_upsert() {
    let storage = storage().await;
    assert!(storage.load_global_config().await.unwrap().is_none());
    let mut config = GlobalConfig {
        host: "127.0.0.1".to_string(),
        port: 8788,
        auth_key: Some("secret".to_string()),
        cron_secret: None,
        proxy: None,
        dsn: "sqlite::memory:".to_string(),
        settings_ttl_secs: 30,
        passthrough_unmapped: true,
    };
    storage.upsert_global_config(&config).await.unwrap();
    config.port = 9000;
    storage.upsert_global_config(&config).await.unwrap();
    assert_eq!(storage.load_global_config().await.unwrap(), Some(config));
}

#[tokio::test]
async fn request_logs_are_persisted() {
    let storage = storage().await;
    storage
        .append_event(&Event::Request(RequestLogEntry {
            trace_id: "trace-1".to_string(),
            at: OffsetDateTime::now_utc(),
            key_id: 7,
            masked_key: "****0001".to_string(),
            model: "gemini-2.0-flash".to_string(),
            method: "generateContent".to_string(),
            status: Some(200),
            success: true,
            latency_ms: 120,
            attempt: 1,
        }))
        .await
        .unwrap();
    let rows = storage.request_logs().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, Some(200));
    assert_eq!(rows[0].masked_key, "****0001");
}

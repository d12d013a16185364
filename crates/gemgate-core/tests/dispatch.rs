use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;

use gemgate_common::GlobalConfig;
use gemgate_core::{
    AppState, AppStateParts, ClientOutput, DispatchError, DispatchRequest, GenerateError,
    UpstreamClient, list_models, run_health_check,
};
use gemgate_provider_core::{
    EventHub, Headers, KeyStore, MappingSource, MemoryKeyStore, ModelMapping, SettingsSource,
    StoreResult, TargetMethod, UpstreamBody, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind,
};
use gemgate_transform::{ClientRequest, Proto};

enum Reply {
    Json(u16, &'static str),
    WithHeaders(u16, Headers),
    Sse(Vec<&'static str>),
    Transport,
}

#[derive(Default)]
struct MockUpstream {
    script: Mutex<VecDeque<Reply>>,
    seen: Mutex<Vec<UpstreamHttpRequest>>,
}

impl MockUpstream {
    fn new(script: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn urls(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|r| r.url.clone()).collect()
    }
}

impl UpstreamClient for MockUpstream {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        self.seen.lock().unwrap().push(req);
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Json(500, r#"{"error":{"code":500,"message":"boom"}}"#));
        Box::pin(async move {
            match reply {
                Reply::Json(status, body) => Ok(UpstreamHttpResponse {
                    status,
                    headers: Headers::new(),
                    body: UpstreamBody::Bytes(Bytes::from_static(body.as_bytes())),
                }),
                Reply::WithHeaders(status, headers) => Ok(UpstreamHttpResponse {
                    status,
                    headers,
                    body: UpstreamBody::Bytes(Bytes::new()),
                }),
                Reply::Sse(chunks) => {
                    let (tx, rx) = tokio::sync::mpsc::channel(16);
                    tokio::spawn(async move {
                        for chunk in chunks {
                            if tx.send(Ok(Bytes::from_static(chunk.as_bytes()))).await.is_err() {
                                break;
                            }
                        }
                    });
                    Ok(UpstreamHttpResponse {
                        status: 200,
                        headers: Headers::new(),
                        body: UpstreamBody::Stream(rx),
                    })
                }
                Reply::Transport => Err(UpstreamFailure::Transport {
                    kind: UpstreamTransportErrorKind::Connect,
                    message: "connection refused".to_string(),
                }),
            }
        })
    }
}

struct StaticConfig {
    settings: Vec<(String, String)>,
    mappings: Vec<ModelMapping>,
}

#[async_trait]
impl SettingsSource for StaticConfig {
    async fn load_settings(&self) -> StoreResult<Vec<(String, String)>> {
        Ok(self.settings.clone())
    }
}

#[async_trait]
impl MappingSource for StaticConfig {
    async fn load_mappings(&self) -> StoreResult<Vec<ModelMapping>> {
        Ok(self.mappings.clone())
    }
}

fn global() -> GlobalConfig {
    GlobalConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        auth_key: None,
        cron_secret: None,
        proxy: None,
        dsn: "sqlite::memory:".to_string(),
        settings_ttl_secs: 30,
        passthrough_unmapped: true,
    }
}

fn state_with(
    keys: Arc<MemoryKeyStore>,
    upstream: Arc<MockUpstream>,
    mappings: Vec<ModelMapping>,
) -> AppState {
    let config = Arc::new(StaticConfig {
        settings: vec![
            ("backoff_base_ms".to_string(), "1000".to_string()),
            ("selection_strategy".to_string(), "lru".to_string()),
            ("upstream_base_url".to_string(), "https://upstream.test".to_string()),
        ],
        mappings,
    });
    AppState::new(AppStateParts {
        global: Arc::new(ArcSwap::from_pointee(global())),
        keys,
        settings_source: config.clone(),
        mapping_source: config,
        events: EventHub::default(),
        client: upstream,
    })
}

fn generate(method: TargetMethod) -> DispatchRequest {
    DispatchRequest {
        model: "gemini-2.0-flash".to_string(),
        method,
        body: Bytes::from_static(br#"{"contents":[]}"#),
        trace_id: "trace-1".to_string(),
    }
}

const OK_BODY: &str = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"hi"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":1}}"#;

#[tokio::test(start_paused = true)]
async fn always_failing_upstream_is_tried_three_times() {
    let keys = Arc::new(MemoryKeyStore::with_keys(["AIzaKEY-one-0001"]));
    let upstream = MockUpstream::new(vec![]);
    let state = state_with(keys.clone(), upstream.clone(), vec![]);

    let started = tokio::time::Instant::now();
    let err = state
        .dispatcher
        .dispatch(generate(TargetMethod::GenerateContent))
        .await
        .unwrap_err();

    assert_eq!(upstream.calls(), 3);
    match err {
        DispatchError::RetriesExhausted {
            attempts,
            last_status,
            last_message,
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(last_status, Some(500));
            assert_eq!(last_message, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // 1s + 2s of backoff between the three attempts.
    assert!(started.elapsed() >= Duration::from_secs(3));
    let key = keys.get(1).await.unwrap();
    assert_eq!(key.fail_count, 3);
    assert!(key.is_cooling(OffsetDateTime::now_utc()));
}

#[tokio::test(start_paused = true)]
async fn retries_rotate_across_keys() {
    let keys = Arc::new(MemoryKeyStore::with_keys([
        "AIzaKEY-one-0001",
        "AIzaKEY-two-0002",
        "AIzaKEY-three-03",
    ]));
    let upstream = MockUpstream::new(vec![Reply::Transport, Reply::Json(503, "")]);
    let state = state_with(keys, upstream.clone(), vec![]);

    let _ = state
        .dispatcher
        .dispatch(generate(TargetMethod::GenerateContent))
        .await;

    let urls = upstream.urls();
    assert_eq!(urls.len(), 3);
    assert!(urls[0].ends_with("key=AIzaKEY-one-0001"));
    assert!(urls[1].ends_with("key=AIzaKEY-two-0002"));
    assert!(urls[2].ends_with("key=AIzaKEY-three-03"));
    assert!(urls[0].starts_with(
        "https://upstream.test/v1beta/models/gemini-2.0-flash:generateContent?"
    ));
}

#[tokio::test(start_paused = true)]
async fn failure_then_success_records_one_failure_and_one_reset() {
    let keys = Arc::new(MemoryKeyStore::with_keys(["AIzaKEY-one-0001"]));
    let upstream = MockUpstream::new(vec![Reply::Json(500, ""), Reply::Json(200, OK_BODY)]);
    let state = state_with(keys.clone(), upstream.clone(), vec![]);
    let mut events = state.events.subscribe();

    let resp = state
        .dispatcher
        .dispatch(generate(TargetMethod::GenerateContent))
        .await
        .unwrap();

    assert_eq!(resp.status, 200);
    assert_eq!(upstream.calls(), 2);
    let key = keys.get(1).await.unwrap();
    assert_eq!(key.fail_count, 0);
    assert!(key.disabled_until.is_none());
    assert!(key.last_failed_at.is_some());

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(serde_json::to_value(&event).unwrap()["kind"].clone());
    }
    assert_eq!(kinds, vec!["request", "cooldown", "error", "request"]);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_short_circuits_with_retry_after() {
    let keys = Arc::new(MemoryKeyStore::with_keys(["AIzaKEY-one-0001", "AIzaKEY-two-0002"]));
    let upstream = MockUpstream::new(vec![Reply::WithHeaders(
        429,
        vec![("Retry-After".to_string(), "120".to_string())],
    )]);
    let state = state_with(keys.clone(), upstream.clone(), vec![]);

    let before = OffsetDateTime::now_utc();
    let err = state
        .dispatcher
        .dispatch(generate(TargetMethod::GenerateContent))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::RateLimited { .. }));
    assert_eq!(upstream.calls(), 1);
    let key = keys.get(1).await.unwrap();
    let until = key.disabled_until.unwrap();
    assert!(until >= before + time::Duration::seconds(119));
    assert!(until <= OffsetDateTime::now_utc() + time::Duration::seconds(121));
}

#[tokio::test]
async fn empty_pool_and_cooling_pool() {
    let upstream = MockUpstream::new(vec![]);
    let state = state_with(Arc::new(MemoryKeyStore::new()), upstream.clone(), vec![]);
    let err = state
        .dispatcher
        .dispatch(generate(TargetMethod::GenerateContent))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NoKeys));

    let keys = Arc::new(MemoryKeyStore::with_keys(["AIzaKEY-one-0001"]));
    let resume_at = OffsetDateTime::now_utc() + time::Duration::minutes(5);
    keys.mark_failed(1, resume_at).await.unwrap();
    let state = state_with(keys, upstream.clone(), vec![]);
    let err = state
        .dispatcher
        .dispatch(generate(TargetMethod::GenerateContent))
        .await
        .unwrap_err();
    match err {
        DispatchError::CircuitOpen { resume_at: at } => assert_eq!(at, resume_at),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(upstream.calls(), 0);
}

fn openai_request(stream: bool) -> ClientRequest {
    ClientRequest::OpenAIChat(
        serde_json::from_value(serde_json::json!({
            "model": "gpt-4o",
            "stream": stream,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap(),
    )
}

fn mapping(id: i64, source: &str, proto: Proto, target: &str, method: TargetMethod) -> ModelMapping {
    ModelMapping {
        id,
        source_name: source.to_string(),
        source_protocol: proto,
        priority: 0,
        target_name: target.to_string(),
        target_method: method,
        capabilities: None,
        constraints: None,
    }
}

#[tokio::test]
async fn gateway_returns_openai_completion() {
    let keys = Arc::new(MemoryKeyStore::with_keys(["AIzaKEY-one-0001"]));
    let upstream = MockUpstream::new(vec![Reply::Json(200, OK_BODY)]);
    let state = state_with(
        keys,
        upstream.clone(),
        vec![mapping(1, "gpt-4o", Proto::OpenAIChat, "gemini-2.5-pro", TargetMethod::GenerateContent)],
    );

    let output = state
        .gateway
        .generate(openai_request(false), Some(TargetMethod::GenerateContent), "t")
        .await
        .unwrap();
    let ClientOutput::Json(body) = output else {
        panic!("expected a JSON body");
    };
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["object"], "chat.completion");
    assert_eq!(value["model"], "gpt-4o");
    assert_eq!(value["choices"][0]["message"]["content"], "hi");
    assert!(upstream.urls()[0].contains("/models/gemini-2.5-pro:generateContent?"));
}

#[tokio::test]
async fn gateway_streams_claude_frames_using_mapping_method() {
    let keys = Arc::new(MemoryKeyStore::with_keys(["AIzaKEY-one-0001"]));
    let upstream = MockUpstream::new(vec![Reply::Sse(vec![
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo\"}]},",
        "\"finishReason\":\"STOP\"}]}\n\n",
    ])]);
    let state = state_with(
        keys,
        upstream.clone(),
        vec![mapping(
            1,
            "claude-*",
            Proto::Claude,
            "gemini-2.5-flash",
            TargetMethod::StreamGenerateContent,
        )],
    );
    let request = ClientRequest::Claude(
        serde_json::from_value(serde_json::json!({
            "model": "claude-3-5-sonnet",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap(),
    );

    let output = state.gateway.generate(request, None, "t").await.unwrap();
    let ClientOutput::Stream(mut rx) = output else {
        panic!("expected a stream");
    };
    let mut text = String::new();
    while let Some(frame) = rx.recv().await {
        text.push_str(std::str::from_utf8(&frame).unwrap());
    }

    assert!(upstream.urls()[0].contains(":streamGenerateContent?"));
    assert!(upstream.urls()[0].ends_with("&alt=sse"));
    let order = [
        "event: message_start",
        "event: content_block_start",
        "\"Hel\"",
        "\"lo\"",
        "event: content_block_stop",
        "event: message_delta",
        "event: message_stop",
    ];
    let mut at = 0;
    for needle in order {
        let found = text[at..].find(needle).unwrap_or_else(|| panic!("missing {needle}"));
        at += found + needle.len();
    }
}

#[tokio::test]
async fn unmapped_model_is_rejected_without_touching_keys() {
    let keys = Arc::new(MemoryKeyStore::with_keys(["AIzaKEY-one-0001"]));
    let upstream = MockUpstream::new(vec![]);
    let state = state_with(
        keys.clone(),
        upstream.clone(),
        vec![mapping(1, "gpt-4o", Proto::OpenAIChat, "gemini-2.5-pro", TargetMethod::GenerateContent)],
    );

    let mut request = openai_request(false);
    if let ClientRequest::OpenAIChat(body) = &mut request {
        body.model = "gpt-3.5-turbo".to_string();
    }
    let err = state
        .gateway
        .generate(request, Some(TargetMethod::GenerateContent), "t")
        .await
        .unwrap_err();

    assert!(matches!(err, GenerateError::ModelNotSupported { ref model, .. } if model == "gpt-3.5-turbo"));
    assert_eq!(upstream.calls(), 0);
    assert!(keys.get(1).await.unwrap().last_used.is_none());
}

#[tokio::test]
async fn health_check_resets_recovered_keys_only() {
    let keys = Arc::new(MemoryKeyStore::with_keys([
        "AIzaKEY-one-0001",
        "AIzaKEY-two-0002",
        "AIzaKEY-three-03",
    ]));
    let later = OffsetDateTime::now_utc() + time::Duration::minutes(10);
    keys.mark_failed(1, later).await.unwrap();
    keys.mark_failed(2, later).await.unwrap();
    let upstream = MockUpstream::new(vec![Reply::Json(200, OK_BODY), Reply::Json(403, "")]);
    let state = state_with(keys.clone(), upstream.clone(), vec![]);

    let report = run_health_check(&state.dispatcher).await.unwrap();

    assert_eq!(report.checked, 2);
    assert_eq!(report.recovered + report.failed, 2);
    assert_eq!(upstream.calls(), 2);
    let mut statuses = Vec::new();
    for id in [1, 2] {
        let key = keys.get(id).await.unwrap();
        assert!(key.last_checked.is_some());
        statuses.push(key.disabled_until.is_none());
    }
    assert_eq!(statuses.iter().filter(|healthy| **healthy).count(), 1);
    assert!(keys.get(3).await.unwrap().last_checked.is_none());
}

#[tokio::test]
async fn models_are_listed_in_openai_shape() {
    let keys = Arc::new(MemoryKeyStore::with_keys(["AIzaKEY-one-0001"]));
    let upstream = MockUpstream::new(vec![Reply::Json(
        200,
        r#"{"models":[{"name":"models/gemini-2.5-pro"},{"name":"models/text-embedding-004"}]}"#,
    )]);
    let state = state_with(keys, upstream.clone(), vec![]);

    let list = list_models(&state.dispatcher).await.unwrap();

    assert_eq!(list.data.len(), 2);
    assert_eq!(list.data[0].id, "gemini-2.5-pro");
    assert_eq!(list.data[0].owned_by, "google");
    assert!(upstream.urls()[0].starts_with("https://upstream.test/v1beta/models?"));
}

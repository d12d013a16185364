use serde::Serialize;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::key::KeyId;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Request(RequestLogEntry),
    Error(ErrorLogEntry),
    Cooldown(KeyCooldownEvent),
}

/// One upstream attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub trace_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub key_id: KeyId,
    pub masked_key: String,
    pub model: String,
    pub method: String,
    pub status: Option<u16>,
    pub success: bool,
    pub latency_ms: u64,
    pub attempt: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorLogEntry {
    pub trace_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub key_id: Option<KeyId>,
    pub masked_key: Option<String>,
    pub model: String,
    pub status: Option<u16>,
    pub error_type: String,
    pub message: String,
    pub details: Option<JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownReason {
    RateLimit,
    Upstream5xx,
    UpstreamHttp,
    Transport,
    HealthCheck,
}

impl CooldownReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CooldownReason::RateLimit => "rate_limit",
            CooldownReason::Upstream5xx => "upstream_5xx",
            CooldownReason::UpstreamHttp => "upstream_http",
            CooldownReason::Transport => "transport",
            CooldownReason::HealthCheck => "health_check",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyCooldownEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub key_id: KeyId,
    pub masked_key: String,
    #[serde(with = "time::serde::rfc3339")]
    pub until: OffsetDateTime,
    pub reason: CooldownReason,
}

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use gemgate_common::Settings;

use crate::events::CooldownReason;
use crate::headers::{Headers, header_get};

/// Ready-to-write frames headed for the client.
pub type ByteStream = tokio::sync::mpsc::Receiver<Bytes>;

/// Upstream body chunks. An `Err` is the last item: the body broke off and
/// the sender is dropped right after it. A plain close is a clean end.
pub type UpstreamChunks = tokio::sync::mpsc::Receiver<Result<Bytes, UpstreamFailure>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
    /// Outbound proxy for this request; `None` uses the client default.
    pub proxy: Option<String>,
}

#[derive(Debug)]
pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(UpstreamChunks),
}

#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamBody,
}

impl UpstreamHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// No HTTP response was received.
    Transport {
        kind: UpstreamTransportErrorKind,
        message: String,
    },
    /// Non-2xx response, body fully read.
    Http {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
}

impl UpstreamFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamFailure::Http { status, .. } => Some(*status),
            UpstreamFailure::Transport { .. } => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        self.status() == Some(429)
    }

    /// Upstream error message, taken from a Gemini error body when present.
    pub fn message(&self) -> String {
        match self {
            UpstreamFailure::Transport { kind, message } => format!("{kind:?}: {message}"),
            UpstreamFailure::Http { status, body, .. } => {
                let parsed = serde_json::from_slice::<serde_json::Value>(body)
                    .ok()
                    .and_then(|value| {
                        value
                            .pointer("/error/message")
                            .and_then(|message| message.as_str())
                            .map(str::to_string)
                    });
                match parsed {
                    Some(message) => message,
                    None if body.is_empty() => format!("upstream returned {status}"),
                    None => String::from_utf8_lossy(body).chars().take(512).collect(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownDecision {
    pub duration: Duration,
    pub reason: CooldownReason,
}

/// How long a key sits out after `failure`.
///
/// 429 honours `Retry-After` and otherwise uses the rate-limit cooldown;
/// every other failure uses the generic failure cooldown.
pub fn decide_cooldown(failure: &UpstreamFailure, settings: &Settings) -> CooldownDecision {
    match failure {
        UpstreamFailure::Http {
            status: 429,
            headers,
            ..
        } => CooldownDecision {
            duration: parse_retry_after(headers, SystemTime::now())
                .unwrap_or_else(|| settings.rate_limit_cooldown()),
            reason: CooldownReason::RateLimit,
        },
        UpstreamFailure::Http { status, .. } => CooldownDecision {
            duration: settings.failure_cooldown(),
            reason: if (500..600).contains(status) {
                CooldownReason::Upstream5xx
            } else {
                CooldownReason::UpstreamHttp
            },
        },
        UpstreamFailure::Transport { .. } => CooldownDecision {
            duration: settings.failure_cooldown(),
            reason: CooldownReason::Transport,
        },
    }
}

/// `Retry-After` as delta-seconds or an HTTP-date. A date in the past
/// yields `None`.
pub fn parse_retry_after(headers: &Headers, now: SystemTime) -> Option<Duration> {
    let value = header_get(headers, "retry-after")?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(now).ok().filter(|d| !d.is_zero())
}

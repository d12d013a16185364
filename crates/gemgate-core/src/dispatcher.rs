use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{info, warn};

use gemgate_common::Settings;
use gemgate_provider_core::{
    ApiKey, ErrorLogEntry, Event, EventHub, KeyCooldownEvent, KeySelector, RequestLogEntry,
    SelectError, SettingsCache, StoreError, TargetMethod, UpstreamFailure,
    UpstreamHttpResponse, aistudio, decide_cooldown,
};

use crate::stream::collect;
use crate::upstream_client::UpstreamClient;

/// One canonical generate call, already addressed to the upstream model.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub model: String,
    pub method: TargetMethod,
    pub body: Bytes,
    pub trace_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no API keys available")]
    NoKeys,
    #[error("all API keys are in cooldown until {resume_at}")]
    CircuitOpen { resume_at: OffsetDateTime },
    #[error("rate limited by upstream: {message}")]
    RateLimited { message: String },
    #[error("request failed after {attempts} attempts: {last_message}")]
    RetriesExhausted {
        attempts: u32,
        last_status: Option<u16>,
        last_message: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SelectError> for DispatchError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::NoKeysAvailable => DispatchError::NoKeys,
            SelectError::CircuitBreakerTripped { resume_at } => {
                DispatchError::CircuitOpen { resume_at }
            }
            SelectError::Store(err) => DispatchError::Store(err),
        }
    }
}

/// Sends generate calls upstream, rotating keys and retrying with backoff.
pub struct Dispatcher {
    selector: KeySelector,
    settings: Arc<SettingsCache>,
    events: EventHub,
    client: Arc<dyn UpstreamClient>,
}

impl Dispatcher {
    pub fn new(
        selector: KeySelector,
        settings: Arc<SettingsCache>,
        events: EventHub,
        client: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            selector,
            settings,
            events,
            client,
        }
    }

    pub fn selector(&self) -> &KeySelector {
        &self.selector
    }

    pub fn settings(&self) -> &Arc<SettingsCache> {
        &self.settings
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn client(&self) -> &Arc<dyn UpstreamClient> {
        &self.client
    }

    /// Run `req` against the pool.
    ///
    /// A 2xx response is returned as-is, body untouched, so streams reach the
    /// caller unbuffered. 429 stops immediately; any other failure cools the
    /// key down and retries on another one until `max_attempts` is spent.
    pub async fn dispatch(
        &self,
        req: DispatchRequest,
    ) -> Result<UpstreamHttpResponse, DispatchError> {
        let settings = self.settings.get().await;
        let max_attempts = settings.max_attempts.max(1);
        let mut tried = HashSet::new();
        let mut last_failure: Option<UpstreamFailure> = None;
        let mut last_key: Option<ApiKey> = None;

        for attempt in 1..=max_attempts {
            let key = match self
                .selector
                .select_key(settings.selection_strategy, &tried)
                .await
            {
                Ok(key) => key,
                Err(SelectError::Store(err)) => return Err(DispatchError::Store(err)),
                // This call cooled the whole pool down itself; the cooldown
                // applies to later requests, so keep retrying the last key.
                Err(SelectError::CircuitBreakerTripped { .. }) if last_key.is_some() => {
                    match last_key.take() {
                        Some(key) => key,
                        None => return Err(DispatchError::NoKeys),
                    }
                }
                Err(err) => {
                    return Err(match last_failure {
                        Some(failure) => exhausted(attempt - 1, &failure),
                        None => err.into(),
                    });
                }
            };
            tried.insert(key.id);

            let mut upstream = aistudio::generate_content_request(
                &settings.upstream_base_url,
                &req.model,
                req.method,
                &key.value,
                req.body.clone(),
            );
            upstream.proxy = settings.proxy_url.clone();

            let started_at = Instant::now();
            let result = self.client.send(upstream).await;
            let latency_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);

            let failure = match result {
                Ok(resp) if resp.is_success() => {
                    info!(
                        event = "upstream_responded",
                        trace_id = %req.trace_id,
                        key = %key.masked(),
                        model = %req.model,
                        status = resp.status,
                        attempt,
                        elapsed_ms = latency_ms
                    );
                    self.emit_request(&req, &key, attempt, Some(resp.status), true, latency_ms)
                        .await;
                    if let Err(err) = self.selector.store().mark_reset(key.id).await {
                        warn!(event = "key_reset_failed", key_id = key.id, error = %err);
                    }
                    return Ok(resp);
                }
                Ok(resp) => failure_from_response(resp).await,
                Err(failure) => failure,
            };

            warn!(
                event = "upstream_failed",
                trace_id = %req.trace_id,
                key = %key.masked(),
                model = %req.model,
                status = ?failure.status(),
                attempt,
                elapsed_ms = latency_ms,
                error = %failure.message()
            );
            self.emit_request(&req, &key, attempt, failure.status(), false, latency_ms)
                .await;
            self.record_failure(&req, &key, &failure, &settings).await;

            if failure.is_rate_limit() {
                return Err(DispatchError::RateLimited {
                    message: failure.message(),
                });
            }
            if attempt < max_attempts {
                tokio::time::sleep(backoff_delay(&settings, attempt)).await;
            }
            last_failure = Some(failure);
            last_key = Some(key);
        }

        Err(match last_failure {
            Some(failure) => exhausted(max_attempts, &failure),
            None => DispatchError::NoKeys,
        })
    }

    async fn record_failure(
        &self,
        req: &DispatchRequest,
        key: &ApiKey,
        failure: &UpstreamFailure,
        settings: &Settings,
    ) {
        let now = OffsetDateTime::now_utc();
        let decision = decide_cooldown(failure, settings);
        let until = cooldown_until(now, decision.duration);
        if let Err(err) = self.selector.store().mark_failed(key.id, until).await {
            warn!(event = "key_mark_failed_error", key_id = key.id, error = %err);
        }

        self.events
            .emit(Event::Cooldown(KeyCooldownEvent {
                at: now,
                key_id: key.id,
                masked_key: key.masked(),
                until,
                reason: decision.reason,
            }))
            .await;
        self.events
            .emit(Event::Error(ErrorLogEntry {
                trace_id: req.trace_id.clone(),
                at: now,
                key_id: Some(key.id),
                masked_key: Some(key.masked()),
                model: req.model.clone(),
                status: failure.status(),
                error_type: decision.reason.as_str().to_string(),
                message: failure.message(),
                details: failure_details(failure),
            }))
            .await;
    }

    async fn emit_request(
        &self,
        req: &DispatchRequest,
        key: &ApiKey,
        attempt: u32,
        status: Option<u16>,
        success: bool,
        latency_ms: u64,
    ) {
        self.events
            .emit(Event::Request(RequestLogEntry {
                trace_id: req.trace_id.clone(),
                at: OffsetDateTime::now_utc(),
                key_id: key.id,
                masked_key: key.masked(),
                model: req.model.clone(),
                method: req.method.as_str().to_string(),
                status,
                success,
                latency_ms,
                attempt,
            }))
            .await;
    }
}

/// `backoff_base * 2^(attempt-1)`.
pub fn backoff_delay(settings: &Settings, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    settings.backoff_base().saturating_mul(1u32 << exponent)
}

pub(crate) fn cooldown_until(now: OffsetDateTime, duration: Duration) -> OffsetDateTime {
    time::Duration::try_from(duration)
        .ok()
        .and_then(|duration| now.checked_add(duration))
        .unwrap_or(now + time::Duration::DAY)
}

fn exhausted(attempts: u32, failure: &UpstreamFailure) -> DispatchError {
    DispatchError::RetriesExhausted {
        attempts,
        last_status: failure.status(),
        last_message: failure.message(),
    }
}

pub(crate) async fn failure_from_response(resp: UpstreamHttpResponse) -> UpstreamFailure {
    UpstreamFailure::Http {
        status: resp.status,
        headers: resp.headers,
        body: collect(resp.body).await,
    }
}

fn failure_details(failure: &UpstreamFailure) -> Option<serde_json::Value> {
    match failure {
        UpstreamFailure::Http { body, .. } => serde_json::from_slice(body).ok(),
        UpstreamFailure::Transport { kind, .. } => Some(serde_json::json!({ "transport": kind })),
    }
}

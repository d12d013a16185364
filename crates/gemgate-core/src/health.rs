use bytes::Bytes;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::{info, warn};

use gemgate_common::Settings;
use gemgate_provider_core::{
    ApiKey, CooldownReason, Event, KeyCooldownEvent, StoreError, TargetMethod, aistudio,
    decide_cooldown,
};

use crate::dispatcher::{Dispatcher, cooldown_until, failure_from_response};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub checked: u32,
    pub recovered: u32,
    pub failed: u32,
}

/// Re-probe every enabled key that is cooling down or has recent failures.
///
/// A successful probe clears the key; a failed one extends its cooldown.
/// `last_checked` is stamped either way.
pub async fn run_health_check(dispatcher: &Dispatcher) -> Result<HealthReport, StoreError> {
    let settings = dispatcher.settings().get().await;
    let now = OffsetDateTime::now_utc();
    let keys = dispatcher.selector().store().list_enabled().await?;
    let suspects: Vec<ApiKey> = keys
        .into_iter()
        .filter(|key| key.is_cooling(now) || key.fail_count > 0)
        .collect();

    let results = join_all(
        suspects
            .iter()
            .map(|key| probe_key(dispatcher, &settings, key)),
    )
    .await;

    let mut report = HealthReport::default();
    for ok in results {
        report.checked += 1;
        if ok {
            report.recovered += 1;
        } else {
            report.failed += 1;
        }
    }
    info!(
        event = "health_check_finished",
        checked = report.checked,
        recovered = report.recovered,
        failed = report.failed
    );
    Ok(report)
}

async fn probe_key(dispatcher: &Dispatcher, settings: &Settings, key: &ApiKey) -> bool {
    let store = dispatcher.selector().store();
    let mut req = aistudio::generate_content_request(
        &settings.upstream_base_url,
        &settings.health_check_model,
        TargetMethod::GenerateContent,
        &key.value,
        probe_body(),
    );
    req.proxy = settings.proxy_url.clone();

    let failure = match dispatcher.client().send(req).await {
        Ok(resp) if resp.is_success() => None,
        Ok(resp) => Some(failure_from_response(resp).await),
        Err(failure) => Some(failure),
    };

    let now = OffsetDateTime::now_utc();
    let healthy = match failure {
        None => {
            if let Err(err) = store.mark_reset(key.id).await {
                warn!(event = "key_reset_failed", key_id = key.id, error = %err);
            }
            info!(event = "key_recovered", key = %key.masked());
            true
        }
        Some(failure) => {
            let until = cooldown_until(now, decide_cooldown(&failure, settings).duration);
            if let Err(err) = store.mark_failed(key.id, until).await {
                warn!(event = "key_mark_failed_error", key_id = key.id, error = %err);
            }
            warn!(
                event = "key_probe_failed",
                key = %key.masked(),
                status = ?failure.status(),
                error = %failure.message()
            );
            dispatcher
                .events()
                .emit(Event::Cooldown(KeyCooldownEvent {
                    at: now,
                    key_id: key.id,
                    masked_key: key.masked(),
                    until,
                    reason: CooldownReason::HealthCheck,
                }))
                .await;
            false
        }
    };
    if let Err(err) = store.mark_checked(key.id, now).await {
        warn!(event = "key_mark_checked_failed", key_id = key.id, error = %err);
    }
    healthy
}

fn probe_body() -> Bytes {
    let body = json!({
        "contents": [{"role": "user", "parts": [{"text": "ping"}]}],
        "generationConfig": {"maxOutputTokens": 1}
    });
    Bytes::from(body.to_string())
}

use std::collections::HashSet;

use time::OffsetDateTime;

use gemgate_protocol::{gemini, openai};
use gemgate_provider_core::aistudio;

use crate::dispatcher::{DispatchError, Dispatcher, failure_from_response};
use crate::stream::collect;

/// Upstream model catalogue in the OpenAI list shape.
///
/// One key, one attempt. Failures are reported like dispatch failures but
/// leave the key's state alone.
pub async fn list_models(
    dispatcher: &Dispatcher,
) -> Result<openai::ListModelsResponse, DispatchError> {
    let settings = dispatcher.settings().get().await;
    let key = dispatcher
        .selector()
        .select_key(settings.selection_strategy, &HashSet::new())
        .await?;
    let mut req = aistudio::list_models_request(&settings.upstream_base_url, &key.value);
    req.proxy = settings.proxy_url.clone();

    let failure = match dispatcher.client().send(req).await {
        Ok(resp) if resp.is_success() => {
            let status = resp.status;
            let body = collect(resp.body).await;
            let list: gemini::ListModelsResponse =
                serde_json::from_slice(&body).map_err(|err| DispatchError::RetriesExhausted {
                    attempts: 1,
                    last_status: Some(status),
                    last_message: format!("invalid model list: {err}"),
                })?;
            return Ok(to_openai(list, OffsetDateTime::now_utc().unix_timestamp()));
        }
        Ok(resp) => failure_from_response(resp).await,
        Err(failure) => failure,
    };
    if failure.is_rate_limit() {
        return Err(DispatchError::RateLimited {
            message: failure.message(),
        });
    }
    Err(DispatchError::RetriesExhausted {
        attempts: 1,
        last_status: failure.status(),
        last_message: failure.message(),
    })
}

pub fn to_openai(list: gemini::ListModelsResponse, created: i64) -> openai::ListModelsResponse {
    openai::ListModelsResponse {
        object: openai::ListObjectType::List,
        data: list
            .models
            .iter()
            .map(|model| openai::Model {
                id: model.id().to_string(),
                object: openai::ModelObjectType::Model,
                created,
                owned_by: "google".to_string(),
            })
            .collect(),
    }
}

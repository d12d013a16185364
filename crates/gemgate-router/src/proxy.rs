use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Extension, Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use gemgate_core::{AppState, ClientOutput, list_models, run_health_check};
use gemgate_protocol::{claude, gemini, openai};
use gemgate_provider_core::{ByteStream, TargetMethod};
use gemgate_transform::{ClientRequest, Proto};

use crate::auth::{RequestTraceId, cron_authorized, proxy_auth};
use crate::error::{ErrorKind, GatewayError};

const SSE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const SSE_HEARTBEAT_FRAME: &[u8] = b": keep-alive\n\n";

pub fn proxy_router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .route("/v1/chat/completions", post(openai_chat_completions))
        .route("/v1/messages", post(claude_messages))
        .route("/v1/models", get(models_list))
        .route("/v1beta/models/{*model_action}", post(gemini_post))
        .layer(middleware::from_fn_with_state(state.clone(), proxy_auth));

    Router::new()
        .merge(gated)
        .route("/cron/health-check", get(cron_health_check))
        .route("/health", get(health))
        .with_state(state)
}

async fn openai_chat_completions(
    State(state): State<Arc<AppState>>,
    Extension(trace_id): Extension<RequestTraceId>,
    body: Bytes,
) -> Response {
    let body: openai::CreateChatCompletionRequestBody = match parse_body(Proto::OpenAIChat, &body)
    {
        Ok(body) => body,
        Err(err) => return err.into_response(),
    };
    let method = TargetMethod::from_stream(body.stream == Some(true));
    generate(
        &state,
        ClientRequest::OpenAIChat(body),
        Some(method),
        trace_id.0,
    )
    .await
}

/// Anthropic clients get the streaming mode of the matched mapping.
async fn claude_messages(
    State(state): State<Arc<AppState>>,
    Extension(trace_id): Extension<RequestTraceId>,
    body: Bytes,
) -> Response {
    let body: claude::CreateMessageRequestBody = match parse_body(Proto::Claude, &body) {
        Ok(body) => body,
        Err(err) => return err.into_response(),
    };
    generate(&state, ClientRequest::Claude(body), None, trace_id.0).await
}

async fn gemini_post(
    State(state): State<Arc<AppState>>,
    Extension(trace_id): Extension<RequestTraceId>,
    Path(model_action): Path<String>,
    body: Bytes,
) -> Response {
    let Some((model, action)) = split_model_action(&model_action) else {
        return GatewayError::bad_request(
            Proto::Gemini,
            format!("expected models/{{model}}:{{method}}, got {model_action}"),
        )
        .into_response();
    };
    let method = match action.parse::<TargetMethod>() {
        Ok(method) => method,
        Err(err) => return GatewayError::bad_request(Proto::Gemini, err).into_response(),
    };
    let body: gemini::GenerateContentRequestBody = match parse_body(Proto::Gemini, &body) {
        Ok(body) => body,
        Err(err) => return err.into_response(),
    };
    generate(
        &state,
        ClientRequest::Gemini { model, body },
        Some(method),
        trace_id.0,
    )
    .await
}

async fn models_list(State(state): State<Arc<AppState>>) -> Response {
    match list_models(&state.dispatcher).await {
        Ok(list) => Json(list).into_response(),
        Err(err) => GatewayError::from_dispatch(Proto::OpenAIChat, err).into_response(),
    }
}

async fn cron_health_check(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    if !cron_authorized(&state, &headers, query.as_deref()) {
        return GatewayError::new(Proto::OpenAIChat, ErrorKind::Unauthorized).into_response();
    }
    match run_health_check(&state.dispatcher).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => {
            GatewayError::new(Proto::OpenAIChat, ErrorKind::Internal(err.to_string()))
                .into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn generate(
    state: &AppState,
    request: ClientRequest,
    client_method: Option<TargetMethod>,
    trace_id: String,
) -> Response {
    let proto = request.proto();
    let model = request.model().to_string();
    let started_at = Instant::now();
    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        proto = %proto,
        model = %model,
        method = ?client_method
    );

    match state
        .gateway
        .generate(request, client_method, &trace_id)
        .await
    {
        Ok(output) => {
            let is_stream = matches!(output, ClientOutput::Stream(_));
            info!(
                event = "downstream_responded",
                trace_id = %trace_id,
                proto = %proto,
                status = 200,
                elapsed_ms = started_at.elapsed().as_millis(),
                is_stream
            );
            output_response(output)
        }
        Err(err) => {
            let err = GatewayError::from_generate(proto, err);
            warn!(
                event = "downstream_responded",
                trace_id = %trace_id,
                proto = %proto,
                status = err.status().as_u16(),
                error = %err.message(),
                elapsed_ms = started_at.elapsed().as_millis()
            );
            err.into_response()
        }
    }
}

fn parse_body<T: DeserializeOwned>(proto: Proto, body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|err| GatewayError::bad_request(proto, format!("invalid request body: {err}")))
}

/// `gemini-2.5-pro:streamGenerateContent` into model and method.
fn split_model_action(input: &str) -> Option<(String, String)> {
    let raw = input.trim().trim_start_matches('/');
    let raw = raw.strip_prefix("models/").unwrap_or(raw);
    let (model, action) = raw.rsplit_once(':')?;
    let model = model.trim();
    let action = action.trim();
    if model.is_empty() || action.is_empty() {
        return None;
    }
    Some((model.to_string(), action.to_string()))
}

fn output_response(output: ClientOutput) -> Response {
    let mut builder = Response::builder().status(StatusCode::OK);
    let body = match output {
        ClientOutput::Json(bytes) => {
            if let Some(h) = builder.headers_mut() {
                h.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
            }
            Body::from(bytes)
        }
        ClientOutput::Stream(rx) => {
            if let Some(h) = builder.headers_mut() {
                h.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/event-stream"),
                );
                // Keep reverse proxies from buffering the stream.
                h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                h.insert(
                    HeaderName::from_static("x-accel-buffering"),
                    HeaderValue::from_static("no"),
                );
            }
            let stream = ReceiverStream::new(wrap_sse_stream_with_heartbeat(rx))
                .map(Ok::<_, Infallible>);
            Body::from_stream(stream)
        }
    };

    builder.body(body).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "response_build_failed").into_response()
    })
}

fn wrap_sse_stream_with_heartbeat(mut upstream_rx: ByteStream) -> ByteStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SSE_HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = tx.closed() => break,
                maybe_chunk = upstream_rx.recv() => {
                    let Some(chunk) = maybe_chunk else {
                        break;
                    };
                    if tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if tx.send(Bytes::from_static(SSE_HEARTBEAT_FRAME)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

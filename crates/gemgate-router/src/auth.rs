use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use gemgate_core::AppState;
use gemgate_transform::Proto;

use crate::error::{ErrorKind, GatewayError};

/// Per-request id, set by the auth layer.
#[derive(Debug, Clone)]
pub struct RequestTraceId(pub String);

pub(crate) async fn proxy_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let trace_id = uuid::Uuid::now_v7().to_string();
    let key = extract_user_key(req.headers(), req.uri().query());

    // Downstream credentials never reach handlers or logs.
    strip_downstream_auth_headers(req.headers_mut());
    strip_downstream_auth_query(req.uri_mut());
    req.extensions_mut().insert(RequestTraceId(trace_id.clone()));

    let global = state.global();
    if let Some(expected) = global.auth_key.as_deref()
        && key.as_deref() != Some(expected)
    {
        tracing::warn!(
            event = "downstream_unauthorized",
            trace_id = %trace_id,
            path = %req.uri().path(),
            presented = key.is_some()
        );
        let proto = proto_for_path(req.uri().path());
        return GatewayError::new(proto, ErrorKind::Unauthorized).into_response();
    }

    next.run(req).await
}

/// The cron endpoint takes `Authorization: Bearer <cron_secret>`. Without a
/// configured secret it accepts whatever the regular gateway would.
pub(crate) fn cron_authorized(state: &AppState, headers: &HeaderMap, query: Option<&str>) -> bool {
    let global = state.global();
    match global.cron_secret.as_deref() {
        Some(secret) => bearer_token(headers).as_deref() == Some(secret),
        None => match global.auth_key.as_deref() {
            Some(expected) => extract_user_key(headers, query).as_deref() == Some(expected),
            None => true,
        },
    }
}

pub(crate) fn proto_for_path(path: &str) -> Proto {
    if path.starts_with("/v1/messages") {
        Proto::Claude
    } else if path.starts_with("/v1beta/") {
        Proto::Gemini
    } else {
        Proto::OpenAIChat
    }
}

fn strip_downstream_auth_headers(headers: &mut HeaderMap) {
    headers.remove(header::AUTHORIZATION);
    headers.remove("x-api-key");
    headers.remove("x-goog-api-key");
}

fn strip_downstream_auth_query(uri: &mut axum::http::Uri) {
    let Some(q) = uri.query() else { return };

    let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(q) else {
        return;
    };
    if !pairs.iter().any(|(k, _)| k == "key") {
        return;
    }
    let filtered: Vec<(String, String)> = pairs.into_iter().filter(|(k, _)| k != "key").collect();

    let Ok(new_q) = serde_urlencoded::to_string(&filtered) else {
        return;
    };

    let path = uri.path();
    let new_uri_str = if new_q.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{new_q}")
    };
    if let Ok(new_uri) = new_uri_str.parse() {
        *uri = new_uri;
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let prefix = "Bearer ";
    if value.len() <= prefix.len() || !value[..prefix.len()].eq_ignore_ascii_case(prefix) {
        return None;
    }
    let token = value[prefix.len()..].trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Bearer, then `x-api-key`, then `x-goog-api-key`, then `?key=`.
pub(crate) fn extract_user_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(token) = bearer_token(headers) {
        return Some(token);
    }

    for name in ["x-api-key", "x-goog-api-key"] {
        if let Some(value) = headers.get(name)
            && let Ok(s) = value.to_str()
        {
            let s = s.trim();
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }

    let q = query?;
    let pairs = serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok()?;
    pairs
        .into_iter()
        .find(|(k, _)| k == "key")
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

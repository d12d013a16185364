use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use gemgate_core::{DispatchError, GenerateError};
use gemgate_protocol::{claude, gemini, openai};
use gemgate_transform::Proto;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    NoKeys,
    CircuitOpen { resume_at: OffsetDateTime },
    RateLimited,
    RetriesExhausted { last_message: String },
    ModelNotSupported { model: String },
    BadRequest(String),
    Unauthorized,
    Internal(String),
}

/// A failed request, rendered in the error envelope of the client's protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    pub proto: Proto,
    pub kind: ErrorKind,
}

impl GatewayError {
    pub fn new(proto: Proto, kind: ErrorKind) -> Self {
        Self { proto, kind }
    }

    pub fn bad_request(proto: Proto, message: impl Into<String>) -> Self {
        Self::new(proto, ErrorKind::BadRequest(message.into()))
    }

    pub fn from_dispatch(proto: Proto, err: DispatchError) -> Self {
        let kind = match err {
            DispatchError::NoKeys => ErrorKind::NoKeys,
            DispatchError::CircuitOpen { resume_at } => ErrorKind::CircuitOpen { resume_at },
            DispatchError::RateLimited { .. } => ErrorKind::RateLimited,
            DispatchError::RetriesExhausted { last_message, .. } => {
                ErrorKind::RetriesExhausted { last_message }
            }
            DispatchError::Store(err) => ErrorKind::Internal(err.to_string()),
        };
        Self::new(proto, kind)
    }

    pub fn from_generate(proto: Proto, err: GenerateError) -> Self {
        match err {
            GenerateError::ModelNotSupported { model, .. } => {
                Self::new(proto, ErrorKind::ModelNotSupported { model })
            }
            GenerateError::Dispatch(err) => Self::from_dispatch(proto, err),
            GenerateError::Decode(err) => Self::new(proto, ErrorKind::Internal(err.to_string())),
            GenerateError::Encode(err) => Self::new(proto, ErrorKind::Internal(err.to_string())),
        }
    }

    pub fn status(&self) -> StatusCode {
        match &self.kind {
            ErrorKind::NoKeys | ErrorKind::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::RetriesExhausted { .. } => StatusCode::BAD_GATEWAY,
            ErrorKind::ModelNotSupported { .. } => StatusCode::NOT_FOUND,
            ErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match &self.kind {
            ErrorKind::NoKeys => "service unavailable: no API keys available".to_string(),
            ErrorKind::CircuitOpen { resume_at } => {
                let at = resume_at
                    .format(&Rfc3339)
                    .unwrap_or_else(|_| resume_at.to_string());
                format!("service unavailable: all API keys are in cooldown until {at}")
            }
            ErrorKind::RateLimited => {
                "rate limited by upstream, please retry your request".to_string()
            }
            ErrorKind::RetriesExhausted { last_message } => {
                format!("request failed after all retries: {last_message}")
            }
            ErrorKind::ModelNotSupported { model } => format!("model not supported: {model}"),
            ErrorKind::BadRequest(message) => message.clone(),
            ErrorKind::Unauthorized => "invalid or missing API key".to_string(),
            ErrorKind::Internal(message) => format!("internal error: {message}"),
        }
    }

    fn openai_code(&self) -> Option<&'static str> {
        match self.kind {
            ErrorKind::NoKeys | ErrorKind::CircuitOpen { .. } => Some("no_available_keys"),
            ErrorKind::RateLimited => Some("rate_limit_exceeded"),
            ErrorKind::ModelNotSupported { .. } => Some("model_not_found"),
            ErrorKind::Unauthorized => Some("invalid_api_key"),
            _ => None,
        }
    }

    fn body(&self) -> serde_json::Result<Vec<u8>> {
        let status = self.status().as_u16();
        let message = self.message();
        match self.proto {
            Proto::OpenAIChat => serde_json::to_vec(&openai::ErrorResponse::new(
                status,
                message,
                self.openai_code(),
            )),
            Proto::Claude => serde_json::to_vec(&claude::ErrorResponse::new(status, message)),
            Proto::Gemini => serde_json::to_vec(&gemini::ErrorResponse::new(status, message)),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self.body() {
            Ok(body) => body,
            Err(_) => return (status, self.message()).into_response(),
        };
        let mut response = (status, body).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let ErrorKind::CircuitOpen { resume_at } = self.kind {
            let wait = (resume_at - OffsetDateTime::now_utc()).whole_seconds().max(1);
            if let Ok(value) = HeaderValue::from_str(&wait.to_string()) {
                headers.insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(err: GatewayError) -> (StatusCode, serde_json::Value) {
        let status = err.status();
        (status, serde_json::from_slice(&err.body().unwrap()).unwrap())
    }

    #[test]
    fn envelopes_follow_client_protocol() {
        let (status, body) = json(GatewayError::new(Proto::OpenAIChat, ErrorKind::NoKeys));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["message"], "service unavailable: no API keys available");
        assert_eq!(body["error"]["code"], "no_available_keys");

        let (status, body) = json(GatewayError::new(Proto::Claude, ErrorKind::RateLimited));
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "rate_limit_error");

        let (status, body) = json(GatewayError::new(
            Proto::Gemini,
            ErrorKind::ModelNotSupported {
                model: "gemini-9".to_string(),
            },
        ));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], 404);
        assert_eq!(body["error"]["status"], "NOT_FOUND");
        assert_eq!(body["error"]["message"], "model not supported: gemini-9");
    }

    #[test]
    fn exhausted_retries_are_bad_gateway() {
        let err = GatewayError::from_dispatch(
            Proto::OpenAIChat,
            DispatchError::RetriesExhausted {
                attempts: 3,
                last_status: Some(500),
                last_message: "boom".to_string(),
            },
        );
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.message(), "request failed after all retries: boom");
    }
}

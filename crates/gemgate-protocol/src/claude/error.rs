use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorResponseType {
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// 400
    InvalidRequestError,
    /// 401
    AuthenticationError,
    /// 403
    PermissionError,
    /// 404
    NotFoundError,
    /// 429
    RateLimitError,
    /// 500
    ApiError,
    /// 529 (also used for 503)
    OverloadedError,
}

impl ErrorType {
    pub fn for_status(status: u16) -> Self {
        match status {
            400 | 413 | 422 => ErrorType::InvalidRequestError,
            401 => ErrorType::AuthenticationError,
            403 => ErrorType::PermissionError,
            404 => ErrorType::NotFoundError,
            429 => ErrorType::RateLimitError,
            503 | 529 => ErrorType::OverloadedError,
            _ => ErrorType::ApiError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub r#type: ErrorType,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub r#type: ErrorResponseType,
    pub error: ErrorDetail,
}

impl ErrorResponse {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            r#type: ErrorResponseType::Error,
            error: ErrorDetail {
                r#type: ErrorType::for_status(status),
                message: message.into(),
            },
        }
    }
}

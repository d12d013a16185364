use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub r#type: String,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

impl ErrorResponse {
    pub fn new(status: u16, message: impl Into<String>, code: Option<&str>) -> Self {
        let r#type = match status {
            400 | 404 | 413 | 422 => "invalid_request_error",
            401 | 403 => "authentication_error",
            429 => "rate_limit_error",
            503 => "service_unavailable",
            _ => "api_error",
        };
        Self {
            error: ErrorDetail {
                message: message.into(),
                r#type: r#type.to_string(),
                param: None,
                code: code.map(str::to_string),
            },
        }
    }
}

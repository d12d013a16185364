use gemgate_protocol::gemini::{
    GenerateContentRequest, GenerateContentRequestBody, GenerateContentResponse,
};

use crate::generate_content::bare_model;

/// Native requests only need the resolved model name.
pub fn transform_request(
    body: GenerateContentRequestBody,
    target_model: &str,
) -> GenerateContentRequest {
    GenerateContentRequest {
        model: bare_model(target_model).to_string(),
        body,
    }
}

pub fn transform_response(response: GenerateContentResponse) -> GenerateContentResponse {
    response
}

/// Re-emits each upstream chunk as-is until the stream ends or fails.
#[derive(Debug, Clone, Default)]
pub struct GeminiPassthroughStreamState {
    closed: bool,
}

impl GeminiPassthroughStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transform_response(
        &mut self,
        response: GenerateContentResponse,
    ) -> Vec<GenerateContentResponse> {
        if self.closed {
            return Vec::new();
        }
        vec![response]
    }

    pub fn finish(&mut self) {
        self.closed = true;
    }

    pub fn fail(&mut self) {
        self.closed = true;
    }
}

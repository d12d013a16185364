pub mod claude2gemini;
pub mod gemini2gemini;
pub mod openai_chat_completions2gemini;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use gemgate_protocol::claude::{self, CreateMessageRequestBody, CreateMessageResponse};
use gemgate_protocol::gemini::{
    self, Blob, GenerateContentRequest, GenerateContentRequestBody, GenerateContentResponse,
};
use gemgate_protocol::openai::{
    self, CreateChatCompletionRequestBody, CreateChatCompletionResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::frame::{json_frame, openai_done};
use claude2gemini::stream::GeminiToClaudeStreamState;
use gemini2gemini::GeminiPassthroughStreamState;
use openai_chat_completions2gemini::stream::GeminiToOpenAIChatCompletionStreamState;

/// Wire protocol spoken by the downstream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Proto {
    #[serde(rename = "openai")]
    OpenAIChat,
    #[serde(rename = "anthropic")]
    Claude,
    #[serde(rename = "gemini")]
    Gemini,
}

impl Proto {
    pub const ALL: [Proto; 3] = [Proto::OpenAIChat, Proto::Claude, Proto::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            Proto::OpenAIChat => "openai",
            Proto::Claude => "anthropic",
            Proto::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Proto {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Proto::OpenAIChat),
            "anthropic" | "claude" => Ok(Proto::Claude),
            "gemini" => Ok(Proto::Gemini),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("invalid upstream payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("upstream error: {0}")]
    Upstream(String),
}

/// A decoded client request, before model resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    OpenAIChat(CreateChatCompletionRequestBody),
    Claude(CreateMessageRequestBody),
    /// Gemini carries its model in the URL path.
    Gemini {
        model: String,
        body: GenerateContentRequestBody,
    },
}

impl ClientRequest {
    pub fn proto(&self) -> Proto {
        match self {
            ClientRequest::OpenAIChat(_) => Proto::OpenAIChat,
            ClientRequest::Claude(_) => Proto::Claude,
            ClientRequest::Gemini { .. } => Proto::Gemini,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ClientRequest::OpenAIChat(body) => &body.model,
            ClientRequest::Claude(body) => &body.model,
            ClientRequest::Gemini { model, .. } => model,
        }
    }

    /// Rewrite into the canonical Gemini request addressed to `target_model`.
    pub fn into_gemini(self, target_model: &str) -> GenerateContentRequest {
        match self {
            ClientRequest::OpenAIChat(body) => {
                openai_chat_completions2gemini::request::transform_request(body, target_model)
            }
            ClientRequest::Claude(body) => {
                claude2gemini::request::transform_request(body, target_model)
            }
            ClientRequest::Gemini { body, .. } => {
                gemini2gemini::transform_request(body, target_model)
            }
        }
    }
}

/// A complete (non-streaming) response in the client's protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientResponse {
    OpenAIChat(CreateChatCompletionResponse),
    Claude(CreateMessageResponse),
    Gemini(GenerateContentResponse),
}

impl ClientResponse {
    pub fn to_bytes(&self) -> Result<Bytes, TransformError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Convert a canonical upstream response for a client speaking `proto`.
/// `model` is the name the client asked for and is echoed back.
pub fn transform_response(
    proto: Proto,
    model: &str,
    response: GenerateContentResponse,
) -> ClientResponse {
    match proto {
        Proto::OpenAIChat => ClientResponse::OpenAIChat(
            openai_chat_completions2gemini::response::transform_response(response, model),
        ),
        Proto::Claude => ClientResponse::Claude(claude2gemini::response::transform_response(
            response, model,
        )),
        Proto::Gemini => ClientResponse::Gemini(gemini2gemini::transform_response(response)),
    }
}

/// Decode one upstream SSE `data:` payload.
///
/// Empty payloads and `[DONE]` yield `None`; an `{"error": ...}` object is
/// surfaced as [`TransformError::Upstream`].
pub fn decode_stream_chunk(data: &str) -> Result<Option<GenerateContentResponse>, TransformError> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    let value: JsonValue = serde_json::from_str(data)?;
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(TransformError::Upstream(message));
    }
    Ok(Some(serde_json::from_value(value)?))
}

/// Per-request stream state, one variant per client protocol. Every method
/// returns ready-to-send SSE frames.
#[derive(Debug)]
pub enum StreamTranslator {
    OpenAIChat(GeminiToOpenAIChatCompletionStreamState),
    Claude(GeminiToClaudeStreamState),
    Gemini(GeminiPassthroughStreamState),
}

impl StreamTranslator {
    pub fn new(proto: Proto, model: &str) -> Self {
        match proto {
            Proto::OpenAIChat => {
                StreamTranslator::OpenAIChat(GeminiToOpenAIChatCompletionStreamState::new(model))
            }
            Proto::Claude => StreamTranslator::Claude(GeminiToClaudeStreamState::new(model)),
            Proto::Gemini => StreamTranslator::Gemini(GeminiPassthroughStreamState::new()),
        }
    }

    /// True once a terminal frame has been produced; further input is ignored.
    pub fn is_closed(&self) -> bool {
        match self {
            StreamTranslator::OpenAIChat(state) => state.is_closed(),
            StreamTranslator::Claude(state) => state.is_closed(),
            StreamTranslator::Gemini(state) => state.is_closed(),
        }
    }

    /// Feed one upstream SSE `data:` payload. Decode failures become the
    /// protocol's terminal error frame.
    pub fn push(&mut self, data: &str) -> Vec<Bytes> {
        match decode_stream_chunk(data) {
            Ok(Some(response)) => self.push_response(response),
            Ok(None) => Vec::new(),
            Err(err) => self.fail(&err.to_string()),
        }
    }

    pub fn push_response(&mut self, response: GenerateContentResponse) -> Vec<Bytes> {
        match self {
            StreamTranslator::OpenAIChat(state) => {
                let chunks = state.transform_response(response);
                let mut frames = encode_openai(&chunks);
                if state.is_closed() && !chunks.is_empty() {
                    frames.push(openai_done());
                }
                frames
            }
            StreamTranslator::Claude(state) => encode_claude(&state.transform_response(response)),
            StreamTranslator::Gemini(state) => encode_gemini(&state.transform_response(response)),
        }
    }

    /// The upstream body ended.
    pub fn finish(&mut self) -> Vec<Bytes> {
        if self.is_closed() {
            return Vec::new();
        }
        match self {
            StreamTranslator::OpenAIChat(state) => {
                let mut frames = encode_openai(&state.finish());
                frames.push(openai_done());
                frames
            }
            StreamTranslator::Claude(state) => encode_claude(&state.finish()),
            StreamTranslator::Gemini(state) => {
                state.finish();
                Vec::new()
            }
        }
    }

    /// Terminate the stream with an error frame in the client's convention.
    pub fn fail(&mut self, message: &str) -> Vec<Bytes> {
        if self.is_closed() {
            return Vec::new();
        }
        match self {
            StreamTranslator::OpenAIChat(state) => {
                state.fail();
                json_frame(None, &openai::ErrorResponse::new(500, message, None))
                    .into_iter()
                    .collect()
            }
            StreamTranslator::Claude(state) => encode_claude(&state.fail(message)),
            StreamTranslator::Gemini(state) => {
                state.fail();
                json_frame(None, &gemini::ErrorResponse::new(500, message))
                    .into_iter()
                    .collect()
            }
        }
    }
}

fn encode_openai(chunks: &[openai::CreateChatCompletionStreamResponse]) -> Vec<Bytes> {
    chunks
        .iter()
        .filter_map(|chunk| json_frame(None, chunk))
        .collect()
}

fn encode_claude(events: &[claude::StreamEvent]) -> Vec<Bytes> {
    events
        .iter()
        .filter_map(|event| json_frame(Some(event.event_name()), event))
        .collect()
}

fn encode_gemini(responses: &[GenerateContentResponse]) -> Vec<Bytes> {
    responses
        .iter()
        .filter_map(|response| json_frame(None, response))
        .collect()
}

/// Split a `data:<mime>;base64,<payload>` URI into an inline blob.
pub(crate) fn parse_data_uri(url: &str) -> Option<Blob> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime_type = meta.strip_suffix(";base64")?;
    Some(Blob {
        mime_type: if mime_type.is_empty() {
            "application/octet-stream".to_string()
        } else {
            mime_type.to_string()
        },
        data: data.to_string(),
    })
}

/// Gemini expects a JSON object as the function response; tool output that
/// is not one gets wrapped.
pub(crate) fn function_response_payload(text: &str) -> JsonValue {
    match serde_json::from_str::<JsonValue>(text) {
        Ok(JsonValue::Object(map)) => JsonValue::Object(map),
        Ok(other) => json!({ "content": other }),
        Err(_) => json!({ "content": text }),
    }
}

/// Tool-call arguments as a JSON object; OpenAI sends them as a string.
pub(crate) fn parse_arguments(arguments: &str) -> JsonValue {
    if arguments.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| JsonValue::String(arguments.to_string()))
}

/// Strip the `models/` prefix Gemini uses in resource names.
pub(crate) fn bare_model(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

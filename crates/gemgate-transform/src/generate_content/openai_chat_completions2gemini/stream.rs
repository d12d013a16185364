use gemgate_protocol::gemini::GenerateContentResponse;
use gemgate_protocol::openai::{
    AssistantRole, ChatCompletionChunkObjectType, ChatCompletionStreamChoice,
    ChatCompletionStreamDelta, CompletionUsage, CreateChatCompletionStreamResponse,
    FinishReason as OpenAIFinishReason, FunctionCallDelta, ToolCallDelta, ToolType,
};

use super::response::{completion_id, map_finish_reason, map_usage, tool_call_id, unix_now};

/// Turns Gemini stream chunks into `chat.completion.chunk` objects.
///
/// The chunk carrying a finish reason is terminal: it holds any remaining
/// content plus `finish_reason`, and later input is ignored.
#[derive(Debug, Clone)]
pub struct GeminiToOpenAIChatCompletionStreamState {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    tool_calls: u32,
    usage: Option<CompletionUsage>,
    closed: bool,
}

impl GeminiToOpenAIChatCompletionStreamState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: completion_id(),
            model: model.into(),
            created: unix_now(),
            role_sent: false,
            tool_calls: 0,
            usage: None,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transform_response(
        &mut self,
        response: GenerateContentResponse,
    ) -> Vec<CreateChatCompletionStreamResponse> {
        if self.closed {
            return Vec::new();
        }
        if let Some(usage) = &response.usage_metadata {
            self.usage = Some(map_usage(usage));
        }

        let Some(candidate) = response.candidates.into_iter().next() else {
            // A blocked prompt arrives as promptFeedback with no candidates.
            if response.prompt_feedback.is_some() {
                return vec![self.terminal_chunk(
                    ChatCompletionStreamDelta::default(),
                    OpenAIFinishReason::ContentFilter,
                )];
            }
            return Vec::new();
        };

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.parts {
            if part.thought == Some(true) {
                continue;
            }
            if let Some(fragment) = part.text {
                text.push_str(&fragment);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCallDelta {
                    index: self.tool_calls,
                    id: Some(call.id.unwrap_or_else(tool_call_id)),
                    r#type: Some(ToolType::Function),
                    function: FunctionCallDelta {
                        name: Some(call.name),
                        arguments: Some(
                            call.args
                                .map(|args| args.to_string())
                                .unwrap_or_else(|| "{}".to_string()),
                        ),
                    },
                });
                self.tool_calls += 1;
            }
        }

        let delta = ChatCompletionStreamDelta {
            role: None,
            content: (!text.is_empty()).then_some(text),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        };

        match candidate.finish_reason {
            Some(reason) => {
                let finish = map_finish_reason(Some(reason), self.tool_calls > 0);
                vec![self.terminal_chunk(delta, finish)]
            }
            None if delta.content.is_none() && delta.tool_calls.is_none() => Vec::new(),
            None => vec![self.chunk(delta, None)],
        }
    }

    /// Upstream ended without a finish reason: close with an empty delta.
    pub fn finish(&mut self) -> Vec<CreateChatCompletionStreamResponse> {
        if self.closed {
            return Vec::new();
        }
        let finish = map_finish_reason(None, self.tool_calls > 0);
        vec![self.terminal_chunk(ChatCompletionStreamDelta::default(), finish)]
    }

    pub fn fail(&mut self) {
        self.closed = true;
    }

    fn terminal_chunk(
        &mut self,
        delta: ChatCompletionStreamDelta,
        finish: OpenAIFinishReason,
    ) -> CreateChatCompletionStreamResponse {
        self.closed = true;
        let mut chunk = self.chunk(delta, Some(finish));
        chunk.usage = self.usage.clone();
        chunk
    }

    fn chunk(
        &mut self,
        mut delta: ChatCompletionStreamDelta,
        finish_reason: Option<OpenAIFinishReason>,
    ) -> CreateChatCompletionStreamResponse {
        if !self.role_sent {
            delta.role = Some(AssistantRole::Assistant);
            self.role_sent = true;
        }
        CreateChatCompletionStreamResponse {
            id: self.id.clone(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }
}

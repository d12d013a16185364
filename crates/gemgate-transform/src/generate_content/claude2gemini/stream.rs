use gemgate_protocol::claude::{
    AssistantRole, ContentBlockDelta, CreateMessageResponse, ErrorDetail, ErrorType,
    MessageDelta, MessageType, ResponseContentBlock, StopReason, StreamEvent, StreamUsage, Usage,
};
use gemgate_protocol::gemini::{FinishReason, GenerateContentResponse};
use serde_json::json;

use super::response::{map_stop_reason, message_id, output_tokens, tool_use_id};

/// Turns Gemini stream chunks into Claude message stream events.
///
/// Consecutive text shares one content block; each function call is a block
/// of its own. A finish reason closes the message.
#[derive(Debug, Clone)]
pub struct GeminiToClaudeStreamState {
    id: String,
    model: String,
    started: bool,
    closed: bool,
    next_index: u32,
    open_text_block: Option<u32>,
    saw_tool_use: bool,
    input_tokens: Option<u32>,
    output_tokens: u32,
}

impl GeminiToClaudeStreamState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: message_id(),
            model: model.into(),
            started: false,
            closed: false,
            next_index: 0,
            open_text_block: None,
            saw_tool_use: false,
            input_tokens: None,
            output_tokens: 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transform_response(&mut self, response: GenerateContentResponse) -> Vec<StreamEvent> {
        if self.closed {
            return Vec::new();
        }

        let mut events = Vec::new();
        let mut usage_changed = false;
        if let Some(usage) = &response.usage_metadata {
            if usage.prompt_token_count.is_some() {
                self.input_tokens = usage.prompt_token_count;
            }
            let output = output_tokens(usage);
            usage_changed = output != self.output_tokens;
            self.output_tokens = output;
        }
        self.ensure_started(&mut events);

        let Some(candidate) = response.candidates.into_iter().next() else {
            if usage_changed {
                events.push(self.usage_delta(None));
            }
            return events;
        };

        for part in candidate.content.parts {
            if part.thought == Some(true) {
                continue;
            }
            if let Some(text) = part.text
                && !text.is_empty()
            {
                let index = self.text_block(&mut events);
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::TextDelta { text },
                });
            }
            if let Some(call) = part.function_call {
                self.close_text_block(&mut events);
                let index = self.next_index;
                self.next_index += 1;
                self.saw_tool_use = true;
                let input = call.args.unwrap_or_else(|| json!({}));
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseContentBlock::ToolUse {
                        id: call.id.unwrap_or_else(tool_use_id),
                        name: call.name,
                        input: json!({}),
                    },
                });
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::InputJsonDelta {
                        partial_json: input.to_string(),
                    },
                });
                events.push(StreamEvent::ContentBlockStop { index });
            }
        }

        match candidate.finish_reason {
            Some(reason) => self.close(Some(reason), &mut events),
            None if usage_changed => events.push(self.usage_delta(None)),
            None => {}
        }
        events
    }

    /// Upstream ended without a finish reason.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.closed {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.ensure_started(&mut events);
        self.close(None, &mut events);
        events
    }

    pub fn fail(&mut self, message: &str) -> Vec<StreamEvent> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        vec![StreamEvent::Error {
            error: ErrorDetail {
                r#type: ErrorType::ApiError,
                message: message.to_string(),
            },
        }]
    }

    fn ensure_started(&mut self, events: &mut Vec<StreamEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        events.push(StreamEvent::MessageStart {
            message: CreateMessageResponse {
                id: self.id.clone(),
                r#type: MessageType::Message,
                role: AssistantRole::Assistant,
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: self.input_tokens.unwrap_or(0),
                    output_tokens: 0,
                    cache_read_input_tokens: None,
                },
            },
        });
    }

    fn text_block(&mut self, events: &mut Vec<StreamEvent>) -> u32 {
        if let Some(index) = self.open_text_block {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.open_text_block = Some(index);
        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::Text {
                text: String::new(),
            },
        });
        index
    }

    fn close_text_block(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(index) = self.open_text_block.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    fn close(&mut self, reason: Option<FinishReason>, events: &mut Vec<StreamEvent>) {
        self.close_text_block(events);
        let stop_reason = map_stop_reason(reason, self.saw_tool_use);
        events.push(self.usage_delta(Some(stop_reason)));
        events.push(StreamEvent::MessageStop);
        self.closed = true;
    }

    fn usage_delta(&self, stop_reason: Option<StopReason>) -> StreamEvent {
        StreamEvent::MessageDelta {
            delta: MessageDelta {
                stop_reason,
                stop_sequence: None,
            },
            usage: StreamUsage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            },
        }
    }
}

use gemgate_protocol::claude::{
    AssistantRole, CreateMessageResponse, MessageType, ResponseContentBlock, StopReason, Usage,
};
use gemgate_protocol::gemini::{FinishReason, GenerateContentResponse, UsageMetadata};
use serde_json::json;

/// Convert a Gemini generate-content response into a Claude message.
pub fn transform_response(response: GenerateContentResponse, model: &str) -> CreateMessageResponse {
    let mut content: Vec<ResponseContentBlock> = Vec::new();
    let mut finish_reason = None;

    if let Some(candidate) = response.candidates.into_iter().next() {
        finish_reason = candidate.finish_reason;
        for part in candidate.content.parts {
            if part.thought == Some(true) {
                continue;
            }
            if let Some(text) = part.text
                && !text.is_empty()
            {
                match content.last_mut() {
                    Some(ResponseContentBlock::Text { text: existing }) => existing.push_str(&text),
                    _ => content.push(ResponseContentBlock::Text { text }),
                }
            }
            if let Some(call) = part.function_call {
                content.push(ResponseContentBlock::ToolUse {
                    id: call.id.unwrap_or_else(tool_use_id),
                    name: call.name,
                    input: call.args.unwrap_or_else(|| json!({})),
                });
            }
        }
    }

    let has_tool_use = content
        .iter()
        .any(|block| matches!(block, ResponseContentBlock::ToolUse { .. }));
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    CreateMessageResponse {
        id: message_id(),
        r#type: MessageType::Message,
        role: AssistantRole::Assistant,
        content,
        model: model.to_string(),
        stop_reason: Some(map_stop_reason(finish_reason, has_tool_use)),
        stop_sequence: None,
        usage: response
            .usage_metadata
            .as_ref()
            .map(map_usage)
            .unwrap_or_default(),
    }
}

pub(crate) fn map_stop_reason(reason: Option<FinishReason>, has_tool_use: bool) -> StopReason {
    if has_tool_use {
        return StopReason::ToolUse;
    }
    match reason {
        Some(FinishReason::MaxTokens) => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

pub(crate) fn map_usage(usage: &UsageMetadata) -> Usage {
    Usage {
        input_tokens: usage.prompt_token_count.unwrap_or(0),
        output_tokens: output_tokens(usage),
        cache_read_input_tokens: usage.cached_content_token_count,
    }
}

pub(crate) fn output_tokens(usage: &UsageMetadata) -> u32 {
    usage.candidates_token_count.unwrap_or(0) + usage.thoughts_token_count.unwrap_or(0)
}

pub(crate) fn message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

pub(crate) fn tool_use_id() -> String {
    format!("toolu_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gemini(value: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn text_and_tool_use_blocks() {
        let message = transform_response(
            gemini(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"text": "Let me "},
                        {"text": "check."},
                        {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}}
                    ]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4, "cachedContentTokenCount": 3}
            })),
            "claude-3-5-sonnet",
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["model"], "claude-3-5-sonnet");
        assert_eq!(value["content"][0], json!({"type": "text", "text": "Let me check."}));
        assert_eq!(value["content"][1]["type"], "tool_use");
        assert_eq!(value["content"][1]["name"], "get_weather");
        assert_eq!(value["content"][1]["input"], json!({"city": "Paris"}));
        assert_eq!(value["stop_reason"], "tool_use");
        assert_eq!(value["usage"]["input_tokens"], 12);
        assert_eq!(value["usage"]["output_tokens"], 4);
        assert_eq!(value["usage"]["cache_read_input_tokens"], 3);
    }

    #[test]
    fn stop_reason_mapping() {
        assert_eq!(map_stop_reason(Some(FinishReason::MaxTokens), false), StopReason::MaxTokens);
        assert_eq!(map_stop_reason(Some(FinishReason::Stop), false), StopReason::EndTurn);
        assert_eq!(map_stop_reason(Some(FinishReason::Safety), false), StopReason::EndTurn);
        assert_eq!(map_stop_reason(Some(FinishReason::MaxTokens), true), StopReason::ToolUse);
    }

    #[test]
    fn empty_response_has_one_empty_text_block() {
        let message = transform_response(GenerateContentResponse::default(), "claude-3-haiku");
        assert_eq!(
            message.content,
            vec![ResponseContentBlock::Text {
                text: String::new()
            }]
        );
        assert_eq!(message.usage, Usage::default());
    }
}

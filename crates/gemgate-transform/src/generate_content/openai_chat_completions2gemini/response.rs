use gemgate_protocol::gemini::{Candidate, FinishReason, GenerateContentResponse, UsageMetadata};
use gemgate_protocol::openai::{
    AssistantRole, ChatCompletionChoice, ChatCompletionObjectType,
    ChatCompletionResponseMessage, CompletionUsage, CreateChatCompletionResponse,
    FinishReason as OpenAIFinishReason, FunctionCall, ToolCall, ToolType,
};

/// Convert a Gemini generate-content response into an OpenAI chat-completions response.
pub fn transform_response(
    response: GenerateContentResponse,
    model: &str,
) -> CreateChatCompletionResponse {
    let text = response.first_text();
    let tool_calls = response
        .first_candidate()
        .map(collect_tool_calls)
        .unwrap_or_default();
    let finish_reason = map_finish_reason(
        response
            .first_candidate()
            .and_then(|candidate| candidate.finish_reason),
        !tool_calls.is_empty(),
    );

    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(text)
    };

    CreateChatCompletionResponse {
        id: completion_id(),
        object: ChatCompletionObjectType::ChatCompletion,
        created: unix_now(),
        model: model.to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatCompletionResponseMessage {
                role: AssistantRole::Assistant,
                content,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(finish_reason),
        }],
        usage: response.usage_metadata.as_ref().map(map_usage),
    }
}

fn collect_tool_calls(candidate: &Candidate) -> Vec<ToolCall> {
    candidate
        .content
        .parts
        .iter()
        .filter_map(|part| part.function_call.as_ref())
        .map(|call| ToolCall {
            id: call.id.clone().unwrap_or_else(tool_call_id),
            r#type: ToolType::Function,
            function: FunctionCall {
                name: call.name.clone(),
                arguments: call
                    .args
                    .as_ref()
                    .map(|args| args.to_string())
                    .unwrap_or_else(|| "{}".to_string()),
            },
        })
        .collect()
}

pub(crate) fn map_finish_reason(
    reason: Option<FinishReason>,
    has_tool_calls: bool,
) -> OpenAIFinishReason {
    if has_tool_calls {
        return OpenAIFinishReason::ToolCalls;
    }
    match reason {
        Some(FinishReason::MaxTokens) => OpenAIFinishReason::Length,
        Some(reason) if reason.is_safety() => OpenAIFinishReason::ContentFilter,
        Some(reason) if reason.is_tool_related() => OpenAIFinishReason::ToolCalls,
        _ => OpenAIFinishReason::Stop,
    }
}

pub(crate) fn map_usage(usage: &UsageMetadata) -> CompletionUsage {
    let prompt_tokens = usage.prompt_token_count.unwrap_or(0);
    let completion_tokens =
        usage.candidates_token_count.unwrap_or(0) + usage.thoughts_token_count.unwrap_or(0);
    CompletionUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: usage
            .total_token_count
            .unwrap_or(prompt_tokens + completion_tokens),
    }
}

pub(crate) fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

pub(crate) fn tool_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gemini(value: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn wraps_first_candidate_text() {
        let out = transform_response(
            gemini(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"text": "thinking...", "thought": true},
                        {"text": "Hi there"}
                    ]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2, "totalTokenCount": 7}
            })),
            "gpt-4o",
        );
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["model"], "gpt-4o");
        assert!(out.id.starts_with("chatcmpl-"));
        assert_eq!(value["choices"][0]["message"]["role"], "assistant");
        assert_eq!(value["choices"][0]["message"]["content"], "Hi there");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["usage"], json!({"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}));
    }

    #[test]
    fn function_calls_become_tool_calls() {
        let out = transform_response(
            gemini(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [
                        {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}}
                    ]},
                    "finishReason": "STOP"
                }]
            })),
            "gpt-4o",
        );
        let choice = &out.choices[0];
        assert_eq!(choice.finish_reason, Some(OpenAIFinishReason::ToolCalls));
        assert!(choice.message.content.is_none());
        let call = &choice.message.tool_calls.as_ref().unwrap()[0];
        assert!(call.id.starts_with("call_"));
        assert_eq!(call.function.name, "get_weather");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&call.function.arguments).unwrap(),
            json!({"city": "Paris"})
        );
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(
            map_finish_reason(Some(FinishReason::MaxTokens), false),
            OpenAIFinishReason::Length
        );
        assert_eq!(
            map_finish_reason(Some(FinishReason::Safety), false),
            OpenAIFinishReason::ContentFilter
        );
        assert_eq!(
            map_finish_reason(Some(FinishReason::MalformedFunctionCall), false),
            OpenAIFinishReason::ToolCalls
        );
        assert_eq!(
            map_finish_reason(Some(FinishReason::Other), false),
            OpenAIFinishReason::Stop
        );
        assert_eq!(map_finish_reason(None, false), OpenAIFinishReason::Stop);
    }

    #[test]
    fn empty_candidates_still_produce_a_choice() {
        let out = transform_response(GenerateContentResponse::default(), "gpt-4o");
        assert_eq!(out.choices.len(), 1);
        assert_eq!(out.choices[0].message.content.as_deref(), Some(""));
        assert!(out.usage.is_none());
    }
}

use std::collections::HashMap;

use gemgate_protocol::gemini::{
    Content, ContentRole, FileData, FunctionCall, FunctionCallingConfig, FunctionCallingMode,
    FunctionDeclaration, FunctionResponse, GenerateContentRequest, GenerateContentRequestBody,
    GenerationConfig, JsonObject, Part, Tool, ToolConfig,
};
use gemgate_protocol::openai::{
    ChatMessage, ChatTool, ContentPart, CreateChatCompletionRequestBody, MessageContent, ToolCall,
};
use serde_json::Value as JsonValue;

use crate::generate_content::{
    bare_model, function_response_payload, parse_arguments, parse_data_uri,
};
use crate::schema::sanitize_schema;

/// Convert an OpenAI chat-completions request into a Gemini generate-content request.
///
/// System and developer messages have no Gemini role; their text is joined and
/// sent as the leading user turn.
pub fn transform_request(
    mut body: CreateChatCompletionRequestBody,
    target_model: &str,
) -> GenerateContentRequest {
    let mut system_texts = Vec::new();
    let mut contents = Vec::new();
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in std::mem::take(&mut body.messages) {
        match message {
            ChatMessage::System { content, .. } | ChatMessage::Developer { content, .. } => {
                let text = content.joined_text();
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            ChatMessage::User { content, .. } => {
                let parts = map_user_content(content);
                if !parts.is_empty() {
                    contents.push(Content {
                        parts,
                        role: Some(ContentRole::User),
                    });
                }
            }
            ChatMessage::Assistant {
                content,
                tool_calls,
                ..
            } => {
                let mut parts = Vec::new();
                if let Some(content) = content {
                    let text = content.joined_text();
                    if !text.is_empty() {
                        parts.push(Part::text(text));
                    }
                }
                for call in tool_calls.unwrap_or_default() {
                    call_names.insert(call.id.clone(), call.function.name.clone());
                    parts.push(map_tool_call(call));
                }
                if !parts.is_empty() {
                    contents.push(Content {
                        parts,
                        role: Some(ContentRole::Model),
                    });
                }
            }
            ChatMessage::Tool {
                content,
                tool_call_id,
            } => {
                let name = call_names
                    .get(&tool_call_id)
                    .cloned()
                    .unwrap_or_else(|| tool_call_id.clone());
                let part = Part {
                    function_response: Some(FunctionResponse {
                        id: Some(tool_call_id),
                        name,
                        response: function_response_payload(&content.joined_text()),
                    }),
                    ..Default::default()
                };
                push_tool_response(&mut contents, part);
            }
        }
    }

    if !system_texts.is_empty() {
        contents.insert(0, Content::user_text(system_texts.join("\n")));
    }

    let generation_config = map_generation_config(&body);
    let tools = map_tools(body.tools);
    let tool_config = body.tool_choice.as_ref().and_then(map_tool_choice);

    GenerateContentRequest {
        model: bare_model(target_model).to_string(),
        body: GenerateContentRequestBody {
            contents,
            tools,
            tool_config,
            generation_config,
            ..Default::default()
        },
    }
}

fn map_user_content(content: MessageContent) -> Vec<Part> {
    match content {
        MessageContent::Text(text) => vec![Part::text(text)],
        MessageContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(Part::text(text)),
                ContentPart::ImageUrl { image_url } => Some(match parse_data_uri(&image_url.url) {
                    Some(blob) => Part {
                        inline_data: Some(blob),
                        ..Default::default()
                    },
                    None => Part {
                        file_data: Some(FileData {
                            mime_type: None,
                            file_uri: image_url.url,
                        }),
                        ..Default::default()
                    },
                }),
                ContentPart::Unsupported => None,
            })
            .collect(),
    }
}

fn map_tool_call(call: ToolCall) -> Part {
    Part {
        function_call: Some(FunctionCall {
            id: Some(call.id),
            name: call.function.name,
            args: Some(parse_arguments(&call.function.arguments)),
        }),
        ..Default::default()
    }
}

// Consecutive tool messages answer one assistant turn and share a user turn.
fn push_tool_response(contents: &mut Vec<Content>, part: Part) {
    if let Some(last) = contents.last_mut()
        && last.role == Some(ContentRole::User)
        && last
            .parts
            .iter()
            .all(|existing| existing.function_response.is_some())
    {
        last.parts.push(part);
        return;
    }
    contents.push(Content {
        parts: vec![part],
        role: Some(ContentRole::User),
    });
}

fn map_generation_config(body: &CreateChatCompletionRequestBody) -> Option<GenerationConfig> {
    let mut extra = JsonObject::new();
    let response_mime_type = body.response_format.as_ref().and_then(|format| {
        match format.get("type").and_then(JsonValue::as_str) {
            Some("json_object") => Some("application/json".to_string()),
            Some("json_schema") => {
                if let Some(schema) = format
                    .get("json_schema")
                    .and_then(|json_schema| json_schema.get("schema"))
                {
                    extra.insert("responseJsonSchema".to_string(), schema.clone());
                }
                Some("application/json".to_string())
            }
            _ => None,
        }
    });

    let config = GenerationConfig {
        stop_sequences: body.stop.clone().map(|stop| stop.into_vec()),
        response_mime_type,
        max_output_tokens: body.max_tokens.or(body.max_completion_tokens),
        temperature: body.temperature,
        top_p: body.top_p,
        seed: body.seed,
        presence_penalty: body.presence_penalty,
        frequency_penalty: body.frequency_penalty,
        extra,
        ..Default::default()
    };
    (!config.is_empty()).then_some(config)
}

fn map_tools(tools: Option<Vec<ChatTool>>) -> Option<Vec<Tool>> {
    let declarations = tools?
        .into_iter()
        .map(|tool| FunctionDeclaration {
            name: tool.function.name,
            description: tool.function.description.unwrap_or_default(),
            parameters: tool.function.parameters.map(sanitize_schema),
        })
        .collect::<Vec<_>>();
    if declarations.is_empty() {
        return None;
    }
    Some(vec![Tool {
        function_declarations: Some(declarations),
        ..Default::default()
    }])
}

fn map_tool_choice(choice: &JsonValue) -> Option<ToolConfig> {
    let (mode, allowed_function_names) = match choice {
        JsonValue::String(mode) => match mode.as_str() {
            "none" => (FunctionCallingMode::None, None),
            "auto" => (FunctionCallingMode::Auto, None),
            "required" => (FunctionCallingMode::Any, None),
            _ => return None,
        },
        JsonValue::Object(_) => {
            let name = choice
                .get("function")
                .and_then(|function| function.get("name"))
                .and_then(JsonValue::as_str)?;
            (FunctionCallingMode::Any, Some(vec![name.to_string()]))
        }
        _ => return None,
    };
    Some(ToolConfig {
        function_calling_config: Some(FunctionCallingConfig {
            mode: Some(mode),
            allowed_function_names,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: JsonValue) -> CreateChatCompletionRequestBody {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn tool_round_trip_keeps_function_names() {
        let request = transform_request(
            body(json!({
                "model": "gpt-4o",
                "messages": [
                    {"role": "user", "content": "weather?"},
                    {"role": "assistant", "content": null, "tool_calls": [
                        {"id": "call_1", "type": "function",
                         "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}},
                        {"id": "call_2", "type": "function",
                         "function": {"name": "get_time", "arguments": ""}}
                    ]},
                    {"role": "tool", "tool_call_id": "call_1", "content": "{\"temp\":21}"},
                    {"role": "tool", "tool_call_id": "call_2", "content": "noon"}
                ],
                "tools": [{"type": "function", "function": {
                    "name": "get_weather",
                    "parameters": {"type": "object", "additionalProperties": false,
                                   "properties": {"city": {"type": "string", "format": "city"}}}
                }}],
                "tool_choice": "required"
            })),
            "gemini-2.0-flash",
        );

        let contents = &request.body.contents;
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].role, Some(ContentRole::Model));
        let call = contents[1].parts[0].function_call.as_ref().unwrap();
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.args, Some(json!({"city": "Paris"})));
        assert_eq!(
            contents[1].parts[1].function_call.as_ref().unwrap().args,
            Some(json!({}))
        );

        assert_eq!(contents[2].parts.len(), 2);
        let first = contents[2].parts[0].function_response.as_ref().unwrap();
        assert_eq!(first.name, "get_weather");
        assert_eq!(first.response, json!({"temp": 21}));
        let second = contents[2].parts[1].function_response.as_ref().unwrap();
        assert_eq!(second.response, json!({"content": "noon"}));

        let tools = request.body.tools.unwrap();
        let decl = &tools[0].function_declarations.as_ref().unwrap()[0];
        assert_eq!(
            decl.parameters,
            Some(json!({"type": "object", "properties": {"city": {"type": "string"}}}))
        );
        assert_eq!(
            request
                .body
                .tool_config
                .unwrap()
                .function_calling_config
                .unwrap()
                .mode,
            Some(FunctionCallingMode::Any)
        );
    }

    #[test]
    fn data_uri_images_are_inlined() {
        let request = transform_request(
            body(json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": [
                    {"type": "text", "text": "what is this"},
                    {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,/9j/4AAQ"}},
                    {"type": "image_url", "image_url": {"url": "https://example.com/a.png"}}
                ]}]
            })),
            "models/gemini-2.0-flash",
        );
        assert_eq!(request.model, "gemini-2.0-flash");
        let parts = &request.body.contents[0].parts;
        let blob = parts[1].inline_data.as_ref().unwrap();
        assert_eq!(blob.mime_type, "image/jpeg");
        assert_eq!(blob.data, "/9j/4AAQ");
        assert_eq!(
            parts[2].file_data.as_ref().unwrap().file_uri,
            "https://example.com/a.png"
        );
    }

    #[test]
    fn max_completion_tokens_and_stop_list() {
        let request = transform_request(
            body(json!({
                "model": "gpt-4o",
                "messages": [{"role": "user", "content": "hi"}],
                "max_completion_tokens": 64,
                "stop": ["a", "b"],
                "response_format": {"type": "json_object"}
            })),
            "gemini-2.0-flash",
        );
        let config = request.body.generation_config.unwrap();
        assert_eq!(config.max_output_tokens, Some(64));
        assert_eq!(config.stop_sequences, Some(vec!["a".into(), "b".into()]));
        assert_eq!(config.response_mime_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn no_sampling_fields_means_no_generation_config() {
        let request = transform_request(
            body(json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]})),
            "gemini-2.0-flash",
        );
        assert!(request.body.generation_config.is_none());
        assert!(request.body.system_instruction.is_none());
    }
}

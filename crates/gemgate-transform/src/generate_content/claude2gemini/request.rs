use std::collections::HashMap;

use gemgate_protocol::claude::{
    CreateMessageRequestBody, ImageSource, MessageContent, MessageParam, MessageRole,
    RequestContentBlock, SystemParam, ToolChoice, ToolParam, ToolResultContent,
};
use gemgate_protocol::gemini::{
    Blob, Content, ContentRole, FileData, FunctionCall, FunctionCallingConfig,
    FunctionCallingMode, FunctionDeclaration, FunctionResponse, GenerateContentRequest,
    GenerateContentRequestBody, GenerationConfig, JsonObject, Part, Tool, ToolConfig,
};
use serde_json::{Value as JsonValue, json};

use crate::generate_content::{bare_model, function_response_payload};
use crate::schema::sanitize_schema;

/// Convert a Claude create-message request into a Gemini generate-content request.
///
/// `system` goes to `systemInstruction`; it never becomes a conversation turn.
pub fn transform_request(
    body: CreateMessageRequestBody,
    target_model: &str,
) -> GenerateContentRequest {
    let system_instruction = body.system.and_then(map_system);

    let mut tool_names: HashMap<String, String> = HashMap::new();
    let contents = body
        .messages
        .into_iter()
        .filter_map(|message| map_message(message, &mut tool_names))
        .collect();

    let generation_config = GenerationConfig {
        stop_sequences: body.stop_sequences,
        max_output_tokens: Some(body.max_tokens),
        temperature: body.temperature,
        top_p: body.top_p,
        top_k: body.top_k,
        ..Default::default()
    };

    GenerateContentRequest {
        model: bare_model(target_model).to_string(),
        body: GenerateContentRequestBody {
            contents,
            tools: body.tools.and_then(map_tools),
            tool_config: body.tool_choice.map(map_tool_choice),
            system_instruction,
            generation_config: Some(generation_config),
            ..Default::default()
        },
    }
}

fn map_system(system: SystemParam) -> Option<Content> {
    let text = match system {
        SystemParam::Text(text) => text,
        SystemParam::Blocks(blocks) => blocks
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n"),
    };
    if text.is_empty() {
        return None;
    }
    Some(Content::user_text(text))
}

fn map_message(
    message: MessageParam,
    tool_names: &mut HashMap<String, String>,
) -> Option<Content> {
    let role = match message.role {
        MessageRole::User => ContentRole::User,
        MessageRole::Assistant => ContentRole::Model,
    };
    let parts: Vec<Part> = match message.content {
        MessageContent::Text(text) => vec![Part::text(text)],
        MessageContent::Blocks(blocks) => blocks
            .into_iter()
            .filter_map(|block| map_block(block, tool_names))
            .collect(),
    };
    if parts.is_empty() {
        return None;
    }
    Some(Content {
        parts,
        role: Some(role),
    })
}

fn map_block(block: RequestContentBlock, tool_names: &mut HashMap<String, String>) -> Option<Part> {
    match block {
        RequestContentBlock::Text { text } => Some(Part::text(text)),
        RequestContentBlock::Image { source } => Some(match source {
            ImageSource::Base64 { media_type, data } => Part {
                inline_data: Some(Blob {
                    mime_type: media_type,
                    data,
                }),
                ..Default::default()
            },
            ImageSource::Url { url } => Part {
                file_data: Some(FileData {
                    mime_type: None,
                    file_uri: url,
                }),
                ..Default::default()
            },
        }),
        RequestContentBlock::ToolUse { id, name, input } => {
            tool_names.insert(id.clone(), name.clone());
            Some(Part {
                function_call: Some(FunctionCall {
                    id: Some(id),
                    name,
                    args: Some(if input.is_null() { json!({}) } else { input }),
                }),
                ..Default::default()
            })
        }
        RequestContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let name = tool_names
                .get(&tool_use_id)
                .cloned()
                .unwrap_or_else(|| tool_use_id.clone());
            let text = content.map(tool_result_text).unwrap_or_default();
            let response = if is_error == Some(true) {
                json!({ "error": text })
            } else {
                function_response_payload(&text)
            };
            Some(Part {
                function_response: Some(FunctionResponse {
                    id: Some(tool_use_id),
                    name,
                    response,
                }),
                ..Default::default()
            })
        }
        // Thinking signatures are Claude-specific and cannot be replayed upstream.
        RequestContentBlock::Thinking { .. }
        | RequestContentBlock::RedactedThinking { .. }
        | RequestContentBlock::Unsupported => None,
    }
}

fn tool_result_text(content: ToolResultContent) -> String {
    match content {
        ToolResultContent::Text(text) => text,
        ToolResultContent::Blocks(blocks) => blocks
            .into_iter()
            .filter_map(|block| match block {
                RequestContentBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn map_tools(tools: Vec<ToolParam>) -> Option<Vec<Tool>> {
    let mut declarations = Vec::new();
    let mut out = Vec::new();
    for tool in tools {
        let is_web_search = tool
            .r#type
            .as_deref()
            .is_some_and(|ty| ty.starts_with("web_search"));
        if is_web_search {
            let mut extra = JsonObject::new();
            extra.insert("googleSearch".to_string(), json!({}));
            out.push(Tool {
                function_declarations: None,
                extra,
            });
            continue;
        }
        let Some(schema) = tool.input_schema else {
            continue;
        };
        declarations.push(FunctionDeclaration {
            name: tool.name,
            description: tool.description.unwrap_or_default(),
            parameters: Some(sanitize_schema(schema)),
        });
    }
    if !declarations.is_empty() {
        out.insert(
            0,
            Tool {
                function_declarations: Some(declarations),
                ..Default::default()
            },
        );
    }
    (!out.is_empty()).then_some(out)
}

fn map_tool_choice(choice: ToolChoice) -> ToolConfig {
    let (mode, allowed_function_names) = match choice {
        ToolChoice::Auto { .. } => (FunctionCallingMode::Auto, None),
        ToolChoice::Any { .. } => (FunctionCallingMode::Any, None),
        ToolChoice::Tool { name } => (FunctionCallingMode::Any, Some(vec![name])),
        ToolChoice::None => (FunctionCallingMode::None, None),
    };
    ToolConfig {
        function_calling_config: Some(FunctionCallingConfig {
            mode: Some(mode),
            allowed_function_names,
        }),
    }
}

use bytes::Bytes;
use gemgate_protocol::claude::CreateMessageRequestBody;
use gemgate_protocol::gemini::GenerateContentRequestBody;
use gemgate_protocol::openai::CreateChatCompletionRequestBody;
use gemgate_transform::{ClientRequest, ClientResponse, Proto, StreamTranslator, transform_response};
use serde_json::{Value, json};

fn chunk(text: &str, finish: Option<&str>) -> String {
    let mut candidate = json!({"content": {"role": "model", "parts": [{"text": text}]}});
    if let Some(finish) = finish {
        candidate["finishReason"] = json!(finish);
    }
    json!({"candidates": [candidate]}).to_string()
}

fn run(translator: &mut StreamTranslator, chunks: &[String]) -> Vec<Bytes> {
    let mut frames = Vec::new();
    for data in chunks {
        frames.extend(translator.push(data));
    }
    frames.extend(translator.finish());
    frames
}

fn hello_world(last_finish: Option<&str>) -> Vec<String> {
    vec![
        chunk("Hello", None),
        chunk(", ", None),
        chunk("world!", last_finish),
    ]
}

/// (event name, data) for each frame.
fn parse_frames(frames: &[Bytes]) -> Vec<(Option<String>, String)> {
    frames
        .iter()
        .map(|frame| {
            let text = std::str::from_utf8(frame).unwrap();
            assert!(text.ends_with("\n\n"), "frame not terminated: {text:?}");
            let mut event = None;
            let mut data = Vec::new();
            for line in text.lines() {
                if let Some(name) = line.strip_prefix("event: ") {
                    event = Some(name.to_string());
                } else if let Some(payload) = line.strip_prefix("data: ") {
                    data.push(payload);
                }
            }
            (event, data.join("\n"))
        })
        .collect()
}

#[test]
fn openai_request_fixture() {
    let body: CreateChatCompletionRequestBody = serde_json::from_value(json!({
        "model": "gpt-4o",
        "messages": [
            {"role": "system", "content": "You are helpful."},
            {"role": "user", "content": "Hello!"}
        ],
        "temperature": 0.8,
        "top_p": 0.9,
        "max_tokens": 150
    }))
    .unwrap();

    let request = ClientRequest::OpenAIChat(body).into_gemini("gemini-2.0-flash");
    assert_eq!(request.model, "gemini-2.0-flash");

    let wire = serde_json::to_value(&request.body).unwrap();
    assert_eq!(
        wire["contents"],
        json!([
            {"role": "user", "parts": [{"text": "You are helpful."}]},
            {"role": "user", "parts": [{"text": "Hello!"}]}
        ])
    );
    assert_eq!(
        wire["generationConfig"],
        json!({"temperature": 0.8, "topP": 0.9, "maxOutputTokens": 150})
    );
    assert!(wire.get("systemInstruction").is_none());
    assert!(wire.get("model").is_none());
}

#[test]
fn anthropic_system_goes_to_system_instruction() {
    let body: CreateMessageRequestBody = serde_json::from_value(json!({
        "model": "claude-3-5-sonnet",
        "max_tokens": 1024,
        "system": "You are a helpful assistant.",
        "messages": [{"role": "user", "content": "Hi"}]
    }))
    .unwrap();

    let request = ClientRequest::Claude(body).into_gemini("gemini-2.5-pro");
    let wire = serde_json::to_value(&request.body).unwrap();
    assert_eq!(
        wire["systemInstruction"],
        json!({"role": "user", "parts": [{"text": "You are a helpful assistant."}]})
    );
    assert_eq!(wire["contents"].as_array().unwrap().len(), 1);
    assert_eq!(wire["contents"][0], json!({"role": "user", "parts": [{"text": "Hi"}]}));
    assert_eq!(wire["generationConfig"]["maxOutputTokens"], 1024);
}

#[test]
fn anthropic_system_blocks_are_joined() {
    let body: CreateMessageRequestBody = serde_json::from_value(json!({
        "model": "claude-3-5-sonnet",
        "max_tokens": 8,
        "system": [{"type": "text", "text": "one"}, {"type": "text", "text": "two"}],
        "messages": [{"role": "user", "content": "Hi"}]
    }))
    .unwrap();
    let request = ClientRequest::Claude(body).into_gemini("gemini-2.0-flash");
    let system = request.body.system_instruction.unwrap();
    assert_eq!(system.parts[0].text.as_deref(), Some("one\ntwo"));
}

#[test]
fn gemini_request_is_identity_plus_model() {
    let raw = json!({
        "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
        "safetySettings": [{"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"}],
        "generationConfig": {"temperature": 0.2, "thinkingConfig": {"thinkingBudget": 0}}
    });
    let body: GenerateContentRequestBody = serde_json::from_value(raw.clone()).unwrap();
    let request = ClientRequest::Gemini {
        model: "my-alias".to_string(),
        body,
    }
    .into_gemini("models/gemini-2.5-flash");
    assert_eq!(request.model, "gemini-2.5-flash");
    assert_eq!(serde_json::to_value(&request.body).unwrap(), raw);
}

#[test]
fn anthropic_stream_hello_world() {
    let mut translator = StreamTranslator::new(Proto::Claude, "claude-3-5-sonnet");
    let frames = parse_frames(&run(&mut translator, &hello_world(Some("STOP"))));

    let names: Vec<&str> = frames
        .iter()
        .map(|(event, _)| event.as_deref().unwrap())
        .collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    let texts: Vec<String> = frames[2..5]
        .iter()
        .map(|(_, data)| {
            let value: Value = serde_json::from_str(data).unwrap();
            assert_eq!(value["index"], 0);
            value["delta"]["text"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(texts, vec!["Hello", ", ", "world!"]);

    let start: Value = serde_json::from_str(&frames[0].1).unwrap();
    assert_eq!(start["message"]["model"], "claude-3-5-sonnet");
    assert_eq!(start["message"]["role"], "assistant");
    let delta: Value = serde_json::from_str(&frames[6].1).unwrap();
    assert_eq!(delta["delta"]["stop_reason"], "end_turn");
    assert!(translator.is_closed());
}

#[test]
fn anthropic_stream_without_finish_reason_still_closes() {
    let mut translator = StreamTranslator::new(Proto::Claude, "claude-3-5-sonnet");
    let frames = parse_frames(&run(&mut translator, &hello_world(None)));
    let names: Vec<&str> = frames
        .iter()
        .map(|(event, _)| event.as_deref().unwrap())
        .collect();
    assert_eq!(names.last(), Some(&"message_stop"));
    assert_eq!(names.iter().filter(|name| **name == "message_stop").count(), 1);
}

#[test]
fn anthropic_stream_tool_call_gets_its_own_block() {
    let mut translator = StreamTranslator::new(Proto::Claude, "claude-3-5-sonnet");
    let tool_chunk = json!({
        "candidates": [{
            "content": {"role": "model", "parts": [
                {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}}
            ]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 5}
    })
    .to_string();
    let frames = parse_frames(&run(&mut translator, &[chunk("Checking", None), tool_chunk]));
    let values: Vec<(String, Value)> = frames
        .into_iter()
        .map(|(event, data)| (event.unwrap(), serde_json::from_str(&data).unwrap()))
        .collect();

    let starts: Vec<&Value> = values
        .iter()
        .filter(|(name, _)| name == "content_block_start")
        .map(|(_, value)| value)
        .collect();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[0]["index"], 0);
    assert_eq!(starts[1]["index"], 1);
    assert_eq!(starts[1]["content_block"]["type"], "tool_use");
    assert_eq!(starts[1]["content_block"]["name"], "get_weather");

    let json_delta = values
        .iter()
        .find(|(_, value)| value["delta"]["type"] == "input_json_delta")
        .unwrap();
    let args: Value =
        serde_json::from_str(json_delta.1["delta"]["partial_json"].as_str().unwrap()).unwrap();
    assert_eq!(args, json!({"city": "Paris"}));

    let (_, final_delta) = values
        .iter()
        .rev()
        .find(|(name, _)| name == "message_delta")
        .unwrap();
    assert_eq!(final_delta["delta"]["stop_reason"], "tool_use");
    assert_eq!(final_delta["usage"]["output_tokens"], 5);
}

#[test]
fn anthropic_stream_error_event() {
    let mut translator = StreamTranslator::new(Proto::Claude, "claude-3-5-sonnet");
    let mut frames = translator.push(&chunk("partial", None));
    frames.extend(translator.push(r#"{"error":{"code":503,"message":"overloaded"}}"#));
    frames.extend(translator.push(&chunk("ignored", None)));
    frames.extend(translator.finish());

    let parsed = parse_frames(&frames);
    let (event, data) = parsed.last().unwrap();
    assert_eq!(event.as_deref(), Some("error"));
    let value: Value = serde_json::from_str(data).unwrap();
    assert_eq!(value["type"], "error");
    assert_eq!(value["error"]["type"], "api_error");
    assert!(value["error"]["message"].as_str().unwrap().contains("overloaded"));
    assert!(translator.is_closed());
}

#[test]
fn openai_stream_hello_world() {
    let mut translator = StreamTranslator::new(Proto::OpenAIChat, "gpt-4o");
    let frames = run(&mut translator, &hello_world(Some("STOP")));

    assert_eq!(frames.last().unwrap(), &Bytes::from_static(b"data: [DONE]\n\n"));
    let chunks: Vec<Value> = parse_frames(&frames[..frames.len() - 1])
        .into_iter()
        .map(|(event, data)| {
            assert!(event.is_none());
            serde_json::from_str(&data).unwrap()
        })
        .collect();
    assert_eq!(chunks.len(), 3);

    let content_chunks = chunks
        .iter()
        .filter(|chunk| chunk["choices"][0]["finish_reason"].is_null())
        .count();
    let finish_chunks = chunks
        .iter()
        .filter(|chunk| chunk["choices"][0]["finish_reason"] == "stop")
        .count();
    assert_eq!(content_chunks, 2);
    assert_eq!(finish_chunks, 1);

    assert_eq!(chunks[0]["object"], "chat.completion.chunk");
    assert_eq!(chunks[0]["model"], "gpt-4o");
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(chunks[0]["choices"][0]["delta"]["content"], "Hello");
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], ", ");
    assert!(chunks[1]["choices"][0]["delta"].get("role").is_none());
    assert_eq!(chunks[2]["choices"][0]["delta"]["content"], "world!");
    assert_eq!(chunks[0]["id"], chunks[2]["id"]);
}

#[test]
fn openai_stream_of_one_complete_item() {
    let mut translator = StreamTranslator::new(Proto::OpenAIChat, "gpt-4o");
    let frames = run(&mut translator, &[chunk("All at once.", Some("STOP"))]);
    assert_eq!(frames.len(), 2);
    let value: Value =
        serde_json::from_str(&parse_frames(&frames[..1])[0].1).unwrap();
    assert_eq!(value["choices"][0]["delta"]["content"], "All at once.");
    assert_eq!(value["choices"][0]["finish_reason"], "stop");
    assert_eq!(frames[1], Bytes::from_static(b"data: [DONE]\n\n"));
}

#[test]
fn openai_stream_end_without_finish_reason() {
    let mut translator = StreamTranslator::new(Proto::OpenAIChat, "gpt-4o");
    let frames = run(&mut translator, &hello_world(None));
    assert_eq!(frames.len(), 5);
    let last: Value = serde_json::from_str(&parse_frames(&frames[3..4])[0].1).unwrap();
    assert_eq!(last["choices"][0]["delta"], json!({}));
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert_eq!(frames[4], Bytes::from_static(b"data: [DONE]\n\n"));
}

#[test]
fn openai_stream_max_tokens_maps_to_length() {
    let mut translator = StreamTranslator::new(Proto::OpenAIChat, "gpt-4o");
    let frames = run(&mut translator, &[chunk("cut", Some("MAX_TOKENS"))]);
    let value: Value = serde_json::from_str(&parse_frames(&frames[..1])[0].1).unwrap();
    assert_eq!(value["choices"][0]["finish_reason"], "length");
}

#[test]
fn gemini_stream_reserializes_chunks() {
    let mut translator = StreamTranslator::new(Proto::Gemini, "gemini-2.0-flash");
    let frames = run(&mut translator, &hello_world(Some("STOP")));
    assert_eq!(frames.len(), 3);
    for (frame, expected) in frames.iter().zip(["Hello", ", ", "world!"]) {
        let text = std::str::from_utf8(frame).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(!text.contains("event:"));
        let value: Value = serde_json::from_str(text.trim().strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(value["candidates"][0]["content"]["parts"][0]["text"], expected);
    }
}

#[test]
fn gemini_stream_error_frame() {
    let mut translator = StreamTranslator::new(Proto::Gemini, "gemini-2.0-flash");
    let frames = translator.push("{broken");
    assert_eq!(frames.len(), 1);
    let value: Value = serde_json::from_str(&parse_frames(&frames)[0].1).unwrap();
    assert_eq!(value["error"]["code"], 500);
    assert!(translator.is_closed());
    assert!(translator.finish().is_empty());
}

#[test]
fn non_stream_responses_per_protocol() {
    let upstream = serde_json::from_value(json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": "Hi"}]}, "finishReason": "MAX_TOKENS"}]
    }))
    .unwrap();

    let ClientResponse::Claude(message) =
        transform_response(Proto::Claude, "claude-3-haiku", upstream)
    else {
        panic!("expected a claude message");
    };
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["stop_reason"], "max_tokens");
    assert_eq!(value["content"][0]["text"], "Hi");

    let passthrough = ClientResponse::Gemini(serde_json::from_value(json!({"candidates": []})).unwrap());
    assert_eq!(passthrough.to_bytes().unwrap(), Bytes::from_static(b"{}"));
}

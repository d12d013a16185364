use bytes::Bytes;

pub const OPENAI_DONE: &[u8] = b"data: [DONE]\n\n";
pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

/// Encode one SSE frame. Multi-line payloads get one `data:` line each.
pub fn encode_sse(event: Option<&str>, data: &str) -> Bytes {
    let mut out = String::with_capacity(data.len() + 32);
    if let Some(event) = event {
        out.push_str("event: ");
        out.push_str(event);
        out.push('\n');
    }
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

/// Serialize `value` into one frame, `None` if serialization fails.
pub(crate) fn json_frame<T: serde::Serialize>(event: Option<&str>, value: &T) -> Option<Bytes> {
    serde_json::to_string(value)
        .ok()
        .map(|data| encode_sse(event, &data))
}

pub fn openai_done() -> Bytes {
    Bytes::from_static(OPENAI_DONE)
}

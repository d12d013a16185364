use bytes::Bytes;

use crate::headers::{Headers, header_set};
use crate::mapping::TargetMethod;
use crate::upstream::{HttpMethod, UpstreamHttpRequest};

/// `POST {base}/v1beta/models/{model}:{method}?key=...`, with `alt=sse` for streams.
pub fn generate_content_request(
    base_url: &str,
    model: &str,
    method: TargetMethod,
    api_key: &str,
    body: Bytes,
) -> UpstreamHttpRequest {
    let model = model.trim_start_matches("models/");
    let mut url = build_url(
        base_url,
        &format!("/v1beta/models/{model}:{}", method.as_str()),
    );
    url.push_str("?key=");
    url.push_str(api_key);
    if method.is_stream() {
        url.push_str("&alt=sse");
    }
    UpstreamHttpRequest {
        method: HttpMethod::Post,
        url,
        headers: json_headers(),
        body: Some(body),
        is_stream: method.is_stream(),
        proxy: None,
    }
}

/// `GET {base}/v1beta/models?key=...`
pub fn list_models_request(base_url: &str, api_key: &str) -> UpstreamHttpRequest {
    let mut url = build_url(base_url, "/v1beta/models");
    url.push_str("?pageSize=1000&key=");
    url.push_str(api_key);
    let mut headers = Headers::new();
    header_set(&mut headers, "accept", "application/json");
    UpstreamHttpRequest {
        method: HttpMethod::Get,
        url,
        headers,
        body: None,
        is_stream: false,
        proxy: None,
    }
}

fn json_headers() -> Headers {
    let mut headers = Headers::new();
    header_set(&mut headers, "accept", "application/json");
    header_set(&mut headers, "content-type", "application/json");
    headers
}

fn build_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let mut path = path.trim_start_matches('/');
    if base.ends_with("/v1beta") && path.starts_with("v1beta/") {
        path = path.trim_start_matches("v1beta/");
    }
    format!("{base}/{path}")
}

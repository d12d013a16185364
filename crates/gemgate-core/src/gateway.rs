use std::sync::Arc;

use bytes::Bytes;
use gemgate_protocol::gemini::GenerateContentResponse;
use tracing::info;

use gemgate_provider_core::{
    ByteStream, MappingCache, TargetMethod, UpstreamBody, UpstreamHttpResponse,
};
use gemgate_transform::{ClientRequest, Proto, TransformError, transform_response};

use crate::dispatcher::{DispatchError, DispatchRequest, Dispatcher};
use crate::stream::{collect, once, translate_stream};

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("model not supported: {model}")]
    ModelNotSupported { proto: Proto, model: String },
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("invalid upstream response: {0}")]
    Decode(#[from] TransformError),
    #[error("failed to encode upstream request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Body handed back to the client, already in its protocol.
#[derive(Debug)]
pub enum ClientOutput {
    Json(Bytes),
    /// Ready-to-write SSE frames.
    Stream(ByteStream),
}

/// Resolve, rewrite, dispatch and translate one client request.
pub struct Gateway {
    mappings: Arc<MappingCache>,
    dispatcher: Arc<Dispatcher>,
}

impl Gateway {
    pub fn new(mappings: Arc<MappingCache>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            mappings,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// `client_method` is the streaming mode the client picked explicitly
    /// (OpenAI `stream`, Gemini URL method). `None` defers to the mapping,
    /// which is how Anthropic requests are served.
    pub async fn generate(
        &self,
        request: ClientRequest,
        client_method: Option<TargetMethod>,
        trace_id: &str,
    ) -> Result<ClientOutput, GenerateError> {
        let proto = request.proto();
        let model = request.model().to_string();
        let natural = client_method.unwrap_or_else(|| natural_method(&request));

        let resolver = self.mappings.resolver().await;
        let Some(target) = resolver.resolve(proto, &model, natural) else {
            return Err(GenerateError::ModelNotSupported { proto, model });
        };
        let method = client_method.unwrap_or(target.target_method);
        info!(
            event = "model_resolved",
            trace_id = %trace_id,
            proto = %proto,
            model = %model,
            target = %target.target_name,
            method = %method,
            rule_id = ?target.rule_id
        );

        let upstream = request.into_gemini(&target.target_name);
        let body = Bytes::from(serde_json::to_vec(&upstream.body)?);
        let response = self
            .dispatcher
            .dispatch(DispatchRequest {
                model: upstream.model,
                method,
                body,
                trace_id: trace_id.to_string(),
            })
            .await?;

        if method.is_stream() {
            return Ok(ClientOutput::Stream(stream_body(response, proto, &model)));
        }
        let bytes = collect(response.body).await;
        let parsed: GenerateContentResponse =
            serde_json::from_slice(&bytes).map_err(TransformError::from)?;
        let output = transform_response(proto, &model, parsed);
        Ok(ClientOutput::Json(output.to_bytes()?))
    }
}

fn natural_method(request: &ClientRequest) -> TargetMethod {
    match request {
        ClientRequest::OpenAIChat(body) => TargetMethod::from_stream(body.stream == Some(true)),
        ClientRequest::Claude(body) => TargetMethod::from_stream(body.stream == Some(true)),
        ClientRequest::Gemini { .. } => TargetMethod::GenerateContent,
    }
}

fn stream_body(response: UpstreamHttpResponse, proto: Proto, model: &str) -> ByteStream {
    match response.body {
        UpstreamBody::Stream(rx) => translate_stream(rx, proto, model),
        UpstreamBody::Bytes(bytes) => translate_stream(once(bytes), proto, model),
    }
}

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::warn;

use gemgate_protocol::SseParser;
use gemgate_provider_core::{ByteStream, UpstreamBody, UpstreamChunks};
use gemgate_transform::{Proto, StreamTranslator};

const FRAME_BUFFER: usize = 16;

/// Re-frame an upstream Gemini SSE body for a client speaking `proto`.
///
/// A clean end of `upstream` closes with the protocol's normal terminal
/// frames; a broken one closes with its error frame. The pump task also
/// stops as soon as the client side hangs up, even while upstream is quiet.
/// Ending drops `upstream`, which in turn stops the upstream reader.
pub fn translate_stream(mut upstream: UpstreamChunks, proto: Proto, model: &str) -> ByteStream {
    let (tx, rx) = mpsc::channel::<Bytes>(FRAME_BUFFER);
    let mut translator = StreamTranslator::new(proto, model);
    tokio::spawn(async move {
        let mut parser = SseParser::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => return,
                next = upstream.recv() => next,
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(failure)) => {
                    warn!(
                        event = "client_stream_failed",
                        proto = %proto,
                        error = %failure.message()
                    );
                    let _ = send_all(&tx, translator.fail(&failure.message())).await;
                    return;
                }
                None => break,
            };
            for event in parser.push_bytes(&chunk) {
                if !send_all(&tx, translator.push(&event.data)).await {
                    return;
                }
                if translator.is_closed() {
                    return;
                }
            }
        }
        for event in parser.finish() {
            if !send_all(&tx, translator.push(&event.data)).await {
                return;
            }
        }
        let _ = send_all(&tx, translator.finish()).await;
    });
    rx
}

/// A single prepared body as a one-shot upstream stream.
pub fn once(bytes: Bytes) -> UpstreamChunks {
    let (tx, rx) = mpsc::channel(1);
    // Capacity 1 and a fresh channel: this cannot fail.
    let _ = tx.try_send(Ok(bytes));
    rx
}

async fn send_all(tx: &mpsc::Sender<Bytes>, frames: Vec<Bytes>) -> bool {
    for frame in frames {
        if tx.send(frame).await.is_err() {
            return false;
        }
    }
    true
}

/// Read a whole upstream body into memory.
pub async fn collect(body: UpstreamBody) -> Bytes {
    match body {
        UpstreamBody::Bytes(bytes) => bytes,
        UpstreamBody::Stream(mut rx) => {
            let mut buf = BytesMut::new();
            // A broken body yields what arrived before the break.
            while let Some(Ok(chunk)) = rx.recv().await {
                buf.extend_from_slice(&chunk);
            }
            buf.freeze()
        }
    }
}

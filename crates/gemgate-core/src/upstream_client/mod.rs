use std::collections::HashMap;
use std::error::Error as _;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use wreq::{Client, Method, Proxy};

use gemgate_provider_core::{
    Headers, HttpMethod, UpstreamBody, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind,
};

const STREAM_BUFFER: usize = 16;

/// Sends one prepared request upstream.
///
/// Non-2xx responses come back as `Ok` with the body fully read; only
/// failures before a status line arrives are `Err`. A streaming 2xx body is
/// handed over as [`UpstreamBody::Stream`], whose last item is an `Err` when
/// the body breaks off midway.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Longest gap between two chunks of a streamed body.
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(86400),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Which part of the exchange a wreq error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Send,
    Body,
}

/// One wreq client per outbound proxy, built on first use.
struct ClientPool {
    config: UpstreamClientConfig,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ClientPool {
    fn get(&self, proxy: Option<&str>) -> Result<Client, UpstreamFailure> {
        let key = proxy.map(str::to_string);
        let mut clients = self.clients.lock().map_err(|_| UpstreamFailure::Transport {
            kind: UpstreamTransportErrorKind::Other,
            message: "upstream client pool poisoned".to_string(),
        })?;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = self.build(proxy).map_err(|err| {
            warn!(event = "upstream_client_build_failed", error = %err);
            transport_failure(&err, Phase::Send)
        })?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn build(&self, proxy: Option<&str>) -> Result<Client, wreq::Error> {
        let mut builder = Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .read_timeout(self.config.stream_idle_timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(Proxy::all(proxy)?);
        }
        builder.build()
    }
}

/// [`UpstreamClient`] over wreq.
///
/// The proxy of a request is its own `proxy` when set, else whatever
/// `default_proxy` returns at send time, so a reloaded process proxy applies
/// without rebuilding the client.
#[derive(Clone)]
pub struct WreqUpstreamClient {
    pool: Arc<ClientPool>,
    default_proxy: Arc<dyn Fn() -> Option<String> + Send + Sync>,
    stream_idle_timeout: Duration,
}

impl WreqUpstreamClient {
    pub fn new<F>(config: UpstreamClientConfig, default_proxy: F) -> Result<Self, wreq::Error>
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        let default_proxy: Arc<dyn Fn() -> Option<String> + Send + Sync> = Arc::new(default_proxy);
        let stream_idle_timeout = config.stream_idle_timeout;
        let pool = ClientPool {
            config,
            clients: Mutex::new(HashMap::new()),
        };
        // Fail at startup on a malformed proxy rather than on the first request.
        let initial = non_blank(default_proxy());
        let client = pool.build(initial.as_deref())?;
        if let Ok(mut clients) = pool.clients.lock() {
            clients.insert(initial, client);
        }
        Ok(Self {
            pool: Arc::new(pool),
            default_proxy,
            stream_idle_timeout,
        })
    }
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let proxy = non_blank(req.proxy.clone()).or_else(|| non_blank((self.default_proxy)()));
            let client = self.pool.get(proxy.as_deref())?;
            debug!(
                event = "upstream_request",
                method = req.method.as_str(),
                stream = req.is_stream,
                proxied = proxy.is_some()
            );

            let method = match req.method {
                HttpMethod::Get => Method::GET,
                HttpMethod::Post => Method::POST,
            };
            let mut builder = client.request(method, &req.url);
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }
            let resp = builder
                .send()
                .await
                .map_err(|err| transport_failure(&err, Phase::Send))?;

            let status = resp.status().as_u16();
            let headers = header_pairs(resp.headers());
            // Error bodies are always read whole: the dispatcher classifies them.
            if !(200..300).contains(&status) || !req.is_stream {
                let body = resp
                    .bytes()
                    .await
                    .map_err(|err| transport_failure(&err, Phase::Body))?;
                return Ok(UpstreamHttpResponse {
                    status,
                    headers,
                    body: UpstreamBody::Bytes(body),
                });
            }

            let (tx, rx) = mpsc::channel(STREAM_BUFFER);
            let chunks = resp
                .bytes_stream()
                .map(|item| item.map_err(|err| transport_failure(&err, Phase::Body)));
            tokio::spawn(pump_body(chunks, tx, self.stream_idle_timeout));
            Ok(UpstreamHttpResponse {
                status,
                headers,
                body: UpstreamBody::Stream(rx),
            })
        })
    }
}

/// Forward body chunks until the body ends, breaks or the receiver goes away.
///
/// A read error or an idle gap longer than `idle` is forwarded as a final
/// `Err` so the reader can tell truncation from a clean end. Returning drops
/// `chunks`, which closes the upstream connection.
async fn pump_body<S>(chunks: S, tx: mpsc::Sender<Result<Bytes, UpstreamFailure>>, idle: Duration)
where
    S: Stream<Item = Result<Bytes, UpstreamFailure>> + Send + 'static,
{
    let mut chunks = std::pin::pin!(chunks);
    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                debug!(event = "upstream_stream_abandoned");
                return;
            }
            next = tokio::time::timeout(idle, chunks.next()) => next,
        };
        let item = match next {
            Ok(None) => return,
            Ok(Some(item)) => item,
            Err(_) => Err(UpstreamFailure::Transport {
                kind: UpstreamTransportErrorKind::ReadTimeout,
                message: format!("no upstream data for {}s", idle.as_secs()),
            }),
        };
        let broken = match &item {
            Ok(_) => false,
            Err(failure) => {
                warn!(event = "upstream_stream_broken", error = %failure.message());
                true
            }
        };
        if tx.send(item).await.is_err() || broken {
            return;
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
}

fn header_pairs(map: &wreq::header::HeaderMap) -> Headers {
    map.iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn transport_failure(err: &wreq::Error, phase: Phase) -> UpstreamFailure {
    UpstreamFailure::Transport {
        kind: transport_kind(err, phase),
        message: err.to_string(),
    }
}

fn transport_kind(err: &wreq::Error, phase: Phase) -> UpstreamTransportErrorKind {
    if err.is_timeout() {
        return match phase {
            Phase::Send => UpstreamTransportErrorKind::Timeout,
            Phase::Body => UpstreamTransportErrorKind::ReadTimeout,
        };
    }
    if phase == Phase::Body {
        return UpstreamTransportErrorKind::Other;
    }
    kind_from_chain(&error_chain(err), err.is_connect())
}

/// Lowercased messages of `err` and every error beneath it.
fn error_chain(err: &wreq::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text.to_ascii_lowercase()
}

fn kind_from_chain(chain: &str, is_connect: bool) -> UpstreamTransportErrorKind {
    if ["dns", "failed to lookup", "resolve"]
        .iter()
        .any(|hint| chain.contains(hint))
    {
        return UpstreamTransportErrorKind::Dns;
    }
    if ["tls", "ssl", "certificate", "handshake"]
        .iter()
        .any(|hint| chain.contains(hint))
    {
        return UpstreamTransportErrorKind::Tls;
    }
    if is_connect {
        return UpstreamTransportErrorKind::Connect;
    }
    UpstreamTransportErrorKind::Other
}

//! Key pool, model mapping and upstream abstractions for gemgate.
//!
//! Nothing here performs network IO: callers build an `UpstreamHttpRequest`
//! and a higher layer sends it.

pub mod aistudio;
pub mod cache;
pub mod errors;
pub mod events;
pub mod headers;
pub mod key;
pub mod mapping;
pub mod selector;
pub mod settings;
pub mod upstream;

pub use errors::{StoreError, StoreResult};
pub use events::{
    CooldownReason, ErrorLogEntry, Event, EventHub, EventSink, KeyCooldownEvent, RequestLogEntry,
    TerminalEventSink,
};
pub use headers::{Headers, header_get, header_set};
pub use key::{
    ApiKey, BulkAddOutcome, KeyId, KeyStats, KeyStore, MemoryKeyStore, mask_key, parse_key_list,
};
pub use mapping::{
    DEFAULT_SOURCE, MappingSource, ModelMapping, ModelResolver, ResolvedTarget, TargetMethod,
};
pub use selector::{KeySelector, SelectError};
pub use settings::{MappingCache, SettingsCache, SettingsSource};
pub use upstream::{
    ByteStream, CooldownDecision, HttpMethod, UpstreamBody, UpstreamChunks, UpstreamFailure,
    UpstreamHttpRequest, UpstreamHttpResponse, UpstreamTransportErrorKind, decide_cooldown,
    parse_retry_after,
};

pub use gemgate_transform::Proto;

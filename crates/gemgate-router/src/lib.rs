mod auth;
mod error;
mod proxy;

pub use auth::RequestTraceId;
pub use error::{ErrorKind, GatewayError};
pub use proxy::proxy_router;

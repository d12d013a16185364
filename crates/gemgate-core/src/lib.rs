pub mod bootstrap;
pub mod dispatcher;
pub mod gateway;
pub mod health;
pub mod models;
pub mod state;
pub mod stream;
pub mod upstream_client;

pub use bootstrap::{Bootstrap, CliArgs, bootstrap, bootstrap_from_env};
pub use dispatcher::{DispatchError, DispatchRequest, Dispatcher, backoff_delay};
pub use gateway::{ClientOutput, GenerateError, Gateway};
pub use health::{HealthReport, run_health_check};
pub use models::list_models;
pub use state::{AppState, AppStateParts};
pub use upstream_client::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};

pub mod api_keys;
pub mod error_logs;
pub mod global_config;
pub mod model_mappings;
pub mod request_logs;
pub mod settings;

pub use api_keys::Entity as ApiKeys;
pub use error_logs::Entity as ErrorLogs;
pub use global_config::Entity as GlobalConfig;
pub use model_mappings::Entity as ModelMappings;
pub use request_logs::Entity as RequestLogs;
pub use settings::Entity as Settings;

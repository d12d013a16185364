pub mod create_chat_completions;
pub mod error;
pub mod list_models;
pub mod stream;
pub mod types;

pub use create_chat_completions::*;
pub use error::{ErrorDetail, ErrorResponse};
pub use list_models::{ListModelsResponse, ListObjectType, Model, ModelObjectType};
pub use stream::*;
pub use types::*;

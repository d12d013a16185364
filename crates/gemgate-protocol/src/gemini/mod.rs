pub mod error;
pub mod generate_content;
pub mod list_models;
pub mod types;

pub use error::{ErrorDetail, ErrorResponse};
pub use generate_content::{GenerateContentRequest, GenerateContentRequestBody, GenerateContentResponse};
pub use list_models::{ListModelsResponse, Model};
pub use types::*;

pub mod create_message;
pub mod error;
pub mod stream;
pub mod types;

pub use create_message::{CreateMessageRequestBody, CreateMessageResponse};
pub use error::{ErrorDetail, ErrorResponse, ErrorType};
pub use stream::{ContentBlockDelta, MessageDelta, StreamEvent, StreamUsage};
pub use types::*;

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod sse;

pub use sse::{SseEvent, SseParser};

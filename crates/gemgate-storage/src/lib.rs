pub mod entities;
mod seaorm;
mod sinks;
mod storage;

pub use seaorm::SeaOrmStorage;
pub use sinks::DbEventSink;
pub use storage::{NewModelMapping, Storage, StorageError, StorageResult};

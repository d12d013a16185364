use std::error::Error;
use std::fmt;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by a persistence backend (key store, settings or mapping source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    KeyNotFound(i64),
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::KeyNotFound(id) => write!(f, "api key not found: {id}"),
            StoreError::Backend(msg) => write!(f, "store backend: {msg}"),
        }
    }
}

impl Error for StoreError {}

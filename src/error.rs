//! Typed error taxonomy for the engine.
//!
//! Source errors are flattened to their `Display` text rather than chained,
//! because several of them (`reqwest::Error`) aren't `Clone`, and the
//! single-flight coordinator (`single_flight.rs`) needs every error it
//! hands out to multiple awaiters to be cheaply cloneable.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a folder: {0}")]
    NotAFolder(String),

    #[error("malformed directory listing: {0}")]
    MalformedListing(String),

    #[error("unknown size unit in {0:?}")]
    UnknownUnit(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("cache corruption: {0}")]
    CacheCorruption(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("io error: {0}")]
    Io(String),
}

impl EngineError {
    /// Maps an engine error kind to the `errno` the FUSE adapter should
    /// surface to the kernel.
    pub fn errno(&self) -> i32 {
        match self {
            EngineError::NotFound(_) => libc::ENOENT,
            EngineError::NotAFolder(_) => libc::ENOTDIR,
            EngineError::Cancelled | EngineError::ShuttingDown => libc::EIO,
            _ => libc::EIO,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

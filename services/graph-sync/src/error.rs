//! Service-specific error types

use thiserror::Error;

/// Sync errors.
///
/// Client failures keep their original error so callers can still inspect
/// the provider code. Configuration errors use `common::Error` and are
/// reported at startup through anyhow.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not a facebook.com URL or graph path: {0}")]
    InvalidTarget(String),

    #[error("strange structure of resource: {0}")]
    UnknownResourceType(serde_json::Value),

    #[error("response has no graph id: {0}")]
    MissingId(serde_json::Value),

    #[error("record store error: {0}")]
    Store(String),

    #[error(transparent)]
    Client(#[from] graph_client::Error),
}

impl Error {
    /// Whether the error only disqualifies one record rather than the run.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Error::UnknownResourceType(_))
    }
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for Graph client operations

use transport::{Params, ProviderError, TransportError};

use crate::classify::ErrorKind;

/// Errors surfaced to callers of the resilient client and the paginator.
///
/// Recoverable provider errors never reach this type; they are retried inside
/// the call chain. Everything here is terminal for the logical call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("credential pool exhausted (tag {tag:?}): {reason}")]
    PoolExhausted { tag: Option<String>, reason: String },

    #[error("credential source error: {0}")]
    Credential(String),

    /// A provider error that no recovery policy handles.
    #[error("{error} while executing method {method} with params {params:?}")]
    Provider {
        kind: ErrorKind,
        error: ProviderError,
        method: String,
        params: Params,
    },

    #[error("{error} persisted after {retries} retries of method {method} with params {params:?}")]
    RetriesExhausted {
        error: ProviderError,
        retries: u32,
        method: String,
        params: Params,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed page: {0}")]
    MalformedPage(String),

    #[error("pagination inconsistency: {0}")]
    Pagination(String),
}

impl Error {
    /// Provider error behind this failure, if the provider reported one.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Error::Provider { error, .. } | Error::RetriesExhausted { error, .. } => Some(error),
            Error::Transport(e) => e.provider_error(),
            _ => None,
        }
    }
}

/// Result alias for Graph client operations.
pub type Result<T> = std::result::Result<T, Error>;

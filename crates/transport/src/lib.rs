//! Transport abstraction for Graph API calls
//!
//! Defines the `Transport` trait that decouples the retry/rotation logic from
//! the network. `GraphTransport` is the reqwest-backed implementation; tests
//! substitute scripted fakes through the same trait.
//!
//! Provider errors come back in two shapes (nested `error` object and the
//! legacy top-level `error_code`/`error_msg` pair). Both are normalized into
//! `ProviderError` here so callers classify a single value.

pub mod http;
pub mod payload;

pub use http::{DEFAULT_API_VERSION, DEFAULT_BASE_URL, GraphTransport};
pub use payload::ProviderError;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Call parameters: string keys mapped to primitive or sequence JSON values.
///
/// Authentication is never part of the params; the bearer token is passed
/// separately to `Transport::get`.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Parameter key reserved for the bearer token.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// Errors from a single transport invocation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid JSON response: {0}")]
    Decode(String),

    /// The provider answered with a recognizable error payload.
    #[error("{0}")]
    Api(ProviderError),
}

impl TransportError {
    /// Provider error carried by this failure, if any.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            TransportError::Api(e) => Some(e),
            _ => None,
        }
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Performs one remote call.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "graph")
    fn id(&self) -> &str;

    /// Issue `method` with `params`, authenticated by `access_token`.
    ///
    /// Returns the parsed JSON payload. A 2xx payload may still carry a
    /// legacy error indicator; callers check it with
    /// `ProviderError::from_payload`.
    fn get<'a>(
        &'a self,
        method: &'a str,
        params: &'a Params,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send + 'a>>;
}

/// Encode params as query pairs.
///
/// Strings are sent raw, sequences are joined with commas, `null` values are
/// dropped, and nested objects are sent as compact JSON.
pub fn query_pairs(params: &Params) -> Vec<(String, String)> {
    params
        .iter()
        .filter_map(|(key, value)| encode_value(value).map(|v| (key.clone(), v)))
        .collect()
}

fn encode_value(value: &serde_json::Value) -> Option<String> {
    use serde_json::Value;
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(encode_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

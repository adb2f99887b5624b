//! reqwest-backed Graph API transport.
//!
//! Issues `GET {base_url}/{version}/{method}` with the params as query pairs
//! and the bearer token as `access_token`. Returns 2xx bodies as parsed JSON
//! and maps non-2xx bodies that carry a provider error to `TransportError::Api`.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::payload::ProviderError;
use crate::{ACCESS_TOKEN_PARAM, Params, Result, Transport, TransportError};

/// Graph API version pinned by default.
pub const DEFAULT_API_VERSION: &str = "v2.3";

/// Default Graph API host.
pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com";

/// HTTP transport for the Graph API.
pub struct GraphTransport {
    client: reqwest::Client,
    base_url: String,
    version: String,
}

impl GraphTransport {
    /// `version` may be empty to address unversioned paths.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            version: version.into(),
        }
    }

    /// Absolute URL for a method path.
    pub fn url_for(&self, method: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let method = method.trim_start_matches('/');
        let version = self.version.trim_matches('/');
        if version.is_empty() {
            format!("{base}/{method}")
        } else {
            format!("{base}/{version}/{method}")
        }
    }

    async fn send(&self, method: &str, params: &Params, access_token: &str) -> Result<serde_json::Value> {
        let url = self.url_for(method);
        let mut query = crate::query_pairs(params);
        query.push((ACCESS_TOKEN_PARAM.to_string(), access_token.to_string()));

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("request to {method} failed: {}", e.without_url())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| {
                TransportError::Http(format!("reading {method} response failed: {}", e.without_url()))
            })?;
        debug!(method, status = status.as_u16(), bytes = body.len(), "graph response");

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()));
        }

        if let Ok(payload) = serde_json::from_str::<serde_json::Value>(&body)
            && let Some(error) = ProviderError::from_payload(&payload)
        {
            return Err(TransportError::Api(error));
        }

        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl Transport for GraphTransport {
    fn id(&self) -> &str {
        "graph"
    }

    fn get<'a>(
        &'a self,
        method: &'a str,
        params: &'a Params,
        access_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send + 'a>> {
        Box::pin(self.send(method, params, access_token))
    }
}

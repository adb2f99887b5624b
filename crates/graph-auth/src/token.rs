//! Token endpoint calls
//!
//! Two grants are used against the Graph token endpoint:
//! 1. `client_credentials` issues an app access token from the app id/secret
//! 2. `fb_exchange_token` trades a short-lived user token for a long-lived one
//!
//! Both are GET requests returning `{"access_token", "token_type", "expires_in"}`.

use common::Secret;
use serde::{Deserialize, Serialize};
use transport::ProviderError;

use crate::constants::{GRANT_CLIENT_CREDENTIALS, GRANT_EXCHANGE};
use crate::error::{Error, Result};

/// App identity used to authenticate against the token endpoint.
#[derive(Debug, Clone)]
pub struct AppCredentials {
    pub app_id: String,
    pub app_secret: Secret<String>,
}

/// Response from the token endpoint.
///
/// `expires_in` is a delta in seconds and is absent for app tokens, which
/// do not expire.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Issue an app access token (`grant_type=client_credentials`).
pub async fn app_token(
    client: &reqwest::Client,
    endpoint: &str,
    app: &AppCredentials,
) -> Result<TokenResponse> {
    request_token(
        client,
        endpoint,
        &[
            ("grant_type", GRANT_CLIENT_CREDENTIALS),
            ("client_id", app.app_id.as_str()),
            ("client_secret", app.app_secret.expose().as_str()),
        ],
    )
    .await
}

/// Exchange a short-lived user token for a long-lived one.
pub async fn exchange_token(
    client: &reqwest::Client,
    endpoint: &str,
    app: &AppCredentials,
    short_lived: &str,
) -> Result<TokenResponse> {
    request_token(
        client,
        endpoint,
        &[
            ("grant_type", GRANT_EXCHANGE),
            ("client_id", app.app_id.as_str()),
            ("client_secret", app.app_secret.expose().as_str()),
            ("fb_exchange_token", short_lived),
        ],
    )
    .await
}

async fn request_token(
    client: &reqwest::Client,
    endpoint: &str,
    query: &[(&str, &str)],
) -> Result<TokenResponse> {
    let response = client
        .get(endpoint)
        .query(query)
        .send()
        .await
        .map_err(|e| Error::Http(format!("token request failed: {}", e.without_url())))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // OAuthException codes 101 (bad app id/secret) and 190 (bad token),
        // or a plain 401/403, mean retrying with the same inputs is pointless
        let provider_code = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| ProviderError::from_payload(&v))
            .and_then(|e| e.code);
        if matches!(provider_code, Some(101 | 190)) || matches!(status.as_u16(), 401 | 403) {
            return Err(Error::InvalidCredentials(format!(
                "token endpoint rejected credentials ({status}): {body}"
            )));
        }

        return Err(Error::TokenIssue(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| Error::Http(format!("reading token response failed: {}", e.without_url())))?;
    serde_json::from_str::<TokenResponse>(&body)
        .map_err(|e| Error::TokenIssue(format!("invalid token response: {e}")))
}

//! `CredentialSource` backed by the on-disk credential store
//!
//! Refresh retires the stale credential and issues a new app access token
//! through the token endpoint, persisting it under the requested tag.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use graph_auth::{AppCredentials, Credential, CredentialStore, now_millis};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::pool::CredentialSource;

pub struct StoreSource {
    store: Arc<CredentialStore>,
    http_client: reqwest::Client,
    token_endpoint: String,
    app: Option<AppCredentials>,
}

impl StoreSource {
    /// Without `app` credentials, refresh always fails and the pool is
    /// limited to what is already stored.
    pub fn new(
        store: Arc<CredentialStore>,
        http_client: reqwest::Client,
        token_endpoint: impl Into<String>,
        app: Option<AppCredentials>,
    ) -> Self {
        Self {
            store,
            http_client,
            token_endpoint: token_endpoint.into(),
            app,
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    async fn issue(&self, tag: Option<&str>, stale: Option<&str>) -> Result<(String, Credential)> {
        if let Some(stale) = stale
            && let Err(e) = self.store.deactivate(stale).await
        {
            warn!(credential_id = stale, error = %e, "failed to retire stale credential");
        }

        let app = self
            .app
            .as_ref()
            .ok_or_else(|| Error::Credential("no app credentials configured for refresh".into()))?;

        let token = graph_auth::app_token(&self.http_client, &self.token_endpoint, app)
            .await
            .map_err(|e| Error::Credential(e.to_string()))?;

        // App tokens are stable for a given app; reuse the stored record if present
        if let Some((id, existing)) = self
            .store
            .list_active(tag)
            .await
            .into_iter()
            .find(|(_, c)| c.token == token.access_token)
        {
            info!(credential_id = %id, tag, "refresh returned an already stored app token");
            return Ok((id, existing));
        }

        let granted_at = now_millis();
        let id = format!("app-{}-{granted_at}", app.app_id);
        let credential = Credential {
            token: token.access_token,
            owner: app.app_id.clone(),
            granted_at,
            active: true,
            tag: tag.map(str::to_owned),
        };
        self.store
            .add(id.clone(), credential.clone())
            .await
            .map_err(|e| Error::Credential(e.to_string()))?;
        info!(credential_id = %id, tag, "stored refreshed app token");
        Ok((id, credential))
    }
}

impl CredentialSource for StoreSource {
    fn list_active<'a>(
        &'a self,
        tag: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(String, Credential)>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.store.list_active(tag).await) })
    }

    fn refresh<'a>(
        &'a self,
        tag: Option<&'a str>,
        stale: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<(String, Credential)>> + Send + 'a>> {
        Box::pin(self.issue(tag, stale))
    }
}

//! Resilient call execution
//!
//! `GraphClient` holds the transport, the credential pool and the retry
//! policy. Each logical call runs inside a `CallChain`, which owns the set of
//! credentials excluded so far and the retry counters. A chain can be reused
//! across several calls (e.g. all pages of one collection) so a credential
//! that hit its rate limit is not picked again for the rest of the chain.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, warn};
use transport::{ACCESS_TOKEN_PARAM, Params, ProviderError, Transport, TransportError};

use crate::classify::{ErrorKind, classify};
use crate::error::{Error, Result};
use crate::paginate::{FetchAll, Page};
use crate::pool::{CredentialPool, SelectedCredential};

/// Sleep windows and the transient retry ceiling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Wait after a per-app rate limit before retrying
    pub app_limit_cooldown: Duration,
    /// Wait after a "retry later" error
    pub transient_delay: Duration,
    /// Transient retries allowed before the error is surfaced
    pub transient_ceiling: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            app_limit_cooldown: Duration::from_secs(600),
            transient_delay: Duration::from_secs(1),
            transient_ceiling: 3,
        }
    }
}

/// Graph API client with transparent recovery.
pub struct GraphClient {
    transport: Arc<dyn Transport>,
    pool: Arc<CredentialPool>,
    policy: RetryPolicy,
}

impl GraphClient {
    pub fn new(transport: Arc<dyn Transport>, pool: Arc<CredentialPool>, policy: RetryPolicy) -> Self {
        debug!(
            transport = transport.id(),
            app_limit_cooldown_secs = policy.app_limit_cooldown.as_secs(),
            transient_ceiling = policy.transient_ceiling,
            "graph client initialized"
        );
        Self {
            transport,
            pool,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Start a call chain for credentials tagged `tag`.
    pub fn chain(&self, tag: Option<&str>) -> CallChain<'_> {
        CallChain {
            client: self,
            tag: tag.map(str::to_owned),
            excluded: HashSet::new(),
            current: None,
            attempts: 0,
            limit_cap: None,
        }
    }

    /// Execute one logical call in a fresh chain.
    pub async fn call(&self, method: &str, params: Params, tag: Option<&str>) -> Result<Value> {
        self.chain(tag).call(method, params).await
    }

    /// Fetch `method` as a Graph collection, following pagination per `fetch`.
    ///
    /// All pages share one chain.
    pub async fn fetch_all(
        &self,
        method: &str,
        params: Params,
        tag: Option<&str>,
        fetch: &FetchAll,
    ) -> Result<Vec<Value>> {
        let mut chain = self.chain(tag);
        fetch
            .run(params, async |page_params: Params| -> Result<Page<Value>> {
                let payload = chain.call(method, page_params).await?;
                Page::from_payload(payload)
            })
            .await
    }
}

/// State of one logical call, possibly spanning several attempts.
pub struct CallChain<'c> {
    client: &'c GraphClient,
    tag: Option<String>,
    /// Tokens that must not be selected again in this chain
    excluded: HashSet<String>,
    current: Option<SelectedCredential>,
    attempts: u32,
    /// Largest `limit` accepted after an ambiguous error; later calls are clamped to it
    limit_cap: Option<u64>,
}

impl CallChain<'_> {
    /// Attempts made so far across every call of this chain.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of credentials excluded so far.
    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }

    /// Execute `method` with `params`, recovering from known provider errors.
    ///
    /// Returns the first successful payload unchanged. `params` must not carry
    /// `access_token`; authentication comes from the pool.
    pub async fn call(&mut self, method: &str, params: Params) -> Result<Value> {
        validate(method, &params)?;

        let mut params = params;
        if let Some(cap) = self.limit_cap {
            clamp_limit(&mut params, cap);
        }
        let mut transient_retries: u32 = 0;

        loop {
            let credential = self.credential().await?;
            self.attempts += 1;
            let attempt = self.attempts;
            metrics::counter!("graph_api_calls_total").increment(1);

            let outcome = self
                .client
                .transport
                .get(method, &params, &credential.access_token)
                .await;

            let provider_error = match outcome {
                Ok(payload) => match ProviderError::from_payload(&payload) {
                    None => {
                        debug!(method, attempt, credential_id = %credential.id, "call succeeded");
                        return Ok(payload);
                    }
                    Some(e) => e,
                },
                Err(TransportError::Api(e)) => e,
                Err(e) => {
                    metrics::counter!("graph_api_errors_total", "kind" => "transport").increment(1);
                    error!(method, ?params, attempt, error = %e, "transport failure");
                    return Err(Error::Transport(e));
                }
            };

            let kind = classify(&provider_error);
            metrics::counter!("graph_api_errors_total", "kind" => kind.label()).increment(1);
            let code = provider_error.code;

            match kind {
                ErrorKind::ExpiredToken => {
                    warn!(
                        method, ?params, attempt, code,
                        credential_id = %credential.id,
                        "access token expired, refreshing"
                    );
                    self.excluded.insert(credential.access_token);
                    let refreshed = self
                        .client
                        .pool
                        .refresh(self.tag.as_deref(), Some(credential.id.as_str()), &self.excluded)
                        .await?;
                    self.current = Some(refreshed);
                }
                ErrorKind::UserRateLimit => {
                    warn!(
                        method, ?params, attempt, code,
                        credential_id = %credential.id,
                        "user rate limit reached, rotating credential"
                    );
                    self.excluded.insert(credential.access_token);
                    self.current = None;
                }
                ErrorKind::AppRateLimit => {
                    let cooldown = self.client.policy.app_limit_cooldown;
                    warn!(
                        method, ?params, attempt, code,
                        cooldown_secs = cooldown.as_secs(),
                        "app rate limit reached, sleeping"
                    );
                    tokio::time::sleep(cooldown).await;
                }
                ErrorKind::Ambiguous => match halve_limit(&mut params) {
                    Some((from, to)) => {
                        self.limit_cap = Some(to);
                        warn!(method, ?params, attempt, code, from, to, "ambiguous error, reducing limit");
                    }
                    None => {
                        error!(method, ?params, attempt, code, error = %provider_error, "ambiguous error without reducible limit");
                        return Err(Error::Provider {
                            kind,
                            error: provider_error,
                            method: method.to_string(),
                            params,
                        });
                    }
                },
                ErrorKind::Transient => {
                    let ceiling = self.client.policy.transient_ceiling;
                    if transient_retries >= ceiling {
                        error!(method, ?params, attempt, code, retries = transient_retries, "transient error persisted");
                        return Err(Error::RetriesExhausted {
                            error: provider_error,
                            retries: transient_retries,
                            method: method.to_string(),
                            params,
                        });
                    }
                    transient_retries += 1;
                    warn!(
                        method, ?params, attempt, code,
                        retry = transient_retries,
                        ceiling,
                        "transient error, retrying"
                    );
                    tokio::time::sleep(self.client.policy.transient_delay).await;
                }
                ErrorKind::Unknown => {
                    error!(method, ?params, attempt, code, error = %provider_error, "unrecoverable provider error");
                    return Err(Error::Provider {
                        kind,
                        error: provider_error,
                        method: method.to_string(),
                        params,
                    });
                }
            }
        }
    }

    /// Current credential, or a fresh selection if it was excluded.
    async fn credential(&mut self) -> Result<SelectedCredential> {
        if let Some(current) = &self.current
            && !self.excluded.contains(&current.access_token)
        {
            return Ok(current.clone());
        }
        let selected = self
            .client
            .pool
            .select(self.tag.as_deref(), &self.excluded)
            .await?;
        self.current = Some(selected.clone());
        Ok(selected)
    }
}

fn validate(method: &str, params: &Params) -> Result<()> {
    if method.trim().is_empty() {
        return Err(Error::InvalidRequest("method must not be empty".into()));
    }
    if params.contains_key(ACCESS_TOKEN_PARAM) {
        return Err(Error::InvalidRequest(format!(
            "{ACCESS_TOKEN_PARAM} must not be passed as a parameter"
        )));
    }
    Ok(())
}

fn numeric_limit(params: &Params) -> Option<u64> {
    match params.get("limit")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Lower a numeric `limit` above `cap` to `cap`.
fn clamp_limit(params: &mut Params, cap: u64) {
    if numeric_limit(params).is_some_and(|limit| limit > cap) {
        params.insert("limit".into(), Value::from(cap));
    }
}

/// Halve a numeric `limit` greater than 1 in place.
///
/// Returns the old and new value, or `None` if there is nothing to reduce.
fn halve_limit(params: &mut Params) -> Option<(u64, u64)> {
    let current = numeric_limit(params)?;
    if current <= 1 {
        return None;
    }
    let halved = current / 2;
    params.insert("limit".into(), Value::from(halved));
    Some((current, halved))
}

//! Credential pool and per-chain selection
//!
//! The pool never mutates stored credentials itself. It reads the active set
//! from a `CredentialSource` at selection time and asks the source to refresh
//! only when nothing eligible is left. Exclusions are owned by the caller (one
//! set per call chain) and are keyed by token value, so a refresh that hands
//! back an already-failed token is treated as exhaustion.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use common::Secret;
use graph_auth::Credential;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Identifier reported for the statically configured credential.
pub const STATIC_CREDENTIAL_ID: &str = "static";

/// Backing store of refreshable credentials.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CredentialSource>`).
pub trait CredentialSource: Send + Sync {
    /// Active credentials for `tag` (`None` = untagged), most preferred first.
    fn list_active<'a>(
        &'a self,
        tag: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<(String, Credential)>>> + Send + 'a>>;

    /// Obtain a fresh credential for `tag`, retiring `stale` if given.
    fn refresh<'a>(
        &'a self,
        tag: Option<&'a str>,
        stale: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<(String, Credential)>> + Send + 'a>>;
}

/// A credential chosen for one attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct SelectedCredential {
    pub id: String,
    pub access_token: String,
}

impl fmt::Debug for SelectedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedCredential")
            .field("id", &self.id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Credential pool: an optional static token plus a refreshable source.
pub struct CredentialPool {
    static_token: Option<Secret<String>>,
    source: Arc<dyn CredentialSource>,
}

impl CredentialPool {
    pub fn new(static_token: Option<Secret<String>>, source: Arc<dyn CredentialSource>) -> Self {
        info!(static_token = static_token.is_some(), "credential pool initialized");
        Self {
            static_token,
            source,
        }
    }

    /// Select a credential whose token is not in `excluded`.
    ///
    /// Order: the static credential, then the source's active credentials for
    /// `tag`, then one refresh. Returns `PoolExhausted` if the refresh fails or
    /// yields an excluded token.
    pub async fn select(&self, tag: Option<&str>, excluded: &HashSet<String>) -> Result<SelectedCredential> {
        if let Some(token) = &self.static_token
            && !excluded.contains(token.expose())
        {
            return Ok(SelectedCredential {
                id: STATIC_CREDENTIAL_ID.to_string(),
                access_token: token.expose().clone(),
            });
        }

        let active = self.source.list_active(tag).await?;
        let candidates = active.len();
        if let Some((id, credential)) = active
            .into_iter()
            .find(|(_, c)| !excluded.contains(&c.token))
        {
            debug!(credential_id = %id, tag, "selected stored credential");
            return Ok(SelectedCredential {
                id,
                access_token: credential.token,
            });
        }

        debug!(tag, candidates, excluded = excluded.len(), "no eligible credential, refreshing");
        self.refresh(tag, None, excluded).await
    }

    /// Refresh through the source and return the new credential.
    ///
    /// `stale` names a credential to retire; the static credential is never
    /// passed to the source since it is not stored there.
    pub async fn refresh(
        &self,
        tag: Option<&str>,
        stale: Option<&str>,
        excluded: &HashSet<String>,
    ) -> Result<SelectedCredential> {
        let stale = stale.filter(|id| *id != STATIC_CREDENTIAL_ID);
        let (id, credential) = match self.source.refresh(tag, stale).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(tag, error = %e, "credential refresh failed");
                return Err(Error::PoolExhausted {
                    tag: tag.map(str::to_owned),
                    reason: format!("refresh failed: {e}"),
                });
            }
        };

        if excluded.contains(&credential.token) {
            warn!(credential_id = %id, tag, "refresh returned an excluded credential");
            return Err(Error::PoolExhausted {
                tag: tag.map(str::to_owned),
                reason: "refresh returned an already excluded credential".into(),
            });
        }

        info!(credential_id = %id, tag, "using refreshed credential");
        Ok(SelectedCredential {
            id,
            access_token: credential.token,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn credential(token: &str, tag: Option<&str>) -> Credential {
        Credential {
            token: token.into(),
            owner: "owner".into(),
            granted_at: 1,
            active: true,
            tag: tag.map(str::to_owned),
        }
    }

    /// In-memory source. Each refresh issues the next token from `issued`.
    pub(crate) struct MemorySource {
        pub(crate) active: Mutex<Vec<(String, Credential)>>,
        pub(crate) issued: Mutex<Vec<String>>,
        pub(crate) refreshes: AtomicUsize,
        pub(crate) retired: Mutex<Vec<String>>,
    }

    impl MemorySource {
        pub(crate) fn new(active: &[(&str, &str)], issued: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                active: Mutex::new(
                    active
                        .iter()
                        .map(|(id, token)| (id.to_string(), credential(token, None)))
                        .collect(),
                ),
                issued: Mutex::new(issued.iter().rev().map(|t| t.to_string()).collect()),
                refreshes: AtomicUsize::new(0),
                retired: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn refresh_count(&self) -> usize {
            self.refreshes.load(Ordering::SeqCst)
        }
    }

    impl CredentialSource for MemorySource {
        fn list_active<'a>(
            &'a self,
            _tag: Option<&'a str>,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<(String, Credential)>>> + Send + 'a>> {
            let active = self.active.lock().unwrap().clone();
            Box::pin(async move { Ok(active) })
        }

        fn refresh<'a>(
            &'a self,
            tag: Option<&'a str>,
            stale: Option<&'a str>,
        ) -> Pin<Box<dyn Future<Output = Result<(String, Credential)>> + Send + 'a>> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if let Some(stale) = stale {
                self.retired.lock().unwrap().push(stale.to_string());
                self.active.lock().unwrap().retain(|(id, _)| id != stale);
            }
            let next = self.issued.lock().unwrap().pop();
            let result = match next {
                Some(token) => {
                    let id = format!("refreshed-{token}");
                    let credential = credential(&token, tag);
                    self.active.lock().unwrap().push((id.clone(), credential.clone()));
                    Ok((id, credential))
                }
                None => Err(Error::Credential("no app credentials".into())),
            };
            Box::pin(async move { result })
        }
    }

    fn excluded(tokens: &[&str]) -> HashSet<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn static_credential_preferred() {
        let source = MemorySource::new(&[("a", "tok-a")], &[]);
        let pool = CredentialPool::new(Some(Secret::new("tok-static".into())), source);

        let selected = pool.select(None, &HashSet::new()).await.unwrap();
        assert_eq!(selected.id, STATIC_CREDENTIAL_ID);
        assert_eq!(selected.access_token, "tok-static");
    }

    #[tokio::test]
    async fn excluded_static_falls_back_to_stored() {
        let source = MemorySource::new(&[("a", "tok-a")], &[]);
        let pool = CredentialPool::new(Some(Secret::new("tok-static".into())), source);

        let selected = pool.select(None, &excluded(&["tok-static"])).await.unwrap();
        assert_eq!(selected.id, "a");
        assert_eq!(selected.access_token, "tok-a");
    }

    #[tokio::test]
    async fn skips_excluded_stored_credentials() {
        let source = MemorySource::new(&[("a", "tok-a"), ("b", "tok-b")], &[]);
        let pool = CredentialPool::new(None, source.clone());

        let selected = pool.select(None, &excluded(&["tok-a"])).await.unwrap();
        assert_eq!(selected.id, "b");
        assert_eq!(source.refresh_count(), 0);
    }

    #[tokio::test]
    async fn refreshes_once_when_nothing_eligible() {
        let source = MemorySource::new(&[("a", "tok-a")], &["tok-new"]);
        let pool = CredentialPool::new(None, source.clone());

        let selected = pool.select(None, &excluded(&["tok-a"])).await.unwrap();
        assert_eq!(selected.access_token, "tok-new");
        assert_eq!(source.refresh_count(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_is_pool_exhausted() {
        let source = MemorySource::new(&[], &[]);
        let pool = CredentialPool::new(None, source.clone());

        let err = pool.select(Some("crawler"), &HashSet::new()).await.unwrap_err();
        match err {
            Error::PoolExhausted { tag, .. } => assert_eq!(tag.as_deref(), Some("crawler")),
            other => panic!("expected PoolExhausted, got {other:?}"),
        }
        assert_eq!(source.refresh_count(), 1);
    }

    #[tokio::test]
    async fn refresh_returning_excluded_token_is_exhausted() {
        let source = MemorySource::new(&[("a", "tok-a")], &["tok-a"]);
        let pool = CredentialPool::new(None, source);

        let err = pool.select(None, &excluded(&["tok-a"])).await.unwrap_err();
        assert!(matches!(err, Error::PoolExhausted { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn static_credential_is_never_retired_at_source() {
        let source = MemorySource::new(&[], &["tok-new"]);
        let pool = CredentialPool::new(Some(Secret::new("tok-static".into())), source.clone());

        let selected = pool
            .refresh(None, Some(STATIC_CREDENTIAL_ID), &excluded(&["tok-static"]))
            .await
            .unwrap();
        assert_eq!(selected.access_token, "tok-new");
        assert!(source.retired.lock().unwrap().is_empty());
    }

    #[test]
    fn selected_credential_debug_redacts_token() {
        let selected = SelectedCredential {
            id: "a".into(),
            access_token: "tok-secret".into(),
        };
        let debug = format!("{selected:?}");
        assert!(!debug.contains("tok-secret"), "got: {debug}");
        assert!(debug.contains("REDACTED"));
    }
}

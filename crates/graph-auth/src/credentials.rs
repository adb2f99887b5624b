//! Credential storage for Graph API access tokens
//!
//! Manages a JSON file mapping credential IDs to access tokens. All writes
//! use atomic temp-file + rename to prevent corruption on crash. A tokio Mutex
//! serializes concurrent writes from independent call chains. The in-memory
//! map only changes after the file write succeeded.
//!
//! The file is the single source of truth for stored tokens. The client reads
//! it at selection time and never writes to it except through a refresh.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// One stored access token.
///
/// `granted_at` is a unix timestamp in milliseconds. A credential with a
/// `tag` may only be used for API methods requesting that tag; untagged
/// credentials serve untagged requests.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token sent as `access_token`
    pub token: String,
    /// Account the token was issued to (user id or app id)
    pub owner: String,
    pub granted_at: u64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

fn default_active() -> bool {
    true
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[REDACTED]")
            .field("owner", &self.owner)
            .field("granted_at", &self.granted_at)
            .field("active", &self.active)
            .field("tag", &self.tag)
            .finish()
    }
}

/// Current time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Thread-safe credential file manager.
///
/// The Mutex serializes all writes. Reads acquire the lock briefly to clone
/// the in-memory state.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<HashMap<String, Credential>>,
}

impl CredentialStore {
    /// Load credentials from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}`. Selection will then
    /// fall through to a refresh until tokens are added.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let credentials: HashMap<String, Credential> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            info!(path = %path.display(), credentials = credentials.len(), "loaded credentials");
            credentials
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let store = HashMap::new();
            write_atomic(&path, &store).await?;
            store
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Get a clone of a specific credential.
    pub async fn get(&self, id: &str) -> Option<Credential> {
        let state = self.state.lock().await;
        state.get(id).cloned()
    }

    /// Active credentials for `tag`, most recently granted first.
    ///
    /// `None` selects untagged credentials only. Ties on `granted_at` are
    /// broken by id so the order is stable across calls.
    pub async fn list_active(&self, tag: Option<&str>) -> Vec<(String, Credential)> {
        let state = self.state.lock().await;
        let mut active: Vec<(String, Credential)> = state
            .iter()
            .filter(|(_, c)| c.active && c.tag.as_deref() == tag)
            .map(|(id, c)| (id.clone(), c.clone()))
            .collect();
        active.sort_by(|(a_id, a), (b_id, b)| {
            b.granted_at.cmp(&a.granted_at).then_with(|| a_id.cmp(b_id))
        });
        active
    }

    /// Add or replace a credential and persist to disk.
    pub async fn add(&self, id: String, credential: Credential) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        next.insert(id.clone(), credential);
        write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(credential_id = id, "added credential");
        Ok(())
    }

    /// Remove a credential and persist to disk.
    ///
    /// Returns the removed credential if it existed.
    pub async fn remove(&self, id: &str) -> Result<Option<Credential>> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let removed = next.remove(id);
        if removed.is_some() {
            write_atomic(&self.path, &next).await?;
            *state = next;
            debug!(credential_id = id, "removed credential");
        }
        Ok(removed)
    }

    /// Mark a credential inactive so it is no longer listed.
    ///
    /// Returns an error if the credential doesn't exist.
    pub async fn deactivate(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let credential = next
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("credential {id} not in store")))?;
        credential.active = false;
        write_atomic(&self.path, &next).await?;
        *state = next;
        debug!(credential_id = id, "deactivated credential");
        Ok(())
    }

    /// Number of stored credentials, active or not.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Write credentials to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 since the file holds tokens.
async fn write_atomic(path: &Path, data: &HashMap<String, Credential>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

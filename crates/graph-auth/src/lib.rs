//! Graph API credential storage and issuance
//!
//! Holds the access tokens the client rotates through and talks to the token
//! endpoint when a fresh one is needed. This crate has no knowledge of retry
//! policy; the client decides when to read or refresh credentials.
//!
//! Credential flow:
//! 1. Operator seeds the store (or `token::app_token()` issues an app token)
//! 2. Client lists active credentials via `CredentialStore::list_active()`
//! 3. On an expired-token error the stale credential is deactivated and a new
//!    one is issued and persisted via `CredentialStore::add()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod token;

pub use constants::*;
pub use credentials::{Credential, CredentialStore, now_millis};
pub use error::{Error, Result};
pub use token::{AppCredentials, TokenResponse, app_token, exchange_token};

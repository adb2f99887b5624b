//! Resilient Graph API client and paginated fetch aggregation
//!
//! Wraps one logical Graph API call, classifies provider errors, and recovers
//! from the known failure modes without the caller seeing them. On top of the
//! client, `FetchAll` turns a single-page operation into a full-collection
//! operation by following pagination cursors.
//!
//! Failure handling per attempt:
//! 1. Expired token (190) → exclude credential, refresh, retry
//! 2. Per-user rate limit (17) → exclude credential, rotate, retry
//! 3. Per-app rate limit (4) → sleep the cooldown window, retry same credential
//! 4. Ambiguous (1, 12) → halve `limit` and retry, or fail if there is none
//! 5. "Please retry later" message → short sleep, retry, at most 3 times
//! 6. Anything else → fail immediately

pub mod classify;
pub mod client;
pub mod error;
pub mod paginate;
pub mod pool;
pub mod source;

pub use classify::{ErrorKind, classify};
pub use client::{CallChain, GraphClient, RetryPolicy};
pub use error::{Error, Result};
pub use paginate::{FetchAll, Page, Paging};
pub use pool::{CredentialPool, CredentialSource, STATIC_CREDENTIAL_ID, SelectedCredential};
pub use source::StoreSource;
pub use transport::Params;

//! Provider error classification
//!
//! Maps a normalized `ProviderError` onto the recovery policy the call chain
//! applies. Known codes win, except that the "retry later" message patterns
//! take precedence over the ambiguous codes 1 and 12.

use transport::ProviderError;

/// Message fragments the provider uses for short-lived failures.
///
/// Matched case-insensitively against the error message.
const TRANSIENT_PATTERNS: &[&str] = &[
    "please retry your request later",
    "unsupported get request. please read the graph api documentation",
];

/// Recovery class of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Code 190: the access token is expired or invalidated
    ExpiredToken,
    /// Code 17: per-user request limit reached
    UserRateLimit,
    /// Code 4: per-application request limit reached
    AppRateLimit,
    /// Codes 1 and 12: often caused by oversized responses
    Ambiguous,
    /// Message-signalled temporary failure
    Transient,
    Unknown,
}

impl ErrorKind {
    /// Label used in logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::ExpiredToken => "expired_token",
            ErrorKind::UserRateLimit => "user_rate_limit",
            ErrorKind::AppRateLimit => "app_rate_limit",
            ErrorKind::Ambiguous => "ambiguous",
            ErrorKind::Transient => "transient",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Whether `message` matches one of the transient patterns.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Classify a provider error.
pub fn classify(error: &ProviderError) -> ErrorKind {
    match error.code {
        Some(190) => ErrorKind::ExpiredToken,
        Some(17) => ErrorKind::UserRateLimit,
        Some(4) => ErrorKind::AppRateLimit,
        _ if is_transient_message(&error.message) => ErrorKind::Transient,
        Some(1 | 12) => ErrorKind::Ambiguous,
        _ => ErrorKind::Unknown,
    }
}

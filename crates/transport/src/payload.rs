//! Provider error payload normalization
//!
//! The Graph API reports failures as
//! `{"error": {"message", "type", "code", "error_subcode"}}`. Older endpoints
//! (and some batch responses) use a flat `{"error_code", "error_msg"}` pair,
//! sometimes inside a 200 response. Both map onto `ProviderError`.

use std::fmt;

use serde_json::Value;

/// A provider-reported error, independent of the payload shape it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Numeric error code (`error.code` or legacy `error_code`)
    pub code: Option<i64>,
    pub subcode: Option<i64>,
    /// Exception class name reported by the provider (e.g. "OAuthException")
    pub error_type: Option<String>,
    pub message: String,
}

impl ProviderError {
    /// Extract the error carried by `payload`, if it has one.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        if let Some(error) = payload.get("error") {
            return Some(match error {
                Value::Object(obj) => ProviderError {
                    code: obj.get("code").and_then(as_code),
                    subcode: obj.get("error_subcode").and_then(as_code),
                    error_type: obj
                        .get("type")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    message: obj
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                },
                Value::String(message) => ProviderError {
                    code: None,
                    subcode: None,
                    error_type: None,
                    message: message.clone(),
                },
                other => ProviderError {
                    code: None,
                    subcode: None,
                    error_type: None,
                    message: other.to_string(),
                },
            });
        }

        let code = payload.get("error_code")?;
        Some(ProviderError {
            code: as_code(code),
            subcode: None,
            error_type: None,
            message: payload
                .get("error_msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        })
    }
}

/// Codes arrive as numbers or numeric strings depending on the endpoint.
fn as_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "Error {code}: {}", self.message),
            None => write!(f, "Error: {}", self.message),
        }
    }
}

//! Configuration and startup errors

use thiserror::Error;

/// Errors raised while loading configuration or resolving secrets
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Secret {name} could not be resolved: {reason}")]
    Secret { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = Error::Config("transient_ceiling must be greater than 0".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: transient_ceiling must be greater than 0"
        );
    }

    #[test]
    fn secret_error_names_the_secret_only() {
        let err = Error::Secret {
            name: "app_secret_file".into(),
            reason: "file is empty".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("app_secret_file"), "got: {msg}");
        assert!(msg.contains("file is empty"), "got: {msg}");
    }

    #[test]
    fn io_error_converts() {
        let err: Error =
            std::io::Error::new(std::io::ErrorKind::NotFound, "graph-sync.toml").into();
        assert!(err.to_string().starts_with("I/O error:"), "got: {err}");
    }
}

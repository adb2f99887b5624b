//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The static access token is loaded from FACEBOOK_API_ACCESS_TOKEN or
//! access_token_file, and the app secret from FACEBOOK_APP_SECRET or
//! app_secret_file. Neither is ever stored in the TOML directly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use graph_auth::AppCredentials;
use graph_client::RetryPolicy;
use serde::Deserialize;

const ACCESS_TOKEN_ENV: &str = "FACEBOOK_API_ACCESS_TOKEN";
const APP_SECRET_ENV: &str = "FACEBOOK_APP_SECRET";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub graph: GraphConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Graph API endpoint settings
#[derive(Debug, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(skip)]
    pub access_token: Option<Secret<String>>,
    /// Path to a file containing a static access token (alternative to
    /// FACEBOOK_API_ACCESS_TOKEN)
    #[serde(default)]
    pub access_token_file: Option<PathBuf>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_version: default_api_version(),
            timeout_secs: default_timeout(),
            access_token: None,
            access_token_file: None,
        }
    }
}

/// Credential store and token issuance settings
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    pub credentials_path: PathBuf,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    /// App id used to issue app tokens on refresh
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(skip)]
    pub app_secret: Option<Secret<String>>,
    #[serde(default)]
    pub app_secret_file: Option<PathBuf>,
    /// Credential tag used when the command line names none
    #[serde(default)]
    pub default_tag: Option<String>,
}

/// Recovery timings
#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_app_limit_cooldown")]
    pub app_limit_cooldown_secs: u64,
    #[serde(default = "default_transient_delay")]
    pub transient_delay_secs: u64,
    #[serde(default = "default_transient_ceiling")]
    pub transient_ceiling: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            app_limit_cooldown_secs: default_app_limit_cooldown(),
            transient_delay_secs: default_transient_delay(),
            transient_ceiling: default_transient_ceiling(),
        }
    }
}

/// Local record storage
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub records_path: PathBuf,
}

/// Metrics output
#[derive(Debug, Default, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus textfile written at the end of each run
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

fn default_base_url() -> String {
    transport::DEFAULT_BASE_URL.to_string()
}

fn default_api_version() -> String {
    transport::DEFAULT_API_VERSION.to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_token_endpoint() -> String {
    graph_auth::TOKEN_ENDPOINT.to_string()
}

fn default_app_limit_cooldown() -> u64 {
    600
}

fn default_transient_delay() -> u64 {
    1
}

fn default_transient_ceiling() -> u32 {
    3
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order for both the access token and the app secret:
    /// 1. environment variable
    /// 2. `*_file` path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        for (name, url) in [
            ("base_url", &config.graph.base_url),
            ("token_endpoint", &config.auth.token_endpoint),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if config.graph.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.retry.transient_ceiling == 0 {
            return Err(common::Error::Config(
                "transient_ceiling must be greater than 0".into(),
            ));
        }

        config.graph.access_token =
            resolve_secret(ACCESS_TOKEN_ENV, config.graph.access_token_file.as_deref())?;
        config.auth.app_secret =
            resolve_secret(APP_SECRET_ENV, config.auth.app_secret_file.as_deref())?;

        if config.auth.app_secret.is_some() && config.auth.app_id.is_none() {
            return Err(common::Error::Config(
                "app secret is set but auth.app_id is missing".into(),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("graph-sync.toml")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            app_limit_cooldown: Duration::from_secs(self.retry.app_limit_cooldown_secs),
            transient_delay: Duration::from_secs(self.retry.transient_delay_secs),
            transient_ceiling: self.retry.transient_ceiling,
        }
    }

    /// App identity for token issuance, if both id and secret are configured.
    pub fn app_credentials(&self) -> Option<AppCredentials> {
        match (&self.auth.app_id, &self.auth.app_secret) {
            (Some(app_id), Some(app_secret)) => Some(AppCredentials {
                app_id: app_id.clone(),
                app_secret: app_secret.clone(),
            }),
            _ => None,
        }
    }
}

/// Env var takes precedence over the file; an empty file yields `None`.
fn resolve_secret(env: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env)
        && !value.trim().is_empty()
    {
        return Ok(Some(Secret::new(value.trim().to_owned())));
    }
    match file {
        Some(path) => Secret::from_file(path).map_err(|e| common::Error::Secret {
            name: env.to_string(),
            reason: format!("failed to read {}: {e}", path.display()),
        }),
        None => Ok(None),
    }
}

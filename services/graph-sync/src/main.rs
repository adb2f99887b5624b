//! Graph Sync
//!
//! Batch command that pulls Facebook Graph API collections into a local
//! record store:
//! 1. Loads config and the credential store
//! 2. Builds the resilient client (rotation, refresh, rate-limit sleeps)
//! 3. Runs one sync command, following pagination when asked to
//! 4. Prints a JSON summary and writes the metrics textfile

mod config;
mod error;
mod metrics;
mod records;
mod resource;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use graph_auth::{Credential, CredentialStore, now_millis};
use graph_client::{CredentialPool, GraphClient, Params, StoreSource};
use serde_json::{Value, json};
use tokio::io::AsyncBufReadExt;
use tracing::{Instrument, info, info_span, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{GraphTransport, Transport};

use crate::config::Config;
use crate::records::RecordStore;
use crate::resource::graph_id;
use crate::sync::{Syncer, resolve_target};

const USAGE: &str = "usage: graph-sync [--config PATH] [--tag TAG] <command>

commands:
  likes <post-or-url> [--all]    sync users who liked a post
  shares <post-or-url> [--all]   sync users who shared a post
  object <id-or-url>             fetch and store one object
  add-token                      exchange a short-lived token read from stdin";

#[derive(Debug, PartialEq)]
enum Command {
    Likes { target: String, all: bool },
    Shares { target: String, all: bool },
    Object { target: String },
    AddToken,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Likes { .. } => "likes",
            Command::Shares { .. } => "shares",
            Command::Object { .. } => "object",
            Command::AddToken => "add-token",
        }
    }
}

#[derive(Debug, PartialEq)]
struct Cli {
    config: Option<String>,
    tag: Option<String>,
    command: Command,
}

impl Cli {
    /// Parse arguments (without the program name).
    fn parse(args: &[String]) -> Result<Self> {
        let mut config = None;
        let mut tag = None;
        let mut all = false;
        let mut positional = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => config = Some(iter.next().context("--config needs a value")?.clone()),
                "--tag" => tag = Some(iter.next().context("--tag needs a value")?.clone()),
                "--all" => all = true,
                "-h" | "--help" => bail!("{USAGE}"),
                flag if flag.starts_with("--") => bail!("unknown flag {flag}\n\n{USAGE}"),
                _ => positional.push(arg.as_str()),
            }
        }

        let command = match positional.as_slice() {
            ["likes", target] => Command::Likes {
                target: target.to_string(),
                all,
            },
            ["shares", target] => Command::Shares {
                target: target.to_string(),
                all,
            },
            ["object", target] => Command::Object {
                target: target.to_string(),
            },
            ["add-token"] => Command::AddToken,
            _ => bail!("{USAGE}"),
        };
        if all && !matches!(command, Command::Likes { .. } | Command::Shares { .. }) {
            bail!("--all only applies to likes and shares");
        }

        Ok(Self {
            config,
            tag,
            command,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = Cli::parse(&args)?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.graph.base_url,
        api_version = %config.graph.api_version,
        static_token = config.graph.access_token.is_some(),
        app_credentials = config.app_credentials().is_some(),
        "configuration loaded"
    );

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let run_id = format!("run_{}", uuid::Uuid::new_v4().as_simple());
    let span = info_span!("sync", run_id = %run_id, command = cli.command.name());
    let outcome = run(&config, &cli).instrument(span).await;

    if let Some(path) = &config.metrics.textfile
        && let Err(e) = metrics::write_textfile(&prometheus, path)
    {
        warn!(path = %path.display(), error = %e, "failed to write metrics textfile");
    }

    let summary = outcome?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run(config: &Config, cli: &Cli) -> Result<Value> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.graph.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;
    let transport = Arc::new(GraphTransport::new(
        http.clone(),
        &config.graph.base_url,
        &config.graph.api_version,
    ));
    let store = Arc::new(
        CredentialStore::load(config.auth.credentials_path.clone())
            .await
            .context("failed to load credential store")?,
    );
    let tag = cli.tag.clone().or_else(|| config.auth.default_tag.clone());

    if cli.command == Command::AddToken {
        return add_token(config, &http, transport.as_ref(), &store, tag).await;
    }

    let source = Arc::new(StoreSource::new(
        store,
        http,
        &config.auth.token_endpoint,
        config.app_credentials(),
    ));
    let pool = Arc::new(CredentialPool::new(config.graph.access_token.clone(), source));
    let client = Arc::new(GraphClient::new(transport, pool, config.retry_policy()));
    let records = Arc::new(
        RecordStore::load(config.storage.records_path.clone())
            .await
            .context("failed to load record store")?,
    );
    let syncer = Syncer::new(client, records, tag);

    let summary = match &cli.command {
        Command::Likes { target, all } => {
            let post_id = resolve_target(target)?;
            let synced = syncer.fetch_likes(&post_id, *all).await?;
            json!({"post_id": post_id, "likes": synced.ids.len(), "ids": synced.ids, "post": synced.post})
        }
        Command::Shares { target, all } => {
            let post_id = resolve_target(target)?;
            let synced = syncer.fetch_shares(&post_id, *all).await?;
            json!({"post_id": post_id, "shares": synced.ids.len(), "ids": synced.ids, "post": synced.post})
        }
        Command::Object { target } => {
            let (id, object) = syncer.fetch_object(target).await?;
            json!({"graph_id": id, "object": object})
        }
        Command::AddToken => bail!("add-token does not sync records"),
    };
    Ok(summary)
}

/// Exchange a short-lived user token from stdin and store the long-lived one.
async fn add_token(
    config: &Config,
    http: &reqwest::Client,
    transport: &GraphTransport,
    store: &CredentialStore,
    tag: Option<String>,
) -> Result<Value> {
    let app = config
        .app_credentials()
        .context("add-token requires auth.app_id and an app secret")?;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let short_lived = lines
        .next_line()
        .await
        .context("failed to read token from stdin")?
        .map(|line| line.trim().to_owned())
        .filter(|line| !line.is_empty())
        .context("expected a short-lived token on stdin")?;

    let token = graph_auth::exchange_token(http, &config.auth.token_endpoint, &app, &short_lived)
        .await
        .context("token exchange failed")?;

    let mut params = Params::new();
    params.insert("fields".into(), json!("id"));
    let me = transport
        .get("me", &params, &token.access_token)
        .await
        .context("failed to identify token owner")?;
    let owner = me
        .get("id")
        .and_then(graph_id)
        .context("token owner response has no id")?;

    let id = format!("user-{owner}");
    store
        .add(
            id.clone(),
            Credential {
                token: token.access_token,
                owner: owner.clone(),
                granted_at: now_millis(),
                active: true,
                tag: tag.clone(),
            },
        )
        .await
        .context("failed to store credential")?;

    info!(credential_id = %id, owner = %owner, tag, expires_in = token.expires_in, "stored long-lived token");
    Ok(json!({"credential_id": id, "owner": owner, "tag": tag, "expires_in": token.expires_in}))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_owned).collect()
    }

    #[test]
    fn parses_likes_with_flags() {
        let cli = Cli::parse(&args("--config /etc/graph-sync.toml --tag crawler likes 10_20 --all")).unwrap();
        assert_eq!(
            cli,
            Cli {
                config: Some("/etc/graph-sync.toml".into()),
                tag: Some("crawler".into()),
                command: Command::Likes {
                    target: "10_20".into(),
                    all: true
                },
            }
        );
    }

    #[test]
    fn parses_object_and_add_token() {
        let cli = Cli::parse(&args("object https://www.facebook.com/cocacola")).unwrap();
        assert_eq!(
            cli.command,
            Command::Object {
                target: "https://www.facebook.com/cocacola".into()
            }
        );
        assert_eq!(Cli::parse(&args("add-token")).unwrap().command, Command::AddToken);
    }

    #[test]
    fn shares_default_to_single_page() {
        let cli = Cli::parse(&args("shares 10_20")).unwrap();
        assert_eq!(
            cli.command,
            Command::Shares {
                target: "10_20".into(),
                all: false
            }
        );
        assert!(cli.config.is_none());
        assert!(cli.tag.is_none());
    }

    #[test]
    fn rejects_bad_usage() {
        assert!(Cli::parse(&args("")).is_err());
        assert!(Cli::parse(&args("likes")).is_err());
        assert!(Cli::parse(&args("likes 1 2")).is_err());
        assert!(Cli::parse(&args("object 1 --all")).is_err());
        assert!(Cli::parse(&args("likes 1 --verbose")).is_err());
        assert!(Cli::parse(&args("likes 1 --tag")).is_err());
    }

    #[test]
    fn command_names() {
        assert_eq!(Command::AddToken.name(), "add-token");
        assert_eq!(
            Command::Object {
                target: "1".into()
            }
            .name(),
            "object"
        );
    }
}

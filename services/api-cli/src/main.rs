//! api-cli
//!
//! Command-line front end for the authenticated API client:
//! 1. Loads TOML config and the on-disk credential store
//! 2. Registers a session observer that logs renewals and expiry
//! 3. Runs one command (`login`, `logout`, `status`, `get`) through `ApiClient`

mod config;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use api_client::{ApiClient, ApiError, AuthObserver};
use common::Secret;
use session_auth::CredentialStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const USAGE: &str =
    "usage: api-cli [--config <path>] [--metrics] <login <email> | logout | status | get <path>>";

/// Logs session transitions. Token values are never logged.
struct SessionLogger;

impl AuthObserver for SessionLogger {
    fn on_credential_updated(&self, _access_token: &str) {
        info!("session renewed");
    }

    fn on_session_expired(&self, error: &ApiError) {
        warn!(error = %error, "session expired, log in again");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login { email: String },
    Logout,
    Status,
    Get { path: String },
}

impl Command {
    /// Parse the positional arguments, skipping the global flags.
    fn parse(args: &[String]) -> Result<Self> {
        let mut positional = Vec::new();
        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    iter.next();
                }
                "--metrics" => {}
                other => positional.push(other),
            }
        }

        match positional.as_slice() {
            ["login", email] => Ok(Command::Login {
                email: email.to_string(),
            }),
            ["logout"] => Ok(Command::Logout),
            ["status"] => Ok(Command::Status),
            ["get", path] => Ok(Command::Get {
                path: path.to_string(),
            }),
            _ => bail!(USAGE),
        }
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

    let args: Vec<String> = std::env::args().collect();
    let command = Command::parse(&args)?;

    let prometheus = if args.iter().any(|a| a == "--metrics") {
        Some(metrics::install_recorder().context("failed to install metrics recorder")?)
    } else {
        None
    };

    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url,
        timeout_secs = config.api.timeout_secs,
        credentials = %config.credentials.path.display(),
        "configuration loaded"
    );

    let store = CredentialStore::load(config.credentials.path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to open credential store at {}",
                config.credentials.path.display()
            )
        })?;

    let client = ApiClient::new(config.client_config(), Arc::new(store))
        .context("failed to build HTTP client")?;
    client.events().register(Arc::new(SessionLogger));

    let outcome = run(&client, command).await;

    if let Some(handle) = prometheus {
        eprintln!("{}", handle.render());
    }
    outcome
}

async fn run(client: &ApiClient, command: Command) -> Result<()> {
    match command {
        Command::Login { email } => {
            let password = std::env::var("API_PASSWORD")
                .map(Secret::new)
                .context("API_PASSWORD must be set to log in")?;
            client
                .login(&email, &password)
                .await
                .context("login failed")?;
            println!("logged in as {email}");
        }
        Command::Logout => {
            client.logout().await.context("logout failed")?;
            println!("logged out");
        }
        Command::Status => {
            if client.is_authenticated().await {
                println!("authenticated");
            } else {
                println!("not authenticated");
            }
        }
        Command::Get { path } => {
            let data: serde_json::Value = client
                .get(&path)
                .await
                .with_context(|| format!("GET {path} failed"))?;
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
    }
    Ok(())
}

//! Graphlink CLI
//!
//! Command-line interface for inspecting and driving a Graphlink connection.
//!
//! # Usage
//!
//! ```bash
//! # Hand over tokens obtained by an external authorization
//! graphlink connect <access-token> --refresh-token <refresh-token> --expires-in 3600
//!
//! # Show the connection status
//! graphlink status --format json
//!
//! # Keep the token fresh in the foreground
//! graphlink watch
//!
//! # Call a dependent endpoint with the managed token
//! graphlink probe https://graph.microsoft.com/v1.0/me
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use graphlink_cli::{
    config::{self, CliConfig},
    probe,
};
use graphlink_core::{
    ConnectionStatus, Credential, IdentityId, OAuthTokenEndpoint, Outcome, Session,
    TokenLifecycleManager,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "graphlink")]
#[command(about = "Credential lifecycle for Graphlink connections")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Identity to act on (overrides the configured identity)
    #[arg(short, long, global = true)]
    identity: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store tokens obtained by an external authorization
    Connect {
        /// Access token
        access_token: String,

        /// Refresh token
        #[arg(short, long)]
        refresh_token: Option<String>,

        /// Seconds until the access token expires
        #[arg(short, long, default_value_t = 3600)]
        expires_in: i64,
    },

    /// Show the connection status
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Refresh the access token now
    Refresh,

    /// Remove the stored credential
    Disconnect,

    /// Run the background refresh loop in the foreground
    Watch,

    /// GET a URL with the managed bearer token
    Probe {
        /// URL of the dependent endpoint
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(identity) = cli.identity {
        config.identity = identity;
    }

    init_logging(cli.verbose, &config.log_level);
    info!("Loaded configuration from {:?}", config.config_path);

    let manager = Arc::new(build_manager(&config)?);

    match cli.command {
        Commands::Connect {
            access_token,
            refresh_token,
            expires_in,
        } => connect(&manager, access_token, refresh_token, expires_in).await,
        Commands::Status { format } => status(&manager, &format).await,
        Commands::Refresh => refresh(&manager).await,
        Commands::Disconnect => disconnect(&manager).await,
        Commands::Watch => watch(manager).await,
        Commands::Probe { url } => run_probe(manager, &url).await,
    }
}

fn init_logging(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_manager(config: &CliConfig) -> Result<TokenLifecycleManager> {
    let provider_config = config.provider.to_provider_config();
    let provider = OAuthTokenEndpoint::new(&provider_config)
        .context("Invalid [provider] settings; set at least provider.client_id")?;
    let store = config.open_store()?;

    Ok(TokenLifecycleManager::new(
        IdentityId::new(config.identity.clone()),
        store,
        Arc::new(provider),
        config.lifecycle.clone(),
    ))
}

async fn connect(
    manager: &TokenLifecycleManager,
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
) -> Result<()> {
    if refresh_token.is_none() {
        eprintln!("Warning: without a refresh token the connection cannot be renewed");
    }

    let credential = Credential::new(
        access_token,
        refresh_token,
        Utc::now() + Duration::seconds(expires_in),
    );
    manager.connect(credential).await?;

    println!("Connected {} ({})", manager.identity(), manager.state());
    Ok(())
}

async fn status(manager: &TokenLifecycleManager, format: &str) -> Result<()> {
    manager.restore().await?;
    let status = manager.status();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        _ => print_status(manager.identity(), &status),
    }
    Ok(())
}

fn print_status(identity: &IdentityId, status: &ConnectionStatus) {
    println!("Identity:   {}", identity);
    println!("State:      {}", status.state);
    println!("Connected:  {}", status.is_connected);
    println!("Expired:    {}", status.is_expired);
    if let Some(expires_at) = status.expires_at {
        println!("Expires at: {}", expires_at.to_rfc3339());
    }
    println!(
        "Attempts:   {} recorded, {}",
        status.connection_attempt_count,
        if status.can_attempt_connection {
            "refresh allowed"
        } else {
            "rate limited"
        }
    );
    if let Some(error) = &status.last_error {
        println!("Last error: {}", error);
    }
}

async fn refresh(manager: &TokenLifecycleManager) -> Result<()> {
    manager.force_refresh().await?;
    let status = manager.status();
    println!(
        "Refreshed; token expires at {}",
        status
            .expires_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string())
    );
    Ok(())
}

async fn disconnect(manager: &TokenLifecycleManager) -> Result<()> {
    manager.disconnect().await?;
    println!("Disconnected {}", manager.identity());
    Ok(())
}

async fn watch(manager: Arc<TokenLifecycleManager>) -> Result<()> {
    let state = manager.restore().await?;
    if !state.holds_credential() {
        bail!("{} is not connected; run `graphlink connect` first", manager.identity());
    }

    let mut updates = manager.subscribe();
    let session = Session::with_manager(manager);
    info!("Watching connection. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                print_status(session.manager().identity(), &status);
                println!();
            }
        }
    }

    session.end();
    Ok(())
}

async fn run_probe(manager: Arc<TokenLifecycleManager>, url: &str) -> Result<()> {
    let session = Session::with_manager(manager);
    let client = reqwest::Client::new();

    let outcome = probe::probe(&session.resilient(), &client, url).await;
    session.end();

    match outcome {
        Outcome::Success(body) => {
            println!("{}", body);
            Ok(())
        }
        Outcome::Failure(err) => Err(anyhow!(err).context(format!("GET {} failed", url))),
        other => Err(anyhow!("unexpected probe outcome: {:?}", other)),
    }
}

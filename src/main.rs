use std::net::{IpAddr, Ipv4Addr};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use rategate::config::RateGateConfig;
use rategate::ratelimit::{LimiterManager, RateLimitAlgorithm, RateLimitKey};
use rategate::store;

/// Operator tool for inspecting and driving shared rate limit state.
#[derive(Debug, Parser)]
#[command(name = "rategate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Override the configured algorithm ("leaky_bucket" or "token_bucket")
    #[arg(short, long, global = true)]
    algorithm: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run admission checks for a key
    Allow {
        #[command(flatten)]
        key: KeyArgs,

        /// Number of consecutive checks
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },
    /// Show the bucket status of a key
    Status {
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Delete all state for a key
    Reset {
        #[command(flatten)]
        key: KeyArgs,
    },
    /// List the status of every tracked key
    Keys,
    /// Describe the active algorithm
    Info,
}

/// How the rate limit key is derived.
#[derive(Debug, Args)]
struct KeyArgs {
    /// Raw rate limit key; takes precedence over the other options
    key: Option<String>,

    /// Client address, also the fallback for --api-key and --user
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    ip: IpAddr,

    /// Key by API credential
    #[arg(long, conflicts_with = "user")]
    api_key: Option<String>,

    /// Key by user id
    #[arg(long)]
    user: Option<String>,
}

impl KeyArgs {
    fn resolve(&self) -> RateLimitKey {
        if let Some(key) = &self.key {
            return RateLimitKey::from(key.as_str());
        }
        if self.user.is_some() {
            return RateLimitKey::user(self.user.as_deref(), self.ip);
        }
        if self.api_key.is_some() {
            return RateLimitKey::api_key(self.api_key.as_deref(), self.ip);
        }
        RateLimitKey::ip(self.ip)
    }
}

#[derive(Debug, Serialize)]
struct AllowOutput<'a> {
    key: &'a str,
    allowed: bool,
    remaining: f64,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    debug!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = RateGateConfig::load(cli.config.as_deref()).context("loading configuration")?;
    info!(
        backend = ?config.store.backend,
        default_algorithm = %config.default_algorithm,
        "Configuration loaded"
    );

    let store = store::connect(&config.store)
        .await
        .context("connecting to state store")?;
    let manager = LimiterManager::from_config(store, &config);

    if let Some(name) = &cli.algorithm {
        if !manager.set_algorithm(name) {
            bail!(
                "unknown algorithm '{}', expected 'leaky_bucket' or 'token_bucket'",
                name
            );
        }
    }

    match cli.command {
        Command::Allow { key, count } => {
            let key = key.resolve();
            let mut results = Vec::new();
            for _ in 0..count {
                let decision = manager.allow(key.as_str()).await?;
                results.push(AllowOutput {
                    key: key.as_str(),
                    allowed: decision.allowed,
                    remaining: decision.remaining,
                });
            }
            print_json(&results)?;
        }
        Command::Status { key } => {
            let status = manager.status(key.resolve().as_str()).await?;
            print_json(&status)?;
        }
        Command::Reset { key } => {
            let key = key.resolve();
            manager.reset(key.as_str()).await?;
            info!(key = %key, algorithm = %manager.current_algorithm(), "Rate limit state reset");
        }
        Command::Keys => {
            let statuses = manager.list_statuses().await?;
            print_json(&statuses)?;
        }
        Command::Info => {
            print_json(&manager.algorithm_info())?;
        }
    }

    Ok(())
}

//! OneTimeShare CLI
//!
//! Create, read and probe one-time secrets directly against the relay store.

use clap::{Parser, Subcommand};
use console::{style, Emoji};
use onetimeshare_relay::schema::CreateSecretRequest;
use onetimeshare_relay::{ClientIdentity, RelayError, SecretService};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

mod config;

use config::CliConfig;

static LOCK: Emoji<'_, '_> = Emoji("🔐 ", "");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
static FIRE: Emoji<'_, '_> = Emoji("🔥 ", "[BURN] ");
static KEY: Emoji<'_, '_> = Emoji("🔑 ", "[KEY] ");

/// OneTimeShare CLI - burn-on-read secret relay
#[derive(Parser)]
#[command(name = "ots")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Redis URL, overriding config and environment
    #[arg(long, value_name = "URL")]
    redis_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the store answers
    Health,

    /// Store an already-encrypted secret
    Create {
        /// Lifetime in minutes
        #[arg(short, long)]
        ttl_minutes: Option<i64>,

        /// Number of permitted reads
        #[arg(short, long, default_value = "1")]
        max_views: i64,

        /// Contact notified when the secret is burned
        #[arg(short, long, value_name = "TARGET")]
        notify: Option<String>,

        /// Ciphertext, or `-` to read it from stdin
        ciphertext: Option<String>,
    },

    /// Consume one view of a secret
    Read {
        /// Secret token
        token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.unwrap_or_else(CliConfig::default_path);
    let mut config = CliConfig::load_or_default(&config_path)?;
    config.relay.apply_env(|key| std::env::var(key).ok());
    if let Some(url) = cli.redis_url {
        config.relay.store.url = url;
    }
    debug!(path = %config_path.display(), store = %config.relay.store.url, "configuration loaded");

    let service = SecretService::connect(&config.relay)
        .await
        .map_err(describe)?;
    let client = ClientIdentity::from(config.client_identity.as_str());

    match cli.command {
        Commands::Health => {
            let health = service.health_check().await.map_err(describe)?;
            if cli.json {
                print_json(&health)?;
            } else {
                println!("{} Store is {}", CHECK, style(&health.status).green());
            }
        }
        Commands::Create {
            ttl_minutes,
            max_views,
            notify,
            ciphertext,
        } => {
            let ciphertext = read_ciphertext(ciphertext)?;
            let mut request = CreateSecretRequest::new(ciphertext).with_max_views(max_views);
            if let Some(minutes) = ttl_minutes {
                request = request.with_ttl_minutes(minutes);
            }
            if let Some(target) = notify {
                request = request.with_notify_target(target);
            }

            let created = service
                .create_secret(&client, request)
                .await
                .map_err(describe)?;
            if cli.json {
                print_json(&created)?;
            } else {
                println!("{} Secret stored", LOCK);
                println!();
                println!("  {} Token: {}", KEY, style(&created.token).cyan());
                println!();
                println!(
                    "{}",
                    style(format!(
                        "It can be read {} time(s) before it is destroyed.",
                        max_views
                    ))
                    .dim()
                );
            }
        }
        Commands::Read { token } => {
            let secret = service
                .read_secret(&client, token.trim())
                .await
                .map_err(describe)?;
            if cli.json {
                print_json(&secret)?;
            } else {
                println!("{}", secret.ciphertext);
                eprintln!("{} {}", FIRE, style("One view consumed.").yellow());
            }
        }
    }

    Ok(())
}

fn read_ciphertext(arg: Option<String>) -> anyhow::Result<String> {
    match arg.as_deref() {
        Some("-") | None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf.trim_end_matches(['\r', '\n']).to_string())
        }
        Some(_) => Ok(arg.unwrap_or_default()),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn describe(err: RelayError) -> anyhow::Error {
    match err {
        RelayError::NotFound => anyhow::anyhow!("secret not found or already read"),
        RelayError::RateLimited { retry_after_secs } => {
            anyhow::anyhow!("rate limited, retry in {}s", retry_after_secs)
        }
        other => anyhow::Error::new(other),
    }
}

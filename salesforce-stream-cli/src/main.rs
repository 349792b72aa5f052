//! salesforce-stream - Salesforce Pub/Sub API subscriber and publisher
//!
//! # Usage
//!
//! ```bash
//! # Stream change events as JSON lines
//! salesforce-stream subscribe /data/AccountChangeEvent --earliest --changes
//!
//! # Resume after a known replay id
//! salesforce-stream subscribe /event/Order_Event__e --replay-id 12345
//!
//! # Publish one event, or one per stdin line
//! salesforce-stream publish /event/Order_Event__e '{"Order_Number__c":"42"}'
//! cat orders.jsonl | salesforce-stream publish /event/Order_Event__e
//! ```

mod cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};
use salesforce_stream::client::AuthFlow;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Salesforce Pub/Sub API subscriber and publisher
#[derive(Parser, Debug)]
#[command(name = "salesforce-stream")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the Connected App credentials JSON file
    #[arg(long, global = true, env = "SALESFORCE_CREDENTIALS", default_value = "credentials.json")]
    credentials: PathBuf,

    /// OAuth2 flow (client_credentials, username_password)
    #[arg(long, global = true, default_value = "client_credentials")]
    auth_flow: AuthFlow,

    /// Pub/Sub API endpoint
    #[arg(long, global = true, env = "SALESFORCE_PUBSUB_ENDPOINT")]
    endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Disable diagnostics on stderr
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream events from a topic as JSON lines on stdout
    Subscribe(cmd::subscribe::SubscribeArgs),

    /// Publish JSON messages to a platform event topic
    Publish(cmd::publish::PublishArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(&cli.log_level)?;
    }

    let options = cmd::ConnectOptions {
        credentials: cli.credentials,
        auth_flow: cli.auth_flow,
        endpoint: cli.endpoint,
    };

    match cli.command {
        Command::Subscribe(args) => cmd::subscribe::run(options, args).await,
        Command::Publish(args) => cmd::publish::run(options, args).await,
    }
}

/// Initialize the tracing subscriber on stderr, leaving stdout to records
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .with(filter)
        .init();

    Ok(())
}

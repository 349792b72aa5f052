pub mod publish;
pub mod subscribe;

use anyhow::{Context as _, Result};
use salesforce_stream::client::{self, AuthFlow, Client};
use salesforce_stream::pubsub::{Config, Connection};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Global options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub credentials: PathBuf,
    pub auth_flow: AuthFlow,
    pub endpoint: Option<String>,
}

/// Authenticates and opens a Pub/Sub connection.
pub async fn connect(options: ConnectOptions) -> Result<(Client, Connection)> {
    let auth_client = client::Builder::new()
        .credentials_path(options.credentials.clone())
        .auth_flow(options.auth_flow)
        .build()?
        .connect()
        .await
        .with_context(|| {
            format!(
                "authentication with {} failed",
                options.credentials.display()
            )
        })?;

    let mut config = Config::default();
    if let Some(endpoint) = options.endpoint {
        config = config.endpoint(endpoint);
    }
    info!(endpoint = %config.endpoint, "Connecting to Pub/Sub API");
    let connection = Connection::from_provider(config, &auth_client).await?;

    Ok((auth_client, connection))
}

/// Returns a token cancelled on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
        }
        token.cancel();
    });
    cancel
}

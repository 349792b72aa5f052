use super::{cancel_on_ctrl_c, connect, ConnectOptions};
use anyhow::{anyhow, Context as _, Result};
use clap::Args;
use salesforce_stream::client::Client;
use salesforce_stream::pubsub::{Connection, Error, Record, ReplayId};
use salesforce_stream::session::SessionProvider;
use serde_json::json;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, warn};

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Platform event topic, e.g. /event/Order_Event__e
    pub channel: String,

    /// JSON object to publish. Reads one object per stdin line when omitted.
    pub message: Option<String>,
}

pub async fn run(options: ConnectOptions, args: PublishArgs) -> Result<()> {
    let (mut auth_client, connection) = connect(options).await?;

    if let Some(message) = &args.message {
        let replay_id =
            publish_with_refresh(&connection, &mut auth_client, &args.channel, parse(message)?)
                .await?;
        return print_result(&args.channel, &replay_id);
    }

    let cancel = cancel_on_ctrl_c();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("failed to read stdin")?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let message = match parse(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Skipping invalid message");
                continue;
            }
        };
        match publish_with_refresh(&connection, &mut auth_client, &args.channel, message).await {
            Ok(replay_id) => print_result(&args.channel, &replay_id)?,
            Err(e) => error!(error = %e, topic = %args.channel, "Publish failed"),
        }
    }
    Ok(())
}

/// Publishes once and, if the session expired, once more after a refresh.
async fn publish_with_refresh(
    connection: &Connection,
    auth_client: &mut Client,
    topic_name: &str,
    message: Record,
) -> Result<ReplayId> {
    match connection.publish(topic_name, message.clone()).await {
        Err(Error::AuthExpired) => {
            warn!("Session expired, refreshing");
            auth_client.reconnect().await?;
            connection.refresh_session(&auth_client.session()?)?;
            Ok(connection.publish(topic_name, message).await?)
        }
        result => Ok(result?),
    }
}

fn parse(message: &str) -> Result<Record> {
    match serde_json::from_str(message).context("message is not valid JSON")? {
        serde_json::Value::Object(record) => Ok(record),
        other => Err(anyhow!("message must be a JSON object, got {other}")),
    }
}

fn print_result(topic_name: &str, replay_id: &ReplayId) -> Result<()> {
    let line = json!({"topic": topic_name, "replay_id": replay_id.to_string()});
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

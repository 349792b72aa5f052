use super::{cancel_on_ctrl_c, connect, ConnectOptions};
use anyhow::Result;
use clap::Args;
use salesforce_stream::pubsub::{JsonLines, Reconnector, ReplayId, SubscribeRequest};
use std::time::Duration;
use tracing::info;

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Topic, e.g. /data/AccountChangeEvent or /event/Order_Event__e
    pub channel: String,

    /// Start after this replay id (integer or base64)
    #[arg(long, conflicts_with = "earliest")]
    pub replay_id: Option<ReplayId>,

    /// Start from the earliest retained event
    #[arg(long)]
    pub earliest: bool,

    /// Keep only changed fields of change data capture events
    #[arg(long)]
    pub changes: bool,

    /// Seconds to wait before resubscribing after a recoverable failure
    #[arg(long, default_value_t = 0)]
    pub reconnect_delay: u64,
}

impl SubscribeArgs {
    fn request(&self) -> SubscribeRequest {
        let request = match (&self.replay_id, self.earliest) {
            (Some(replay_id), _) => SubscribeRequest::after(&self.channel, replay_id.clone()),
            (None, true) => SubscribeRequest::earliest(&self.channel),
            (None, false) => SubscribeRequest::new(&self.channel),
        };
        request.changes_only(self.changes)
    }
}

pub async fn run(options: ConnectOptions, args: SubscribeArgs) -> Result<()> {
    let (mut auth_client, connection) = connect(options).await?;
    let cancel = cancel_on_ctrl_c();
    let mut sink = JsonLines::stdout();

    let checkpoint = Reconnector::new(&connection, &mut auth_client)
        .reconnect_delay(Duration::from_secs(args.reconnect_delay))
        .run(args.request(), &mut sink, &cancel)
        .await?;

    if let Some(replay_id) = checkpoint {
        info!(replay_id = %replay_id, "Last processed replay id");
    }
    Ok(())
}

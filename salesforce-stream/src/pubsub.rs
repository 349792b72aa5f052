//! Salesforce Pub/Sub API for real-time event streaming.
//!
//! This module provides:
//! - Flow-controlled subscriptions to platform events and change data capture events
//! - Avro decoding of event payloads with bitmap change-field expansion
//! - Replay-id checkpointing and failure classification for resumable streams
//! - Single-event publishing to custom platform event topics
//!
//! # Example
//!
//! ```no_run
//! use salesforce_stream::client;
//! use salesforce_stream::pubsub::{Config, Connection, JsonLines, Reconnector, SubscribeRequest};
//! use std::path::PathBuf;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut auth_client = client::Builder::new()
//!     .credentials_path(PathBuf::from("credentials.json"))
//!     .build()?
//!     .connect()
//!     .await?;
//!
//! let connection = Connection::from_provider(Config::default(), &auth_client).await?;
//!
//! let request = SubscribeRequest::earliest("/data/AccountChangeEvent").changes_only(true);
//! let mut sink = JsonLines::stdout();
//! let checkpoint = Reconnector::new(&connection, &mut auth_client)
//!     .run(request, &mut sink, &CancellationToken::new())
//!     .await;
//! # Ok(())
//! # }
//! ```

mod bitmap;
mod bus;
mod cache;
mod changes;
mod codec;
mod config;
mod connection;
mod context;
mod error;
mod flow;
mod publish;
mod reconnect;
mod replay;
mod sink;
mod subscribe;

#[cfg(test)]
mod testing;

pub use bitmap::{changed_field_names, Error as BitmapError};
pub use bus::{EventBus, EventStream};
pub use cache::SchemaCache;
pub use codec::{Codec, Error as CodecError, Record};
pub use config::Config;
pub use connection::Connection;
pub use context::Context;
pub use error::{DecodeError, Error, Operation};
pub use flow::FlowControl;
pub use publish::apply_defaults;
pub use reconnect::{classify, Reconnector, Recovery, State};
pub use replay::{ParseReplayIdError, ReplayId};
pub use sink::{JsonLines, RecordSink};
pub use subscribe::{Interrupted, SubscribeRequest};

/// Re-export commonly used types from the generated gRPC client.
pub use salesforce_pubsub_v1::eventbus::v1::{
    ConsumerEvent, FetchRequest, FetchResponse, ProducerEvent, PublishRequest, PublishResponse,
    ReplayPreset, SchemaInfo, TopicInfo,
};

/// Constant for the Pub/Sub API endpoint.
pub use salesforce_pubsub_v1::eventbus::ENDPOINT;

//! Flow-controlled, resumable Salesforce Pub/Sub API client.
//!
//! This crate subscribes to Change Data Capture and custom platform event
//! topics over the gRPC Pub/Sub API, decodes their Avro payloads, expands
//! bitmap-encoded change indicators and tracks a replay-id checkpoint so a
//! subscription can be resumed after transport or session failures. It can
//! also publish single events to a topic.
//!
//! # Examples
//!
//! ```no_run
//! use salesforce_stream::client;
//! use salesforce_stream::pubsub::{Config, Connection, JsonLines, SubscribeRequest};
//! use salesforce_stream::session::SessionProvider;
//! use std::path::PathBuf;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = client::Builder::new()
//!     .credentials_path(PathBuf::from("credentials.json"))
//!     .build()?
//!     .connect()
//!     .await?;
//!
//! let connection = Connection::connect(Config::default(), &client.session()?).await?;
//!
//! let request = SubscribeRequest::new("/data/AccountChangeEvent").changes_only(true);
//! let mut sink = JsonLines::stdout();
//! let checkpoint = connection
//!     .subscribe(&request, &mut sink, &CancellationToken::new())
//!     .await;
//! # Ok(())
//! # }
//! ```

/// Number of events requested per fetch request (the flow-control appetite).
pub const DEFAULT_APPETITE: i32 = 5;

/// Default timeout for unary Pub/Sub calls (5 seconds).
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 5;

/// Default timeout for establishing the gRPC connection (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default connection timeout for OAuth2 authentication requests (15 seconds).
pub const DEFAULT_AUTH_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default request timeout for OAuth2 authentication requests (30 seconds).
pub const DEFAULT_AUTH_REQUEST_TIMEOUT_SECS: u64 = 30;

/// OAuth2 client authentication, used as the default session provider.
pub mod client;

/// Session capability consumed by the Pub/Sub engine.
pub mod session;

/// Salesforce Pub/Sub API subscription and publishing engine.
pub mod pubsub;

use super::{bitmap, codec};
use std::fmt;
use tracing::debug;

/// Trailer key carrying the Pub/Sub API error code.
pub(crate) const ERROR_CODE_TRAILER: &str = "error-code";

/// Error code reported when the session is expired or revoked.
pub(crate) const AUTH_ERROR_CODE: &str = "sfdc.platform.eventbus.grpc.service.auth.error";

/// Error code reported when the requested replay id cannot be resumed from.
pub(crate) const INVALID_REPLAY_ID_ERROR_CODE: &str =
    "sfdc.platform.eventbus.grpc.subscription.fetch.replayid.corrupted";

/// Topic operation guarded by the topic's permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Publishing events to the topic.
    Publish,
    /// Subscribing to the topic.
    Subscribe,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Publish => f.write_str("publish"),
            Operation::Subscribe => f.write_str("subscribe"),
        }
    }
}

/// Errors that can occur during Pub/Sub operations.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The session is expired or revoked. Refresh it and retry.
    #[error("Session expired")]
    AuthExpired,
    /// The server rejected the replay id the subscription started from.
    #[error("Invalid replay id")]
    InvalidReplayId,
    /// The user lacks the permission for the operation on the topic.
    #[error("Not allowed to {operation} topic {topic}")]
    CapabilityDenied {
        /// Topic name.
        topic: String,
        /// Denied operation.
        operation: Operation,
    },
    /// gRPC call failed for a reason the server did not classify.
    #[error("gRPC transport error: {0}")]
    Transport(Box<tonic::Status>),
    /// Failed to establish the gRPC channel.
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint that was dialed.
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },
    /// Failed to create valid gRPC metadata from session values.
    #[error("Invalid metadata value for gRPC headers: {source}")]
    InvalidMetadataValue {
        #[source]
        source: tonic::metadata::errors::InvalidMetadataValue,
    },
    /// The session provider could not supply or renew a session.
    #[error("Session provider error: {0}")]
    Session(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Fetching the topic before subscribing failed.
    #[error("Failed to fetch topic {topic}: {source}")]
    TopicFetch {
        /// Topic name that was requested.
        topic: String,
        #[source]
        source: Box<Error>,
    },
    /// Fetching a schema failed.
    #[error("Failed to fetch schema {schema_id}: {source}")]
    SchemaFetch {
        /// Schema id that was requested.
        schema_id: String,
        #[source]
        source: Box<Error>,
    },
    /// The schema returned by the server is not a usable Avro schema.
    #[error("Malformed schema {schema_id}: {source}")]
    MalformedSchema {
        /// Schema id of the offending schema.
        schema_id: String,
        #[source]
        source: codec::Error,
    },
    /// The server closed the subscription stream.
    #[error("Stream closed")]
    StreamClosed,
    /// Writing a decoded record to the sink failed.
    #[error("Failed to write record: {source}")]
    Sink {
        #[source]
        source: std::io::Error,
    },
    /// The server rejected a published event.
    #[error("Publish to {topic} rejected: {message}")]
    Publish {
        /// Topic name.
        topic: String,
        /// Error message embedded in the publish result.
        message: String,
    },
    /// The publish response did not contain a result for the event.
    #[error("No result returned when publishing to {topic}")]
    EmptyPublishResult {
        /// Topic name.
        topic: String,
    },
    /// The message could not be encoded with the topic's schema.
    #[error("Failed to encode message for {topic}: {source}")]
    Encode {
        /// Topic name.
        topic: String,
        #[source]
        source: codec::Error,
    },
    /// Failed to acquire a lock on shared connection state.
    #[error("Failed to acquire lock on {0}")]
    LockError(&'static str),
}

impl Error {
    /// Classifies a failed call by inspecting the `error-code` trailer.
    ///
    /// The status message is never consulted.
    pub(crate) fn from_status(status: tonic::Status) -> Self {
        log_trailers(&status);
        let codes: Vec<&str> = status
            .metadata()
            .get_all(ERROR_CODE_TRAILER)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();

        if codes.contains(&AUTH_ERROR_CODE) {
            Error::AuthExpired
        } else if codes.contains(&INVALID_REPLAY_ID_ERROR_CODE) {
            Error::InvalidReplayId
        } else {
            Error::Transport(Box::new(status))
        }
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::from_status(status)
    }
}

fn log_trailers(status: &tonic::Status) {
    let metadata = status.metadata();
    if metadata.is_empty() {
        debug!(code = ?status.code(), "No trailers returned");
        return;
    }
    for key_and_value in metadata.iter() {
        if let tonic::metadata::KeyAndValueRef::Ascii(key, value) = key_and_value {
            debug!(trailer = key.as_str(), value = ?value, "Trailer");
        }
    }
}

/// Failure to turn a single event into a record.
///
/// Decode errors are scoped to one event: the subscription logs them, skips
/// the event and keeps streaming.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    /// The payload does not match the writer schema.
    #[error("Failed to decode payload: {0}")]
    Payload(#[source] codec::Error),
    /// A change bitmap could not be expanded to field names.
    #[error("Failed to expand {field}: {source}")]
    Bitmap {
        /// Header list holding the bitmap (`changedFields`, `diffFields`, `nulledFields`).
        field: String,
        #[source]
        source: bitmap::Error,
    },
    /// The consumer event carried no producer event.
    #[error("Consumer event has no payload")]
    MissingEvent,
}

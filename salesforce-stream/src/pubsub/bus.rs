use super::error::Error;
use crate::session::Session;
use salesforce_pubsub_v1::eventbus::v1::{
    FetchRequest, FetchResponse, PublishRequest, PublishResponse, SchemaInfo, TopicInfo,
};
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Server half of a subscription: batches of events in server order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<FetchResponse, Error>> + Send>>;

/// The Pub/Sub RPC surface used by [`Connection`](super::Connection).
///
/// [`Context`](super::Context) implements it over gRPC. Failures are already
/// classified into [`Error`].
pub trait EventBus: Send + Sync {
    /// Retrieves topic metadata.
    fn get_topic(&self, topic_name: &str)
        -> impl Future<Output = Result<TopicInfo, Error>> + Send;

    /// Retrieves the schema for a schema id.
    fn get_schema(&self, schema_id: &str)
        -> impl Future<Output = Result<SchemaInfo, Error>> + Send;

    /// Opens a subscription. Fetch requests sent on the channel are
    /// forwarded to the server until the channel is closed.
    fn subscribe(
        &self,
        requests: mpsc::Receiver<FetchRequest>,
    ) -> impl Future<Output = Result<EventStream, Error>> + Send;

    /// Publishes a batch of events.
    fn publish(
        &self,
        request: PublishRequest,
    ) -> impl Future<Output = Result<PublishResponse, Error>> + Send;

    /// Replaces the authentication attached to subsequent calls.
    fn set_session(&self, session: &Session) -> Result<(), Error>;
}

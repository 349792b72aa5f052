use super::bus::EventBus;
use super::codec::Record;
use super::connection::Connection;
use super::error::{Error, Operation};
use super::replay::ReplayId;
use chrono::{DateTime, Utc};
use salesforce_pubsub_v1::eventbus::v1::{ProducerEvent, PublishRequest};
use serde_json::Value;
use tracing::{debug, info};

const CREATED_DATE: &str = "CreatedDate";
const CREATED_BY_ID: &str = "CreatedById";

/// Fills in the standard platform event fields the caller left out.
///
/// `CreatedDate` becomes `now` in epoch milliseconds and `CreatedById`
/// becomes `user_id`. A field that is missing or null counts as absent;
/// any other value is left unmodified.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use salesforce_stream::pubsub::{apply_defaults, Record};
///
/// let mut record = Record::new();
/// let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
/// apply_defaults(&mut record, now, Some("005xx000001Sv6A"));
/// assert_eq!(record["CreatedDate"], 1_700_000_000_000i64);
/// assert_eq!(record["CreatedById"], "005xx000001Sv6A");
/// ```
pub fn apply_defaults(record: &mut Record, now: DateTime<Utc>, user_id: Option<&str>) {
    if matches!(record.get(CREATED_DATE), None | Some(Value::Null)) {
        record.insert(CREATED_DATE.to_string(), Value::from(now.timestamp_millis()));
    }

    if let Some(user_id) = user_id {
        if matches!(record.get(CREATED_BY_ID), None | Some(Value::Null)) {
            record.insert(CREATED_BY_ID.to_string(), Value::from(user_id));
        }
    }
}

impl<B: EventBus> Connection<B> {
    /// Publishes a single event to a topic.
    ///
    /// The topic is fetched first and publishing is refused when the user
    /// lacks the permission. Missing `CreatedDate`/`CreatedById` fields are
    /// filled in with [`apply_defaults`] before encoding.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityDenied`] if the topic does not allow publishing
    /// - [`Error::Encode`] if the message does not fit the topic's schema
    /// - [`Error::Publish`] if the server rejected the event
    /// - [`Error::AuthExpired`] if the session must be refreshed
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self, message)))]
    pub async fn publish(&self, topic_name: &str, message: Record) -> Result<ReplayId, Error> {
        let topic = self.fetch_topic(topic_name).await?;
        if !topic.can_publish {
            return Err(Error::CapabilityDenied {
                topic: topic_name.to_string(),
                operation: Operation::Publish,
            });
        }

        let codec = self.fetch_codec(&topic.schema_id).await?;
        let mut message = message;
        apply_defaults(&mut message, Utc::now(), self.user_id()?.as_deref());
        let payload = codec.encode(&message).map_err(|source| Error::Encode {
            topic: topic_name.to_string(),
            source,
        })?;

        let request = PublishRequest {
            topic_name: topic_name.to_string(),
            events: vec![ProducerEvent {
                schema_id: topic.schema_id.clone(),
                payload,
                ..Default::default()
            }],
            ..Default::default()
        };
        let response = self.bus.publish(request).await?;
        debug!(rpc_id = %response.rpc_id, "Publish response received");

        let result = response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmptyPublishResult {
                topic: topic_name.to_string(),
            })?;
        if let Some(error) = result.error {
            return Err(Error::Publish {
                topic: topic_name.to_string(),
                message: error.msg,
            });
        }

        let replay_id = ReplayId::new(result.replay_id);
        info!(topic = topic_name, replay_id = %replay_id, "Published event");
        Ok(replay_id)
    }
}

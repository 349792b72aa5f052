use super::bus::EventBus;
use super::changes;
use super::codec::Record;
use super::connection::Connection;
use super::error::{DecodeError, Error, Operation};
use super::flow::FlowControl;
use super::reconnect::{classify, Recovery};
use super::replay::ReplayId;
use super::sink::RecordSink;
use salesforce_pubsub_v1::eventbus::v1::{ConsumerEvent, FetchRequest, ReplayPreset};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the outbound fetch request channel.
const FETCH_CHANNEL_CAPACITY: usize = 32;

/// Where and how to subscribe.
///
/// # Examples
///
/// ```
/// use salesforce_stream::pubsub::{ReplayPreset, SubscribeRequest};
///
/// let request = SubscribeRequest::earliest("/data/AccountChangeEvent").changes_only(true);
/// assert_eq!(request.replay_preset, ReplayPreset::Earliest);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Topic name, e.g. `/data/AccountChangeEvent` or `/event/Order_Event__e`.
    pub topic_name: String,
    /// Starting point of the subscription.
    pub replay_preset: ReplayPreset,
    /// Replay id to start after. Only sent with [`ReplayPreset::Custom`].
    pub replay_id: Option<ReplayId>,
    /// Expand change bitmaps and keep only changed fields.
    pub changes_only: bool,
}

impl SubscribeRequest {
    /// Subscribes at the tip of the stream.
    pub fn new(topic_name: impl Into<String>) -> Self {
        Self {
            topic_name: topic_name.into(),
            replay_preset: ReplayPreset::Latest,
            replay_id: None,
            changes_only: false,
        }
    }

    /// Subscribes from the earliest retained event.
    pub fn earliest(topic_name: impl Into<String>) -> Self {
        Self {
            replay_preset: ReplayPreset::Earliest,
            ..Self::new(topic_name)
        }
    }

    /// Subscribes after `replay_id`.
    pub fn after(topic_name: impl Into<String>, replay_id: ReplayId) -> Self {
        Self {
            replay_preset: ReplayPreset::Custom,
            replay_id: Some(replay_id),
            ..Self::new(topic_name)
        }
    }

    pub fn changes_only(mut self, changes_only: bool) -> Self {
        self.changes_only = changes_only;
        self
    }

    /// Returns the request to resume with after an interruption.
    ///
    /// A checkpoint always wins over the original preset.
    pub fn resume_from(&self, checkpoint: Option<&ReplayId>) -> Self {
        match checkpoint {
            Some(replay_id) => Self {
                replay_preset: ReplayPreset::Custom,
                replay_id: Some(replay_id.clone()),
                ..self.clone()
            },
            None => self.clone(),
        }
    }

    pub(crate) fn initial_fetch(&self, appetite: i32) -> FetchRequest {
        let replay_id = match (self.replay_preset, &self.replay_id) {
            (ReplayPreset::Custom, Some(replay_id)) => replay_id.as_bytes().to_vec(),
            _ => Vec::new(),
        };
        FetchRequest {
            topic_name: self.topic_name.clone(),
            replay_preset: self.replay_preset as i32,
            replay_id,
            num_requested: appetite,
            ..Default::default()
        }
    }
}

/// A subscription ended with an error.
///
/// Carries the checkpoint to resume from: the replay id of the last
/// processed event, or the replay id the subscription started after.
#[derive(thiserror::Error, Debug)]
#[error("Subscription interrupted: {error}")]
pub struct Interrupted {
    /// Last processed replay id.
    pub checkpoint: Option<ReplayId>,
    /// Whether this attempt processed at least one event.
    pub progressed: bool,
    /// Error that ended the stream.
    #[source]
    pub error: Error,
}

impl Interrupted {
    /// How the caller should recover.
    ///
    /// A schema that cannot be fetched for the first batch of an attempt
    /// blocks the subscription for good and is fatal. Later schema fetch
    /// failures follow [`classify`].
    pub fn recovery(&self) -> Recovery {
        match self.error {
            Error::SchemaFetch { .. } if !self.progressed => Recovery::Abort,
            _ => classify(&self.error),
        }
    }
}

impl<B: EventBus> Connection<B> {
    /// Subscribes to a topic and streams decoded records into `sink`.
    ///
    /// Each record is emitted before the checkpoint advances past it, so a
    /// resumed subscription may deliver the last record again but never
    /// skips one. Events that fail to decode are logged and skipped.
    ///
    /// Returns the last checkpoint when `cancel` fires. Any error that ends
    /// the stream is returned together with the checkpoint.
    #[cfg_attr(
        feature = "trace",
        tracing::instrument(skip_all, fields(topic = %request.topic_name))
    )]
    pub async fn subscribe<S: RecordSink + ?Sized>(
        &self,
        request: &SubscribeRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<Option<ReplayId>, Interrupted> {
        let mut checkpoint = request.replay_id.clone();
        match self.stream(request, sink, cancel, &mut checkpoint).await {
            Ok(()) => Ok(checkpoint),
            Err(error) => Err(Interrupted {
                progressed: checkpoint != request.replay_id,
                checkpoint,
                error,
            }),
        }
    }

    async fn stream<S: RecordSink + ?Sized>(
        &self,
        request: &SubscribeRequest,
        sink: &mut S,
        cancel: &CancellationToken,
        checkpoint: &mut Option<ReplayId>,
    ) -> Result<(), Error> {
        let topic = self
            .fetch_topic(&request.topic_name)
            .await
            .map_err(|e| match e {
                Error::AuthExpired => Error::AuthExpired,
                other => Error::TopicFetch {
                    topic: request.topic_name.clone(),
                    source: Box::new(other),
                },
            })?;
        if !topic.can_subscribe {
            return Err(Error::CapabilityDenied {
                topic: request.topic_name.clone(),
                operation: Operation::Subscribe,
            });
        }

        let appetite = self.config.appetite;
        let (sender, receiver) = mpsc::channel(FETCH_CHANNEL_CAPACITY);
        sender
            .send(request.initial_fetch(appetite))
            .await
            .map_err(|_| Error::StreamClosed)?;

        info!(
            topic = %request.topic_name,
            preset = ?request.replay_preset,
            replay_id = ?checkpoint.as_ref().map(ToString::to_string),
            "Subscribing to topic"
        );
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            stream = self.bus.subscribe(receiver) => stream?,
        };
        let mut flow = FlowControl::new(appetite);

        loop {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(topic = %request.topic_name, "Subscription cancelled");
                    return Ok(());
                }
                next = stream.next() => match next {
                    Some(response) => response?,
                    None => return Err(Error::StreamClosed),
                },
            };
            debug!(
                events = response.events.len(),
                pending = response.pending_num_requested,
                "Received batch"
            );

            for event in &response.events {
                if cancel.is_cancelled() {
                    return Ok(());
                }

                let replay_id = ReplayId::new(event.replay_id.clone());
                match self.decode(event, request.changes_only).await? {
                    Ok(record) => sink
                        .emit(&record, &replay_id)
                        .map_err(|source| Error::Sink { source })?,
                    Err(error) => {
                        warn!(replay_id = %replay_id, error = %error, "Skipping undecodable event");
                    }
                }
                debug!(topic = %request.topic_name, replay_id = %replay_id, "Checkpoint advanced");
                *checkpoint = Some(replay_id);

                if let Some(num_requested) = flow.consume() {
                    debug!(num_requested, "Sending next fetch request");
                    let fetch = FetchRequest {
                        topic_name: request.topic_name.clone(),
                        num_requested,
                        ..Default::default()
                    };
                    if sender.send(fetch).await.is_err() {
                        warn!("Fetch request not sent: request stream closed");
                    }
                }
            }
        }
    }

    /// Decodes one event. The outer error ends the stream; the inner error
    /// only skips the event.
    async fn decode(
        &self,
        event: &ConsumerEvent,
        changes_only: bool,
    ) -> Result<Result<Record, DecodeError>, Error> {
        let Some(producer) = event.event.as_ref() else {
            return Ok(Err(DecodeError::MissingEvent));
        };
        let codec = self.fetch_codec(&producer.schema_id).await?;
        let record = match codec.decode(&producer.payload) {
            Ok(record) => record,
            Err(e) => return Ok(Err(DecodeError::Payload(e))),
        };
        if changes_only {
            Ok(changes::project(record, codec.field_names()))
        } else {
            Ok(Ok(record))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::config::Config;
    use crate::pubsub::testing::{
        batch, consumer_event, MockBus, ACCOUNT_CHANGE_EVENT_SCHEMA,
    };
    use salesforce_pubsub_v1::eventbus::v1::ProducerEvent;
    use serde_json::{json, Value};
    use std::io;

    const TOPIC: &str = "/data/AccountChangeEvent";

    /// Collects emitted records in memory.
    #[derive(Default)]
    struct Recorder {
        records: Vec<(Record, ReplayId)>,
        fail: bool,
    }

    impl RecordSink for Recorder {
        fn emit(&mut self, record: &Record, replay_id: &ReplayId) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.records.push((record.clone(), replay_id.clone()));
            Ok(())
        }
    }

    fn account_event(name: &str, changed_fields: &str, replay_id: u64) -> ConsumerEvent {
        consumer_event(
            ACCOUNT_CHANGE_EVENT_SCHEMA,
            "abc123",
            json!({
                "ChangeEventHeader": {
                    "entityName": "Account",
                    "changeType": "UPDATE",
                    "changedFields": [changed_fields],
                    "diffFields": [],
                    "nulledFields": []
                },
                "Name": name,
                "Rating": "Hot"
            }),
            replay_id,
        )
    }

    fn connection(bus: MockBus) -> Connection<MockBus> {
        Connection::new(bus.with_schema("abc123", ACCOUNT_CHANGE_EVENT_SCHEMA), Config::default())
    }

    fn replay(n: u64) -> ReplayId {
        ReplayId::new(n.to_be_bytes().to_vec())
    }

    #[test]
    fn test_initial_fetch_sends_replay_id_only_for_custom() {
        let request = SubscribeRequest::earliest(TOPIC);
        let fetch = request.initial_fetch(5);
        assert_eq!(fetch.replay_preset, ReplayPreset::Earliest as i32);
        assert_eq!(fetch.num_requested, 5);
        assert!(fetch.replay_id.is_empty());

        let request = SubscribeRequest::after(TOPIC, replay(7));
        let fetch = request.initial_fetch(5);
        assert_eq!(fetch.replay_preset, ReplayPreset::Custom as i32);
        assert_eq!(fetch.replay_id, 7u64.to_be_bytes().to_vec());
    }

    #[test]
    fn test_resume_from_checkpoint_forces_custom() {
        let request = SubscribeRequest::earliest(TOPIC).changes_only(true);
        assert_eq!(request.resume_from(None), request);

        let resumed = request.resume_from(Some(&replay(3)));
        assert_eq!(resumed.replay_preset, ReplayPreset::Custom);
        assert_eq!(resumed.replay_id, Some(replay(3)));
        assert!(resumed.changes_only);
    }

    #[tokio::test]
    async fn test_change_events_end_to_end() {
        let bus = MockBus::new()
            .with_topic(TOPIC, "abc123", true, false)
            .with_subscription(vec![batch(vec![
                account_event("Acme", "0x03", 1),
                account_event("Globex", "0x03", 2),
            ])]);
        let connection = connection(bus);
        let request = SubscribeRequest::earliest(TOPIC).changes_only(true);
        let mut sink = crate::pubsub::JsonLines::new(Vec::new());

        let result = connection
            .subscribe(&request, &mut sink, &CancellationToken::new())
            .await;

        let interrupted = result.unwrap_err();
        assert!(matches!(interrupted.error, Error::StreamClosed));
        assert_eq!(interrupted.checkpoint, Some(replay(2)));
        assert_eq!(connection.bus.schema_fetches(), 1);

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert_eq!(
                line["ChangeEventHeader"]["changedFields"],
                json!(["ChangeEventHeader", "Name"])
            );
            assert!(line.get("Rating").is_none());
        }
        assert_eq!(lines[0]["Name"], "Acme");
        assert_eq!(lines[1]["Name"], "Globex");

        let requests = connection.bus.fetch_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0].topic_name, TOPIC);
        assert_eq!(requests[0][0].replay_preset, ReplayPreset::Earliest as i32);
        assert_eq!(requests[0][0].num_requested, 5);
    }

    #[tokio::test]
    async fn test_batches_emitted_in_order() {
        let bus = MockBus::new()
            .with_topic(TOPIC, "abc123", true, false)
            .with_subscription(vec![
                batch(vec![
                    account_event("First", "0x02", 1),
                    account_event("Second", "0x02", 2),
                ]),
                batch(vec![account_event("Third", "0x02", 3)]),
            ]);
        let connection = connection(bus);
        let mut sink = Recorder::default();

        let _ = connection
            .subscribe(&SubscribeRequest::new(TOPIC), &mut sink, &CancellationToken::new())
            .await;

        let names: Vec<&Value> = sink.records.iter().map(|(r, _)| &r["Name"]).collect();
        assert_eq!(names, vec!["First", "Second", "Third"]);
        let replay_ids: Vec<ReplayId> = sink.records.into_iter().map(|(_, id)| id).collect();
        assert_eq!(replay_ids, vec![replay(1), replay(2), replay(3)]);
    }

    #[tokio::test]
    async fn test_flow_control_replenishes_once_per_depletion() {
        let events = (1..=6).map(|n| account_event("Acme", "0x02", n)).collect();
        let bus = MockBus::new()
            .with_topic(TOPIC, "abc123", true, false)
            .with_subscription(vec![batch(events)]);
        let connection = connection(bus);

        let _ = connection
            .subscribe(&SubscribeRequest::new(TOPIC), &mut Recorder::default(), &CancellationToken::new())
            .await;

        let requests = connection.bus.fetch_requests().remove(0);
        let requested: Vec<i32> = requests.iter().map(|r| r.num_requested).collect();
        assert_eq!(requested, vec![5, 5, 5]);
        assert!(requests[1..].iter().all(|r| r.replay_id.is_empty()));
    }

    #[tokio::test]
    async fn test_decode_error_skips_event_and_advances_checkpoint() {
        let broken = ConsumerEvent {
            event: Some(ProducerEvent {
                schema_id: "abc123".to_string(),
                payload: vec![0xff],
                ..Default::default()
            }),
            replay_id: 2u64.to_be_bytes().to_vec(),
        };
        let bus = MockBus::new()
            .with_topic(TOPIC, "abc123", true, false)
            .with_subscription(vec![batch(vec![
                account_event("Acme", "0x02", 1),
                broken,
                account_event("Globex", "0xFF", 3),
                account_event("Initech", "0x02", 4),
            ])]);
        let connection = connection(bus);
        let mut sink = Recorder::default();
        let request = SubscribeRequest::new(TOPIC).changes_only(true);

        let interrupted = connection
            .subscribe(&request, &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.records[1].0["Name"], "Initech");
        assert_eq!(interrupted.checkpoint, Some(replay(4)));
    }

    #[tokio::test]
    async fn test_subscribe_denied() {
        let bus = MockBus::new().with_topic(TOPIC, "abc123", false, true);
        let connection = connection(bus);

        let interrupted = connection
            .subscribe(&SubscribeRequest::new(TOPIC), &mut Recorder::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            interrupted.error,
            Error::CapabilityDenied {
                operation: Operation::Subscribe,
                ..
            }
        ));
        assert_eq!(interrupted.recovery(), Recovery::Abort);
    }

    #[tokio::test]
    async fn test_auth_error_returns_checkpoint() {
        let bus = MockBus::new()
            .with_topic(TOPIC, "abc123", true, false)
            .with_subscription(vec![
                batch(vec![account_event("Acme", "0x02", 9)]),
                Err(Error::AuthExpired),
            ]);
        let connection = connection(bus);

        let interrupted = connection
            .subscribe(&SubscribeRequest::new(TOPIC), &mut Recorder::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(interrupted.error, Error::AuthExpired));
        assert_eq!(interrupted.checkpoint, Some(replay(9)));
        assert_eq!(interrupted.recovery(), Recovery::RefreshSession);
    }

    #[tokio::test]
    async fn test_sink_failure_is_fatal() {
        let bus = MockBus::new()
            .with_topic(TOPIC, "abc123", true, false)
            .with_subscription(vec![batch(vec![account_event("Acme", "0x02", 1)])]);
        let connection = connection(bus);
        let mut sink = Recorder {
            fail: true,
            ..Default::default()
        };

        let interrupted = connection
            .subscribe(&SubscribeRequest::after(TOPIC, replay(0)), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(interrupted.error, Error::Sink { .. }));
        assert_eq!(interrupted.checkpoint, Some(replay(0)));
        assert_eq!(interrupted.recovery(), Recovery::Abort);
    }

    #[tokio::test]
    async fn test_cancel_returns_checkpoint() {
        let bus = MockBus::new()
            .with_topic(TOPIC, "abc123", true, false)
            .with_open_subscription(vec![batch(vec![account_event("Acme", "0x02", 1)])]);
        let connection = connection(bus);
        let cancel = CancellationToken::new();
        let mut sink = Recorder::default();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let result = connection
            .subscribe(&SubscribeRequest::new(TOPIC), &mut sink, &cancel)
            .await;

        assert_eq!(result.unwrap(), Some(replay(1)));
        assert_eq!(sink.records.len(), 1);
    }

    /// Cancels the subscription from inside the first `emit`.
    struct CancelOnEmit {
        cancel: CancellationToken,
        records: Vec<ReplayId>,
    }

    impl RecordSink for CancelOnEmit {
        fn emit(&mut self, _record: &Record, replay_id: &ReplayId) -> io::Result<()> {
            self.records.push(replay_id.clone());
            self.cancel.cancel();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_no_event_emitted_after_cancel() {
        let bus = MockBus::new()
            .with_topic(TOPIC, "abc123", true, false)
            .with_open_subscription(vec![batch(vec![
                account_event("Acme", "0x02", 1),
                account_event("Globex", "0x02", 2),
            ])]);
        let connection = connection(bus);
        let cancel = CancellationToken::new();
        let mut sink = CancelOnEmit {
            cancel: cancel.clone(),
            records: Vec::new(),
        };

        let checkpoint = connection
            .subscribe(&SubscribeRequest::new(TOPIC), &mut sink, &cancel)
            .await
            .unwrap();

        assert_eq!(sink.records, vec![replay(1)]);
        assert_eq!(checkpoint, Some(replay(1)));
    }

    #[tokio::test]
    async fn test_progress_reported_on_interruption() {
        let bus = MockBus::new()
            .with_topic(TOPIC, "abc123", true, false)
            .with_subscription(vec![Err(Error::StreamClosed)])
            .with_subscription(vec![
                batch(vec![account_event("Acme", "0x02", 1)]),
                Err(Error::StreamClosed),
            ]);
        let connection = connection(bus);
        let request = SubscribeRequest::new(TOPIC);

        let idle = connection
            .subscribe(&request, &mut Recorder::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!idle.progressed);

        let moved = connection
            .subscribe(&request, &mut Recorder::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(moved.progressed);
        assert_eq!(moved.checkpoint, Some(replay(1)));
    }
}

//! In-memory [`EventBus`] for tests.

use super::bus::{EventBus, EventStream};
use super::codec::Codec;
use super::error::Error;
use crate::session::Session;
use salesforce_pubsub_v1::eventbus::v1::{
    ConsumerEvent, FetchRequest, FetchResponse, ProducerEvent, PublishRequest, PublishResponse,
    PublishResult, SchemaInfo, TopicInfo,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

pub(crate) const ACCOUNT_CHANGE_EVENT_SCHEMA: &str = r#"{
    "type": "record",
    "name": "AccountChangeEvent",
    "namespace": "com.sforce.eventbus",
    "fields": [
        {"name": "ChangeEventHeader", "type": {
            "type": "record",
            "name": "ChangeEventHeader",
            "fields": [
                {"name": "entityName", "type": "string"},
                {"name": "changeType", "type": {
                    "type": "enum", "name": "ChangeType",
                    "symbols": ["CREATE", "UPDATE", "DELETE", "UNDELETE"]
                }},
                {"name": "changedFields", "type": {"type": "array", "items": "string"}},
                {"name": "diffFields", "type": {"type": "array", "items": "string"}},
                {"name": "nulledFields", "type": {"type": "array", "items": "string"}}
            ]
        }},
        {"name": "Name", "type": ["null", "string"], "default": null},
        {"name": "Rating", "type": ["null", "string"], "default": null},
        {"name": "Photo", "type": ["null", "bytes"], "default": null}
    ]
}"#;

pub(crate) const ORDER_EVENT_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Order_Event__e",
    "namespace": "com.sforce.eventbus",
    "fields": [
        {"name": "CreatedDate", "type": "long"},
        {"name": "CreatedById", "type": "string"},
        {"name": "Order_Number__c", "type": ["null", "string"], "default": null}
    ]
}"#;

/// One scripted subscription: the stream items, and whether the stream
/// stays open after the last one.
struct Script {
    items: Vec<Result<FetchResponse, Error>>,
    hold_open: bool,
}

#[derive(Default)]
pub(crate) struct MockBus {
    topics: HashMap<String, TopicInfo>,
    schemas: HashMap<String, String>,
    scripts: Mutex<VecDeque<Script>>,
    publish_responses: Mutex<VecDeque<Result<PublishResponse, Error>>>,
    receivers: Mutex<Vec<mpsc::Receiver<FetchRequest>>>,
    published: Mutex<Vec<PublishRequest>>,
    sessions: Mutex<Vec<Session>>,
    schema_fetches: AtomicUsize,
    topic_fetches: AtomicUsize,
    expired: AtomicBool,
}

impl MockBus {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_topic(
        mut self,
        topic_name: &str,
        schema_id: &str,
        can_subscribe: bool,
        can_publish: bool,
    ) -> Self {
        self.topics.insert(
            topic_name.to_string(),
            TopicInfo {
                topic_name: topic_name.to_string(),
                schema_id: schema_id.to_string(),
                can_subscribe,
                can_publish,
                ..Default::default()
            },
        );
        self
    }

    pub(crate) fn with_schema(mut self, schema_id: &str, schema_json: &str) -> Self {
        self.schemas
            .insert(schema_id.to_string(), schema_json.to_string());
        self
    }

    /// Queues a subscription whose stream ends after `items`.
    pub(crate) fn with_subscription(self, items: Vec<Result<FetchResponse, Error>>) -> Self {
        self.push_script(items, false);
        self
    }

    /// Queues a subscription whose stream stays open after `items`.
    pub(crate) fn with_open_subscription(self, items: Vec<Result<FetchResponse, Error>>) -> Self {
        self.push_script(items, true);
        self
    }

    pub(crate) fn with_publish_response(self, response: Result<PublishResponse, Error>) -> Self {
        self.publish_responses
            .lock()
            .unwrap()
            .push_back(response);
        self
    }

    fn push_script(&self, items: Vec<Result<FetchResponse, Error>>, hold_open: bool) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script { items, hold_open });
    }

    /// Rejects every call with [`Error::AuthExpired`] until the next
    /// [`set_session`](EventBus::set_session).
    pub(crate) fn expire_session(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    pub(crate) fn schema_fetches(&self) -> usize {
        self.schema_fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn topic_fetches(&self) -> usize {
        self.topic_fetches.load(Ordering::SeqCst)
    }

    /// Fetch requests received so far, one list per subscription.
    pub(crate) fn fetch_requests(&self) -> Vec<Vec<FetchRequest>> {
        let mut receivers = self.receivers.lock().unwrap();
        receivers
            .iter_mut()
            .map(|receiver| {
                let mut requests = Vec::new();
                while let Ok(request) = receiver.try_recv() {
                    requests.push(request);
                }
                requests
            })
            .collect()
    }

    pub(crate) fn published(&self) -> Vec<PublishRequest> {
        self.published.lock().unwrap().clone()
    }

    pub(crate) fn sessions(&self) -> Vec<Session> {
        self.sessions.lock().unwrap().clone()
    }

    fn check_session(&self) -> Result<(), Error> {
        if self.expired.load(Ordering::SeqCst) {
            Err(Error::AuthExpired)
        } else {
            Ok(())
        }
    }
}

impl EventBus for MockBus {
    async fn get_topic(&self, topic_name: &str) -> Result<TopicInfo, Error> {
        self.check_session()?;
        self.topic_fetches.fetch_add(1, Ordering::SeqCst);
        self.topics.get(topic_name).cloned().ok_or_else(|| {
            Error::Transport(Box::new(tonic::Status::not_found(format!(
                "topic {topic_name} not found"
            ))))
        })
    }

    async fn get_schema(&self, schema_id: &str) -> Result<SchemaInfo, Error> {
        self.check_session()?;
        self.schema_fetches.fetch_add(1, Ordering::SeqCst);
        self.schemas
            .get(schema_id)
            .map(|schema_json| SchemaInfo {
                schema_json: schema_json.clone(),
                schema_id: schema_id.to_string(),
                ..Default::default()
            })
            .ok_or_else(|| {
                Error::Transport(Box::new(tonic::Status::not_found(format!(
                    "schema {schema_id} not found"
                ))))
            })
    }

    async fn subscribe(&self, requests: mpsc::Receiver<FetchRequest>) -> Result<EventStream, Error> {
        self.check_session()?;
        self.receivers.lock().unwrap().push(requests);
        let script = self.scripts.lock().unwrap().pop_front();
        let Some(Script { items, hold_open }) = script else {
            return Ok(Box::pin(tokio_stream::empty::<Result<FetchResponse, Error>>()));
        };
        if hold_open {
            Ok(Box::pin(
                tokio_stream::iter(items).chain(tokio_stream::pending()),
            ))
        } else {
            Ok(Box::pin(tokio_stream::iter(items)))
        }
    }

    async fn publish(&self, request: PublishRequest) -> Result<PublishResponse, Error> {
        self.check_session()?;
        self.published.lock().unwrap().push(request);
        let scripted = self.publish_responses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(PublishResponse {
                results: vec![PublishResult {
                    replay_id: vec![0, 0, 0, 0, 0, 0, 0, 1],
                    ..Default::default()
                }],
                ..Default::default()
            })
        })
    }

    fn set_session(&self, session: &Session) -> Result<(), Error> {
        self.sessions.lock().unwrap().push(session.clone());
        self.expired.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn session() -> Session {
    Session {
        access_token: "token".to_string(),
        instance_url: "https://test.salesforce.com".to_string(),
        tenant_id: "00Dxx0000001gPL".to_string(),
        user_id: Some("005xx000001Sv6A".to_string()),
    }
}

/// Encodes `record` with `schema_json` into a consumer event.
pub(crate) fn consumer_event(
    schema_json: &str,
    schema_id: &str,
    record: serde_json::Value,
    replay_id: u64,
) -> ConsumerEvent {
    let codec = Codec::parse(schema_json).unwrap();
    let payload = codec.encode(record.as_object().unwrap()).unwrap();
    ConsumerEvent {
        event: Some(ProducerEvent {
            schema_id: schema_id.to_string(),
            payload,
            ..Default::default()
        }),
        replay_id: replay_id.to_be_bytes().to_vec(),
    }
}

pub(crate) fn batch(events: Vec<ConsumerEvent>) -> Result<FetchResponse, Error> {
    Ok(FetchResponse {
        events,
        ..Default::default()
    })
}

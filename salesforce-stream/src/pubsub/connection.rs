use super::bus::EventBus;
use super::cache::SchemaCache;
use super::codec::Codec;
use super::config::Config;
use super::context::Context;
use super::error::Error;
use crate::session::{Session, SessionProvider};
use salesforce_pubsub_v1::eventbus::v1::TopicInfo;
use std::sync::{Arc, RwLock};
use tracing::info;

/// A Pub/Sub connection with its schema cache.
///
/// Subscriptions and publishes on the same connection share the cache.
/// See [`subscribe`](Connection::subscribe) and [`publish`](Connection::publish).
#[derive(Debug)]
pub struct Connection<B = Context> {
    pub(super) bus: B,
    pub(super) cache: SchemaCache,
    pub(super) config: Config,
    user_id: RwLock<Option<String>>,
}

impl Connection<Context> {
    /// Connects to the endpoint in `config` with `session`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the endpoint cannot be reached and
    /// [`Error::InvalidMetadataValue`] if the session cannot be sent as headers.
    pub async fn connect(config: Config, session: &Session) -> Result<Self, Error> {
        let context = Context::connect(&config, session).await?;
        Ok(Self::new(context, config).with_user_id(session.user_id.clone()))
    }

    /// Connects with the provider's current session.
    pub async fn from_provider<P: SessionProvider>(
        config: Config,
        provider: &P,
    ) -> Result<Self, Error> {
        let session = provider
            .session()
            .map_err(|e| Error::Session(Box::new(e)))?;
        Self::connect(config, &session).await
    }
}

impl<B: EventBus> Connection<B> {
    /// Wraps an already authenticated bus.
    pub fn new(bus: B, config: Config) -> Self {
        Self {
            bus,
            cache: SchemaCache::new(),
            config,
            user_id: RwLock::new(None),
        }
    }

    /// Sets the user id injected as `CreatedById` on publish.
    pub fn with_user_id(self, user_id: Option<String>) -> Self {
        Self {
            user_id: RwLock::new(user_id),
            ..self
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Retrieves topic metadata. Never cached.
    pub async fn fetch_topic(&self, topic_name: &str) -> Result<TopicInfo, Error> {
        self.bus.get_topic(topic_name).await
    }

    /// Returns the schema JSON for `schema_id` from the cache or the server.
    pub async fn fetch_schema(&self, schema_id: &str) -> Result<Arc<serde_json::Value>, Error> {
        self.cache.schema(&self.bus, schema_id).await
    }

    /// Returns the codec for `schema_id` from the cache or the server.
    pub async fn fetch_codec(&self, schema_id: &str) -> Result<Arc<Codec>, Error> {
        self.cache.codec(&self.bus, schema_id).await
    }

    /// Applies a refreshed session to subsequent calls.
    pub fn refresh_session(&self, session: &Session) -> Result<(), Error> {
        self.bus.set_session(session)?;
        let mut user_id = self
            .user_id
            .write()
            .map_err(|_| Error::LockError("user id"))?;
        if session.user_id.is_some() {
            user_id.clone_from(&session.user_id);
        }
        info!("Session refreshed");
        Ok(())
    }

    pub(super) fn user_id(&self) -> Result<Option<String>, Error> {
        let user_id = self
            .user_id
            .read()
            .map_err(|_| Error::LockError("user id"))?;
        Ok(user_id.clone())
    }
}

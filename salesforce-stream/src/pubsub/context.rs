use super::bus::{EventBus, EventStream};
use super::config::Config;
use super::error::Error;
use crate::session::Session;
use salesforce_pubsub_v1::eventbus::v1::pub_sub_client::PubSubClient;
use salesforce_pubsub_v1::eventbus::v1::{
    FetchRequest, PublishRequest, PublishResponse, SchemaInfo, SchemaRequest, TopicInfo,
    TopicRequest,
};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tracing::debug;

#[derive(Debug, Clone)]
struct AuthHeaders {
    access_token: AsciiMetadataValue,
    instance_url: AsciiMetadataValue,
    tenant_id: AsciiMetadataValue,
}

impl AuthHeaders {
    fn from_session(session: &Session) -> Result<Self, Error> {
        let parse = |value: &str| -> Result<AsciiMetadataValue, Error> {
            value
                .parse()
                .map_err(|e| Error::InvalidMetadataValue { source: e })
        };
        Ok(Self {
            access_token: parse(&session.access_token)?,
            instance_url: parse(&session.instance_url)?,
            tenant_id: parse(&session.tenant_id)?,
        })
    }
}

/// Attaches the session headers to every call.
///
/// Headers are shared with the owning [`Context`] so a refreshed session
/// applies to calls made after the refresh.
#[derive(Debug, Clone)]
pub(crate) struct ContextInterceptor {
    headers: Arc<RwLock<AuthHeaders>>,
}

impl tonic::service::Interceptor for ContextInterceptor {
    fn call(
        &mut self,
        mut request: tonic::Request<()>,
    ) -> Result<tonic::Request<()>, tonic::Status> {
        let headers = self
            .headers
            .read()
            .map_err(|_| tonic::Status::internal("session headers lock poisoned"))?;
        request
            .metadata_mut()
            .insert("accesstoken", headers.access_token.to_owned());
        request
            .metadata_mut()
            .insert("instanceurl", headers.instance_url.to_owned());
        request
            .metadata_mut()
            .insert("tenantid", headers.tenant_id.to_owned());
        Ok(request)
    }
}

type InterceptedClient = PubSubClient<
    tonic::service::interceptor::InterceptedService<Channel, ContextInterceptor>,
>;

/// Pub/Sub API context for making gRPC calls.
///
/// Wraps the generated client with authentication and per-call timeouts and
/// classifies failed calls into [`Error`].
///
/// # Examples
///
/// ```no_run
/// use salesforce_stream::pubsub::{Config, Context};
/// use salesforce_stream::session::Session;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Session {
///     access_token: "00D...".to_string(),
///     instance_url: "https://mydomain.my.salesforce.com".to_string(),
///     tenant_id: "00Dxx0000001gPL".to_string(),
///     user_id: None,
/// };
/// let context = Context::connect(&Config::default(), &session).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    pubsub: InterceptedClient,
    headers: Arc<RwLock<AuthHeaders>>,
    call_timeout: Duration,
}

impl Context {
    /// Creates a context over an existing channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMetadataValue`] if a session value cannot be
    /// sent as a gRPC header.
    pub fn new(channel: Channel, session: &Session, call_timeout: Duration) -> Result<Self, Error> {
        let headers = Arc::new(RwLock::new(AuthHeaders::from_session(session)?));
        let interceptor = ContextInterceptor {
            headers: Arc::clone(&headers),
        };
        let pubsub = PubSubClient::with_interceptor(channel, interceptor);

        Ok(Context {
            pubsub,
            headers,
            call_timeout,
        })
    }

    /// Dials the configured endpoint and creates a context.
    ///
    /// TLS with the platform's native roots is used for `https` endpoints.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn connect(config: &Config, session: &Session) -> Result<Self, Error> {
        let connect_error = |source| Error::Connect {
            endpoint: config.endpoint.clone(),
            source,
        };

        let mut endpoint = Endpoint::from_shared(config.endpoint.clone())
            .map_err(connect_error)?
            .connect_timeout(config.connect_timeout);
        if config.endpoint.starts_with("https://") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(connect_error)?;
        }

        debug!(endpoint = %config.endpoint, "Connecting to Pub/Sub API");
        let channel = endpoint.connect().await.map_err(connect_error)?;
        Self::new(channel, session, config.call_timeout)
    }

    fn unary<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(self.call_timeout);
        request
    }
}

impl EventBus for Context {
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn get_topic(&self, topic_name: &str) -> Result<TopicInfo, Error> {
        let request = self.unary(TopicRequest {
            topic_name: topic_name.to_string(),
        });
        self.pubsub
            .clone()
            .get_topic(request)
            .await
            .map(tonic::Response::into_inner)
            .map_err(Error::from_status)
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn get_schema(&self, schema_id: &str) -> Result<SchemaInfo, Error> {
        let request = self.unary(SchemaRequest {
            schema_id: schema_id.to_string(),
        });
        self.pubsub
            .clone()
            .get_schema(request)
            .await
            .map(tonic::Response::into_inner)
            .map_err(Error::from_status)
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    async fn subscribe(&self, requests: mpsc::Receiver<FetchRequest>) -> Result<EventStream, Error> {
        let response = self
            .pubsub
            .clone()
            .subscribe(ReceiverStream::new(requests))
            .await
            .map_err(Error::from_status)?;
        let stream = response.into_inner().map(|item| item.map_err(Error::from_status));
        Ok(Box::pin(stream))
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    async fn publish(&self, request: PublishRequest) -> Result<PublishResponse, Error> {
        let request = self.unary(request);
        self.pubsub
            .clone()
            .publish(request)
            .await
            .map(tonic::Response::into_inner)
            .map_err(Error::from_status)
    }

    fn set_session(&self, session: &Session) -> Result<(), Error> {
        let headers = AuthHeaders::from_session(session)?;
        let mut current = self
            .headers
            .write()
            .map_err(|_| Error::LockError("session headers"))?;
        *current = headers;
        Ok(())
    }
}

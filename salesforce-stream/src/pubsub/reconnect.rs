//! Recovery of interrupted subscriptions.
//!
//! [`classify`] maps the error that ended a stream to the action the caller
//! should take. [`Reconnector`] drives that loop: it refreshes the session
//! when it expired, resumes from the last checkpoint after recoverable
//! failures and gives up on fatal ones.

use super::bus::EventBus;
use super::connection::Connection;
use super::error::Error;
use super::replay::ReplayId;
use super::sink::RecordSink;
use super::subscribe::{Interrupted, SubscribeRequest};
use crate::session::SessionProvider;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What to do after a subscription was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Refresh the session, then resume from the checkpoint.
    RefreshSession,
    /// Resume from the checkpoint.
    Resume,
    /// Stop. Retrying cannot succeed.
    Abort,
}

/// Classifies the error that ended a subscription.
///
/// A failed topic fetch is fatal: the topic is missing or unreadable and
/// retrying cannot change that. Expired sessions surface as
/// [`Error::AuthExpired`] rather than [`Error::TopicFetch`].
pub fn classify(error: &Error) -> Recovery {
    match error {
        Error::AuthExpired => Recovery::RefreshSession,
        Error::Transport(_)
        | Error::Connect { .. }
        | Error::SchemaFetch { .. }
        | Error::StreamClosed => Recovery::Resume,
        Error::InvalidReplayId
        | Error::TopicFetch { .. }
        | Error::CapabilityDenied { .. }
        | Error::MalformedSchema { .. }
        | Error::Sink { .. }
        | Error::Session(_)
        | Error::InvalidMetadataValue { .. }
        | Error::Publish { .. }
        | Error::EmptyPublishResult { .. }
        | Error::Encode { .. }
        | Error::LockError(_) => Recovery::Abort,
    }
}

/// Lifecycle of a supervised subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Connecting,
    Streaming,
    /// Interrupted by an error that allows resuming.
    Recoverable,
    /// Interrupted by an error that does not allow resuming.
    Fatal,
    Reconnecting,
    /// Cancelled by the caller.
    Terminated,
}

/// Keeps a subscription running across recoverable failures.
///
/// # Examples
///
/// ```no_run
/// use salesforce_stream::client;
/// use salesforce_stream::pubsub::{Config, Connection, JsonLines, Reconnector, SubscribeRequest};
/// use std::path::PathBuf;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut auth_client = client::Builder::new()
///     .credentials_path(PathBuf::from("credentials.json"))
///     .build()?
///     .connect()
///     .await?;
/// let connection = Connection::from_provider(Config::default(), &auth_client).await?;
///
/// let checkpoint = Reconnector::new(&connection, &mut auth_client)
///     .reconnect_delay(Duration::from_secs(1))
///     .run(
///         SubscribeRequest::new("/event/Order_Event__e"),
///         &mut JsonLines::stdout(),
///         &CancellationToken::new(),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Reconnector<'a, B, P> {
    connection: &'a Connection<B>,
    provider: &'a mut P,
    reconnect_delay: Duration,
    state: State,
}

impl<'a, B: EventBus, P: SessionProvider> Reconnector<'a, B, P> {
    pub fn new(connection: &'a Connection<B>, provider: &'a mut P) -> Self {
        Self {
            connection,
            provider,
            reconnect_delay: Duration::ZERO,
            state: State::Idle,
        }
    }

    /// Sets the pause between attempts. Defaults to none.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Subscribes and resubscribes until cancelled or a fatal error occurs.
    ///
    /// Returns the last checkpoint on cancellation.
    ///
    /// # Errors
    ///
    /// Returns the fatal error together with the last checkpoint. A failed
    /// session refresh is fatal.
    pub async fn run<S: RecordSink + ?Sized>(
        &mut self,
        request: SubscribeRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<Option<ReplayId>, Interrupted> {
        let mut checkpoint = request.replay_id.clone();
        self.state = State::Connecting;

        loop {
            let attempt = request.resume_from(checkpoint.as_ref());
            self.state = State::Streaming;

            let interrupted = match self.connection.subscribe(&attempt, sink, cancel).await {
                Ok(last) => {
                    self.state = State::Terminated;
                    return Ok(last);
                }
                Err(interrupted) => interrupted,
            };
            checkpoint.clone_from(&interrupted.checkpoint);

            match interrupted.recovery() {
                Recovery::Abort => {
                    self.state = State::Fatal;
                    error!(
                        error = %interrupted.error,
                        replay_id = ?checkpoint.as_ref().map(ToString::to_string),
                        "Subscription failed"
                    );
                    return Err(interrupted);
                }
                Recovery::RefreshSession => {
                    self.state = State::Recoverable;
                    warn!("Session expired, refreshing");
                    if let Err(error) = self.refresh().await {
                        self.state = State::Fatal;
                        return Err(Interrupted {
                            checkpoint,
                            progressed: interrupted.progressed,
                            error,
                        });
                    }
                }
                Recovery::Resume => {
                    self.state = State::Recoverable;
                    warn!(error = %interrupted.error, "Subscription interrupted, resuming");
                }
            }

            self.state = State::Reconnecting;
            if !self.reconnect_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.reconnect_delay) => {}
                }
            }
            if cancel.is_cancelled() {
                self.state = State::Terminated;
                return Ok(checkpoint);
            }
            info!(
                replay_id = ?checkpoint.as_ref().map(ToString::to_string),
                "Resubscribing"
            );
        }
    }

    async fn refresh(&mut self) -> Result<(), Error> {
        self.provider
            .refresh()
            .await
            .map_err(|e| Error::Session(Box::new(e)))?;
        let session = self
            .provider
            .session()
            .map_err(|e| Error::Session(Box::new(e)))?;
        self.connection.refresh_session(&session)
    }
}

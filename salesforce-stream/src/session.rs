//! Session capability consumed by the Pub/Sub engine.
//!
//! The engine never acquires or stores credentials itself. It reads the
//! current [`Session`] from a [`SessionProvider`] and asks the provider to
//! [`refresh`](SessionProvider::refresh) when the server reports an expired
//! session.

use std::future::Future;

/// Authentication material attached to every Pub/Sub call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// OAuth2 access token.
    pub access_token: String,
    /// Instance URL of the org (e.g. `https://mydomain.my.salesforce.com`).
    pub instance_url: String,
    /// Organization ID.
    pub tenant_id: String,
    /// ID of the authenticated user, used as the default `CreatedById` on publish.
    pub user_id: Option<String>,
}

/// Supplies sessions and knows how to renew them.
pub trait SessionProvider {
    /// Error returned when no session is available or the refresh fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the current session.
    fn session(&self) -> Result<Session, Self::Error>;

    /// Obtains a fresh session, replacing the current one.
    fn refresh(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Errors returned by [`StaticSession`].
#[derive(thiserror::Error, Debug)]
pub enum StaticSessionError {
    /// A static session cannot be renewed.
    #[error("Static session cannot be refreshed")]
    RefreshUnsupported,
}

/// A fixed session obtained elsewhere (e.g. from an existing CLI login).
#[derive(Debug, Clone)]
pub struct StaticSession(Session);

impl StaticSession {
    /// Wraps an existing session.
    pub fn new(session: Session) -> Self {
        Self(session)
    }
}

impl SessionProvider for StaticSession {
    type Error = StaticSessionError;

    fn session(&self) -> Result<Session, Self::Error> {
        Ok(self.0.clone())
    }

    async fn refresh(&mut self) -> Result<(), Self::Error> {
        Err(StaticSessionError::RefreshUnsupported)
    }
}

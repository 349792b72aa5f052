use crate::session::{Session, SessionProvider};
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, ClientId, ClientSecret, ExtraTokenFields, StandardRevocableToken, TokenResponse,
    TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};

/// Default OAuth2 authorization endpoint path.
const DEFAULT_AUTHORIZE_PATH: &str = "/services/oauth2/authorize";

/// Default OAuth2 token endpoint path.
const DEFAULT_TOKEN_PATH: &str = "/services/oauth2/token";

/// Salesforce-specific fields returned alongside the access token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SalesforceTokenFields {
    /// Identity URL of the form `https://login.salesforce.com/id/<org id>/<user id>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Instance URL the token is valid for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
}

impl ExtraTokenFields for SalesforceTokenFields {}

/// Salesforce OAuth2 token response.
pub type SalesforceTokenResponse =
    oauth2::StandardTokenResponse<SalesforceTokenFields, BasicTokenType>;

type SalesforceOAuthClient = oauth2::Client<
    BasicErrorResponse,
    SalesforceTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

/// Identity of the authenticated user, parsed from the token's identity URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Organization ID.
    pub org_id: String,
    /// User ID.
    pub user_id: String,
}

impl Identity {
    /// Parses an identity URL (`.../id/<org id>/<user id>`).
    pub fn from_url(identity_url: &str) -> Result<Self, Error> {
        let url = url::Url::parse(identity_url).map_err(|source| Error::ParseUrl { source })?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        match segments.as_slice() {
            [.., "id", org_id, user_id] => Ok(Self {
                org_id: org_id.to_string(),
                user_id: user_id.to_string(),
            }),
            _ => Err(Error::InvalidIdentity(identity_url.to_string())),
        }
    }
}

/// Session material obtained by the last successful token exchange.
#[derive(Debug, Clone)]
pub(crate) struct TokenState {
    access_token: String,
    instance_url: String,
    identity: Option<Identity>,
}

impl TokenState {
    /// Creates the token state from a token response, falling back to the
    /// configured instance URL when the response does not carry one.
    pub(crate) fn new(
        token_response: &SalesforceTokenResponse,
        fallback_instance_url: &str,
    ) -> Result<Self, Error> {
        let extra = token_response.extra_fields();
        let identity = extra.id.as_deref().map(Identity::from_url).transpose()?;

        Ok(Self {
            access_token: token_response.access_token().secret().to_string(),
            instance_url: extra
                .instance_url
                .clone()
                .unwrap_or_else(|| fallback_instance_url.to_string()),
            identity,
        })
    }
}

/// Errors that can occur during client operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to read credentials file from disk.
    #[error("Failed to read credentials file at {path}: {source}")]
    ReadCredentials {
        /// Path to the credentials file that failed to read.
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse credentials JSON.
    #[error("Failed to parse credentials JSON: {source}")]
    ParseCredentials {
        #[source]
        source: serde_json::Error,
    },
    /// Invalid URL format in credentials or token response.
    #[error("Invalid URL format: {source}")]
    ParseUrl {
        #[source]
        source: url::ParseError,
    },
    /// The identity URL does not end in `/id/<org id>/<user id>`.
    #[error("Unrecognized identity URL: {0}")]
    InvalidIdentity(String),
    /// OAuth2 token exchange failed during authentication.
    #[error("OAuth2 token exchange failed: {0:?}")]
    TokenExchange(Box<dyn std::error::Error + Send + Sync>),
    /// Required builder parameter was not provided.
    #[error("Missing required attribute: {}", _0)]
    MissingRequiredAttribute(String),
    /// Invalid credentials for the selected auth flow.
    #[error("Invalid credentials for {flow}: {message}")]
    InvalidCredentials {
        /// The authentication flow that failed validation.
        flow: String,
        /// Description of what's missing or invalid.
        message: String,
    },
    /// Unknown auth flow name.
    #[error("Unknown auth flow: {0}")]
    UnknownAuthFlow(String),
    /// The client has not been connected yet.
    #[error("Client is not connected")]
    NotConnected,
    /// Failed to acquire lock on token state.
    #[error("Failed to acquire lock on token state")]
    LockError,
}

/// OAuth2 authentication flow type.
///
/// ## Client Credentials
///
/// Server-to-server integration where the connected app acts on its own
/// behalf. This is the default flow.
///
/// **Required credentials:** `client_id`, `client_secret`
///
/// ## Username-Password
///
/// Resource Owner Password Credentials flow. Only use it when there is a high
/// degree of trust between the user and the application.
///
/// **Required credentials:** `client_id`, `client_secret`, `username`, `password`
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlow {
    /// OAuth2 Client Credentials flow for server-to-server authentication.
    #[default]
    ClientCredentials,
    /// OAuth2 Resource Owner Password Credentials flow for user authentication.
    UsernamePassword,
}

impl FromStr for AuthFlow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client_credentials" | "client-credentials" => Ok(Self::ClientCredentials),
            "username_password" | "username-password" | "password" => Ok(Self::UsernamePassword),
            other => Err(Error::UnknownAuthFlow(other.to_string())),
        }
    }
}

/// Salesforce OAuth2 credentials from a Connected App.
///
/// ```
/// use salesforce_stream::client::Credentials;
///
/// let creds = Credentials {
///     client_id: "your_client_id".to_string(),
///     client_secret: Some("your_client_secret".to_string()),
///     username: None,
///     password: None,
///     instance_url: "https://your-instance.my.salesforce.com".to_string(),
///     tenant_id: "your_tenant_id".to_string(),
/// };
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Credentials {
    /// Client ID from the Connected App (Consumer Key).
    pub client_id: String,
    /// Client Secret from the Connected App (Consumer Secret).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Username for [`AuthFlow::UsernamePassword`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password for [`AuthFlow::UsernamePassword`], with the security token appended if required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Salesforce login or instance URL.
    pub instance_url: String,
    /// Organization ID (15 or 18 character Salesforce Org ID).
    pub tenant_id: String,
}

/// Source for loading credentials.
#[derive(Debug, Clone)]
pub enum CredentialsFrom {
    /// Load credentials from a JSON file.
    Path(PathBuf),
    /// Use credentials provided directly.
    Value(Credentials),
}

impl CredentialsFrom {
    fn load(&self) -> Result<Credentials, Error> {
        match self {
            CredentialsFrom::Value(creds) => Ok(creds.clone()),
            CredentialsFrom::Path(path) => {
                let credentials_string =
                    fs::read_to_string(path).map_err(|e| Error::ReadCredentials {
                        path: path.clone(),
                        source: e,
                    })?;
                serde_json::from_str(&credentials_string)
                    .map_err(|e| Error::ParseCredentials { source: e })
            }
        }
    }
}

/// OAuth2 client for Salesforce API authentication.
///
/// Implements [`SessionProvider`]: [`refresh`](SessionProvider::refresh)
/// performs a fresh token exchange with the configured flow.
///
/// ```no_run
/// use salesforce_stream::client::{self, AuthFlow, Credentials};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = client::Builder::new()
///     .credentials(Credentials {
///         client_id: "your_client_id".to_string(),
///         client_secret: Some("your_client_secret".to_string()),
///         username: Some("user@example.com".to_string()),
///         password: Some("your_password".to_string()),
///         instance_url: "https://login.salesforce.com".to_string(),
///         tenant_id: "your_tenant_id".to_string(),
///     })
///     .auth_flow(AuthFlow::UsernamePassword)
///     .build()?
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    credentials_from: CredentialsFrom,
    auth_flow: AuthFlow,
    pub(crate) token_state: Option<Arc<RwLock<TokenState>>>,
    /// Organization ID.
    pub tenant_id: Option<String>,
}

impl Client {
    /// Validates that required credential fields are present for the selected auth flow.
    fn validate_credentials(&self, credentials: &Credentials) -> Result<(), Error> {
        let flow_name = format!("{:?}", self.auth_flow);
        let missing = |field: &str| Error::InvalidCredentials {
            flow: flow_name.clone(),
            message: format!("{field} is required"),
        };

        if credentials.client_secret.is_none() {
            return Err(missing("client_secret"));
        }
        if self.auth_flow == AuthFlow::UsernamePassword {
            if credentials.username.is_none() {
                return Err(missing("username"));
            }
            if credentials.password.is_none() {
                return Err(missing("password"));
            }
        }
        Ok(())
    }

    /// Connects to Salesforce and exchanges credentials for an access token.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Credentials file cannot be read ([`Error::ReadCredentials`])
    /// - Credentials JSON is invalid ([`Error::ParseCredentials`])
    /// - Required fields are missing for the auth flow ([`Error::InvalidCredentials`])
    /// - Instance URL is malformed ([`Error::ParseUrl`])
    /// - OAuth2 token exchange fails ([`Error::TokenExchange`])
    pub async fn connect(mut self) -> Result<Self, Error> {
        self.authenticate().await?;
        Ok(self)
    }

    /// Forces a new token by re-running the configured OAuth2 flow.
    ///
    /// Use this when the Pub/Sub API reports an expired or revoked session.
    pub async fn reconnect(&mut self) -> Result<(), Error> {
        info!("Refreshing Salesforce session");
        self.authenticate().await
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    async fn authenticate(&mut self) -> Result<(), Error> {
        let credentials = self.credentials_from.load()?;
        self.validate_credentials(&credentials)?;

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(crate::DEFAULT_AUTH_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(crate::DEFAULT_AUTH_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::TokenExchange(Box::new(e)))?;

        let token_response = self.exchange(&credentials, &http_client).await?;
        let token_state = TokenState::new(&token_response, &credentials.instance_url)?;
        debug!(instance_url = %token_state.instance_url, "Obtained access token");

        self.token_state = Some(Arc::new(RwLock::new(token_state)));
        self.tenant_id = Some(credentials.tenant_id);
        Ok(())
    }

    /// Performs the token exchange for the configured flow.
    async fn exchange(
        &self,
        credentials: &Credentials,
        http_client: &reqwest::Client,
    ) -> Result<SalesforceTokenResponse, Error> {
        let client_secret = credentials.client_secret.clone().ok_or_else(|| {
            Error::InvalidCredentials {
                flow: format!("{:?}", self.auth_flow),
                message: "client_secret is required".to_string(),
            }
        })?;

        let oauth2_client = SalesforceOAuthClient::new(ClientId::new(credentials.client_id.clone()))
            .set_client_secret(ClientSecret::new(client_secret))
            .set_auth_uri(
                AuthUrl::new(format!(
                    "{}{}",
                    credentials.instance_url, DEFAULT_AUTHORIZE_PATH
                ))
                .map_err(|e| Error::ParseUrl { source: e })?,
            )
            .set_token_uri(
                TokenUrl::new(format!(
                    "{}{}",
                    credentials.instance_url, DEFAULT_TOKEN_PATH
                ))
                .map_err(|e| Error::ParseUrl { source: e })?,
            );

        match self.auth_flow {
            AuthFlow::ClientCredentials => oauth2_client
                .exchange_client_credentials()
                .request_async(http_client)
                .await
                .map_err(|e| Error::TokenExchange(Box::new(e))),
            AuthFlow::UsernamePassword => {
                let username = credentials.username.clone().unwrap_or_default();
                let password = credentials.password.clone().unwrap_or_default();
                oauth2_client
                    .exchange_password(
                        &oauth2::ResourceOwnerUsername::new(username),
                        &oauth2::ResourceOwnerPassword::new(password),
                    )
                    .request_async(http_client)
                    .await
                    .map_err(|e| Error::TokenExchange(Box::new(e)))
            }
        }
    }
}

impl SessionProvider for Client {
    type Error = Error;

    fn session(&self) -> Result<Session, Error> {
        let token_state_arc = self.token_state.as_ref().ok_or(Error::NotConnected)?;
        let state = token_state_arc.read().map_err(|_| Error::LockError)?;
        let tenant_id = self
            .tenant_id
            .clone()
            .or_else(|| state.identity.as_ref().map(|i| i.org_id.clone()))
            .ok_or_else(|| Error::MissingRequiredAttribute("tenant_id".to_string()))?;

        Ok(Session {
            access_token: state.access_token.clone(),
            instance_url: state.instance_url.clone(),
            tenant_id,
            user_id: state.identity.as_ref().map(|i| i.user_id.clone()),
        })
    }

    async fn refresh(&mut self) -> Result<(), Error> {
        self.reconnect().await
    }
}

/// Builder for constructing a [`Client`].
///
/// ```no_run
/// use salesforce_stream::client;
/// use std::path::PathBuf;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = client::Builder::new()
///     .credentials_path(PathBuf::from("credentials.json"))
///     .build()?
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Builder {
    credentials_from: Option<CredentialsFrom>,
    auth_flow: Option<AuthFlow>,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets credentials to load from a JSON file.
    ///
    /// ```json
    /// {
    ///   "client_id": "your_client_id",
    ///   "client_secret": "your_client_secret",
    ///   "instance_url": "https://your-instance.my.salesforce.com",
    ///   "tenant_id": "your_tenant_id"
    /// }
    /// ```
    pub fn credentials_path(mut self, path: PathBuf) -> Self {
        self.credentials_from = Some(CredentialsFrom::Path(path));
        self
    }

    /// Sets credentials directly.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials_from = Some(CredentialsFrom::Value(credentials));
        self
    }

    /// Sets the OAuth2 authentication flow. Defaults to [`AuthFlow::ClientCredentials`].
    pub fn auth_flow(mut self, auth_flow: AuthFlow) -> Self {
        self.auth_flow = Some(auth_flow);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns an error if credentials were not provided via either
    /// [`credentials_path`](Self::credentials_path) or [`credentials`](Self::credentials).
    pub fn build(self) -> Result<Client, Error> {
        Ok(Client {
            credentials_from: self.credentials_from.ok_or_else(|| {
                Error::MissingRequiredAttribute("credentials or credentials_path".to_string())
            })?,
            auth_flow: self.auth_flow.unwrap_or_default(),
            token_state: None,
            tenant_id: None,
        })
    }
}

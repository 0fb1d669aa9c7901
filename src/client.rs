//! Identity-scoped clients for one remote service.
//!
//! A [`ClientFactory`] describes a remote service (name, base target, shared
//! default headers). Each [`ClientHandle`] it builds is bound to exactly one
//! [`IdentityBinding`] and owns an immutable copy of its configuration, so two
//! handles for the same service never see each other's credentials.
//!
//! The wire transport is pluggable through [`Transport`]; a handle can route
//! every request through a [`PolicyHandle`] with [`ClientHandle::with_policy`].

use crate::error::ResilienceError;
use crate::policy::PolicyHandle;
use crate::route::{HeaderSource, RequestHeaders};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Secret presented to the remote service.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// `Authorization: Basic base64(username:password)`.
    Basic { username: String, password: String },
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// Arbitrary header carrying a key.
    ApiKey { header: String, value: String },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credential::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
            Credential::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("value", &"<redacted>")
                .finish(),
        }
    }
}

impl Credential {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credential::Basic { username: username.into(), password: password.into() }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Credential::Bearer(token.into())
    }

    pub fn api_key(header: impl Into<String>, value: impl Into<String>) -> Self {
        Credential::ApiKey { header: header.into(), value: value.into() }
    }

    fn apply(&self, headers: &mut RequestHeaders) {
        match self {
            Credential::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                headers.insert("authorization", format!("Basic {encoded}"));
            }
            Credential::Bearer(token) => headers.insert("authorization", format!("Bearer {token}")),
            Credential::ApiKey { header, value } => headers.insert(header, value.clone()),
        }
    }
}

/// A label naming an identity plus the credential it presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityBinding {
    label: String,
    credential: Credential,
}

impl IdentityBinding {
    pub fn new(label: impl Into<String>, credential: Credential) -> Self {
        Self { label: label.into(), credential }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }
}

/// A request about to be handed to a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub target: String,
    pub path: String,
    pub headers: RequestHeaders,
}

impl OutboundRequest {
    /// `target` and `path` joined with exactly one `/`.
    pub fn url(&self) -> String {
        format!("{}/{}", self.target.trim_end_matches('/'), self.path.trim_start_matches('/'))
    }
}

/// Response returned by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Errors surfaced by a transport or by a non-2xx response.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("connection to {target} failed: {reason}")]
    Connect { target: String, reason: String },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("transport error: {0}")]
    Other(String),
}

/// Sends requests over the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: OutboundRequest) -> Result<Response, TransportError>;
}

/// Builds identity-bound clients for one remote service.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    name: String,
    target: String,
    default_headers: RequestHeaders,
}

impl ClientFactory {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self { name: name.into(), target: target.into(), default_headers: RequestHeaders::new() }
    }

    /// Header sent by every client this factory builds. Credentials win on conflict.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn build_client(&self, identity: IdentityBinding) -> ClientHandle {
        let mut headers = self.default_headers.clone();
        identity.credential.apply(&mut headers);
        tracing::debug!(
            target: "lifeline::client",
            client = %self.name,
            identity = %identity.label,
            "client built"
        );
        ClientHandle {
            config: Arc::new(ClientConfig {
                client: self.name.clone(),
                identity: identity.label,
                target: self.target.clone(),
                headers,
            }),
            policy: None,
        }
    }

    /// One client per identity, keyed by label. A repeated label keeps the last binding.
    pub fn build_all<I>(&self, identities: I) -> BTreeMap<String, ClientHandle>
    where
        I: IntoIterator<Item = IdentityBinding>,
    {
        identities
            .into_iter()
            .map(|identity| (identity.label.clone(), self.build_client(identity)))
            .collect()
    }
}

struct ClientConfig {
    client: String,
    identity: String,
    target: String,
    headers: RequestHeaders,
}

// Header values may carry the credential, so only names are shown.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(name, _)| name).collect();
        f.debug_struct("ClientConfig")
            .field("client", &self.client)
            .field("identity", &self.identity)
            .field("target", &self.target)
            .field("headers", &names)
            .finish()
    }
}

/// A client bound to one identity.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    config: Arc<ClientConfig>,
    policy: Option<PolicyHandle>,
}

impl ClientHandle {
    pub fn client_name(&self) -> &str {
        &self.config.client
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    pub fn target(&self) -> &str {
        &self.config.target
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.config.headers.header_values(name).and_then(|v| v.first()).map(String::as_str)
    }

    /// Send every request through `policy`.
    pub fn with_policy(mut self, policy: PolicyHandle) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn policy(&self) -> Option<&PolicyHandle> {
        self.policy.as_ref()
    }

    pub fn request(&self, path: impl Into<String>) -> OutboundRequest {
        OutboundRequest {
            target: self.config.target.clone(),
            path: path.into(),
            headers: self.config.headers.clone(),
        }
    }

    /// Send a request for `path`; non-2xx responses become
    /// [`TransportError::Status`].
    pub async fn send<T>(
        &self,
        transport: &T,
        path: &str,
    ) -> Result<Response, ResilienceError<TransportError>>
    where
        T: Transport + ?Sized,
    {
        let request = self.request(path);
        let call = || async move {
            let url = request.url();
            match transport.execute(request).await {
                Ok(response) if response.is_success() => Ok(response),
                Ok(response) => Err(TransportError::Status { url, status: response.status }),
                Err(e) => Err(e),
            }
        };
        match &self.policy {
            Some(policy) => policy.execute(call).await,
            None => call().await.map_err(ResilienceError::Inner),
        }
    }
}

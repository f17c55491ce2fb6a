//! Identity Resolver
//!
//! Produces the [`ConnectionParams`] used to open a realtime session: the
//! caller's public network address plus, when the user is signed in, the
//! session credential.
//!
//! ## Resolution Flow
//!
//! 1. Look up the public address once through an [`OriginLookup`]
//! 2. Read credential and authenticated flag from the [`CredentialStore`]
//! 3. Build parameters; the token is only attached for authenticated users
//!
//! If the lookup fails, no address is held and no connection is attempted.
//! The next `resolve()` (triggered by a login or logout) tries again.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::credentials::CredentialStore;
use crate::error::ChatError;

/// Default public address lookup endpoint.
pub const DEFAULT_LOOKUP_URL: &str = "https://api64.ipify.org?format=json";

/// Address and credential bundle for one connection attempt.
///
/// Rebuilt on every (re)connect. The credential is only present when a
/// non-empty token exists and the user is authenticated.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    origin_address: String,
    credential: Option<String>,
}

impl ConnectionParams {
    pub fn new(origin_address: impl Into<String>, credential: Option<&str>, authenticated: bool) -> Self {
        let credential = credential
            .filter(|token| authenticated && !token.is_empty())
            .map(str::to_owned);
        Self {
            origin_address: origin_address.into(),
            credential,
        }
    }

    /// Parameters for a connection without a credential.
    pub fn anonymous(origin_address: impl Into<String>) -> Self {
        Self::new(origin_address, None, false)
    }

    pub fn origin_address(&self) -> &str {
        &self.origin_address
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    /// Payload sent with the namespace connect packet.
    pub fn auth_payload(&self) -> AuthPayload {
        AuthPayload {
            ip_address: self.origin_address.clone(),
            token: self.credential.clone(),
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("origin_address", &self.origin_address)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Out-of-band auth context: `{ "ipAddress": ..., "token"?: ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Source of the caller's public network address.
#[async_trait]
pub trait OriginLookup: Send + Sync {
    async fn lookup(&self) -> Result<String, ChatError>;
}

#[derive(Deserialize)]
struct LookupResponse {
    ip: String,
}

/// Looks up the public address over HTTP (`{"ip": "..."}` response body).
pub struct HttpOriginLookup {
    url: String,
    http_client: reqwest::Client,
}

impl HttpOriginLookup {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("chat-realtime/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            url: url.into(),
            http_client,
        }
    }
}

#[async_trait]
impl OriginLookup for HttpOriginLookup {
    async fn lookup(&self) -> Result<String, ChatError> {
        debug!(url = %self.url, "Looking up public address");

        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ChatError::Lookup(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChatError::Lookup(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Lookup(format!("Invalid lookup response: {}", e)))?;

        let ip = body.ip.trim();
        if ip.is_empty() {
            return Err(ChatError::Lookup("Empty address in lookup response".into()));
        }
        Ok(ip.to_string())
    }
}

/// A fixed address, for deployments that already know it.
pub struct StaticOrigin(pub String);

#[async_trait]
impl OriginLookup for StaticOrigin {
    async fn lookup(&self) -> Result<String, ChatError> {
        Ok(self.0.clone())
    }
}

/// Builds connection parameters from the public address and credential store.
pub struct IdentityResolver {
    lookup: Arc<dyn OriginLookup>,
    credentials: Arc<dyn CredentialStore>,
    origin: Option<String>,
}

impl IdentityResolver {
    pub fn new(lookup: Arc<dyn OriginLookup>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            lookup,
            credentials,
            origin: None,
        }
    }

    /// Resolve connection parameters.
    ///
    /// Returns `None` while the public address is unknown.
    pub async fn resolve(&mut self) -> Option<ConnectionParams> {
        self.resolve_origin().await?;
        self.current()
    }

    /// Parameters from the cached address, without any network lookup.
    pub fn current(&self) -> Option<ConnectionParams> {
        let origin = self.origin.as_deref()?;
        let credential = self.credentials.credential();
        Some(ConnectionParams::new(
            origin,
            credential.as_deref(),
            self.credentials.is_authenticated(),
        ))
    }

    /// The cached public address, if the lookup has succeeded.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    async fn resolve_origin(&mut self) -> Option<&str> {
        if self.origin.is_none() {
            match self.lookup.lookup().await {
                Ok(address) => {
                    info!(origin = %address, "Public address resolved");
                    self.origin = Some(address);
                }
                Err(e) => {
                    error!(error = %e, "Error fetching public address, connection deferred");
                }
            }
        }
        self.origin.as_deref()
    }
}

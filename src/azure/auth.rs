//! Bearer tokens for the resource-management API.
//!
//! A service principal authenticates with the client-credentials grant;
//! without one the instance metadata service hands out a managed-identity
//! token. Tokens are cached until shortly before they expire.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::error::{from_arm_response, transport};
use crate::remote::RemoteError;

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Where tokens come from.
#[derive(Clone, Eq, PartialEq)]
pub enum TokenSource {
    /// Client-credentials grant against the directory endpoint.
    ServicePrincipal {
        /// Directory endpoint, for example `https://login.microsoftonline.com`.
        authority: String,
        /// Directory tenant.
        tenant_id: String,
        /// Application id.
        client_id: String,
        /// Application secret.
        client_secret: String,
    },
    /// Instance metadata service, optionally selecting a user-assigned
    /// identity.
    ManagedIdentity {
        /// Client id of a user-assigned identity.
        client_id: Option<String>,
    },
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServicePrincipal {
                authority,
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ServicePrincipal")
                .field("authority", authority)
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            Self::ManagedIdentity { client_id } => f
                .debug_struct("ManagedIdentity")
                .field("client_id", client_id)
                .finish(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(u64),
    Text(String),
}

impl ExpiresIn {
    fn as_duration(&self) -> Duration {
        match self {
            Self::Seconds(seconds) => Duration::from_secs(*seconds),
            Self::Text(text) => Duration::from_secs(text.parse().unwrap_or_default()),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: ExpiresIn,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Caching token provider for one resource.
pub struct Authenticator {
    http: Client,
    source: TokenSource,
    resource: String,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("source", &self.source)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Creates a provider for tokens scoped to `resource`, for example
    /// `https://management.azure.com/`.
    #[must_use]
    pub fn new(http: Client, source: TokenSource, resource: impl Into<String>) -> Self {
        Self {
            http,
            source,
            resource: resource.into(),
            cached: Mutex::new(None),
        }
    }

    /// Returns a bearer token, fetching a new one when the cached token is
    /// close to expiry.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the token endpoint is unreachable or
    /// rejects the request.
    pub async fn token(&self) -> Result<String, RemoteError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }
        let response = self.fetch().await?;
        let lifetime = response.expires_in.as_duration();
        debug!(resource = %self.resource, lifetime_secs = lifetime.as_secs(), "acquired access token");
        let value = response.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN),
        });
        Ok(value)
    }

    async fn fetch(&self) -> Result<TokenResponse, RemoteError> {
        const CONTEXT: &str = "acquire access token";
        let request = match &self.source {
            TokenSource::ServicePrincipal {
                authority,
                tenant_id,
                client_id,
                client_secret,
            } => {
                let scope = format!("{}/.default", self.resource.trim_end_matches('/'));
                self.http
                    .post(format!(
                        "{}/{tenant_id}/oauth2/v2.0/token",
                        authority.trim_end_matches('/')
                    ))
                    .form(&[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id.as_str()),
                        ("client_secret", client_secret.as_str()),
                        ("scope", scope.as_str()),
                    ])
            }
            TokenSource::ManagedIdentity { client_id } => {
                let mut query = vec![
                    ("api-version", IMDS_API_VERSION),
                    ("resource", self.resource.as_str()),
                ];
                if let Some(id) = client_id {
                    query.push(("client_id", id.as_str()));
                }
                self.http
                    .get(IMDS_TOKEN_URL)
                    .header("Metadata", "true")
                    .query(&query)
            }
        };
        let response = request
            .send()
            .await
            .map_err(|err| transport(CONTEXT, &err))?;
        if !response.status().is_success() {
            return Err(from_arm_response(CONTEXT, response).await);
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|err| transport(CONTEXT, &err))
    }
}

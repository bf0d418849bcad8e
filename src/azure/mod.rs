//! Azure implementations of the remote storage seams.
//!
//! [`ArmClient`] drives the resource-manager API with the controller's own
//! identity; [`SharedKeyClient`] talks to an account's blob endpoint with
//! caller credentials. Both share one HTTP connection pool built by
//! [`connect`].

mod arm;
pub mod auth;
mod error;
mod models;
mod shared_key;

use std::time::Duration;

use reqwest::Client;
use url::Url;

pub use arm::{ArmClient, ArmSettings};
pub use auth::{Authenticator, TokenSource};
pub use error::AzureClientError;
pub use shared_key::SharedKeyClient;

/// Tag marking accounts created by this controller; only tagged accounts
/// are reused unless the caller matches by tags.
pub const CREATED_BY_TAG: &str = "created-by";
/// Value of [`CREATED_BY_TAG`].
pub const CREATED_BY_VALUE: &str = "blobvol";
/// Prefix of generated account names.
pub const ACCOUNT_NAME_PREFIX: &str = "blobvol";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds the management-plane and data-plane clients.
///
/// # Errors
///
/// Returns [`AzureClientError::Endpoint`] when the resource-manager endpoint
/// is not a URL and [`AzureClientError::Http`] when the HTTP client cannot
/// be built.
pub fn connect(
    source: TokenSource,
    settings: ArmSettings,
) -> Result<(ArmClient, SharedKeyClient), AzureClientError> {
    let endpoint = Url::parse(&settings.endpoint).map_err(|err| AzureClientError::Endpoint {
        name: "resource manager",
        value: settings.endpoint.clone(),
        message: err.to_string(),
    })?;
    if let TokenSource::ServicePrincipal { authority, .. } = &source {
        Url::parse(authority).map_err(|err| AzureClientError::Endpoint {
            name: "directory",
            value: authority.clone(),
            message: err.to_string(),
        })?;
    }
    let http = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|err| AzureClientError::Http(err.to_string()))?;
    let resource = format!("{}/", endpoint.as_str().trim_end_matches('/'));
    let auth = Authenticator::new(http.clone(), source, resource);
    Ok((
        ArmClient::new(http.clone(), auth, settings),
        SharedKeyClient::new(http),
    ))
}

//! Seams to the remote storage service.
//!
//! [`ManagementPlane`] covers calls made through the resource-management API
//! with the controller's ambient identity. [`DataPlane`] covers calls made
//! directly against an account with caller-supplied credentials. Both report
//! failures as [`RemoteError`], classified so retry predicates never need to
//! match on provider text.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::account::AccountOptions;

/// Boxed future returned by remote collaborators.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Broad class of a remote failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RemoteErrorKind {
    /// The container name is still being released by an earlier delete.
    ContainerBeingDeleted,
    /// The addressed resource does not exist.
    NotFound,
    /// The storage account exists but has not finished provisioning.
    AccountNotProvisioned,
    /// The service asked the caller to slow down.
    Throttled,
    /// Credentials were rejected.
    Unauthorized,
    /// Any other failure.
    Other,
}

const BEING_DELETED_SIGNATURES: &[&str] = &["ContainerBeingDeleted", "container is being deleted"];
const NOT_FOUND_SIGNATURES: &[&str] = &["StatusCode=404", "HTTPStatusCode: 404"];
const NOT_PROVISIONED_SIGNATURES: &[&str] = &["StorageAccountIsNotProvisioned"];
const THROTTLED_SIGNATURES: &[&str] = &["TooManyRequests", "StatusCode=429", "client throttled"];

impl RemoteErrorKind {
    /// Classifies a failure from its HTTP status and provider error code.
    #[must_use]
    pub fn from_status(status: u16, code: &str) -> Self {
        if code.eq_ignore_ascii_case("ContainerBeingDeleted") {
            return Self::ContainerBeingDeleted;
        }
        if code.eq_ignore_ascii_case("StorageAccountIsNotProvisioned") {
            return Self::AccountNotProvisioned;
        }
        match status {
            404 => Self::NotFound,
            429 => Self::Throttled,
            401 | 403 => Self::Unauthorized,
            _ => Self::Other,
        }
    }

    /// Classifies a failure from the textual signatures older clients embed
    /// in their error messages.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let contains_any =
            |signatures: &[&str]| signatures.iter().any(|needle| message.contains(needle));
        if contains_any(BEING_DELETED_SIGNATURES) {
            Self::ContainerBeingDeleted
        } else if contains_any(NOT_FOUND_SIGNATURES) {
            Self::NotFound
        } else if contains_any(NOT_PROVISIONED_SIGNATURES) {
            Self::AccountNotProvisioned
        } else if contains_any(THROTTLED_SIGNATURES) {
            Self::Throttled
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ContainerBeingDeleted => "container being deleted",
            Self::NotFound => "not found",
            Self::AccountNotProvisioned => "account not provisioned",
            Self::Throttled => "throttled",
            Self::Unauthorized => "unauthorized",
            Self::Other => "remote failure",
        };
        f.write_str(label)
    }
}

/// Failure reported by a remote collaborator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    /// Classified failure kind.
    pub kind: RemoteErrorKind,
    /// Provider message.
    pub message: String,
}

impl RemoteError {
    /// Builds an error of a known kind.
    #[must_use]
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Builds an error whose kind is inferred from its message.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let text = message.into();
        Self {
            kind: RemoteErrorKind::classify(&text),
            message: text,
        }
    }

    /// Returns `true` for failures worth retrying while ensuring an account.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::AccountNotProvisioned | RemoteErrorKind::Throttled
        )
    }
}

/// Address of a storage account.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccountRef {
    /// Subscription owning the account; `None` means the controller default.
    pub subscription_id: Option<String>,
    /// Resource group holding the account.
    pub resource_group: String,
    /// Account name.
    pub account: String,
}

impl AccountRef {
    /// Builds an account reference.
    #[must_use]
    pub fn new(
        subscription_id: Option<String>,
        resource_group: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.filter(|value| !value.is_empty()),
            resource_group: resource_group.into(),
            account: account.into(),
        }
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account({}) rg({})", self.account, self.resource_group)?;
        if let Some(subscription) = &self.subscription_id {
            write!(f, " subscription({subscription})")?;
        }
        Ok(())
    }
}

/// Account returned by [`ManagementPlane::ensure_account`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnsuredAccount {
    /// Name of the matched or created account.
    pub name: String,
    /// Account key, when the backend fetched one while ensuring.
    pub key: Option<String>,
}

/// Virtual network subnet that must allow storage traffic.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubnetRef {
    /// Subscription owning the virtual network.
    pub subscription_id: String,
    /// Resource group holding the virtual network.
    pub resource_group: String,
    /// Virtual network name.
    pub vnet: String,
    /// Subnet name.
    pub subnet: String,
}

impl SubnetRef {
    /// Fully-qualified resource identifier of the subnet.
    #[must_use]
    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/virtualNetworks/{}/subnets/{}",
            self.subscription_id, self.resource_group, self.vnet, self.subnet
        )
    }
}

/// Credentials for direct data-plane access to one account.
#[derive(Clone, Eq, PartialEq)]
pub struct DataPlaneCredentials {
    /// Account name.
    pub account: String,
    /// Shared key or SAS token.
    pub secret: DataPlaneSecret,
    /// Storage endpoint suffix, for example `core.windows.net`.
    pub endpoint_suffix: String,
}

/// Secret material used by [`DataPlaneCredentials`].
#[derive(Clone, Eq, PartialEq)]
pub enum DataPlaneSecret {
    /// Base64 account key used for shared-key signing.
    AccountKey(String),
    /// Pre-issued SAS query string.
    SasToken(String),
}

impl fmt::Debug for DataPlaneCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret = match self.secret {
            DataPlaneSecret::AccountKey(_) => "account-key",
            DataPlaneSecret::SasToken(_) => "sas-token",
        };
        f.debug_struct("DataPlaneCredentials")
            .field("account", &self.account)
            .field("secret", &secret)
            .field("endpoint_suffix", &self.endpoint_suffix)
            .finish()
    }
}

impl DataPlaneCredentials {
    /// Base URL of the account's blob endpoint, without a trailing slash.
    #[must_use]
    pub fn blob_endpoint(&self) -> String {
        format!("https://{}.blob.{}", self.account, self.endpoint_suffix)
    }
}

/// Operations served by the resource-management API.
pub trait ManagementPlane: Send + Sync {
    /// Finds an account matching `options` or creates one.
    fn ensure_account<'a>(&'a self, options: &'a AccountOptions)
    -> RemoteFuture<'a, EnsuredAccount>;

    /// Fetches an account key; `latest` selects the most recently rotated one.
    fn account_key<'a>(&'a self, account: &'a AccountRef, latest: bool)
    -> RemoteFuture<'a, String>;

    /// Creates a private container. Creating an existing container succeeds.
    fn create_container<'a>(
        &'a self,
        account: &'a AccountRef,
        container: &'a str,
    ) -> RemoteFuture<'a, ()>;

    /// Deletes a container.
    fn delete_container<'a>(
        &'a self,
        account: &'a AccountRef,
        container: &'a str,
    ) -> RemoteFuture<'a, ()>;

    /// Reports whether a live, non-deleted container exists.
    fn container_exists<'a>(
        &'a self,
        account: &'a AccountRef,
        container: &'a str,
    ) -> RemoteFuture<'a, bool>;

    /// Ensures the subnet exposes the storage service endpoint.
    fn ensure_subnet_service_endpoint<'a>(&'a self, subnet: &'a SubnetRef)
    -> RemoteFuture<'a, ()>;
}

/// Operations served directly by an account's blob endpoint.
pub trait DataPlane: Send + Sync {
    /// Creates a private container unless it already exists.
    fn create_container_if_missing<'a>(
        &'a self,
        credentials: &'a DataPlaneCredentials,
        container: &'a str,
    ) -> RemoteFuture<'a, ()>;

    /// Deletes a container if it exists.
    fn delete_container_if_exists<'a>(
        &'a self,
        credentials: &'a DataPlaneCredentials,
        container: &'a str,
    ) -> RemoteFuture<'a, ()>;

    /// Reports whether the container exists.
    fn container_exists<'a>(
        &'a self,
        credentials: &'a DataPlaneCredentials,
        container: &'a str,
    ) -> RemoteFuture<'a, bool>;
}

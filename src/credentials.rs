//! Account keys and scoped access tokens.
//!
//! Keys come from caller secrets when present, otherwise from the
//! management plane. Data-plane callers never see the key itself: clones are
//! handed an account SAS limited to the blob service, container and object
//! resources, and read/write/list permissions.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::debug;

use crate::remote::{
    AccountRef, DataPlaneCredentials, DataPlaneSecret, ManagementPlane, RemoteError,
};

/// Secret field holding the account name.
pub const ACCOUNT_NAME_FIELD: &str = "azurestorageaccountname";
/// Secret field holding the account key.
pub const ACCOUNT_KEY_FIELD: &str = "azurestorageaccountkey";
/// Secret field holding a SAS token.
pub const SAS_TOKEN_FIELD: &str = "azurestorageaccountsastoken";
const ACCOUNT_NAME_ALIAS: &str = "accountname";
const ACCOUNT_KEY_ALIAS: &str = "accountkey";

/// Default lifetime of an issued token.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

const SAS_VERSION: &str = "2021-06-08";
const SAS_SERVICES: &str = "b";
const SAS_RESOURCE_TYPES: &str = "co";
const SAS_PERMISSIONS: &str = "rwl";
const SAS_PROTOCOL: &str = "https";

/// Errors raised while resolving credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Secrets were supplied without an account name.
    #[error("could not find azurestorageaccountname or accountname field in secrets")]
    MissingAccountName,
    /// Secrets were supplied without a key or token.
    #[error(
        "could not find azurestorageaccountkey, accountkey or azurestorageaccountsastoken field in secrets"
    )]
    MissingAccountKey,
    /// The management plane could not return a key.
    #[error("failed to get account key for {account}: {source}")]
    KeyLookup {
        /// Account addressed.
        account: String,
        /// Underlying failure.
        source: RemoteError,
    },
    /// The account key is not valid base64.
    #[error("account key for {account} is not valid base64")]
    InvalidKey {
        /// Account name.
        account: String,
    },
    /// The token expiry could not be represented.
    #[error("token expiry is out of range")]
    ExpiryOutOfRange,
    /// The token expiry could not be formatted.
    #[error("failed to format token expiry: {0}")]
    Format(#[from] time::error::Format),
}

fn secret_value<'s>(secrets: &'s BTreeMap<String, String>, fields: &[&str]) -> Option<&'s str> {
    secrets.iter().find_map(|(key, value)| {
        fields
            .iter()
            .any(|field| key.eq_ignore_ascii_case(field))
            .then_some(value.as_str())
            .filter(|candidate| !candidate.is_empty())
    })
}

/// Builds data-plane credentials from caller `secrets`.
///
/// Returns `Ok(None)` when no secrets were supplied.
///
/// # Errors
///
/// Returns [`CredentialError::MissingAccountName`] or
/// [`CredentialError::MissingAccountKey`] when secrets are present but
/// incomplete.
pub fn data_plane_credentials_from(
    secrets: &BTreeMap<String, String>,
    endpoint_suffix: &str,
) -> Result<Option<DataPlaneCredentials>, CredentialError> {
    if secrets.is_empty() {
        return Ok(None);
    }
    let account = secret_value(secrets, &[ACCOUNT_NAME_FIELD, ACCOUNT_NAME_ALIAS])
        .ok_or(CredentialError::MissingAccountName)?;
    let secret = secret_value(secrets, &[ACCOUNT_KEY_FIELD, ACCOUNT_KEY_ALIAS])
        .map(|key| DataPlaneSecret::AccountKey(key.to_owned()))
        .or_else(|| {
            secret_value(secrets, &[SAS_TOKEN_FIELD])
                .map(|token| DataPlaneSecret::SasToken(token.to_owned()))
        })
        .ok_or(CredentialError::MissingAccountKey)?;
    Ok(Some(DataPlaneCredentials {
        account: account.to_owned(),
        secret,
        endpoint_suffix: endpoint_suffix.to_owned(),
    }))
}

/// Secret payload persisted for the node side.
#[must_use]
pub fn account_secrets(account: &str, key: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ACCOUNT_NAME_FIELD.to_owned(), account.to_owned()),
        (ACCOUNT_KEY_FIELD.to_owned(), key.to_owned()),
    ])
}

/// Issues account keys and scoped tokens.
#[derive(Debug)]
pub struct CredentialIssuer<'a, M> {
    management: &'a M,
    token_lifetime: Duration,
}

impl<'a, M: ManagementPlane> CredentialIssuer<'a, M> {
    /// Creates an issuer whose tokens live for `token_lifetime`.
    #[must_use]
    pub const fn new(management: &'a M, token_lifetime: Duration) -> Self {
        Self {
            management,
            token_lifetime,
        }
    }

    /// Returns the account key, preferring one supplied in `secrets`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::KeyLookup`] when the management plane
    /// cannot return a key.
    pub async fn account_key(
        &self,
        account: &AccountRef,
        latest: bool,
        secrets: &BTreeMap<String, String>,
    ) -> Result<String, CredentialError> {
        if let Some(key) = secret_value(secrets, &[ACCOUNT_KEY_FIELD, ACCOUNT_KEY_ALIAS]) {
            debug!(%account, "using account key from request secrets");
            return Ok(key.to_owned());
        }
        debug!(%account, latest, "fetching account key");
        self.management
            .account_key(account, latest)
            .await
            .map_err(|source| CredentialError::KeyLookup {
                account: account.to_string(),
                source,
            })
    }

    /// Issues an account SAS for `account` valid from now for the
    /// configured lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] when the key is not base64 or the expiry
    /// cannot be represented.
    pub fn issue_scoped_token(
        &self,
        account: &str,
        key: &str,
    ) -> Result<String, CredentialError> {
        let lifetime = time::Duration::try_from(self.token_lifetime)
            .map_err(|_| CredentialError::ExpiryOutOfRange)?;
        let expiry = OffsetDateTime::now_utc()
            .checked_add(lifetime)
            .ok_or(CredentialError::ExpiryOutOfRange)?;
        account_sas(account, key, expiry)
    }
}

/// Builds an account SAS query string, including the leading `?`.
///
/// # Errors
///
/// Returns [`CredentialError::InvalidKey`] when `key` is not base64 and
/// [`CredentialError::Format`] when `expiry` cannot be formatted.
pub fn account_sas(
    account: &str,
    key: &str,
    expiry: OffsetDateTime,
) -> Result<String, CredentialError> {
    let expiry_text = expiry
        .to_offset(time::UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
        ))?;
    let string_to_sign = format!(
        "{account}\n{SAS_PERMISSIONS}\n{SAS_SERVICES}\n{SAS_RESOURCE_TYPES}\n\n{expiry_text}\n\n{SAS_PROTOCOL}\n{SAS_VERSION}\n\n"
    );
    let signature = sign(account, key, &string_to_sign)?;

    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("se", &expiry_text)
        .append_pair("sig", &signature)
        .append_pair("sp", SAS_PERMISSIONS)
        .append_pair("spr", SAS_PROTOCOL)
        .append_pair("srt", SAS_RESOURCE_TYPES)
        .append_pair("ss", SAS_SERVICES)
        .append_pair("sv", SAS_VERSION)
        .finish();
    Ok(format!("?{query}"))
}

/// HMAC-SHA256 over `payload` with the decoded account key, base64 encoded.
///
/// # Errors
///
/// Returns [`CredentialError::InvalidKey`] when `key` is not base64.
pub fn sign(account: &str, key: &str, payload: &str) -> Result<String, CredentialError> {
    let invalid = || CredentialError::InvalidKey {
        account: account.to_owned(),
    };
    let decoded = STANDARD.decode(key).map_err(|_| invalid())?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&decoded).map_err(|_| invalid())?;
    mac.update(payload.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

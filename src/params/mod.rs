//! Derivation of a typed provisioning request from caller parameters.
//!
//! Parameters arrive as a case-insensitive string map. [`fields`] turns the
//! map into raw values one key at a time; [`ProvisioningRequest::derive`]
//! then applies defaults and the cross-field rules, failing before any
//! remote call is made.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::account::{AccessTier, AccountKind, AccountOptions, Protocol};
use crate::remote::SubnetRef;

pub mod fields;
pub mod naming;

pub use fields::RawParameters;
pub use naming::{is_valid_container_name_prefix, parse_tags, valid_container_name};

/// Value of `networkEndpointType` that requests a private endpoint.
pub const PRIVATE_ENDPOINT: &str = "privateendpoint";
/// Storage endpoint suffix of the public cloud.
pub const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";
/// Secret namespace used when neither the parameters nor the claim name one.
pub const DEFAULT_SECRET_NAMESPACE: &str = "default";

const AZURE_STACK_SKUS: [&str; 2] = ["Standard_LRS", "Premium_LRS"];

/// Errors raised while deriving a provisioning request.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ParameterError {
    /// Raised for keys outside the recognised set.
    #[error("invalid parameter {key:?} in storage class")]
    UnknownKey {
        /// Key as supplied by the caller.
        key: String,
    },
    /// Raised when a value fails its per-key check.
    #[error("invalid {key}: {value:?} in storage class, expected {expected}")]
    InvalidValue {
        /// Normalised key.
        key: &'static str,
        /// Rejected value.
        value: String,
        /// Description of the accepted values.
        expected: &'static str,
    },
    /// Raised when `tags` is not a `key=value` list.
    #[error("tags {value:?} are invalid, the format should be: 'key1=value1,key2=value2'")]
    InvalidTags {
        /// Rejected value.
        value: String,
    },
    /// Raised when the protocol is not supported.
    #[error("protocol({protocol}) is not supported, supported protocol list: {supported:?}")]
    UnsupportedProtocol {
        /// Requested protocol.
        protocol: String,
        /// Accepted protocols.
        supported: Vec<&'static str>,
    },
    /// Raised when the access tier is not supported.
    #[error("accessTier({tier}) is not supported, supported access tier list: {supported:?}")]
    UnsupportedAccessTier {
        /// Requested tier.
        tier: String,
        /// Accepted tiers.
        supported: Vec<&'static str>,
    },
    /// Raised when parameters contradict each other.
    #[error("{0}")]
    Conflict(String),
}

/// Controller-wide defaults applied while deriving a request.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ProvisioningDefaults {
    /// Subscription the controller runs in.
    pub subscription_id: String,
    /// Resource group used when the parameters name none.
    pub resource_group: String,
    /// Region used when the parameters name none. Empty defers to the
    /// backend.
    pub location: String,
    /// Storage endpoint suffix of the cloud.
    pub endpoint_suffix: String,
    /// Whether the cloud only offers legacy account kinds.
    pub azure_stack: bool,
    /// Secret namespace used when neither the parameters nor the claim
    /// namespace supply one.
    pub secret_namespace: String,
    /// Virtual network resource group used for NFS firewall rules.
    pub vnet_resource_group: String,
    /// Virtual network name used for NFS firewall rules.
    pub vnet_name: String,
    /// Subnet name used for NFS firewall rules.
    pub subnet_name: String,
}

/// How the container name is chosen.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContainerNaming {
    /// Caller-specified name, templates already substituted.
    Explicit(String),
    /// Generated from `<prefix>-<volume name>`.
    Prefix(String),
    /// Generated from the volume name.
    Derived,
}

/// How account credentials are handled.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialPolicy {
    /// Persist the account key for the node side.
    pub store_account_key: bool,
    /// Fetch the most recently rotated key.
    pub latest_account_key: bool,
    /// Create and delete containers through the data plane.
    pub use_data_plane_api: bool,
    /// Secret name requested by the caller.
    pub secret_name: Option<String>,
    /// Namespace holding the persisted key.
    pub secret_namespace: String,
}

/// Fully validated provisioning request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningRequest {
    /// Requested volume name.
    pub name: String,
    /// Account properties.
    pub account: AccountOptions,
    /// Container naming policy.
    pub container: ContainerNaming,
    /// Credential policy.
    pub credentials: CredentialPolicy,
    /// Subnet whose service endpoint must allow storage traffic.
    pub subnet: Option<SubnetRef>,
}

impl ProvisioningRequest {
    /// Derives a request for volume `name` from caller `parameters`.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError`] when a key is unknown, a value is
    /// malformed, or the combination of values is contradictory.
    pub fn derive(
        name: &str,
        parameters: &BTreeMap<String, String>,
        defaults: &ProvisioningDefaults,
    ) -> Result<Self, ParameterError> {
        let raw = fields::collect(parameters)?;
        Self::from_raw(name, raw, defaults)
    }

    fn from_raw(
        name: &str,
        raw: RawParameters,
        defaults: &ProvisioningDefaults,
    ) -> Result<Self, ParameterError> {
        let requested_nfs = raw.protocol == Protocol::Nfs.as_str();

        if raw.blob_versioning == Some(true)
            && (requested_nfs || raw.hns_enabled == Some(true))
        {
            return Err(ParameterError::Conflict(String::from(
                "enableBlobVersioning is not supported for NFS protocol or HNS enabled account",
            )));
        }
        if raw.match_tags && !raw.account.is_empty() {
            return Err(ParameterError::Conflict(format!(
                "matchTags must set as false when storageAccount({}) is provided",
                raw.account
            )));
        }
        let cross_subscription =
            !raw.subscription_id.is_empty() && raw.subscription_id != defaults.subscription_id;
        if cross_subscription {
            if requested_nfs {
                return Err(ParameterError::Conflict(format!(
                    "NFS protocol is not supported in cross subscription({})",
                    raw.subscription_id
                )));
            }
            if !raw.store_account_key {
                return Err(ParameterError::Conflict(format!(
                    "storeAccountKey must set as true in cross subscription({})",
                    raw.subscription_id
                )));
            }
        }

        let resource_group = non_empty_or(&raw.resource_group, &defaults.resource_group);
        let secret_namespace = [
            raw.secret_namespace.as_str(),
            raw.pvc_namespace.as_str(),
            defaults.secret_namespace.as_str(),
        ]
        .into_iter()
        .find(|candidate| !candidate.is_empty())
        .unwrap_or(DEFAULT_SECRET_NAMESPACE)
        .to_owned();

        let protocol = parse_protocol(&raw.protocol)?;
        let access_tier = parse_access_tier(&raw.access_tier)?;

        if !raw.container_name.is_empty() && !raw.container_name_prefix.is_empty() {
            return Err(ParameterError::Conflict(format!(
                "containerName({}) and containerNamePrefix({}) could not be specified together",
                raw.container_name, raw.container_name_prefix
            )));
        }
        if !is_valid_container_name_prefix(&raw.container_name_prefix) {
            return Err(ParameterError::Conflict(format!(
                "containerNamePrefix({}) can only contain lowercase letters, numbers, hyphens, and length should be less than 21",
                raw.container_name_prefix
            )));
        }
        if protocol == Protocol::EdgeCache {
            tracing::debug!("edge cache protocol requested; sku is validated by the appliance");
        }

        let private_endpoint = raw.network_endpoint_type.eq_ignore_ascii_case(PRIVATE_ENDPOINT);
        let mut hns_enabled = raw.hns_enabled;
        let mut nfs_v3_enabled = None;
        let mut store_account_key = raw.store_account_key;
        let vnet_resource_group = non_empty_or(
            &raw.vnet_resource_group,
            &non_empty_or(&defaults.vnet_resource_group, &resource_group),
        );
        let vnet_name = non_empty_or(&raw.vnet_name, &defaults.vnet_name);
        let subnet_name = non_empty_or(&raw.subnet_name, &defaults.subnet_name);
        let mut subnet = None;
        let mut virtual_network_resource_ids = Vec::new();
        if protocol == Protocol::Nfs {
            hns_enabled = Some(true);
            nfs_v3_enabled = Some(true);
            store_account_key = false;
            if !private_endpoint {
                if vnet_name.is_empty() || subnet_name.is_empty() {
                    return Err(ParameterError::Conflict(String::from(
                        "vnetName and subnetName are required for NFS protocol without a private endpoint",
                    )));
                }
                let subnet_ref = SubnetRef {
                    subscription_id: defaults.subscription_id.clone(),
                    resource_group: vnet_resource_group.clone(),
                    vnet: vnet_name.clone(),
                    subnet: subnet_name.clone(),
                };
                virtual_network_resource_ids.push(subnet_ref.resource_id());
                subnet = Some(subnet_ref);
            }
        }

        let kind = account_kind(&raw.sku, defaults.azure_stack)?;
        let tags = parse_tags(&raw.tags)?;
        let endpoint_suffix = non_empty_or(
            raw.endpoint_suffix.trim(),
            &non_empty_or(&defaults.endpoint_suffix, DEFAULT_ENDPOINT_SUFFIX),
        );

        let container = if !raw.container_name.is_empty() {
            ContainerNaming::Explicit(naming::replace_templates(
                &raw.container_name,
                &raw.replacements,
            ))
        } else if !raw.container_name_prefix.is_empty() {
            ContainerNaming::Prefix(raw.container_name_prefix.clone())
        } else {
            ContainerNaming::Derived
        };

        let account = AccountOptions {
            name: Some(raw.account.clone()).filter(|value| !value.is_empty()),
            sku: raw.sku.clone(),
            kind,
            subscription_id: Some(raw.subscription_id.clone()).filter(|value| !value.is_empty()),
            resource_group,
            location: non_empty_or(&raw.location, &defaults.location),
            protocol,
            tags,
            match_tags: raw.match_tags,
            hns_enabled,
            nfs_v3_enabled,
            allow_blob_public_access: raw.allow_blob_public_access,
            require_infrastructure_encryption: raw.require_infra_encryption,
            blob_versioning: raw.blob_versioning,
            soft_delete_blobs_days: raw.soft_delete_blobs,
            soft_delete_containers_days: raw.soft_delete_containers,
            access_tier,
            virtual_network_resource_ids,
            private_endpoint,
            vnet_resource_group,
            vnet_name,
            subnet_name,
            endpoint_suffix,
        };

        Ok(Self {
            name: name.to_owned(),
            account,
            container,
            credentials: CredentialPolicy {
                store_account_key,
                latest_account_key: raw.latest_account_key,
                use_data_plane_api: raw.use_data_plane_api,
                secret_name: Some(raw.secret_name).filter(|value| !value.is_empty()),
                secret_namespace,
            },
            subnet,
        })
    }

    /// Container name for this request. Explicit names are used verbatim;
    /// otherwise a valid name is derived from the volume name and prefix.
    #[must_use]
    pub fn container_name(&self) -> String {
        match &self.container {
            ContainerNaming::Explicit(name) => name.clone(),
            ContainerNaming::Prefix(prefix) => {
                valid_container_name(&format!("{prefix}-{}", self.name), self.account.protocol)
            }
            ContainerNaming::Derived => valid_container_name(&self.name, self.account.protocol),
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_owned()
    } else {
        value.to_owned()
    }
}

fn parse_protocol(raw: &str) -> Result<Protocol, ParameterError> {
    if raw.is_empty() {
        return Ok(Protocol::default());
    }
    raw.parse().map_err(|protocol| ParameterError::UnsupportedProtocol {
        protocol,
        supported: Protocol::ALL.iter().map(|p| p.as_str()).collect(),
    })
}

fn parse_access_tier(raw: &str) -> Result<Option<AccessTier>, ParameterError> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|tier| ParameterError::UnsupportedAccessTier {
            tier,
            supported: AccessTier::ALL.iter().map(|t| t.as_str()).collect(),
        })
}

fn account_kind(sku: &str, azure_stack: bool) -> Result<AccountKind, ParameterError> {
    if azure_stack {
        if !sku.is_empty() && !AZURE_STACK_SKUS.contains(&sku) {
            return Err(ParameterError::Conflict(format!(
                "invalid skuName value: {sku}, as Azure Stack only supports Premium_LRS and Standard_LRS storage account types"
            )));
        }
        return Ok(AccountKind::Storage);
    }
    if sku.to_lowercase().starts_with("premium") {
        Ok(AccountKind::BlockBlobStorage)
    } else {
        Ok(AccountKind::StorageV2)
    }
}

#[cfg(test)]
mod tests;

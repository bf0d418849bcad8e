//! Wire shapes of the storage resource provider.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::account::{AccountOptions, Protocol};

pub(crate) const PROVISIONING_SUCCEEDED: &str = "Succeeded";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountList {
    #[serde(default)]
    pub(crate) value: Vec<StorageAccount>,
    #[serde(default)]
    pub(crate) next_link: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StorageAccount {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) location: String,
    #[serde(default)]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) sku: Sku,
    #[serde(default)]
    pub(crate) tags: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) properties: AccountProperties,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct Sku {
    #[serde(default)]
    pub(crate) name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountProperties {
    #[serde(default)]
    pub(crate) provisioning_state: String,
    #[serde(default)]
    pub(crate) is_hns_enabled: Option<bool>,
    #[serde(default)]
    pub(crate) is_nfs_v3_enabled: Option<bool>,
    #[serde(default)]
    pub(crate) allow_blob_public_access: Option<bool>,
    #[serde(default)]
    pub(crate) access_tier: Option<String>,
    #[serde(default)]
    pub(crate) network_acls: Option<NetworkRuleSet>,
    #[serde(default)]
    pub(crate) encryption: Option<Encryption>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NetworkRuleSet {
    pub(crate) default_action: String,
    #[serde(default)]
    pub(crate) virtual_network_rules: Vec<VirtualNetworkRule>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub(crate) struct VirtualNetworkRule {
    pub(crate) id: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Encryption {
    #[serde(default)]
    pub(crate) require_infrastructure_encryption: Option<bool>,
}

impl StorageAccount {
    /// Whether this account can host a volume with `options`.
    pub(crate) fn satisfies(&self, options: &AccountOptions) -> bool {
        let properties = &self.properties;
        if properties.provisioning_state != PROVISIONING_SUCCEEDED {
            return false;
        }
        if !options.sku.is_empty() && !self.sku.name.eq_ignore_ascii_case(&options.sku) {
            return false;
        }
        if !self.kind.eq_ignore_ascii_case(options.kind.as_str()) {
            return false;
        }
        if !options.location.is_empty() && !self.location.eq_ignore_ascii_case(&options.location) {
            return false;
        }
        if options.protocol == Protocol::Nfs && properties.is_nfs_v3_enabled != Some(true) {
            return false;
        }
        if options.hns_enabled.unwrap_or(false) != properties.is_hns_enabled.unwrap_or(false) {
            return false;
        }
        if options.allow_blob_public_access != properties.allow_blob_public_access.unwrap_or(false)
        {
            return false;
        }
        if let Some(required) = options.require_infrastructure_encryption {
            let actual = properties
                .encryption
                .as_ref()
                .and_then(|encryption| encryption.require_infrastructure_encryption)
                .unwrap_or(false);
            if actual != required {
                return false;
            }
        }
        if let Some(tier) = options.access_tier
            && !properties
                .access_tier
                .as_deref()
                .is_some_and(|actual| actual.eq_ignore_ascii_case(tier.as_str()))
        {
            return false;
        }
        self.allows_subnets(&options.virtual_network_resource_ids) && self.matches_tags(options)
    }

    fn allows_subnets(&self, subnets: &[String]) -> bool {
        if subnets.is_empty() {
            return true;
        }
        let Some(acls) = &self.properties.network_acls else {
            return false;
        };
        subnets.iter().all(|subnet| {
            acls.virtual_network_rules
                .iter()
                .any(|rule| rule.id.eq_ignore_ascii_case(subnet))
        })
    }

    fn matches_tags(&self, options: &AccountOptions) -> bool {
        if options.match_tags {
            return options
                .tags
                .iter()
                .all(|(key, value)| self.tags.get(key) == Some(value));
        }
        self.tags.contains_key(super::CREATED_BY_TAG)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountCreate {
    pub(crate) location: String,
    pub(crate) kind: String,
    pub(crate) sku: Sku,
    pub(crate) tags: BTreeMap<String, String>,
    pub(crate) properties: AccountCreateProperties,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountCreateProperties {
    pub(crate) minimum_tls_version: &'static str,
    pub(crate) supports_https_traffic_only: bool,
    pub(crate) allow_blob_public_access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) is_hns_enabled: Option<bool>,
    #[serde(rename = "isNfsV3Enabled", skip_serializing_if = "Option::is_none")]
    pub(crate) is_nfs_v3_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) access_tier: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) network_acls: Option<NetworkRuleSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) encryption: Option<Encryption>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct KeyList {
    #[serde(default)]
    pub(crate) keys: Vec<AccountKey>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountKey {
    #[serde(default)]
    pub(crate) key_name: String,
    pub(crate) value: String,
    #[serde(default)]
    pub(crate) creation_time: Option<String>,
}

impl KeyList {
    /// First key, or the most recently rotated one when `latest` is set.
    /// Creation times are RFC 3339 and compare correctly as text.
    pub(crate) fn select(self, latest: bool) -> Option<AccountKey> {
        if latest {
            self.keys
                .into_iter()
                .max_by(|lhs, rhs| lhs.creation_time.cmp(&rhs.creation_time))
        } else {
            self.keys.into_iter().next()
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct Container {
    #[serde(default)]
    pub(crate) properties: ContainerProperties,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct ContainerProperties {
    #[serde(default)]
    pub(crate) deleted: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BlobServiceProperties {
    pub(crate) properties: BlobServicePropertiesBody,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BlobServicePropertiesBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) delete_retention_policy: Option<RetentionPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) container_delete_retention_policy: Option<RetentionPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) is_versioning_enabled: Option<bool>,
}

#[derive(Clone, Copy, Debug, Serialize)]
pub(crate) struct RetentionPolicy {
    pub(crate) enabled: bool,
    pub(crate) days: u16,
}

impl BlobServicePropertiesBody {
    pub(crate) fn from_options(options: &AccountOptions) -> Option<Self> {
        let retention =
            |requested: Option<u16>| requested.map(|days| RetentionPolicy { enabled: true, days });
        let body = Self {
            delete_retention_policy: retention(options.soft_delete_blobs_days),
            container_delete_retention_policy: retention(options.soft_delete_containers_days),
            is_versioning_enabled: options.blob_versioning,
        };
        let empty = body.delete_retention_policy.is_none()
            && body.container_delete_retention_policy.is_none()
            && body.is_versioning_enabled.is_none();
        (!empty).then_some(body)
    }
}

//! Storage account properties requested for a volume.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Protocol the node side uses to mount the container.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Default user-space file client.
    #[default]
    Fuse,
    /// Second-generation user-space file client.
    Fuse2,
    /// Network file system, version 3.
    Nfs,
    /// Edge caching appliance protocol.
    EdgeCache,
}

impl Protocol {
    /// Every protocol accepted in the `protocol` parameter.
    pub const ALL: [Self; 4] = [Self::Fuse, Self::Fuse2, Self::Nfs, Self::EdgeCache];

    /// Parameter spelling of the protocol.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fuse => "fuse",
            Self::Fuse2 => "fuse2",
            Self::Nfs => "nfs",
            Self::EdgeCache => "edgecache",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|protocol| protocol.as_str() == s)
            .ok_or_else(|| s.to_owned())
    }
}

/// Kind of storage account to create.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum AccountKind {
    /// General purpose v2 account.
    #[default]
    StorageV2,
    /// Premium block blob account.
    BlockBlobStorage,
    /// Legacy general purpose account, the only kind some sovereign clouds
    /// offer.
    Storage,
}

impl AccountKind {
    /// Resource-manager spelling of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StorageV2 => "StorageV2",
            Self::BlockBlobStorage => "BlockBlobStorage",
            Self::Storage => "Storage",
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default access tier for blobs in a new account.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AccessTier {
    /// Frequently accessed data.
    Hot,
    /// Infrequently accessed data.
    Cool,
    /// Premium performance tier.
    Premium,
}

impl AccessTier {
    /// Every accepted tier.
    pub const ALL: [Self; 3] = [Self::Hot, Self::Cool, Self::Premium];

    /// Resource-manager spelling of the tier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "Hot",
            Self::Cool => "Cool",
            Self::Premium => "Premium",
        }
    }
}

impl FromStr for AccessTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| s.to_owned())
    }
}

/// Properties a storage account must satisfy for a volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AccountOptions {
    /// Explicit account name; `None` lets the backend match or create one.
    pub name: Option<String>,
    /// SKU, for example `Standard_LRS`. Empty leaves the choice to the
    /// backend.
    pub sku: String,
    /// Account kind.
    pub kind: AccountKind,
    /// Subscription owning the account; `None` means the controller default.
    pub subscription_id: Option<String>,
    /// Resource group holding the account.
    pub resource_group: String,
    /// Region; empty means the resource group's region.
    pub location: String,
    /// Protocol the account must serve.
    pub protocol: Protocol,
    /// Tags applied to new accounts and, with `match_tags`, used to select
    /// existing ones.
    pub tags: BTreeMap<String, String>,
    /// Only reuse accounts carrying every tag in `tags`.
    pub match_tags: bool,
    /// Hierarchical namespace.
    pub hns_enabled: Option<bool>,
    /// NFS v3 endpoint.
    pub nfs_v3_enabled: Option<bool>,
    /// Anonymous blob access.
    pub allow_blob_public_access: bool,
    /// Infrastructure-level double encryption.
    pub require_infrastructure_encryption: Option<bool>,
    /// Blob versioning.
    pub blob_versioning: Option<bool>,
    /// Soft-delete retention for blobs, in days.
    pub soft_delete_blobs_days: Option<u16>,
    /// Soft-delete retention for containers, in days.
    pub soft_delete_containers_days: Option<u16>,
    /// Default access tier.
    pub access_tier: Option<AccessTier>,
    /// Subnets allowed through the account firewall.
    pub virtual_network_resource_ids: Vec<String>,
    /// Reach the account through a private endpoint.
    pub private_endpoint: bool,
    /// Virtual network used for the private endpoint.
    pub vnet_resource_group: String,
    /// Virtual network name used for the private endpoint.
    pub vnet_name: String,
    /// Subnet name used for the private endpoint.
    pub subnet_name: String,
    /// Storage endpoint suffix.
    pub endpoint_suffix: String,
}

impl AccountOptions {
    /// Key identifying accounts interchangeable for provisioning purposes.
    ///
    /// Requests sharing a key may reuse the same account; the key also names
    /// the lock that keeps concurrent requests from creating duplicates.
    #[must_use]
    pub fn resolution_key(&self) -> String {
        format!(
            "{sku}|{kind}|{rg}|{location}|{protocol}|{private_endpoint}",
            sku = self.sku,
            kind = self.kind,
            rg = self.resource_group,
            location = self.location,
            protocol = self.protocol,
            private_endpoint = self.private_endpoint,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parse_is_exact() {
        assert_eq!("nfs".parse::<Protocol>(), Ok(Protocol::Nfs));
        assert_eq!("edgecache".parse::<Protocol>(), Ok(Protocol::EdgeCache));
        assert!("NFS".parse::<Protocol>().is_err());
        assert!("smb".parse::<Protocol>().is_err());
    }

    #[test]
    fn access_tier_parse_is_exact() {
        assert_eq!("Cool".parse::<AccessTier>(), Ok(AccessTier::Cool));
        assert!("cool".parse::<AccessTier>().is_err());
    }

    #[test]
    fn resolution_key_ignores_volume_specific_fields() {
        let base = AccountOptions {
            sku: String::from("Standard_LRS"),
            resource_group: String::from("rg"),
            location: String::from("westus"),
            ..AccountOptions::default()
        };
        let tagged = AccountOptions {
            tags: BTreeMap::from([(String::from("team"), String::from("a"))]),
            ..base.clone()
        };
        assert_eq!(base.resolution_key(), tagged.resolution_key());

        let private = AccountOptions {
            private_endpoint: true,
            ..base.clone()
        };
        assert_ne!(base.resolution_key(), private.resolution_key());
        assert_eq!(
            base.resolution_key(),
            "Standard_LRS|StorageV2|rg|westus|fuse|false"
        );
    }
}

//! Parameter key table.
//!
//! Every recognised key maps to exactly one setter on [`RawParameters`]. Keys
//! are matched after lowercasing; unknown keys are rejected by the caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use super::ParameterError;
use super::naming::{PV_NAME_TOKEN, PVC_NAME_TOKEN, PVC_NAMESPACE_TOKEN};

/// Parameter key for the account SKU.
pub const SKU_NAME: &str = "skuname";
/// Legacy alias of [`SKU_NAME`].
pub const STORAGE_ACCOUNT_TYPE: &str = "storageaccounttype";
/// Parameter key for the account region.
pub const LOCATION: &str = "location";
/// Parameter key for an explicit account name.
pub const STORAGE_ACCOUNT: &str = "storageaccount";
/// Parameter key for the account subscription.
pub const SUBSCRIPTION_ID: &str = "subscriptionid";
/// Parameter key for the account resource group.
pub const RESOURCE_GROUP: &str = "resourcegroup";
/// Parameter key for an explicit container name.
pub const CONTAINER_NAME: &str = "containername";
/// Parameter key for the generated container name prefix.
pub const CONTAINER_NAME_PREFIX: &str = "containernameprefix";
/// Parameter key for the mount protocol.
pub const PROTOCOL: &str = "protocol";
/// Parameter key for account tags.
pub const TAGS: &str = "tags";
/// Parameter key selecting accounts by tag.
pub const MATCH_TAGS: &str = "matchtags";
/// Parameter key for the credential secret name.
pub const SECRET_NAME: &str = "secretname";
/// Parameter key for the credential secret namespace.
pub const SECRET_NAMESPACE: &str = "secretnamespace";
/// Parameter key enabling the hierarchical namespace.
pub const IS_HNS_ENABLED: &str = "ishnsenabled";
/// Parameter key for blob soft-delete retention.
pub const SOFT_DELETE_BLOBS: &str = "softdeleteblobs";
/// Parameter key for container soft-delete retention.
pub const SOFT_DELETE_CONTAINERS: &str = "softdeletecontainers";
/// Parameter key enabling blob versioning.
pub const ENABLE_BLOB_VERSIONING: &str = "enableblobversioning";
/// Parameter key controlling key persistence.
pub const STORE_ACCOUNT_KEY: &str = "storeaccountkey";
/// Parameter key selecting the newest account key.
pub const GET_LATEST_ACCOUNT_KEY: &str = "getlatestaccountkey";
/// Parameter key allowing anonymous blob access.
pub const ALLOW_BLOB_PUBLIC_ACCESS: &str = "allowblobpublicaccess";
/// Parameter key requiring infrastructure encryption.
pub const REQUIRE_INFRA_ENCRYPTION: &str = "requireinfraencryption";
/// Parameter key carrying the claim namespace.
pub const PVC_NAMESPACE: &str = "csi.storage.k8s.io/pvc/namespace";
/// Parameter key carrying the claim name.
pub const PVC_NAME: &str = "csi.storage.k8s.io/pvc/name";
/// Parameter key carrying the volume name.
pub const PV_NAME: &str = "csi.storage.k8s.io/pv/name";
/// Parameter key for the node mount server address.
pub const SERVER: &str = "server";
/// Parameter key for the storage endpoint suffix.
pub const STORAGE_ENDPOINT_SUFFIX: &str = "storageendpointsuffix";
/// Parameter key for the virtual network resource group.
pub const VNET_RESOURCE_GROUP: &str = "vnetresourcegroup";
/// Parameter key for the virtual network name.
pub const VNET_NAME: &str = "vnetname";
/// Parameter key for the subnet name.
pub const SUBNET_NAME: &str = "subnetname";
/// Parameter key for the default access tier.
pub const ACCESS_TIER: &str = "accesstier";
/// Parameter key for the network endpoint type.
pub const NETWORK_ENDPOINT_TYPE: &str = "networkendpointtype";
/// Parameter key for the edge cache authentication mode.
pub const EDGE_CACHE_AUTHENTICATION: &str = "ecstrgauthentication";
/// Parameter key for node mount permissions.
pub const MOUNT_PERMISSIONS: &str = "mountpermissions";
/// Parameter key selecting data-plane container calls.
pub const USE_DATA_PLANE_API: &str = "usedataplaneapi";
/// Secret namespace recorded in the returned volume context.
pub const CONTEXT_SECRET_NAMESPACE: &str = "secretnamespace";

/// Keys consumed only by the node side; accepted and ignored here.
const NODE_ONLY: [&str; 7] = [
    SERVER,
    "azurestorageauthtype",
    "azurestorageidentityclientid",
    "azurestorageidentityobjectid",
    "azurestorageidentityresourceid",
    "msiendpoint",
    "azurestorageaadendpoint",
];

const SOFT_DELETE_DAYS: std::ops::RangeInclusive<u16> = 1..=365;

/// Values collected from the parameter map before cross-field validation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawParameters {
    pub(super) sku: String,
    pub(super) location: String,
    pub(super) account: String,
    pub(super) subscription_id: String,
    pub(super) resource_group: String,
    pub(super) container_name: String,
    pub(super) container_name_prefix: String,
    pub(super) protocol: String,
    pub(super) tags: String,
    pub(super) match_tags: bool,
    pub(super) secret_name: String,
    pub(super) secret_namespace: String,
    pub(super) pvc_namespace: String,
    pub(super) hns_enabled: Option<bool>,
    pub(super) soft_delete_blobs: Option<u16>,
    pub(super) soft_delete_containers: Option<u16>,
    pub(super) blob_versioning: Option<bool>,
    pub(super) store_account_key: bool,
    pub(super) latest_account_key: bool,
    pub(super) allow_blob_public_access: bool,
    pub(super) require_infra_encryption: Option<bool>,
    pub(super) endpoint_suffix: String,
    pub(super) vnet_resource_group: String,
    pub(super) vnet_name: String,
    pub(super) subnet_name: String,
    pub(super) access_tier: String,
    pub(super) network_endpoint_type: String,
    pub(super) use_data_plane_api: bool,
    pub(super) replacements: BTreeMap<&'static str, String>,
}

impl Default for RawParameters {
    fn default() -> Self {
        Self {
            sku: String::new(),
            location: String::new(),
            account: String::new(),
            subscription_id: String::new(),
            resource_group: String::new(),
            container_name: String::new(),
            container_name_prefix: String::new(),
            protocol: String::new(),
            tags: String::new(),
            match_tags: false,
            secret_name: String::new(),
            secret_namespace: String::new(),
            pvc_namespace: String::new(),
            hns_enabled: None,
            soft_delete_blobs: None,
            soft_delete_containers: None,
            blob_versioning: None,
            store_account_key: true,
            latest_account_key: false,
            allow_blob_public_access: false,
            require_infra_encryption: None,
            endpoint_suffix: String::new(),
            vnet_resource_group: String::new(),
            vnet_name: String::new(),
            subnet_name: String::new(),
            access_tier: String::new(),
            network_endpoint_type: String::new(),
            use_data_plane_api: false,
            replacements: BTreeMap::new(),
        }
    }
}

type Setter = fn(&mut RawParameters, &str) -> Result<(), ParameterError>;

const fn field(key: &'static str, setter: Setter) -> (&'static str, Setter) {
    (key, setter)
}

fn is_true(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

/// Strict boolean parse accepting the spellings `1`, `t`, `true` and their
/// negations, in lower, upper, or title case.
fn parse_bool(key: &'static str, value: &str) -> Result<bool, ParameterError> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(ParameterError::InvalidValue {
            key,
            value: value.to_owned(),
            expected: "a boolean",
        }),
    }
}

fn parse_days(key: &'static str, value: &str) -> Result<u16, ParameterError> {
    let invalid = || ParameterError::InvalidValue {
        key,
        value: value.to_owned(),
        expected: "a number of days in range [1, 365]",
    };
    let days: u16 = value.trim().parse().map_err(|_| invalid())?;
    if SOFT_DELETE_DAYS.contains(&days) {
        Ok(days)
    } else {
        Err(invalid())
    }
}

fn validate_mount_permissions(value: &str) -> Result<(), ParameterError> {
    if value.is_empty() {
        return Ok(());
    }
    u32::from_str_radix(value, 8)
        .map(|_| ())
        .map_err(|_| ParameterError::InvalidValue {
            key: MOUNT_PERMISSIONS,
            value: value.to_owned(),
            expected: "an octal permission mask",
        })
}

static FIELDS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let mut fields = HashMap::from([
        field(SKU_NAME, |p, v| {
            v.clone_into(&mut p.sku);
            Ok(())
        }),
        field(STORAGE_ACCOUNT_TYPE, |p, v| {
            v.clone_into(&mut p.sku);
            Ok(())
        }),
        field(LOCATION, |p, v| {
            v.clone_into(&mut p.location);
            Ok(())
        }),
        field(STORAGE_ACCOUNT, |p, v| {
            v.clone_into(&mut p.account);
            Ok(())
        }),
        field(SUBSCRIPTION_ID, |p, v| {
            v.clone_into(&mut p.subscription_id);
            Ok(())
        }),
        field(RESOURCE_GROUP, |p, v| {
            v.clone_into(&mut p.resource_group);
            Ok(())
        }),
        field(CONTAINER_NAME, |p, v| {
            v.clone_into(&mut p.container_name);
            Ok(())
        }),
        field(CONTAINER_NAME_PREFIX, |p, v| {
            v.clone_into(&mut p.container_name_prefix);
            Ok(())
        }),
        field(PROTOCOL, |p, v| {
            v.clone_into(&mut p.protocol);
            Ok(())
        }),
        field(TAGS, |p, v| {
            v.clone_into(&mut p.tags);
            Ok(())
        }),
        field(MATCH_TAGS, |p, v| {
            p.match_tags = is_true(v);
            Ok(())
        }),
        field(SECRET_NAME, |p, v| {
            v.clone_into(&mut p.secret_name);
            Ok(())
        }),
        field(SECRET_NAMESPACE, |p, v| {
            v.clone_into(&mut p.secret_namespace);
            Ok(())
        }),
        field(IS_HNS_ENABLED, |p, v| {
            if is_true(v) {
                p.hns_enabled = Some(true);
            }
            Ok(())
        }),
        field(SOFT_DELETE_BLOBS, |p, v| {
            p.soft_delete_blobs = Some(parse_days(SOFT_DELETE_BLOBS, v)?);
            Ok(())
        }),
        field(SOFT_DELETE_CONTAINERS, |p, v| {
            p.soft_delete_containers = Some(parse_days(SOFT_DELETE_CONTAINERS, v)?);
            Ok(())
        }),
        field(ENABLE_BLOB_VERSIONING, |p, v| {
            p.blob_versioning = Some(is_true(v));
            Ok(())
        }),
        field(STORE_ACCOUNT_KEY, |p, v| {
            if v.eq_ignore_ascii_case("false") {
                p.store_account_key = false;
            }
            Ok(())
        }),
        field(GET_LATEST_ACCOUNT_KEY, |p, v| {
            p.latest_account_key = parse_bool(GET_LATEST_ACCOUNT_KEY, v)?;
            Ok(())
        }),
        field(ALLOW_BLOB_PUBLIC_ACCESS, |p, v| {
            if is_true(v) {
                p.allow_blob_public_access = true;
            }
            Ok(())
        }),
        field(REQUIRE_INFRA_ENCRYPTION, |p, v| {
            if is_true(v) {
                p.require_infra_encryption = Some(true);
            }
            Ok(())
        }),
        field(PVC_NAMESPACE, |p, v| {
            v.clone_into(&mut p.pvc_namespace);
            p.replacements.insert(PVC_NAMESPACE_TOKEN, v.to_owned());
            Ok(())
        }),
        field(PVC_NAME, |p, v| {
            p.replacements.insert(PVC_NAME_TOKEN, v.to_owned());
            Ok(())
        }),
        field(PV_NAME, |p, v| {
            p.replacements.insert(PV_NAME_TOKEN, v.to_owned());
            Ok(())
        }),
        field(STORAGE_ENDPOINT_SUFFIX, |p, v| {
            v.clone_into(&mut p.endpoint_suffix);
            Ok(())
        }),
        field(VNET_RESOURCE_GROUP, |p, v| {
            v.clone_into(&mut p.vnet_resource_group);
            Ok(())
        }),
        field(VNET_NAME, |p, v| {
            v.clone_into(&mut p.vnet_name);
            Ok(())
        }),
        field(SUBNET_NAME, |p, v| {
            v.clone_into(&mut p.subnet_name);
            Ok(())
        }),
        field(ACCESS_TIER, |p, v| {
            v.clone_into(&mut p.access_tier);
            Ok(())
        }),
        field(NETWORK_ENDPOINT_TYPE, |p, v| {
            v.clone_into(&mut p.network_endpoint_type);
            Ok(())
        }),
        field(EDGE_CACHE_AUTHENTICATION, |p, v| {
            p.replacements.insert(EDGE_CACHE_AUTHENTICATION, v.to_owned());
            Ok(())
        }),
        field(MOUNT_PERMISSIONS, |_, v| validate_mount_permissions(v)),
        field(USE_DATA_PLANE_API, |p, v| {
            p.use_data_plane_api = is_true(v);
            Ok(())
        }),
    ]);
    for key in NODE_ONLY {
        fields.insert(key, |_, _| Ok(()));
    }
    fields
});

/// Applies every entry of `parameters` to a fresh [`RawParameters`].
///
/// # Errors
///
/// Returns [`ParameterError::UnknownKey`] for unrecognised keys and
/// [`ParameterError::InvalidValue`] for values that fail their per-key check.
pub fn collect(parameters: &BTreeMap<String, String>) -> Result<RawParameters, ParameterError> {
    let mut raw = RawParameters::default();
    for (key, value) in parameters {
        let setter = FIELDS
            .get(key.to_lowercase().as_str())
            .ok_or_else(|| ParameterError::UnknownKey { key: key.clone() })?;
        setter(&mut raw, value)?;
    }
    Ok(raw)
}

/// Every recognised key, lowercased.
#[must_use]
pub fn known_keys() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = FIELDS.keys().copied().collect();
    keys.sort_unstable();
    keys
}

//! Tests for provisioning request derivation.

use super::fields::*;
use super::*;
use rstest::{fixture, rstest};

#[fixture]
fn defaults() -> ProvisioningDefaults {
    ProvisioningDefaults {
        subscription_id: String::from("sub-home"),
        resource_group: String::from("rg-home"),
        location: String::new(),
        endpoint_suffix: String::from(DEFAULT_ENDPOINT_SUFFIX),
        azure_stack: false,
        secret_namespace: String::from(DEFAULT_SECRET_NAMESPACE),
        vnet_resource_group: String::new(),
        vnet_name: String::from("vnet-home"),
        subnet_name: String::from("snet-home"),
    }
}

fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

fn derive(pairs: &[(&str, &str)], defaults: &ProvisioningDefaults) -> ProvisioningRequest {
    ProvisioningRequest::derive("pvc-1", &params(pairs), defaults)
        .unwrap_or_else(|err| panic!("derive {pairs:?}: {err}"))
}

fn derive_err(pairs: &[(&str, &str)], defaults: &ProvisioningDefaults) -> ParameterError {
    ProvisioningRequest::derive("pvc-1", &params(pairs), defaults)
        .expect_err("derivation should fail")
}

#[rstest]
fn empty_parameters_use_defaults(defaults: ProvisioningDefaults) {
    let request = derive(&[], &defaults);

    assert_eq!(request.account.resource_group, "rg-home");
    assert_eq!(request.account.protocol, Protocol::Fuse);
    assert_eq!(request.account.kind, AccountKind::StorageV2);
    assert_eq!(request.account.endpoint_suffix, DEFAULT_ENDPOINT_SUFFIX);
    assert_eq!(request.container, ContainerNaming::Derived);
    assert!(request.credentials.store_account_key);
    assert!(!request.credentials.use_data_plane_api);
    assert_eq!(request.credentials.secret_namespace, "default");
    assert!(request.subnet.is_none());
    assert_eq!(request.container_name(), "pvc-1");
}

#[rstest]
fn keys_are_case_insensitive(defaults: ProvisioningDefaults) {
    let request = derive(&[("SKUName", "Standard_GRS"), ("Location", "eastus")], &defaults);
    assert_eq!(request.account.sku, "Standard_GRS");
    assert_eq!(request.account.location, "eastus");
}

#[rstest]
fn unknown_key_is_rejected(defaults: ProvisioningDefaults) {
    let err = derive_err(&[("colour", "blue")], &defaults);
    assert_eq!(
        err,
        ParameterError::UnknownKey {
            key: String::from("colour")
        }
    );
}

#[rstest]
#[case::sku(SKU_NAME, "Standard_ZRS")]
#[case::account_type(STORAGE_ACCOUNT_TYPE, "Standard_ZRS")]
fn sku_keys_set_sku(defaults: ProvisioningDefaults, #[case] key: &str, #[case] value: &str) {
    assert_eq!(derive(&[(key, value)], &defaults).account.sku, value);
}

#[rstest]
fn location_key(defaults: ProvisioningDefaults) {
    assert_eq!(derive(&[(LOCATION, "westeurope")], &defaults).account.location, "westeurope");
}

#[rstest]
fn storage_account_key(defaults: ProvisioningDefaults) {
    assert_eq!(
        derive(&[(STORAGE_ACCOUNT, "acct1")], &defaults).account.name.as_deref(),
        Some("acct1")
    );
}

#[rstest]
fn subscription_id_key(defaults: ProvisioningDefaults) {
    let request = derive(&[(SUBSCRIPTION_ID, "sub-other")], &defaults);
    assert_eq!(request.account.subscription_id.as_deref(), Some("sub-other"));
    assert!(request.credentials.store_account_key);
    let home = derive(&[(SUBSCRIPTION_ID, "sub-home")], &defaults);
    assert_eq!(home.account.subscription_id.as_deref(), Some("sub-home"));
}

#[rstest]
fn resource_group_key(defaults: ProvisioningDefaults) {
    assert_eq!(
        derive(&[(RESOURCE_GROUP, "rg-x")], &defaults).account.resource_group,
        "rg-x"
    );
}

#[rstest]
fn container_name_key_substitutes_templates(defaults: ProvisioningDefaults) {
    let request = derive(
        &[
            (CONTAINER_NAME, "${pvc.metadata.namespace}-${pvc.metadata.name}"),
            (PVC_NAMESPACE, "team-a"),
            (PVC_NAME, "data"),
        ],
        &defaults,
    );
    assert_eq!(
        request.container,
        ContainerNaming::Explicit(String::from("team-a-data"))
    );
    assert_eq!(request.container_name(), "team-a-data");
}

#[rstest]
fn container_name_prefix_key(defaults: ProvisioningDefaults) {
    let request = derive(&[(CONTAINER_NAME_PREFIX, "team")], &defaults);
    assert_eq!(request.container, ContainerNaming::Prefix(String::from("team")));
    assert_eq!(request.container_name(), "team-pvc-1");
}

#[rstest]
fn invalid_container_name_prefix_is_rejected(defaults: ProvisioningDefaults) {
    assert!(matches!(
        derive_err(&[(CONTAINER_NAME_PREFIX, "Team_A")], &defaults),
        ParameterError::Conflict(_)
    ));
}

#[rstest]
fn container_name_and_prefix_are_exclusive(defaults: ProvisioningDefaults) {
    let err = derive_err(
        &[(CONTAINER_NAME, "data"), (CONTAINER_NAME_PREFIX, "team")],
        &defaults,
    );
    assert!(
        err.to_string().contains("could not be specified together"),
        "unexpected error: {err}"
    );
}

#[rstest]
#[case("fuse", Protocol::Fuse)]
#[case("fuse2", Protocol::Fuse2)]
#[case("edgecache", Protocol::EdgeCache)]
fn protocol_key(
    defaults: ProvisioningDefaults,
    #[case] value: &str,
    #[case] protocol: Protocol,
) {
    assert_eq!(derive(&[(PROTOCOL, value)], &defaults).account.protocol, protocol);
}

#[rstest]
fn unsupported_protocol_is_rejected(defaults: ProvisioningDefaults) {
    assert!(matches!(
        derive_err(&[(PROTOCOL, "smb")], &defaults),
        ParameterError::UnsupportedProtocol { .. }
    ));
}

#[rstest]
fn tags_key(defaults: ProvisioningDefaults) {
    let request = derive(&[(TAGS, "team=a,env=prod")], &defaults);
    assert_eq!(request.account.tags.len(), 2);
    assert!(matches!(
        derive_err(&[(TAGS, "team")], &defaults),
        ParameterError::InvalidTags { .. }
    ));
}

#[rstest]
fn match_tags_key(defaults: ProvisioningDefaults) {
    assert!(derive(&[(MATCH_TAGS, "TRUE")], &defaults).account.match_tags);
    assert!(!derive(&[(MATCH_TAGS, "yes")], &defaults).account.match_tags);
}

#[rstest]
fn match_tags_with_explicit_account_is_rejected(defaults: ProvisioningDefaults) {
    let err = derive_err(&[(MATCH_TAGS, "true"), (STORAGE_ACCOUNT, "acct1")], &defaults);
    assert!(
        err.to_string().contains("matchTags must set as false"),
        "unexpected error: {err}"
    );
}

#[rstest]
fn secret_name_key(defaults: ProvisioningDefaults) {
    assert_eq!(
        derive(&[(SECRET_NAME, "my-secret")], &defaults)
            .credentials
            .secret_name
            .as_deref(),
        Some("my-secret")
    );
}

#[rstest]
#[case::explicit(&[(SECRET_NAMESPACE, "ns1"), (PVC_NAMESPACE, "ns2")], "ns1")]
#[case::claim(&[(PVC_NAMESPACE, "ns2")], "ns2")]
#[case::fallback(&[], "default")]
fn secret_namespace_resolution(
    defaults: ProvisioningDefaults,
    #[case] pairs: &[(&str, &str)],
    #[case] expected: &str,
) {
    assert_eq!(derive(pairs, &defaults).credentials.secret_namespace, expected);
}

#[rstest]
fn hns_key(defaults: ProvisioningDefaults) {
    assert_eq!(derive(&[(IS_HNS_ENABLED, "true")], &defaults).account.hns_enabled, Some(true));
    assert_eq!(derive(&[(IS_HNS_ENABLED, "false")], &defaults).account.hns_enabled, None);
}

#[rstest]
#[case::blobs(SOFT_DELETE_BLOBS)]
#[case::containers(SOFT_DELETE_CONTAINERS)]
fn soft_delete_days_bounds(defaults: ProvisioningDefaults, #[case] key: &str) {
    let request = derive(&[(key, "365")], &defaults);
    let days = if key == SOFT_DELETE_BLOBS {
        request.account.soft_delete_blobs_days
    } else {
        request.account.soft_delete_containers_days
    };
    assert_eq!(days, Some(365));

    for bad in ["0", "366", "-1", "seven"] {
        assert!(
            matches!(
                derive_err(&[(key, bad)], &defaults),
                ParameterError::InvalidValue { .. }
            ),
            "{key}={bad} should be rejected"
        );
    }
}

#[rstest]
fn blob_versioning_key(defaults: ProvisioningDefaults) {
    assert_eq!(
        derive(&[(ENABLE_BLOB_VERSIONING, "true")], &defaults).account.blob_versioning,
        Some(true)
    );
}

#[rstest]
#[case::nfs(&[(ENABLE_BLOB_VERSIONING, "true"), (PROTOCOL, "nfs")])]
#[case::hns(&[(ENABLE_BLOB_VERSIONING, "true"), (IS_HNS_ENABLED, "true")])]
fn blob_versioning_conflicts(defaults: ProvisioningDefaults, #[case] pairs: &[(&str, &str)]) {
    assert!(matches!(derive_err(pairs, &defaults), ParameterError::Conflict(_)));
}

#[rstest]
#[case("false", false)]
#[case("FALSE", false)]
#[case("no", true)]
#[case("true", true)]
fn store_account_key_key(
    defaults: ProvisioningDefaults,
    #[case] value: &str,
    #[case] expected: bool,
) {
    assert_eq!(
        derive(&[(STORE_ACCOUNT_KEY, value)], &defaults)
            .credentials
            .store_account_key,
        expected
    );
}

#[rstest]
fn get_latest_account_key_key(defaults: ProvisioningDefaults) {
    assert!(derive(&[(GET_LATEST_ACCOUNT_KEY, "True")], &defaults).credentials.latest_account_key);
    assert!(!derive(&[(GET_LATEST_ACCOUNT_KEY, "0")], &defaults).credentials.latest_account_key);
    assert!(matches!(
        derive_err(&[(GET_LATEST_ACCOUNT_KEY, "maybe")], &defaults),
        ParameterError::InvalidValue {
            key: GET_LATEST_ACCOUNT_KEY,
            ..
        }
    ));
}

#[rstest]
fn allow_blob_public_access_key(defaults: ProvisioningDefaults) {
    assert!(derive(&[(ALLOW_BLOB_PUBLIC_ACCESS, "true")], &defaults).account.allow_blob_public_access);
    assert!(!derive(&[], &defaults).account.allow_blob_public_access);
}

#[rstest]
fn require_infra_encryption_key(defaults: ProvisioningDefaults) {
    assert_eq!(
        derive(&[(REQUIRE_INFRA_ENCRYPTION, "true")], &defaults)
            .account
            .require_infrastructure_encryption,
        Some(true)
    );
}

#[rstest]
fn pv_name_key_feeds_templates(defaults: ProvisioningDefaults) {
    let request = derive(
        &[(CONTAINER_NAME, "vol-${pv.metadata.name}"), (PV_NAME, "pv-9")],
        &defaults,
    );
    assert_eq!(request.container_name(), "vol-pv-9");
}

#[rstest]
#[case("server")]
#[case("azurestorageauthtype")]
#[case("azurestorageidentityclientid")]
#[case("AzureStorageIdentityObjectID")]
#[case("azurestorageidentityresourceid")]
#[case("msiendpoint")]
#[case("azurestorageaadendpoint")]
fn node_only_keys_are_accepted(defaults: ProvisioningDefaults, #[case] key: &str) {
    assert_eq!(derive(&[(key, "x")], &defaults), derive(&[], &defaults));
}

#[rstest]
fn storage_endpoint_suffix_key(defaults: ProvisioningDefaults) {
    assert_eq!(
        derive(&[(STORAGE_ENDPOINT_SUFFIX, "core.chinacloudapi.cn")], &defaults)
            .account
            .endpoint_suffix,
        "core.chinacloudapi.cn"
    );
}

#[rstest]
fn vnet_keys_feed_nfs_firewall_rules(defaults: ProvisioningDefaults) {
    let request = derive(
        &[
            (PROTOCOL, "nfs"),
            (VNET_RESOURCE_GROUP, "net-rg"),
            (VNET_NAME, "vnet1"),
            (SUBNET_NAME, "snet1"),
        ],
        &defaults,
    );
    let subnet = request.subnet.unwrap_or_else(|| panic!("subnet expected"));
    assert_eq!(subnet.resource_group, "net-rg");
    assert_eq!(subnet.vnet, "vnet1");
    assert_eq!(subnet.subnet, "snet1");
    assert_eq!(
        request.account.virtual_network_resource_ids,
        vec![String::from(
            "/subscriptions/sub-home/resourceGroups/net-rg/providers/Microsoft.Network/virtualNetworks/vnet1/subnets/snet1"
        )]
    );
}

#[rstest]
fn nfs_forces_hns_and_disables_key_storage(defaults: ProvisioningDefaults) {
    let request = derive(&[(PROTOCOL, "nfs"), (STORE_ACCOUNT_KEY, "true")], &defaults);
    assert_eq!(request.account.hns_enabled, Some(true));
    assert_eq!(request.account.nfs_v3_enabled, Some(true));
    assert!(!request.credentials.store_account_key);
    assert_eq!(request.account.vnet_resource_group, "rg-home");
}

#[rstest]
fn nfs_without_subnet_is_rejected(mut defaults: ProvisioningDefaults) {
    defaults.vnet_name.clear();
    assert!(matches!(
        derive_err(&[(PROTOCOL, "nfs")], &defaults),
        ParameterError::Conflict(_)
    ));
}

#[rstest]
fn cross_subscription_rejects_nfs(defaults: ProvisioningDefaults) {
    let err = derive_err(&[(PROTOCOL, "nfs"), (SUBSCRIPTION_ID, "sub-other")], &defaults);
    assert!(err.to_string().contains("cross subscription"), "unexpected error: {err}");
}

#[rstest]
fn cross_subscription_requires_key_storage(defaults: ProvisioningDefaults) {
    let err = derive_err(
        &[(STORE_ACCOUNT_KEY, "false"), (SUBSCRIPTION_ID, "sub-other")],
        &defaults,
    );
    assert!(
        err.to_string().contains("storeAccountKey must set as true"),
        "unexpected error: {err}"
    );
}

#[rstest]
#[case("Hot", Some(AccessTier::Hot))]
#[case("Premium", Some(AccessTier::Premium))]
#[case("", None)]
fn access_tier_key(
    defaults: ProvisioningDefaults,
    #[case] value: &str,
    #[case] expected: Option<AccessTier>,
) {
    assert_eq!(derive(&[(ACCESS_TIER, value)], &defaults).account.access_tier, expected);
}

#[rstest]
fn unsupported_access_tier_is_rejected(defaults: ProvisioningDefaults) {
    assert!(matches!(
        derive_err(&[(ACCESS_TIER, "Archive")], &defaults),
        ParameterError::UnsupportedAccessTier { .. }
    ));
}

#[rstest]
fn network_endpoint_type_key(defaults: ProvisioningDefaults) {
    let request = derive(
        &[(NETWORK_ENDPOINT_TYPE, "PrivateEndpoint"), (PROTOCOL, "nfs")],
        &defaults,
    );
    assert!(request.account.private_endpoint);
    assert!(request.subnet.is_none(), "private endpoint skips firewall rules");
}

#[rstest]
fn edge_cache_authentication_key_feeds_templates(defaults: ProvisioningDefaults) {
    let request = derive(
        &[
            (EDGE_CACHE_AUTHENTICATION, "key"),
            (CONTAINER_NAME, "cache-ecstrgauthentication"),
        ],
        &defaults,
    );
    assert_eq!(request.container_name(), "cache-key");
}

#[rstest]
#[case("0755", true)]
#[case("", true)]
#[case("0999", false)]
#[case("rwx", false)]
fn mount_permissions_key(
    defaults: ProvisioningDefaults,
    #[case] value: &str,
    #[case] valid: bool,
) {
    let result = ProvisioningRequest::derive("pvc-1", &params(&[(MOUNT_PERMISSIONS, value)]), &defaults);
    assert_eq!(result.is_ok(), valid, "mountPermissions={value}");
}

#[rstest]
fn use_data_plane_api_key(defaults: ProvisioningDefaults) {
    assert!(derive(&[(USE_DATA_PLANE_API, "true")], &defaults).credentials.use_data_plane_api);
}

#[rstest]
#[case("Premium_LRS", AccountKind::BlockBlobStorage)]
#[case("premium_zrs", AccountKind::BlockBlobStorage)]
#[case("Standard_LRS", AccountKind::StorageV2)]
fn sku_selects_account_kind(
    defaults: ProvisioningDefaults,
    #[case] sku: &str,
    #[case] kind: AccountKind,
) {
    assert_eq!(derive(&[(SKU_NAME, sku)], &defaults).account.kind, kind);
}

#[rstest]
fn azure_stack_limits_skus(mut defaults: ProvisioningDefaults) {
    defaults.azure_stack = true;
    assert_eq!(
        derive(&[(SKU_NAME, "Premium_LRS")], &defaults).account.kind,
        AccountKind::Storage
    );
    assert!(matches!(
        derive_err(&[(SKU_NAME, "Standard_GRS")], &defaults),
        ParameterError::Conflict(_)
    ));
}

#[test]
fn every_key_is_listed_once() {
    let keys = known_keys();
    let mut deduped = keys.clone();
    deduped.dedup();
    assert_eq!(keys, deduped);
    assert!(keys.iter().all(|key| key.to_lowercase() == *key));
    assert_eq!(keys.len(), 40);
}

//! Management-plane client over the resource-manager REST API.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::Authenticator;
use super::error::{from_arm_response, transport};
use super::models::{
    AccountCreate, AccountCreateProperties, AccountList, BlobServiceProperties,
    BlobServicePropertiesBody, Container, Encryption, KeyList, NetworkRuleSet,
    PROVISIONING_SUCCEEDED, Sku, StorageAccount, VirtualNetworkRule,
};
use super::{ACCOUNT_NAME_PREFIX, CREATED_BY_TAG, CREATED_BY_VALUE};
use crate::account::{AccessTier, AccountOptions};
use crate::remote::{
    AccountRef, EnsuredAccount, ManagementPlane, RemoteError, RemoteErrorKind, RemoteFuture,
    SubnetRef,
};

const STORAGE_API_VERSION: &str = "2023-01-01";
const NETWORK_API_VERSION: &str = "2023-09-01";
const RESOURCES_API_VERSION: &str = "2021-04-01";
const STORAGE_SERVICE: &str = "Microsoft.Storage";
const ACCOUNT_NAME_MAX_LEN: usize = 24;

/// Addressing and timing of an [`ArmClient`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArmSettings {
    /// Resource-manager endpoint, for example `https://management.azure.com`.
    pub endpoint: String,
    /// Subscription used when a request names none.
    pub subscription_id: String,
    /// Interval between provisioning-state checks after an account create.
    pub poll_interval: Duration,
    /// Upper bound on waiting for a new account to provision.
    pub provision_timeout: Duration,
}

/// [`ManagementPlane`] backed by the resource-manager API.
#[derive(Debug)]
pub struct ArmClient {
    http: Client,
    auth: Authenticator,
    settings: ArmSettings,
    subnet_lock: Mutex<()>,
}

impl ArmClient {
    /// Creates a client that authenticates through `auth`.
    #[must_use]
    pub fn new(http: Client, auth: Authenticator, settings: ArmSettings) -> Self {
        Self {
            http,
            auth,
            settings,
            subnet_lock: Mutex::new(()),
        }
    }

    fn subscription<'s>(&'s self, requested: Option<&'s str>) -> &'s str {
        requested
            .filter(|subscription| !subscription.is_empty())
            .unwrap_or(&self.settings.subscription_id)
    }

    fn url(&self, resource_id: &str) -> String {
        format!("{}{resource_id}", self.settings.endpoint.trim_end_matches('/'))
    }

    fn account_id(&self, account: &AccountRef) -> String {
        format!(
            "{}/providers/Microsoft.Storage/storageAccounts/{}",
            group_id(
                self.subscription(account.subscription_id.as_deref()),
                &account.resource_group
            ),
            account.account
        )
    }

    fn account_url(&self, account: &AccountRef) -> String {
        self.url(&self.account_id(account))
    }

    fn container_url(&self, account: &AccountRef, container: &str) -> String {
        format!(
            "{}/blobServices/default/containers/{container}?api-version={STORAGE_API_VERSION}",
            self.account_url(account)
        )
    }

    async fn send(&self, context: &str, request: RequestBuilder) -> Result<Response, RemoteError> {
        let token = self.auth.token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| transport(context, &err))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(from_arm_response(context, response).await)
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        context: &str,
        request: RequestBuilder,
    ) -> Result<T, RemoteError> {
        self.send(context, request)
            .await?
            .json::<T>()
            .await
            .map_err(|err| transport(context, &err))
    }

    async fn fetch_optional<T: DeserializeOwned>(
        &self,
        context: &str,
        request: RequestBuilder,
    ) -> Result<Option<T>, RemoteError> {
        match self.fetch(context, request).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind == RemoteErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn put<B: Serialize + Sync>(
        &self,
        context: &str,
        url: String,
        body: &B,
    ) -> Result<(), RemoteError> {
        self.send(context, self.http.put(url).json(body)).await?;
        Ok(())
    }

    async fn get_account(&self, account: &AccountRef) -> Result<Option<StorageAccount>, RemoteError> {
        let url = format!("{}?api-version={STORAGE_API_VERSION}", self.account_url(account));
        self.fetch_optional("get storage account", self.http.get(url))
            .await
    }

    async fn list_accounts(
        &self,
        subscription: &str,
        resource_group: &str,
    ) -> Result<Vec<StorageAccount>, RemoteError> {
        let mut accounts = Vec::new();
        let mut next = Some(format!(
            "{}/providers/Microsoft.Storage/storageAccounts?api-version={STORAGE_API_VERSION}",
            self.url(&group_id(subscription, resource_group))
        ));
        while let Some(url) = next {
            let page: AccountList = self
                .fetch("list storage accounts", self.http.get(url))
                .await?;
            accounts.extend(page.value);
            next = page.next_link.filter(|link| !link.is_empty());
        }
        Ok(accounts)
    }

    async fn group_location(&self, subscription: &str, resource_group: &str) -> Result<String, RemoteError> {
        let url = format!(
            "{}?api-version={RESOURCES_API_VERSION}",
            self.url(&group_id(subscription, resource_group))
        );
        let group: Value = self.fetch("get resource group", self.http.get(url)).await?;
        group
            .get("location")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| {
                RemoteError::new(
                    RemoteErrorKind::Other,
                    format!("resource group {resource_group} reports no location"),
                )
            })
    }

    async fn create_account(
        &self,
        account: &AccountRef,
        options: &AccountOptions,
    ) -> Result<(), RemoteError> {
        let location = if options.location.is_empty() {
            self.group_location(
                self.subscription(account.subscription_id.as_deref()),
                &account.resource_group,
            )
            .await?
        } else {
            options.location.clone()
        };
        let mut tags = options.tags.clone();
        tags.insert(CREATED_BY_TAG.to_owned(), CREATED_BY_VALUE.to_owned());
        let network_acls = (!options.virtual_network_resource_ids.is_empty()).then(|| NetworkRuleSet {
            default_action: String::from("Deny"),
            virtual_network_rules: options
                .virtual_network_resource_ids
                .iter()
                .map(|id| VirtualNetworkRule { id: id.clone() })
                .collect(),
        });
        let body = AccountCreate {
            location: location.clone(),
            kind: options.kind.as_str().to_owned(),
            sku: Sku {
                name: options.sku.clone(),
            },
            tags,
            properties: AccountCreateProperties {
                minimum_tls_version: "TLS1_2",
                supports_https_traffic_only: true,
                allow_blob_public_access: options.allow_blob_public_access,
                is_hns_enabled: options.hns_enabled,
                is_nfs_v3_enabled: options.nfs_v3_enabled,
                access_tier: options.access_tier.map(AccessTier::as_str),
                network_acls,
                encryption: options.require_infrastructure_encryption.map(|required| Encryption {
                    require_infrastructure_encryption: Some(required),
                }),
            },
        };
        info!(%account, sku = %options.sku, kind = %options.kind, "creating storage account");
        let url = format!("{}?api-version={STORAGE_API_VERSION}", self.account_url(account));
        self.put("create storage account", url, &body).await?;
        self.wait_until_provisioned(account).await?;

        if let Some(properties) = BlobServicePropertiesBody::from_options(options) {
            let url = format!(
                "{}/blobServices/default?api-version={STORAGE_API_VERSION}",
                self.account_url(account)
            );
            self.put(
                "set blob service properties",
                url,
                &BlobServiceProperties { properties },
            )
            .await?;
        }
        if options.private_endpoint {
            self.create_private_endpoint(account, options, &location).await?;
        }
        Ok(())
    }

    async fn wait_until_provisioned(&self, account: &AccountRef) -> Result<(), RemoteError> {
        let deadline = Instant::now() + self.settings.provision_timeout;
        loop {
            let state = self
                .get_account(account)
                .await?
                .map(|found| found.properties.provisioning_state);
            if state.as_deref() == Some(PROVISIONING_SUCCEEDED) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RemoteError::new(
                    RemoteErrorKind::AccountNotProvisioned,
                    format!(
                        "StorageAccountIsNotProvisioned: {account} still in state {}",
                        state.as_deref().unwrap_or("missing")
                    ),
                ));
            }
            debug!(%account, state = ?state, "waiting for storage account");
            sleep(self.settings.poll_interval).await;
        }
    }

    async fn create_private_endpoint(
        &self,
        account: &AccountRef,
        options: &AccountOptions,
        location: &str,
    ) -> Result<(), RemoteError> {
        let subscription = self.subscription(account.subscription_id.as_deref());
        let subnet = SubnetRef {
            subscription_id: subscription.to_owned(),
            resource_group: options.vnet_resource_group.clone(),
            vnet: options.vnet_name.clone(),
            subnet: options.subnet_name.clone(),
        };
        let name = format!("{}-pvtendpoint", account.account);
        let url = format!(
            "{}/providers/Microsoft.Network/privateEndpoints/{name}?api-version={NETWORK_API_VERSION}",
            self.url(&group_id(subscription, &options.vnet_resource_group))
        );
        let body = json!({
            "location": location,
            "properties": {
                "subnet": { "id": subnet.resource_id() },
                "privateLinkServiceConnections": [{
                    "name": name,
                    "properties": {
                        "privateLinkServiceId": self.account_id(account),
                        "groupIds": ["blob"],
                    },
                }],
            },
        });
        info!(%account, endpoint = %name, "creating private endpoint");
        self.put("create private endpoint", url, &body).await
    }

    async fn list_key(&self, account: &AccountRef, latest: bool) -> Result<String, RemoteError> {
        let url = format!(
            "{}/listKeys?api-version={STORAGE_API_VERSION}",
            self.account_url(account)
        );
        let keys: KeyList = self
            .fetch("list storage account keys", self.http.post(url))
            .await?;
        let key = keys.select(latest).ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::Other,
                format!("no keys returned for {account}"),
            )
        })?;
        debug!(%account, key_name = %key.key_name, latest, "selected account key");
        Ok(key.value)
    }

    async fn ensure(&self, options: &AccountOptions) -> Result<EnsuredAccount, RemoteError> {
        let subscription = self.subscription(options.subscription_id.as_deref()).to_owned();
        let resolved = if let Some(name) = &options.name {
            let account = AccountRef::new(Some(subscription), &options.resource_group, name);
            if self.get_account(&account).await?.is_none() {
                self.create_account(&account, options).await?;
            }
            account
        } else {
            let existing = self
                .list_accounts(&subscription, &options.resource_group)
                .await?
                .into_iter()
                .find(|candidate| candidate.satisfies(options));
            if let Some(found) = existing {
                info!(account = %found.name, resource_group = %options.resource_group, "reusing matching storage account");
                AccountRef::new(Some(subscription), &options.resource_group, found.name)
            } else {
                let account = AccountRef::new(
                    Some(subscription),
                    &options.resource_group,
                    generated_account_name(),
                );
                self.create_account(&account, options).await?;
                account
            }
        };
        let key = self.list_key(&resolved, false).await?;
        Ok(EnsuredAccount {
            name: resolved.account,
            key: Some(key),
        })
    }

    async fn update_subnet(&self, subnet: &SubnetRef) -> Result<(), RemoteError> {
        let _serialised = self.subnet_lock.lock().await;
        let url = format!(
            "{}?api-version={NETWORK_API_VERSION}",
            self.url(&subnet.resource_id())
        );
        let mut current: Value = self.fetch("get subnet", self.http.get(url.clone())).await?;
        let malformed = || {
            RemoteError::new(
                RemoteErrorKind::Other,
                format!("subnet {} returned no properties", subnet.subnet),
            )
        };
        let properties = current
            .get_mut("properties")
            .and_then(Value::as_object_mut)
            .ok_or_else(malformed)?;
        let endpoints = properties
            .entry("serviceEndpoints")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(malformed)?;
        let present = endpoints.iter().any(|endpoint| {
            endpoint
                .get("service")
                .and_then(Value::as_str)
                .is_some_and(|service| service.starts_with(STORAGE_SERVICE))
        });
        if present {
            debug!(subnet = %subnet.subnet, "storage service endpoint already present");
            return Ok(());
        }
        endpoints.push(json!({ "service": STORAGE_SERVICE, "locations": ["*"] }));
        info!(subnet = %subnet.subnet, vnet = %subnet.vnet, "adding storage service endpoint");
        self.put("update subnet", url, &current).await
    }
}

fn group_id(subscription: &str, resource_group: &str) -> String {
    format!("/subscriptions/{subscription}/resourceGroups/{resource_group}")
}

fn generated_account_name() -> String {
    let suffix_len = ACCOUNT_NAME_MAX_LEN.saturating_sub(ACCOUNT_NAME_PREFIX.len());
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(suffix_len).collect();
    format!("{ACCOUNT_NAME_PREFIX}{suffix}")
}

impl ManagementPlane for ArmClient {
    fn ensure_account<'a>(
        &'a self,
        options: &'a AccountOptions,
    ) -> RemoteFuture<'a, EnsuredAccount> {
        Box::pin(self.ensure(options))
    }

    fn account_key<'a>(&'a self, account: &'a AccountRef, latest: bool) -> RemoteFuture<'a, String> {
        Box::pin(self.list_key(account, latest))
    }

    fn create_container<'a>(
        &'a self,
        account: &'a AccountRef,
        container: &'a str,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let body = json!({ "properties": { "publicAccess": "None" } });
            self.put("create container", self.container_url(account, container), &body)
                .await
        })
    }

    fn delete_container<'a>(
        &'a self,
        account: &'a AccountRef,
        container: &'a str,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            self.send(
                "delete container",
                self.http.delete(self.container_url(account, container)),
            )
            .await?;
            Ok(())
        })
    }

    fn container_exists<'a>(
        &'a self,
        account: &'a AccountRef,
        container: &'a str,
    ) -> RemoteFuture<'a, bool> {
        Box::pin(async move {
            let found: Option<Container> = self
                .fetch_optional(
                    "get container",
                    self.http.get(self.container_url(account, container)),
                )
                .await?;
            if found.as_ref().is_some_and(|entry| entry.properties.deleted) {
                warn!(%account, container, "container is soft-deleted");
            }
            Ok(found.is_some_and(|entry| !entry.properties.deleted))
        })
    }

    fn ensure_subnet_service_endpoint<'a>(
        &'a self,
        subnet: &'a SubnetRef,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(self.update_subnet(subnet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::auth::TokenSource;

    fn client() -> ArmClient {
        let http = Client::new();
        let auth = Authenticator::new(
            http.clone(),
            TokenSource::ManagedIdentity { client_id: None },
            "https://management.azure.com/",
        );
        ArmClient::new(
            http,
            auth,
            ArmSettings {
                endpoint: String::from("https://management.azure.com/"),
                subscription_id: String::from("sub-home"),
                poll_interval: Duration::from_secs(1),
                provision_timeout: Duration::from_secs(10),
            },
        )
    }

    #[test]
    fn container_url_defaults_subscription() {
        let account = AccountRef::new(None, "rg1", "acct1");
        assert_eq!(
            client().container_url(&account, "c1"),
            "https://management.azure.com/subscriptions/sub-home/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/acct1/blobServices/default/containers/c1?api-version=2023-01-01"
        );
    }

    #[test]
    fn account_url_honours_cross_subscription() {
        let account = AccountRef::new(Some(String::from("sub-other")), "rg1", "acct1");
        assert!(
            client()
                .account_url(&account)
                .contains("/subscriptions/sub-other/resourceGroups/rg1/")
        );
    }

    #[test]
    fn generated_names_fit_account_rules() {
        let name = generated_account_name();
        assert_eq!(name.len(), ACCOUNT_NAME_MAX_LEN);
        assert!(name.starts_with(ACCOUNT_NAME_PREFIX));
        assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}

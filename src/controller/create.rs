//! Volume creation: parameter derivation, account resolution, container
//! creation or clone, credential persistence and identifier encoding.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::{
    ContentSource, ControllerError, ControllerService, CreateVolumeRequest, CreateVolumeResponse,
    Volume, check_capabilities, check_capacity, set_context_value,
};
use crate::account::Protocol;
use crate::clone::{CloneOrchestrator, CopyPlan, Ticker};
use crate::container::CredentialMode;
use crate::context::OperationContext;
use crate::copy::CopyTool;
use crate::credentials::{account_secrets, data_plane_credentials_from};
use crate::lock::OperationGuard;
use crate::params::{ContainerNaming, CredentialPolicy, ProvisioningRequest, fields};
use crate::remote::{AccountRef, DataPlane, DataPlaneCredentials, DataPlaneSecret, ManagementPlane};
use crate::retry::Attempt;
use crate::secret_store::{AccountSecret, SecretStore, StoreOutcome, default_secret_name};
use crate::volume_id::VolumeId;

/// Account chosen for a volume, with its key when already known.
struct ResolvedAccount {
    name: String,
    key: Option<String>,
}

impl ResolvedAccount {
    const fn named(name: String) -> Self {
        Self { name, key: None }
    }
}

/// Account addressed by one create call and the key fetched for it so far.
struct Placement<'r> {
    account: AccountRef,
    key: Option<String>,
    latest_key: bool,
    secrets: &'r BTreeMap<String, String>,
}

impl<M, D, C, S, T> ControllerService<M, D, C, S, T>
where
    M: ManagementPlane,
    D: DataPlane,
    C: CopyTool,
    S: SecretStore,
    T: Ticker,
{
    /// Provisions a container-backed volume.
    ///
    /// Requests are validated in full before any remote call. The volume
    /// name and the derived container name are locked for the duration of
    /// the call, the same keys delete and validate take for the resulting
    /// volume id; a concurrent operation on either fails fast with
    /// [`super::Code::Aborted`].
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError`] with [`super::Code::InvalidArgument`] for
    /// malformed requests, [`super::Code::OutOfRange`] for oversized
    /// requests, [`super::Code::NotFound`] for an undecodable clone source,
    /// and [`super::Code::Internal`] when a remote step fails.
    pub async fn create_volume(
        &self,
        ctx: &OperationContext,
        request: &CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse, ControllerError> {
        if request.name.is_empty() {
            return Err(ControllerError::invalid_argument(
                "CreateVolume Name must be provided",
            ));
        }
        check_capabilities(&request.capabilities)?;
        let required_bytes = request
            .capacity_range
            .map_or(0, |range| range.required_bytes);
        check_capacity(required_bytes)?;

        let mut provisioning = ProvisioningRequest::derive(
            &request.name,
            &request.parameters,
            &self.settings.defaults,
        )?;
        let source = clone_source(request.content_source.as_ref())?;
        if let Some(source_id) = &source {
            pin_to_source(&mut provisioning, source_id)?;
        }
        let container = provisioning.container_name();

        let _guards = self
            .lock_volume_name(&request.name, &container, source.is_some())
            .await?;

        let secrets = request.secrets.as_map();
        let endpoint_suffix = provisioning.account.endpoint_suffix.clone();
        let request_credentials = data_plane_credentials_from(secrets, &endpoint_suffix)?;

        if let Some(subnet) = &provisioning.subnet {
            info!(subnet = %subnet.resource_id(), "ensuring storage service endpoint");
            self.management
                .ensure_subnet_service_endpoint(subnet)
                .await
                .map_err(|err| {
                    ControllerError::internal(format!(
                        "update service endpoints failed with error: {err}"
                    ))
                })?;
        }

        let resolved = self
            .resolve_account(ctx, &provisioning, request_credentials.as_ref())
            .await?;
        let mut placement = Placement {
            account: AccountRef::new(
                provisioning.account.subscription_id.clone(),
                provisioning.account.resource_group.as_str(),
                resolved.name.as_str(),
            ),
            key: resolved.key,
            latest_key: provisioning.credentials.latest_account_key,
            secrets,
        };

        if let Some(source_id) = &source {
            let key = self.known_key(&mut placement).await?;
            self.clone_container(ctx, source_id, &container, &key, &endpoint_suffix)
                .await?;
        } else {
            let mode = self
                .credential_mode(&provisioning, request_credentials, &mut placement)
                .await?;
            info!(
                container = %container,
                account = %placement.account,
                sku = %provisioning.account.sku,
                location = %provisioning.account.location,
                capacity_bytes = required_bytes,
                "begin to create container"
            );
            self.lifecycle()
                .create(ctx, &placement.account, &container, &mode)
                .await?;
        }

        if provisioning.credentials.store_account_key && request.secrets.is_empty() {
            let key = self.known_key(&mut placement).await?;
            self.store_secret(&provisioning.credentials, &placement.account.account, &key)?;
        }

        let explicit_container = matches!(provisioning.container, ContainerNaming::Explicit(_));
        let volume_id = VolumeId::new(
            provisioning.account.resource_group.as_str(),
            placement.account.account.as_str(),
            container.as_str(),
        )
        .with_suffix(explicit_container.then(|| request.name.clone()))
        .with_secret_namespace(Some(provisioning.credentials.secret_namespace.clone()))
        .with_subscription_id(provisioning.account.subscription_id.clone())
        .encode();

        if provisioning.credentials.use_data_plane_api {
            self.state.data_plane_volumes.insert(&volume_id);
            self.state.data_plane_volumes.insert(&placement.account.account);
        }

        info!(
            volume_id = %volume_id,
            container = %container,
            account = %placement.account,
            "created container successfully"
        );
        Ok(CreateVolumeResponse {
            volume: Volume {
                volume_id,
                capacity_bytes: required_bytes,
                context: volume_context(
                    &provisioning,
                    &request.parameters,
                    &placement.account.account,
                    &container,
                ),
                content_source: request.content_source.clone(),
            },
        })
    }

    async fn lock_volume_name(
        &self,
        name: &str,
        container: &str,
        cloning: bool,
    ) -> Result<Vec<OperationGuard>, ControllerError> {
        match self.state.locks.try_acquire_all([name, container]) {
            Ok(guards) => Ok(guards),
            Err(err) => {
                if cloning {
                    let status = self.copy_tool.job_status(container).await;
                    info!(
                        volume = name,
                        container,
                        status = ?status,
                        "create already in flight"
                    );
                }
                Err(err.into())
            }
        }
    }

    async fn credential_mode(
        &self,
        provisioning: &ProvisioningRequest,
        request_credentials: Option<DataPlaneCredentials>,
        placement: &mut Placement<'_>,
    ) -> Result<CredentialMode, ControllerError> {
        match request_credentials {
            Some(credentials) => Ok(CredentialMode::DataPlane(credentials)),
            None if provisioning.credentials.use_data_plane_api => {
                let key = self.known_key(placement).await?;
                Ok(CredentialMode::DataPlane(DataPlaneCredentials {
                    account: placement.account.account.clone(),
                    secret: DataPlaneSecret::AccountKey(key),
                    endpoint_suffix: provisioning.account.endpoint_suffix.clone(),
                }))
            }
            None => Ok(CredentialMode::Management),
        }
    }

    async fn resolve_account(
        &self,
        ctx: &OperationContext,
        provisioning: &ProvisioningRequest,
        request_credentials: Option<&DataPlaneCredentials>,
    ) -> Result<ResolvedAccount, ControllerError> {
        if let Some(name) = &provisioning.account.name {
            return Ok(ResolvedAccount::named(name.clone()));
        }
        if let Some(credentials) = request_credentials {
            return Ok(ResolvedAccount::named(credentials.account.clone()));
        }

        let cache = &self.state.accounts;
        if let Some(name) = cache.resolve_by_volume_name(&provisioning.name) {
            debug!(volume = %provisioning.name, account = %name, "reusing account of earlier attempt");
            return Ok(ResolvedAccount::named(name));
        }
        let resolution_key = provisioning.account.resolution_key();
        if let Some(name) = cache.resolve(&resolution_key) {
            debug!(resolution_key = %resolution_key, account = %name, "account cache hit");
            return Ok(ResolvedAccount::named(name));
        }

        let _account_guard = self.state.account_locks.lock(&resolution_key).await;
        if let Some(name) = cache.resolve(&resolution_key) {
            debug!(resolution_key = %resolution_key, account = %name, "account resolved while waiting");
            return Ok(ResolvedAccount::named(name));
        }

        let options = &provisioning.account;
        let ensured = self
            .settings
            .retry
            .run(ctx, "ensure storage account", || async move {
                match self.management.ensure_account(options).await {
                    Ok(account) => Attempt::Done(account),
                    Err(err) if err.is_retriable() => Attempt::Retry(err),
                    Err(err) => Attempt::Fail(err),
                }
            })
            .await
            .map_err(|err| {
                ControllerError::internal(format!("ensure storage account failed with {err}"))
            })?;

        info!(account = %ensured.name, resolution_key = %resolution_key, "storage account ensured");
        cache.store(&resolution_key, &ensured.name);
        cache.store_by_volume_name(&provisioning.name, &ensured.name);
        Ok(ResolvedAccount {
            name: ensured.name,
            key: ensured.key,
        })
    }

    /// Returns the account key, fetching and remembering it on first use.
    async fn known_key(&self, placement: &mut Placement<'_>) -> Result<String, ControllerError> {
        if let Some(key) = placement.key.as_ref() {
            return Ok(key.clone());
        }
        let key = self
            .issuer()
            .account_key(&placement.account, placement.latest_key, placement.secrets)
            .await?;
        placement.key = Some(key.clone());
        Ok(key)
    }

    async fn clone_container(
        &self,
        ctx: &OperationContext,
        source: &VolumeId,
        destination: &str,
        key: &str,
        endpoint_suffix: &str,
    ) -> Result<(), ControllerError> {
        debug!(account = %source.account, "issuing scoped token for clone");
        let token = self.issuer().issue_scoped_token(&source.account, key)?;
        let plan = CopyPlan::new(
            &source.account,
            endpoint_suffix,
            &source.container,
            destination,
            &token,
        )?;
        CloneOrchestrator::new(&self.copy_tool, &self.ticker, self.settings.clone)
            .run(ctx, &plan)
            .await?;
        Ok(())
    }

    fn store_secret(
        &self,
        policy: &CredentialPolicy,
        account: &str,
        key: &str,
    ) -> Result<(), ControllerError> {
        let secret = AccountSecret {
            name: policy
                .secret_name
                .clone()
                .unwrap_or_else(|| default_secret_name(account)),
            namespace: policy.secret_namespace.clone(),
            data: account_secrets(account, key),
        };
        match self.secret_store.store(&secret)? {
            StoreOutcome::Created => info!(
                name = %secret.name,
                namespace = %secret.namespace,
                "stored account key"
            ),
            StoreOutcome::AlreadyExists => debug!(
                name = %secret.name,
                namespace = %secret.namespace,
                "account key secret already present"
            ),
        }
        Ok(())
    }
}

/// Attributes handed to the node side: the request parameters plus the
/// derived container name, private endpoint server and secret namespace.
fn volume_context(
    provisioning: &ProvisioningRequest,
    parameters: &BTreeMap<String, String>,
    account: &str,
    container: &str,
) -> BTreeMap<String, String> {
    let mut context = parameters.clone();
    if provisioning.account.private_endpoint && provisioning.account.protocol == Protocol::Nfs {
        set_context_value(
            &mut context,
            fields::SERVER,
            &format!(
                "{account}.privatelink.blob.{}",
                provisioning.account.endpoint_suffix
            ),
        );
    }
    if !matches!(provisioning.container, ContainerNaming::Explicit(_)) {
        set_context_value(&mut context, fields::CONTAINER_NAME, container);
    }
    set_context_value(
        &mut context,
        fields::CONTEXT_SECRET_NAMESPACE,
        &provisioning.credentials.secret_namespace,
    );
    context
}

fn clone_source(source: Option<&ContentSource>) -> Result<Option<VolumeId>, ControllerError> {
    match source {
        None => Ok(None),
        Some(ContentSource::Snapshot { .. }) => Err(ControllerError::invalid_argument(
            "copy volume from volumeSnapshot is not supported",
        )),
        Some(ContentSource::Volume { volume_id }) => VolumeId::decode(volume_id)
            .map(Some)
            .map_err(|err| ControllerError::not_found(err.to_string())),
    }
}

/// Clones land in the source volume's account so a single scoped token
/// covers both containers.
fn pin_to_source(
    provisioning: &mut ProvisioningRequest,
    source: &VolumeId,
) -> Result<(), ControllerError> {
    let account = &mut provisioning.account;
    if let Some(requested) = &account.name
        && *requested != source.account
    {
        return Err(ControllerError::invalid_argument(format!(
            "storageAccount({requested}) differs from account({}) of the source volume",
            source.account
        )));
    }
    account.name = Some(source.account.clone());
    if !source.resource_group.is_empty() {
        account.resource_group.clone_from(&source.resource_group);
    }
    if source.subscription_id.is_some() {
        account.subscription_id.clone_from(&source.subscription_id);
    }
    Ok(())
}

//! Controller façade over the provisioning components.
//!
//! [`ControllerService`] owns the remote collaborators and the process-wide
//! state (operation locks, account caches, data-plane registry) and exposes
//! one method per controller operation. Every method takes an
//! [`OperationContext`](crate::context::OperationContext) carrying the caller's deadline, which retry loops and
//! the clone poll loop honour.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info};

use crate::cache::{AccountCache, DataPlaneRegistry};
use crate::clone::{CloneSettings, Ticker, TokioTicker};
use crate::container::ContainerLifecycle;
use crate::credentials::{CredentialIssuer, DEFAULT_TOKEN_LIFETIME};
use crate::lock::{KeyedMutex, OperationLocks};
use crate::params::{DEFAULT_ENDPOINT_SUFFIX, ProvisioningDefaults};
use crate::remote::{AccountRef, DataPlane, ManagementPlane};
use crate::retry::RetryPolicy;
use crate::volume_id::VolumeId;

mod create;
mod delete;
pub mod error;
pub mod types;
mod validate;

pub use error::{Code, ControllerError};
pub use types::{
    AccessMode, AccessType, CapacityRange, ConfirmedCapabilities, ContentSource,
    ControllerCapability, CreateVolumeRequest, CreateVolumeResponse, DeleteVolumeRequest,
    DeleteVolumeResponse, ExpandVolumeRequest, ExpandVolumeResponse, Secrets,
    ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse, Volume,
    VolumeCapability,
};

/// Largest container size accepted by create and expand: 100 TiB.
pub const CONTAINER_MAX_SIZE: u64 = 100 * 1024 * 1024 * 1024 * 1024;

/// Capabilities advertised by [`ControllerService::capabilities`].
pub const CONTROLLER_CAPABILITIES: [ControllerCapability; 4] = [
    ControllerCapability::CreateDeleteVolume,
    ControllerCapability::ExpandVolume,
    ControllerCapability::CloneVolume,
    ControllerCapability::SingleNodeMultiWriter,
];

/// Tunables of a [`ControllerService`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControllerSettings {
    /// Defaults applied to provisioning parameters.
    pub defaults: ProvisioningDefaults,
    /// Backoff for account ensure and container calls.
    pub retry: RetryPolicy,
    /// Clone poll interval and timeout.
    pub clone: CloneSettings,
    /// Lifetime of scoped tokens issued for clones.
    pub token_lifetime: Duration,
    /// Lifetime of resolution-key cache entries.
    pub account_cache_ttl: Duration,
}

impl ControllerSettings {
    /// Settings with built-in tunables and the given defaults.
    #[must_use]
    pub fn new(defaults: ProvisioningDefaults) -> Self {
        Self {
            defaults,
            retry: RetryPolicy::default(),
            clone: CloneSettings::default(),
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            account_cache_ttl: crate::cache::DEFAULT_ACCOUNT_CACHE_TTL,
        }
    }
}

/// Process-wide mutable state shared by every operation.
#[derive(Debug)]
struct ControllerState {
    locks: OperationLocks,
    account_locks: KeyedMutex,
    accounts: AccountCache,
    data_plane_volumes: DataPlaneRegistry,
}

impl ControllerState {
    fn new(account_cache_ttl: Duration) -> Self {
        Self {
            locks: OperationLocks::new(),
            account_locks: KeyedMutex::new(),
            accounts: AccountCache::new(account_cache_ttl),
            data_plane_volumes: DataPlaneRegistry::new(),
        }
    }
}

/// Controller operations over a management plane `M`, data plane `D`, copy
/// tool `C`, secret store `S` and clock `T`.
#[derive(Debug)]
pub struct ControllerService<M, D, C, S, T = TokioTicker> {
    management: M,
    data_plane: D,
    copy_tool: C,
    secret_store: S,
    ticker: T,
    settings: ControllerSettings,
    state: ControllerState,
}

impl<M, D, C, S> ControllerService<M, D, C, S> {
    /// Creates a controller with empty caches and the tokio clock.
    #[must_use]
    pub fn new(
        management: M,
        data_plane: D,
        copy_tool: C,
        secret_store: S,
        settings: ControllerSettings,
    ) -> Self {
        let state = ControllerState::new(settings.account_cache_ttl);
        Self {
            management,
            data_plane,
            copy_tool,
            secret_store,
            ticker: TokioTicker,
            settings,
            state,
        }
    }
}

impl<M, D, C, S, T> ControllerService<M, D, C, S, T> {
    /// Replaces the clock driving the clone poll loop.
    ///
    /// This is primarily used by tests to run clones on virtual time.
    #[must_use]
    pub fn with_ticker<U: Ticker>(self, ticker: U) -> ControllerService<M, D, C, S, U> {
        ControllerService {
            management: self.management,
            data_plane: self.data_plane,
            copy_tool: self.copy_tool,
            secret_store: self.secret_store,
            ticker,
            settings: self.settings,
            state: self.state,
        }
    }

    /// Settings the controller was built with.
    #[must_use]
    pub const fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Capabilities this controller offers.
    #[must_use]
    pub const fn capabilities(&self) -> &'static [ControllerCapability] {
        &CONTROLLER_CAPABILITIES
    }

    fn endpoint_suffix(&self) -> &str {
        let suffix = self.settings.defaults.endpoint_suffix.as_str();
        if suffix.is_empty() {
            DEFAULT_ENDPOINT_SUFFIX
        } else {
            suffix
        }
    }

    fn account_ref_for(&self, id: &VolumeId) -> AccountRef {
        let resource_group = if id.resource_group.is_empty() {
            self.settings.defaults.resource_group.as_str()
        } else {
            id.resource_group.as_str()
        };
        AccountRef::new(id.subscription_id.clone(), resource_group, id.account.as_str())
    }

    /// Grows a volume. Containers carry no quota, so this only checks the
    /// requested size against [`CONTAINER_MAX_SIZE`] and echoes it.
    ///
    /// # Errors
    ///
    /// Returns [`Code::InvalidArgument`] for a missing id or capacity range
    /// and [`Code::OutOfRange`] for a size above the maximum.
    pub fn expand_volume(
        &self,
        request: &ExpandVolumeRequest,
    ) -> Result<ExpandVolumeResponse, ControllerError> {
        if request.volume_id.is_empty() {
            return Err(ControllerError::invalid_argument(
                "Volume ID missing in request",
            ));
        }
        let range = request
            .capacity_range
            .ok_or_else(|| ControllerError::invalid_argument("Capacity Range missing in request"))?;
        check_capacity(range.required_bytes)?;

        match VolumeId::decode(&request.volume_id) {
            Ok(id) => info!(
                volume_id = %request.volume_id,
                account = %self.account_ref_for(&id),
                container = %id.container,
                capacity_bytes = range.required_bytes,
                "volume expanded"
            ),
            Err(err) => debug!(error = %err, "expanding volume with an opaque id"),
        }
        Ok(ExpandVolumeResponse {
            capacity_bytes: range.required_bytes,
            node_expansion_required: false,
        })
    }
}

impl<M: ManagementPlane, D: DataPlane, C, S, T> ControllerService<M, D, C, S, T> {
    fn lifecycle(&self) -> ContainerLifecycle<'_, M, D> {
        ContainerLifecycle::new(&self.management, &self.data_plane, self.settings.retry)
    }

    fn issuer(&self) -> CredentialIssuer<'_, M> {
        CredentialIssuer::new(&self.management, self.settings.token_lifetime)
    }
}

macro_rules! unimplemented_operations {
    ($($method:ident => $name:literal),+ $(,)?) => {
        impl<M, D, C, S, T> ControllerService<M, D, C, S, T> {
            $(
                #[doc = concat!("`", $name, "` is not offered by this controller.")]
                ///
                /// # Errors
                ///
                /// Always returns [`Code::Unimplemented`].
                pub fn $method(&self) -> Result<(), ControllerError> {
                    Err(ControllerError::unimplemented($name))
                }
            )+
        }
    };
}

unimplemented_operations! {
    publish_volume => "ControllerPublishVolume",
    unpublish_volume => "ControllerUnpublishVolume",
    get_volume => "ControllerGetVolume",
    get_capacity => "GetCapacity",
    list_volumes => "ListVolumes",
    create_snapshot => "CreateSnapshot",
    delete_snapshot => "DeleteSnapshot",
    list_snapshots => "ListSnapshots",
}

fn check_capabilities(capabilities: &[VolumeCapability]) -> Result<(), ControllerError> {
    if capabilities.is_empty() {
        return Err(ControllerError::invalid_argument(
            "volume capabilities missing in request",
        ));
    }
    if capabilities.iter().any(VolumeCapability::is_block) {
        return Err(ControllerError::invalid_argument(
            "block volume capability not supported",
        ));
    }
    Ok(())
}

fn check_capacity(required_bytes: u64) -> Result<(), ControllerError> {
    if required_bytes > CONTAINER_MAX_SIZE {
        return Err(ControllerError::new(
            Code::OutOfRange,
            format!(
                "required bytes ({required_bytes}) exceeds the maximum supported bytes ({CONTAINER_MAX_SIZE})"
            ),
        ));
    }
    Ok(())
}

/// Sets `key` in `context`, replacing an entry whose key differs only in
/// case.
fn set_context_value(context: &mut BTreeMap<String, String>, key: &str, value: &str) {
    let existing = context
        .keys()
        .find(|candidate| candidate.eq_ignore_ascii_case(key))
        .cloned();
    context.insert(existing.unwrap_or_else(|| key.to_owned()), value.to_owned());
}

//! Volume deletion.

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::{ControllerError, ControllerService, DeleteVolumeRequest, DeleteVolumeResponse};
use crate::container::CredentialMode;
use crate::context::OperationContext;
use crate::credentials::data_plane_credentials_from;
use crate::remote::{DataPlane, DataPlaneCredentials, DataPlaneSecret, ManagementPlane};
use crate::volume_id::VolumeId;

impl<M, D, C, S, T> ControllerService<M, D, C, S, T>
where
    M: ManagementPlane,
    D: DataPlane,
{
    /// Deletes the container backing a volume.
    ///
    /// Identifiers that do not decode, and containers that are already gone,
    /// count as deleted so callers may repeat the call indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`super::Code::InvalidArgument`] for an empty id or incomplete
    /// secrets, [`super::Code::Aborted`] while another operation holds the
    /// volume, and [`super::Code::Internal`] when the container cannot be
    /// deleted.
    pub async fn delete_volume(
        &self,
        ctx: &OperationContext,
        request: &DeleteVolumeRequest,
    ) -> Result<DeleteVolumeResponse, ControllerError> {
        if request.volume_id.is_empty() {
            return Err(ControllerError::invalid_argument(
                "Volume ID missing in request",
            ));
        }
        let id = match VolumeId::decode(&request.volume_id) {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "delete of undecodable volume id treated as done");
                return Ok(DeleteVolumeResponse {});
            }
        };
        let _guards = self
            .state
            .locks
            .try_acquire_all([request.volume_id.as_str(), id.logical_name()])?;

        let account = self.account_ref_for(&id);
        let mode = match data_plane_credentials_from(
            request.secrets.as_map(),
            self.endpoint_suffix(),
        )? {
            Some(credentials) => CredentialMode::DataPlane(credentials),
            None if self
                .state
                .data_plane_volumes
                .uses_data_plane(&request.volume_id, &id.account) =>
            {
                let key = self
                    .issuer()
                    .account_key(&account, false, &BTreeMap::new())
                    .await?;
                CredentialMode::DataPlane(DataPlaneCredentials {
                    account: id.account.clone(),
                    secret: DataPlaneSecret::AccountKey(key),
                    endpoint_suffix: self.endpoint_suffix().to_owned(),
                })
            }
            None => CredentialMode::Management,
        };

        info!(
            container = %id.container,
            account = %account,
            volume_id = %request.volume_id,
            "deleting container"
        );
        self.lifecycle()
            .delete(ctx, &account, &id.container, &mode)
            .await
            .map_err(|err| {
                ControllerError::internal(format!(
                    "failed to delete container({}) under rg({}) account({}) volumeID({}), error: {err}",
                    id.container, account.resource_group, account.account, request.volume_id
                ))
            })?;
        info!(
            container = %id.container,
            volume_id = %request.volume_id,
            "container deleted successfully"
        );
        Ok(DeleteVolumeResponse {})
    }
}

//! Capability validation for existing volumes.

use tracing::info;

use super::{
    ConfirmedCapabilities, ControllerError, ControllerService, ValidateVolumeCapabilitiesRequest,
    ValidateVolumeCapabilitiesResponse, check_capabilities,
};
use crate::container::CredentialMode;
use crate::credentials::data_plane_credentials_from;
use crate::remote::{DataPlane, ManagementPlane};
use crate::volume_id::VolumeId;

impl<M, D, C, S, T> ControllerService<M, D, C, S, T>
where
    M: ManagementPlane,
    D: DataPlane,
{
    /// Confirms the requested capabilities for an existing volume.
    ///
    /// Containers serve every access mode, so any file-system capability is
    /// confirmed once the container is known to exist. Existence is checked
    /// through the data plane when secrets are supplied and through the
    /// management plane otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`super::Code::InvalidArgument`] for an empty id or capability
    /// list, [`super::Code::NotFound`] when the id does not decode or the
    /// container is missing, and [`super::Code::Internal`] when the existence
    /// check fails.
    pub async fn validate_volume_capabilities(
        &self,
        request: &ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, ControllerError> {
        if request.volume_id.is_empty() {
            return Err(ControllerError::invalid_argument(
                "Volume ID missing in request",
            ));
        }
        check_capabilities(&request.capabilities)?;
        let id = VolumeId::decode(&request.volume_id)
            .map_err(|err| ControllerError::not_found(err.to_string()))?;
        let _guards = self
            .state
            .locks
            .try_acquire_all([request.volume_id.as_str(), id.logical_name()])?;

        let account = self.account_ref_for(&id);
        let mode = data_plane_credentials_from(request.secrets.as_map(), self.endpoint_suffix())?
            .map_or(CredentialMode::Management, CredentialMode::DataPlane);
        let exists = self
            .lifecycle()
            .exists(&account, &id.container, &mode)
            .await
            .map_err(|err| {
                ControllerError::internal(format!(
                    "failed to check container({}) on {account}: {err}",
                    id.container
                ))
            })?;
        if !exists {
            return Err(ControllerError::not_found(format!(
                "requested volume({}) does not exist",
                request.volume_id
            )));
        }

        info!(volume_id = %request.volume_id, "volume capabilities validated");
        Ok(ValidateVolumeCapabilitiesResponse {
            confirmed: Some(ConfirmedCapabilities {
                capabilities: request.capabilities.clone(),
                context: request.context.clone(),
            }),
            message: String::new(),
        })
    }
}

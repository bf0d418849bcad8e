//! Core library for the blobvol volume controller.
//!
//! The crate provisions blob containers as persistent volumes: it derives a
//! typed request from caller parameters, finds or creates a matching storage
//! account, creates the container (optionally seeded from another volume by a
//! server-side copy), and encodes everything needed to address it later into
//! an opaque volume id. Remote services sit behind the [`remote`] and
//! [`copy`] seams, with Azure implementations in [`azure`].

pub mod account;
pub mod azure;
pub mod cache;
pub mod clone;
pub mod command;
pub mod config;
pub mod container;
pub mod context;
pub mod controller;
pub mod copy;
pub mod credentials;
pub mod lock;
pub mod logging;
pub mod params;
pub mod remote;
pub mod retry;
pub mod secret_store;
pub mod test_support;
pub mod volume_id;

pub use account::{AccessTier, AccountKind, AccountOptions, Protocol};
pub use config::{ConfigError, ControllerConfig};
pub use context::OperationContext;
pub use controller::{
    Code, ControllerError, ControllerService, ControllerSettings, CreateVolumeRequest,
    CreateVolumeResponse, DeleteVolumeRequest, ExpandVolumeRequest,
    ValidateVolumeCapabilitiesRequest,
};
pub use copy::{Azcopy, CopyTool, JobStatus};
pub use params::{ProvisioningDefaults, ProvisioningRequest};
pub use remote::{DataPlane, ManagementPlane, RemoteError, RemoteErrorKind};
pub use secret_store::{FileSecretStore, SecretStore};
pub use volume_id::VolumeId;

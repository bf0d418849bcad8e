//! Request and response shapes of the controller operations.
//!
//! The shapes mirror the container storage interface controller RPCs closely
//! enough that a transport layer can map them one-to-one, and they serialise
//! with `serde` so the operator CLI can print them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// How a node may attach the volume.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Read/write from a single node.
    SingleNodeWriter,
    /// Read-only from a single node.
    SingleNodeReaderOnly,
    /// Read/write from a single workload on a single node.
    SingleNodeSingleWriter,
    /// Read/write from many workloads on a single node.
    SingleNodeMultiWriter,
    /// Read-only from many nodes.
    MultiNodeReaderOnly,
    /// Read from many nodes, written from one.
    MultiNodeSingleWriter,
    /// Read/write from many nodes.
    MultiNodeMultiWriter,
}

/// How the volume is presented on the node.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    /// Mounted as a file system.
    Mount {
        /// Requested file system type, empty for the default.
        #[serde(default)]
        fs_type: String,
        /// Extra mount flags.
        #[serde(default)]
        mount_flags: Vec<String>,
    },
    /// Exposed as a raw block device.
    Block,
}

/// One capability the caller wants the volume to support.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeCapability {
    /// Presentation on the node.
    pub access_type: AccessType,
    /// Attachment mode.
    pub access_mode: AccessMode,
}

impl VolumeCapability {
    /// File-system capability with the given access mode.
    #[must_use]
    pub const fn mount(access_mode: AccessMode) -> Self {
        Self {
            access_type: AccessType::Mount {
                fs_type: String::new(),
                mount_flags: Vec::new(),
            },
            access_mode,
        }
    }

    /// Raw block capability with the given access mode.
    #[must_use]
    pub const fn block(access_mode: AccessMode) -> Self {
        Self {
            access_type: AccessType::Block,
            access_mode,
        }
    }

    /// Whether the capability asks for a raw block device.
    #[must_use]
    pub const fn is_block(&self) -> bool {
        matches!(self.access_type, AccessType::Block)
    }
}

/// Requested size bounds, in bytes. Zero means unspecified.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CapacityRange {
    /// Minimum size the volume must have.
    #[serde(default)]
    pub required_bytes: u64,
    /// Maximum size the volume may have.
    #[serde(default)]
    pub limit_bytes: u64,
}

impl CapacityRange {
    /// Range requiring exactly `bytes`.
    #[must_use]
    pub const fn required(bytes: u64) -> Self {
        Self {
            required_bytes: bytes,
            limit_bytes: 0,
        }
    }
}

/// Existing data the new volume is seeded from.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSource {
    /// Another volume.
    Volume {
        /// Identifier of the source volume.
        volume_id: String,
    },
    /// A snapshot.
    Snapshot {
        /// Identifier of the source snapshot.
        snapshot_id: String,
    },
}

/// Caller-supplied credentials. Values never appear in `Debug` output.
#[derive(Clone, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Secrets(pub BTreeMap<String, String>);

impl Secrets {
    /// Whether no secrets were supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrowed key/value view.
    #[must_use]
    pub const fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl From<BTreeMap<String, String>> for Secrets {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// Input of `create_volume`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CreateVolumeRequest {
    /// Volume name chosen by the caller; doubles as the idempotency key.
    pub name: String,
    /// Requested size.
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    /// Capabilities the volume must support.
    #[serde(default)]
    pub capabilities: Vec<VolumeCapability>,
    /// Provisioning parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    /// Credentials for an existing account.
    #[serde(default)]
    pub secrets: Secrets,
    /// Data to seed the volume with.
    #[serde(default)]
    pub content_source: Option<ContentSource>,
}

/// Provisioned volume.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Volume {
    /// Opaque identifier addressing the backing container.
    pub volume_id: String,
    /// Size granted, in bytes.
    pub capacity_bytes: u64,
    /// Attributes handed to the node side.
    pub context: BTreeMap<String, String>,
    /// Source the volume was seeded from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_source: Option<ContentSource>,
}

/// Output of `create_volume`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CreateVolumeResponse {
    /// Provisioned volume.
    pub volume: Volume,
}

/// Input of `delete_volume`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeleteVolumeRequest {
    /// Identifier returned by `create_volume`.
    pub volume_id: String,
    /// Credentials for the account.
    #[serde(default)]
    pub secrets: Secrets,
}

/// Output of `delete_volume`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeleteVolumeResponse {}

/// Input of `validate_volume_capabilities`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ValidateVolumeCapabilitiesRequest {
    /// Identifier returned by `create_volume`.
    pub volume_id: String,
    /// Capabilities to confirm.
    #[serde(default)]
    pub capabilities: Vec<VolumeCapability>,
    /// Volume context returned by `create_volume`.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Credentials for the account.
    #[serde(default)]
    pub secrets: Secrets,
}

/// Capabilities confirmed for a volume.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConfirmedCapabilities {
    /// Confirmed capabilities.
    pub capabilities: Vec<VolumeCapability>,
    /// Echo of the request context.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

/// Output of `validate_volume_capabilities`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ValidateVolumeCapabilitiesResponse {
    /// Present when every requested capability is supported.
    pub confirmed: Option<ConfirmedCapabilities>,
    /// Explanation when nothing was confirmed.
    #[serde(default)]
    pub message: String,
}

/// Input of `expand_volume`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExpandVolumeRequest {
    /// Identifier returned by `create_volume`.
    pub volume_id: String,
    /// Requested size.
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
}

/// Output of `expand_volume`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ExpandVolumeResponse {
    /// Size granted, in bytes.
    pub capacity_bytes: u64,
    /// Whether the node side must grow the file system.
    pub node_expansion_required: bool,
}

/// Controller features advertised to callers.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerCapability {
    /// Volumes can be created and deleted.
    CreateDeleteVolume,
    /// Volumes can be grown.
    ExpandVolume,
    /// Volumes can be seeded from another volume.
    CloneVolume,
    /// The single-node multi-writer access mode is understood.
    SingleNodeMultiWriter,
}

//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::azure::{ArmSettings, TokenSource};
use crate::clone::CloneSettings;
use crate::controller::ControllerSettings;
use crate::params::ProvisioningDefaults;
use crate::retry::RetryPolicy;

/// Default resource-manager endpoint of the public cloud.
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";
/// Default directory endpoint of the public cloud.
pub const DEFAULT_AAD_ENDPOINT: &str = "https://login.microsoftonline.com";
/// Default root of the file-backed secret store.
pub const DEFAULT_SECRET_DIR: &str = "/var/lib/blobvol/secrets";

const PROVISION_POLL_INTERVAL: Duration = Duration::from_secs(5);
const PROVISION_TIMEOUT: Duration = Duration::from_secs(300);
const CONFIG_FILE: &str = "blobvol.toml";

/// Controller configuration derived from defaults, configuration files,
/// environment variables and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BLOBVOL",
    discovery(
        app_name = "blobvol",
        env_var = "BLOBVOL_CONFIG_PATH",
        config_file_name = "blobvol.toml",
        dotfile_name = ".blobvol.toml",
        project_file_name = "blobvol.toml"
    )
)]
pub struct ControllerConfig {
    /// Subscription the controller provisions into. Required.
    pub subscription_id: String,
    /// Resource group used when a request names none. Required.
    pub resource_group: String,
    /// Region for new accounts; empty uses the resource group's region.
    #[ortho_config(default = String::new())]
    pub location: String,
    /// Directory tenant of the service principal.
    pub tenant_id: Option<String>,
    /// Service principal application id, or the client id of a
    /// user-assigned managed identity when no secret is set.
    pub client_id: Option<String>,
    /// Service principal secret. Without it the managed identity is used.
    pub client_secret: Option<String>,
    /// Resource-manager endpoint.
    #[ortho_config(default = DEFAULT_ARM_ENDPOINT.to_owned())]
    pub arm_endpoint: String,
    /// Directory endpoint used by service principals.
    #[ortho_config(default = DEFAULT_AAD_ENDPOINT.to_owned())]
    pub aad_endpoint: String,
    /// Storage endpoint suffix of the cloud.
    #[ortho_config(default = crate::params::DEFAULT_ENDPOINT_SUFFIX.to_owned())]
    pub storage_endpoint_suffix: String,
    /// Whether the cloud is an Azure Stack Hub deployment.
    #[ortho_config(default = false)]
    pub azure_stack: bool,
    /// Lifetime of scoped tokens issued for clones, in minutes.
    #[ortho_config(default = 1440)]
    pub sas_token_expiration_minutes: u64,
    /// Lifetime of cached account resolutions, in seconds.
    #[ortho_config(default = 60)]
    pub account_cache_ttl_secs: u64,
    /// Interval between copy job queries, in seconds.
    #[ortho_config(default = 5)]
    pub copy_poll_interval_secs: u64,
    /// Upper bound on a single clone, in seconds.
    #[ortho_config(default = 180)]
    pub copy_timeout_secs: u64,
    /// Path to the `azcopy` executable.
    #[ortho_config(default = crate::copy::DEFAULT_AZCOPY_BIN.to_owned())]
    pub azcopy_bin: String,
    /// First retry delay, in milliseconds.
    #[ortho_config(default = 5000)]
    pub retry_initial_delay_ms: u64,
    /// Growth of the retry delay per attempt, in percent.
    #[ortho_config(default = 150)]
    pub retry_factor_percent: u32,
    /// Attempts made before giving up.
    #[ortho_config(default = 6)]
    pub retry_steps: u32,
    /// Largest retry delay, in milliseconds.
    #[ortho_config(default = 60000)]
    pub retry_max_delay_ms: u64,
    /// Secret namespace used when neither the request nor the claim name one.
    #[ortho_config(default = crate::params::DEFAULT_SECRET_NAMESPACE.to_owned())]
    pub default_secret_namespace: String,
    /// Virtual network resource group for NFS firewall rules.
    #[ortho_config(default = String::new())]
    pub vnet_resource_group: String,
    /// Virtual network name for NFS firewall rules.
    #[ortho_config(default = String::new())]
    pub vnet_name: String,
    /// Subnet name for NFS firewall rules.
    #[ortho_config(default = String::new())]
    pub subnet_name: String,
    /// Root directory of the file-backed secret store.
    #[ortho_config(default = DEFAULT_SECRET_DIR.to_owned())]
    pub secret_dir: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE}",
            self.description, self.env_var, self.toml_key
        ))
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::Invalid(format!(
            "{} {reason}: check {} or {} in {CONFIG_FILE}",
            self.description, self.env_var, self.toml_key
        ))
    }
}

const REQUIRED_TEXT: [(&str, &str, &str); 6] = [
    ("subscription ID", "BLOBVOL_SUBSCRIPTION_ID", "subscription_id"),
    ("resource group", "BLOBVOL_RESOURCE_GROUP", "resource_group"),
    ("resource manager endpoint", "BLOBVOL_ARM_ENDPOINT", "arm_endpoint"),
    (
        "storage endpoint suffix",
        "BLOBVOL_STORAGE_ENDPOINT_SUFFIX",
        "storage_endpoint_suffix",
    ),
    ("azcopy binary", "BLOBVOL_AZCOPY_BIN", "azcopy_bin"),
    ("secret directory", "BLOBVOL_SECRET_DIR", "secret_dir"),
];

impl ControllerConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("blobvol")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    fn text_fields(&self) -> [&str; 6] {
        [
            &self.subscription_id,
            &self.resource_group,
            &self.arm_endpoint,
            &self.storage_endpoint_suffix,
            &self.azcopy_bin,
            &self.secret_dir,
        ]
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide values via environment variables or the configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is blank
    /// and [`ConfigError::Invalid`] when a duration or growth factor is out of
    /// range or the service principal is incomplete.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, (description, env_var, toml_key)) in
            self.text_fields().into_iter().zip(REQUIRED_TEXT)
        {
            if value.trim().is_empty() {
                return Err(FieldMetadata::new(description, env_var, toml_key).missing());
            }
        }

        let positive = [
            (
                self.sas_token_expiration_minutes,
                FieldMetadata::new(
                    "SAS token lifetime",
                    "BLOBVOL_SAS_TOKEN_EXPIRATION_MINUTES",
                    "sas_token_expiration_minutes",
                ),
            ),
            (
                self.copy_poll_interval_secs,
                FieldMetadata::new(
                    "copy poll interval",
                    "BLOBVOL_COPY_POLL_INTERVAL_SECS",
                    "copy_poll_interval_secs",
                ),
            ),
            (
                self.copy_timeout_secs,
                FieldMetadata::new("copy timeout", "BLOBVOL_COPY_TIMEOUT_SECS", "copy_timeout_secs"),
            ),
            (
                self.retry_initial_delay_ms,
                FieldMetadata::new(
                    "retry initial delay",
                    "BLOBVOL_RETRY_INITIAL_DELAY_MS",
                    "retry_initial_delay_ms",
                ),
            ),
            (
                u64::from(self.retry_steps),
                FieldMetadata::new("retry steps", "BLOBVOL_RETRY_STEPS", "retry_steps"),
            ),
        ];
        if let Some((_, metadata)) = positive.iter().find(|(value, _)| *value == 0) {
            return Err(metadata.invalid("must be greater than zero"));
        }
        if self.retry_factor_percent < 100 {
            return Err(FieldMetadata::new(
                "retry factor",
                "BLOBVOL_RETRY_FACTOR_PERCENT",
                "retry_factor_percent",
            )
            .invalid("must be at least 100"));
        }
        if self.retry_max_delay_ms < self.retry_initial_delay_ms {
            return Err(FieldMetadata::new(
                "retry maximum delay",
                "BLOBVOL_RETRY_MAX_DELAY_MS",
                "retry_max_delay_ms",
            )
            .invalid("must not be below the initial delay"));
        }
        if self.client_secret.is_some() && (self.tenant_id.is_none() || self.client_id.is_none()) {
            return Err(FieldMetadata::new(
                "service principal",
                "BLOBVOL_TENANT_ID and BLOBVOL_CLIENT_ID",
                "tenant_id and client_id",
            )
            .missing());
        }
        Ok(())
    }

    /// Defaults applied while deriving provisioning requests.
    #[must_use]
    pub fn provisioning_defaults(&self) -> ProvisioningDefaults {
        ProvisioningDefaults {
            subscription_id: self.subscription_id.clone(),
            resource_group: self.resource_group.clone(),
            location: self.location.clone(),
            endpoint_suffix: self.storage_endpoint_suffix.clone(),
            azure_stack: self.azure_stack,
            secret_namespace: self.default_secret_namespace.clone(),
            vnet_resource_group: self.vnet_resource_group.clone(),
            vnet_name: self.vnet_name.clone(),
            subnet_name: self.subnet_name.clone(),
        }
    }

    /// Tunables of the controller service.
    #[must_use]
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            defaults: self.provisioning_defaults(),
            retry: RetryPolicy {
                initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
                factor_percent: self.retry_factor_percent,
                steps: self.retry_steps,
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
            },
            clone: CloneSettings {
                poll_interval: Duration::from_secs(self.copy_poll_interval_secs),
                timeout: Duration::from_secs(self.copy_timeout_secs),
            },
            token_lifetime: Duration::from_secs(self.sas_token_expiration_minutes.saturating_mul(60)),
            account_cache_ttl: Duration::from_secs(self.account_cache_ttl_secs),
        }
    }

    /// Identity used against the resource manager: a service principal when
    /// a client secret is configured, the managed identity otherwise.
    #[must_use]
    pub fn token_source(&self) -> TokenSource {
        match (&self.tenant_id, &self.client_id, &self.client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => {
                TokenSource::ServicePrincipal {
                    authority: self.aad_endpoint.clone(),
                    tenant_id: tenant_id.clone(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                }
            }
            _ => TokenSource::ManagedIdentity {
                client_id: self.client_id.clone(),
            },
        }
    }

    /// Addressing of the resource-manager client.
    #[must_use]
    pub fn arm_settings(&self) -> ArmSettings {
        ArmSettings {
            endpoint: self.arm_endpoint.clone(),
            subscription_id: self.subscription_id.clone(),
            poll_interval: PROVISION_POLL_INTERVAL,
            provision_timeout: PROVISION_TIMEOUT,
        }
    }

    /// Root of the file-backed secret store.
    #[must_use]
    pub fn secret_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.secret_dir)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value is out of range.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

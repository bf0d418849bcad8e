//! Binary entry point for the blobvol operator CLI.
//!
//! Each subcommand drives one controller operation against the configured
//! subscription and prints the response as JSON on stdout.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use blobvol::azure::{self, ArmClient, AzureClientError, SharedKeyClient};
use blobvol::command::ProcessCommandRunner;
use blobvol::config::{ConfigError, ControllerConfig};
use blobvol::context::OperationContext;
use blobvol::controller::{
    AccessMode, CapacityRange, ContentSource, ControllerError, ControllerService,
    CreateVolumeRequest, DeleteVolumeRequest, ExpandVolumeRequest, Secrets,
    ValidateVolumeCapabilitiesRequest, VolumeCapability,
};
use blobvol::copy::Azcopy;
use blobvol::logging::{self, LogFormat, LoggingError};
use blobvol::secret_store::FileSecretStore;

type Controller =
    ControllerService<ArmClient, SharedKeyClient, Azcopy<ProcessCommandRunner>, FileSecretStore>;

#[derive(Debug, Parser)]
#[command(
    name = "blobvol",
    about = "Provision blob containers as volumes",
    arg_required_else_help = true
)]
struct Cli {
    /// Log output format: plain or json.
    #[arg(long, global = true, default_value = "plain", env = "BLOBVOL_LOG_FORMAT")]
    log_format: LogFormat,
    /// Give up on the operation after this many seconds.
    #[arg(long, global = true, default_value_t = 300)]
    timeout_secs: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a volume, or return the existing one with the same name.
    Create(CreateCommand),
    /// Delete a volume by id.
    Delete(DeleteCommand),
    /// Confirm a volume exists and supports the default capability.
    Validate(ValidateCommand),
    /// Grow a volume.
    Expand(ExpandCommand),
    /// List the capabilities the controller advertises.
    Capabilities,
    /// Load and validate the configuration without contacting Azure.
    CheckConfig,
}

#[derive(Debug, Args)]
struct CreateCommand {
    /// Volume name; repeated creates with the same name are idempotent.
    name: String,
    /// Requested size in bytes.
    #[arg(long, default_value_t = 0)]
    size: u64,
    /// Provisioning parameter as key=value. May be repeated.
    #[arg(long = "param", value_parser = parse_pair)]
    params: Vec<(String, String)>,
    /// Account credential as key=value. May be repeated.
    #[arg(long = "secret", value_parser = parse_pair)]
    secrets: Vec<(String, String)>,
    /// Seed the volume from an existing volume id.
    #[arg(long)]
    clone_from: Option<String>,
}

#[derive(Debug, Args)]
struct DeleteCommand {
    /// Volume id returned by create.
    volume_id: String,
    /// Account credential as key=value. May be repeated.
    #[arg(long = "secret", value_parser = parse_pair)]
    secrets: Vec<(String, String)>,
}

#[derive(Debug, Args)]
struct ValidateCommand {
    /// Volume id returned by create.
    volume_id: String,
    /// Volume context entry as key=value. May be repeated.
    #[arg(long = "context", value_parser = parse_pair)]
    context: Vec<(String, String)>,
    /// Account credential as key=value. May be repeated.
    #[arg(long = "secret", value_parser = parse_pair)]
    secrets: Vec<(String, String)>,
}

#[derive(Debug, Args)]
struct ExpandCommand {
    /// Volume id returned by create.
    volume_id: String,
    /// New size in bytes.
    #[arg(long)]
    size: u64,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error("azure client error: {0}")]
    Azure(#[from] AzureClientError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli, io::stdout()).await {
        Ok(()) => 0,
        Err(err) => {
            write_error(io::stderr(), &err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli, out: impl Write) -> Result<(), CliError> {
    let ctx = OperationContext::with_timeout(Duration::from_secs(cli.timeout_secs));
    match cli.command {
        Command::Capabilities => {
            let capabilities = blobvol::controller::CONTROLLER_CAPABILITIES;
            write_json(out, &capabilities)
        }
        Command::CheckConfig => {
            let config = load_config()?;
            write_json(out, &config.provisioning_defaults())
        }
        Command::Create(args) => {
            let controller = connect(cli.log_format)?;
            let response = controller
                .create_volume(&ctx, &create_request(args))
                .await?;
            write_json(out, &response)
        }
        Command::Delete(args) => {
            let controller = connect(cli.log_format)?;
            let request = DeleteVolumeRequest {
                volume_id: args.volume_id,
                secrets: collect_secrets(args.secrets),
            };
            let response = controller.delete_volume(&ctx, &request).await?;
            write_json(out, &response)
        }
        Command::Validate(args) => {
            let controller = connect(cli.log_format)?;
            let request = ValidateVolumeCapabilitiesRequest {
                volume_id: args.volume_id,
                capabilities: vec![default_capability()],
                context: args.context.into_iter().collect(),
                secrets: collect_secrets(args.secrets),
            };
            let response = controller.validate_volume_capabilities(&request).await?;
            write_json(out, &response)
        }
        Command::Expand(args) => {
            let controller = connect(cli.log_format)?;
            let response = controller.expand_volume(&ExpandVolumeRequest {
                volume_id: args.volume_id,
                capacity_range: Some(CapacityRange::required(args.size)),
            })?;
            write_json(out, &response)
        }
    }
}

fn load_config() -> Result<ControllerConfig, CliError> {
    let config = ControllerConfig::load_without_cli_args()?;
    config.validate()?;
    Ok(config)
}

fn connect(log_format: LogFormat) -> Result<Controller, CliError> {
    let config = load_config()?;
    logging::init(log_format)?;
    debug!(
        subscription = %config.subscription_id,
        resource_group = %config.resource_group,
        "configuration loaded"
    );
    let (management, data_plane) = azure::connect(config.token_source(), config.arm_settings())?;
    let copy_tool = Azcopy::new(ProcessCommandRunner, config.azcopy_bin.clone());
    let secret_store = FileSecretStore::new(config.secret_root());
    Ok(ControllerService::new(
        management,
        data_plane,
        copy_tool,
        secret_store,
        config.controller_settings(),
    ))
}

fn create_request(args: CreateCommand) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: args.name,
        capacity_range: Some(CapacityRange::required(args.size)),
        capabilities: vec![default_capability()],
        parameters: args.params.into_iter().collect(),
        secrets: collect_secrets(args.secrets),
        content_source: args
            .clone_from
            .map(|volume_id| ContentSource::Volume { volume_id }),
    }
}

const fn default_capability() -> VolumeCapability {
    VolumeCapability::mount(AccessMode::MultiNodeMultiWriter)
}

fn collect_secrets(pairs: Vec<(String, String)>) -> Secrets {
    Secrets::from(pairs.into_iter().collect::<BTreeMap<_, _>>())
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

fn write_json(mut out: impl Write, value: &impl Serialize) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut out, value)
        .map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(out).map_err(|err| CliError::Output(err.to_string()))
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use blobvol::controller::Code;
    use blobvol::test_support::EnvGuard;
    use rstest::rstest;

    #[rstest]
    #[case("skuName=Premium_LRS", "skuName", "Premium_LRS")]
    #[case("tags=a=b,c=d", "tags", "a=b,c=d")]
    #[case(" containerName =", "containerName", "")]
    fn parse_pair_splits_on_first_equals(
        #[case] raw: &str,
        #[case] key: &str,
        #[case] value: &str,
    ) {
        assert_eq!(parse_pair(raw), Ok((key.to_owned(), value.to_owned())));
    }

    #[rstest]
    #[case("novalue")]
    #[case("=value")]
    fn parse_pair_rejects_malformed_input(#[case] raw: &str) {
        assert!(parse_pair(raw).is_err());
    }

    #[test]
    fn create_arguments_build_a_clone_request() {
        let cli = Cli::try_parse_from([
            "blobvol",
            "create",
            "pvc-1",
            "--size",
            "1024",
            "--param",
            "skuName=Standard_LRS",
            "--clone-from",
            "rg#acct#src##default#",
        ])
        .expect("parse");
        let Command::Create(args) = cli.command else {
            panic!("expected create");
        };
        let request = create_request(args);
        assert_eq!(request.name, "pvc-1");
        assert_eq!(request.capacity_range, Some(CapacityRange::required(1024)));
        assert_eq!(
            request.parameters.get("skuName").map(String::as_str),
            Some("Standard_LRS")
        );
        assert_eq!(
            request.content_source,
            Some(ContentSource::Volume {
                volume_id: String::from("rg#acct#src##default#"),
            })
        );
        assert!(request.secrets.is_empty());
    }

    #[tokio::test]
    async fn capabilities_print_without_configuration() {
        let cli = Cli::try_parse_from(["blobvol", "capabilities"]).expect("parse");
        let mut out = Vec::new();
        dispatch(cli, &mut out).await.expect("capabilities");
        let rendered = String::from_utf8(out).expect("utf8");
        assert!(rendered.contains("create_delete_volume"), "{rendered}");
        assert!(rendered.contains("clone_volume"), "{rendered}");
    }

    #[tokio::test]
    async fn blank_subscription_is_reported_before_connecting() {
        let _guard = EnvGuard::set_vars(&[
            ("BLOBVOL_SUBSCRIPTION_ID", " "),
            ("BLOBVOL_RESOURCE_GROUP", "rg"),
        ])
        .await;
        let cli = Cli::try_parse_from(["blobvol", "check-config"]).expect("parse");
        let err = dispatch(cli, Vec::new())
            .await
            .expect_err("blank subscription");
        assert!(
            matches!(err, CliError::Config(ConfigError::MissingField(ref message)) if message.contains("BLOBVOL_SUBSCRIPTION_ID")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn controller_errors_render_code_and_message() {
        let mut buf = Vec::new();
        let err = CliError::Controller(ControllerError::new(
            Code::NotFound,
            "container c1 not found",
        ));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(rendered, "NotFound: container c1 not found\n");
    }
}

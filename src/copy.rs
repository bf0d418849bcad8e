//! Adapter for the external container copy tool.
//!
//! Clones are executed by `azcopy`, which keeps its own job journal. The
//! adapter turns that journal into a [`JobStatus`] keyed by destination
//! container and submits new copies. Commands run on the blocking pool so the
//! async controller never stalls on a child process.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::command::{CommandRunner, SpawnError};

/// Default copy tool binary.
pub const DEFAULT_AZCOPY_BIN: &str = "azcopy";

const JOB_ID_MARKER: &str = "JobId:";
const STATUS_MARKER: &str = "Status:";
const COMMAND_MARKER: &str = "Command:";
const PERCENT_MARKER: &str = "Percent Complete (approx):";

/// Future returned by [`CopyTool`] methods.
pub type CopyFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// State of the copy job targeting a destination container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobStatus {
    /// No job targets the destination.
    NotFound,
    /// A job is in flight.
    Running {
        /// Approximate completion, when the tool reports it.
        percent: Option<String>,
    },
    /// The job finished successfully.
    Completed,
    /// The job finished with errors, or its state could not be read.
    Errored {
        /// Tool-reported status or failure text.
        message: String,
    },
}

/// Errors raised while submitting a copy.
#[derive(Debug, Error)]
pub enum CopyError {
    /// The copy tool could not be started.
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    /// The copy tool exited unsuccessfully.
    #[error("copy tool exited with status {code:?}: {output}")]
    Failed {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Captured diagnostic output.
        output: String,
    },
    /// The blocking task running the tool did not complete.
    #[error("copy task aborted: {message}")]
    Aborted {
        /// Join failure text.
        message: String,
    },
}

/// External copy tool used for clones.
pub trait CopyTool: Send + Sync {
    /// Reports the state of the most recent job writing into `destination`.
    fn job_status<'a>(&'a self, destination: &'a str) -> CopyFuture<'a, JobStatus>;

    /// Copies every blob from `source_url` into `destination_url`.
    fn copy<'a>(
        &'a self,
        source_url: &'a str,
        destination_url: &'a str,
    ) -> CopyFuture<'a, Result<(), CopyError>>;
}

/// `azcopy` driven through a [`CommandRunner`].
#[derive(Debug)]
pub struct Azcopy<R> {
    runner: Arc<R>,
    bin: String,
}

impl<R: CommandRunner + 'static> Azcopy<R> {
    /// Creates an adapter invoking `bin` through `runner`.
    #[must_use]
    pub fn new(runner: R, bin: impl Into<String>) -> Self {
        Self {
            runner: Arc::new(runner),
            bin: bin.into(),
        }
    }

    async fn run(&self, args: Vec<OsString>) -> Result<crate::command::CommandOutput, CopyError> {
        let runner = Arc::clone(&self.runner);
        let bin = self.bin.clone();
        tokio::task::spawn_blocking(move || runner.run(&bin, &args))
            .await
            .map_err(|err| CopyError::Aborted {
                message: err.to_string(),
            })?
            .map_err(CopyError::from)
    }

    async fn query(&self, destination: &str) -> JobStatus {
        let listing = match self.run(vec![OsString::from("jobs"), OsString::from("list")]).await {
            Ok(output) if output.is_success() => output,
            Ok(output) => {
                return JobStatus::Errored {
                    message: format!("jobs list failed: {}", output.diagnostic()),
                };
            }
            Err(err) => {
                return JobStatus::Errored {
                    message: err.to_string(),
                };
            }
        };
        let Some(job) = find_job(&listing.stdout, destination) else {
            return JobStatus::NotFound;
        };
        match job.status.as_str() {
            "InProgress" => {
                let percent = self.percent_complete(&job.id).await;
                JobStatus::Running { percent }
            }
            "Completed" => JobStatus::Completed,
            other => JobStatus::Errored {
                message: format!("copy job {} ended with status {other}", job.id),
            },
        }
    }

    async fn percent_complete(&self, job_id: &str) -> Option<String> {
        let args = vec![
            OsString::from("jobs"),
            OsString::from("show"),
            OsString::from(job_id),
        ];
        match self.run(args).await {
            Ok(output) if output.is_success() => parse_percent(&output.stdout),
            Ok(output) => {
                debug!(job_id, diagnostic = output.diagnostic(), "jobs show failed");
                None
            }
            Err(err) => {
                debug!(job_id, error = %err, "jobs show failed");
                None
            }
        }
    }

    async fn submit(&self, source_url: &str, destination_url: &str) -> Result<(), CopyError> {
        let args = vec![
            OsString::from("copy"),
            OsString::from(source_url),
            OsString::from(destination_url),
            OsString::from("--recursive"),
            OsString::from("--check-length=false"),
        ];
        let output = self.run(args).await?;
        if output.is_success() {
            Ok(())
        } else {
            warn!(code = ?output.code, "copy tool reported failure");
            Err(CopyError::Failed {
                code: output.code,
                output: output.diagnostic().to_owned(),
            })
        }
    }
}

impl<R: CommandRunner + 'static> CopyTool for Azcopy<R> {
    fn job_status<'a>(&'a self, destination: &'a str) -> CopyFuture<'a, JobStatus> {
        Box::pin(self.query(destination))
    }

    fn copy<'a>(
        &'a self,
        source_url: &'a str,
        destination_url: &'a str,
    ) -> CopyFuture<'a, Result<(), CopyError>> {
        Box::pin(self.submit(source_url, destination_url))
    }
}

#[derive(Debug, Default, Eq, PartialEq)]
struct JobEntry {
    id: String,
    status: String,
    command: String,
}

/// Splits `jobs list` output into entries; the tool lists newest first.
fn parse_jobs(listing: &str) -> Vec<JobEntry> {
    let mut jobs: Vec<JobEntry> = Vec::new();
    for line in listing.lines().map(str::trim) {
        if let Some(id) = line.strip_prefix(JOB_ID_MARKER) {
            jobs.push(JobEntry {
                id: id.trim().to_owned(),
                ..JobEntry::default()
            });
        } else if let Some(job) = jobs.last_mut() {
            if let Some(status) = line.strip_prefix(STATUS_MARKER) {
                status.trim().clone_into(&mut job.status);
            } else if let Some(command) = line.strip_prefix(COMMAND_MARKER) {
                command.trim().clone_into(&mut job.command);
            }
        }
    }
    jobs
}

/// Whether `command` copies into container `destination`.
fn targets_container(command: &str, destination: &str) -> bool {
    command
        .split_whitespace()
        .nth(2)
        .map(|url| url.split('?').next().unwrap_or(url))
        .is_some_and(|path| path.trim_end_matches('/').rsplit('/').next() == Some(destination))
}

fn find_job(listing: &str, destination: &str) -> Option<JobEntry> {
    parse_jobs(listing)
        .into_iter()
        .find(|job| targets_container(&job.command, destination))
}

fn parse_percent(show: &str) -> Option<String> {
    show.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(PERCENT_MARKER))
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;

    const LISTING: &str = "\
Existing Jobs
JobId: 11111111-aaaa
Start Time: Monday, 07-Aug-23 03:29:54 UTC
Status: InProgress
Command: copy https://acct.blob.core.windows.net/src?sv=x https://acct.blob.core.windows.net/dst?sv=x --recursive --check-length=false

JobId: 22222222-bbbb
Start Time: Sunday, 06-Aug-23 03:29:54 UTC
Status: Completed
Command: copy https://acct.blob.core.windows.net/dst?sv=x https://acct.blob.core.windows.net/other?sv=x --recursive
";

    fn status_for(listing: &str, destination: &str) -> Option<String> {
        find_job(listing, destination).map(|job| job.status)
    }

    #[test]
    fn listing_is_split_per_job() {
        let jobs = parse_jobs(LISTING);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs.first().map(|job| job.id.as_str()), Some("11111111-aaaa"));
    }

    #[rstest]
    #[case("dst", Some("InProgress"))]
    #[case("other", Some("Completed"))]
    #[case("src", None)]
    #[case("ds", None)]
    fn jobs_are_matched_by_destination(#[case] destination: &str, #[case] expected: Option<&str>) {
        assert_eq!(status_for(LISTING, destination).as_deref(), expected);
    }

    #[test]
    fn percent_is_read_from_job_summary() {
        let show = "Job 1111 summary\nElapsed Time (Minutes): 1\nPercent Complete (approx): 42.5\nFinal Job Status: InProgress\n";
        assert_eq!(parse_percent(show).as_deref(), Some("42.5"));
        assert_eq!(parse_percent("nothing useful"), None);
    }

    #[rstest]
    #[case("Completed", JobStatus::Completed)]
    #[case("Failed", JobStatus::Errored { message: String::from("copy job 1 ended with status Failed") })]
    #[case("Cancelled", JobStatus::Errored { message: String::from("copy job 1 ended with status Cancelled") })]
    #[case("CompletedWithErrors", JobStatus::Errored { message: String::from("copy job 1 ended with status CompletedWithErrors") })]
    #[case("CompletedWithSkipped", JobStatus::Errored { message: String::from("copy job 1 ended with status CompletedWithSkipped") })]
    #[tokio::test]
    async fn tool_status_maps_to_job_status(#[case] status: &str, #[case] expected: JobStatus) {
        let runner = ScriptedRunner::new();
        runner.push_output(
            Some(0),
            format!("JobId: 1\nStatus: {status}\nCommand: copy https://a/src https://a/dst --recursive\n"),
            "",
        );
        let azcopy = Azcopy::new(runner.clone(), "azcopy");

        assert_eq!(azcopy.job_status("dst").await, expected);
        assert_eq!(runner.invocations().len(), 1);
    }

    #[tokio::test]
    async fn running_job_reports_percent() {
        let runner = ScriptedRunner::new();
        runner.push_output(
            Some(0),
            "JobId: 7\nStatus: InProgress\nCommand: copy https://a/src https://a/dst\n",
            "",
        );
        runner.push_output(Some(0), "Percent Complete (approx): 12.0\n", "");
        let azcopy = Azcopy::new(runner.clone(), "azcopy");

        assert_eq!(
            azcopy.job_status("dst").await,
            JobStatus::Running {
                percent: Some(String::from("12.0"))
            }
        );
        let commands: Vec<String> = runner
            .invocations()
            .iter()
            .map(crate::test_support::CommandInvocation::command_string)
            .collect();
        assert_eq!(commands, vec!["azcopy jobs list", "azcopy jobs show 7"]);
    }

    #[tokio::test]
    async fn empty_journal_means_not_found() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), "No Existing Jobs\n", "");
        let azcopy = Azcopy::new(runner, "azcopy");

        assert_eq!(azcopy.job_status("dst").await, JobStatus::NotFound);
    }

    #[tokio::test]
    async fn listing_failure_is_errored() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(1), "", "plan file missing");
        let azcopy = Azcopy::new(runner, "azcopy");

        assert_eq!(
            azcopy.job_status("dst").await,
            JobStatus::Errored {
                message: String::from("jobs list failed: plan file missing")
            }
        );
    }

    #[tokio::test]
    async fn copy_passes_recursive_flags() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        let azcopy = Azcopy::new(runner.clone(), "/usr/bin/azcopy");

        azcopy
            .copy("https://a/src?sas", "https://a/dst?sas")
            .await
            .unwrap_or_else(|err| panic!("copy: {err}"));

        let invocations = runner.invocations();
        let Some(invocation) = invocations.first() else {
            panic!("copy tool was not invoked");
        };
        assert_eq!(
            invocation.command_string(),
            "/usr/bin/azcopy copy https://a/src?sas https://a/dst?sas --recursive --check-length=false"
        );
    }

    #[tokio::test]
    async fn copy_failure_carries_output() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(2), "", "403 AuthorizationFailure");
        let azcopy = Azcopy::new(runner, "azcopy");

        let err = azcopy
            .copy("https://a/src", "https://a/dst")
            .await
            .expect_err("copy should fail");
        assert!(
            matches!(err, CopyError::Failed { code: Some(2), ref output } if output == "403 AuthorizationFailure"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn copy_spawn_failure_is_reported() {
        let runner = ScriptedRunner::new();
        let azcopy = Azcopy::new(runner, "azcopy");

        let err = azcopy
            .copy("https://a/src", "https://a/dst")
            .await
            .expect_err("copy should fail");
        assert!(matches!(err, CopyError::Spawn(_)), "unexpected error: {err}");
    }
}

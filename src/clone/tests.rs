//! Tests for the clone driver.

use super::*;
use crate::test_support::{ManualTicker, ScriptedCopyTool};
use rstest::{fixture, rstest};

fn running(percent: &str) -> JobStatus {
    JobStatus::Running {
        percent: Some(percent.to_owned()),
    }
}

#[fixture]
fn plan() -> CopyPlan {
    CopyPlan::new("acct", "core.windows.net", "src", "dst", "?sv=token")
        .unwrap_or_else(|err| panic!("plan: {err}"))
}

fn settings() -> CloneSettings {
    CloneSettings {
        poll_interval: Duration::from_secs(5),
        timeout: Duration::from_secs(30),
    }
}

#[rstest]
fn plan_builds_container_urls(plan: CopyPlan) {
    assert_eq!(
        plan.source_url(),
        "https://acct.blob.core.windows.net/src?sv=token"
    );
    assert_eq!(
        plan.destination_url(),
        "https://acct.blob.core.windows.net/dst?sv=token"
    );
    assert!(!format!("{plan:?}").contains("token"));
}

#[test]
fn plan_rejects_empty_containers() {
    let err = CopyPlan::new("acct", "core.windows.net", "", "dst", "").expect_err("empty source");
    assert_eq!(
        err.to_string(),
        "srcContainerName() or dstContainerName(dst) is empty"
    );
}

#[rstest]
#[tokio::test]
async fn completed_job_is_not_resubmitted(plan: CopyPlan) {
    let tool = ScriptedCopyTool::with_statuses([JobStatus::Completed]);
    let ticker = ManualTicker::new();
    let orchestrator = CloneOrchestrator::new(&tool, &ticker, settings());

    orchestrator
        .run(&OperationContext::unbounded(), &plan)
        .await
        .unwrap_or_else(|err| panic!("clone: {err}"));

    assert!(tool.copies().is_empty());
    assert_eq!(tool.queries(), 1);
}

#[rstest]
#[tokio::test]
async fn errored_job_is_reported_without_submitting(plan: CopyPlan) {
    let tool = ScriptedCopyTool::with_statuses([JobStatus::Errored {
        message: String::from("Failed"),
    }]);
    let ticker = ManualTicker::new();
    let orchestrator = CloneOrchestrator::new(&tool, &ticker, settings());

    let err = orchestrator
        .run(&OperationContext::unbounded(), &plan)
        .await
        .expect_err("errored job");

    assert_eq!(
        err,
        CloneError::JobErrored {
            destination_container: String::from("dst"),
            message: String::from("Failed"),
        }
    );
    assert!(tool.copies().is_empty());
}

#[rstest]
#[tokio::test]
async fn missing_job_is_submitted_once(plan: CopyPlan) {
    let tool = ScriptedCopyTool::with_statuses([JobStatus::NotFound]);
    let ticker = ManualTicker::new();
    let orchestrator = CloneOrchestrator::new(&tool, &ticker, settings());

    orchestrator
        .run(&OperationContext::unbounded(), &plan)
        .await
        .unwrap_or_else(|err| panic!("clone: {err}"));

    assert_eq!(
        tool.copies(),
        vec![(
            String::from("https://acct.blob.core.windows.net/src?sv=token"),
            String::from("https://acct.blob.core.windows.net/dst?sv=token"),
        )]
    );
    assert!(ticker.sleeps().is_empty());
}

#[rstest]
#[tokio::test]
async fn failed_submission_is_terminal(plan: CopyPlan) {
    let tool = ScriptedCopyTool::with_statuses([JobStatus::NotFound]);
    tool.push_copy_result(Err(String::from("exit status 1")));
    let ticker = ManualTicker::new();
    let orchestrator = CloneOrchestrator::new(&tool, &ticker, settings());

    let err = orchestrator
        .run(&OperationContext::unbounded(), &plan)
        .await
        .expect_err("copy fails");

    assert!(matches!(err, CloneError::CopyFailed { .. }), "unexpected: {err}");
    assert_eq!(tool.copies().len(), 1);
}

#[rstest]
#[tokio::test]
async fn running_job_is_polled_until_completed(plan: CopyPlan) {
    let tool = ScriptedCopyTool::with_statuses([
        running("10"),
        running("60"),
        JobStatus::Completed,
    ]);
    let ticker = ManualTicker::new();
    let orchestrator = CloneOrchestrator::new(&tool, &ticker, settings());

    orchestrator
        .run(&OperationContext::unbounded(), &plan)
        .await
        .unwrap_or_else(|err| panic!("clone: {err}"));

    assert_eq!(tool.queries(), 3);
    assert_eq!(ticker.sleeps(), vec![Duration::from_secs(5); 2]);
    assert!(tool.copies().is_empty());
}

#[rstest]
#[tokio::test]
async fn job_vanishing_while_polling_is_submitted(plan: CopyPlan) {
    let tool = ScriptedCopyTool::with_statuses([running("10"), JobStatus::NotFound]);
    let ticker = ManualTicker::new();
    let orchestrator = CloneOrchestrator::new(&tool, &ticker, settings());

    orchestrator
        .run(&OperationContext::unbounded(), &plan)
        .await
        .unwrap_or_else(|err| panic!("clone: {err}"));

    assert_eq!(tool.copies().len(), 1);
}

#[rstest]
#[tokio::test]
async fn poll_loop_times_out(plan: CopyPlan) {
    let tool = ScriptedCopyTool::with_statuses([running("1")]);
    let ticker = ManualTicker::new();
    let orchestrator = CloneOrchestrator::new(&tool, &ticker, settings());

    let err = orchestrator
        .run(&OperationContext::unbounded(), &plan)
        .await
        .expect_err("timeout");

    assert_eq!(
        err.to_string(),
        "timeout waiting for copy blob container src to dst succeed"
    );
    assert_eq!(ticker.elapsed(), Duration::from_secs(30));
    assert!(tool.copies().is_empty());
}

#[rstest]
#[tokio::test]
async fn caller_deadline_shortens_poll_loop(plan: CopyPlan) {
    let tool = ScriptedCopyTool::with_statuses([running("1")]);
    let ticker = ManualTicker::new();
    let ctx = OperationContext::with_deadline(ticker.now() + Duration::from_secs(7));
    let orchestrator = CloneOrchestrator::new(&tool, &ticker, settings());

    let err = orchestrator.run(&ctx, &plan).await.expect_err("timeout");

    assert!(matches!(err, CloneError::Timeout { .. }), "unexpected: {err}");
    assert_eq!(
        ticker.sleeps(),
        vec![Duration::from_secs(5), Duration::from_secs(2)]
    );
}

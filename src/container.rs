//! Container create and delete with backoff.
//!
//! Both operations go through either the management plane or the data plane
//! depending on the credentials available, and retry through [`RetryPolicy`].
//! Create only retries while a previous container of the same name is still
//! being deleted. Delete treats "already gone" as success and retries every
//! other failure until the budget or the caller's deadline runs out.

use thiserror::Error;
use tracing::{debug, info};

use crate::context::OperationContext;
use crate::remote::{
    AccountRef, DataPlane, DataPlaneCredentials, ManagementPlane, RemoteError, RemoteErrorKind,
};
use crate::retry::{Attempt, RetryError, RetryPolicy};

/// Which remote surface performs the container call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CredentialMode {
    /// Resource-management API with the controller's identity.
    Management,
    /// Account endpoint with explicit credentials.
    DataPlane(DataPlaneCredentials),
}

impl CredentialMode {
    const fn label(&self) -> &'static str {
        match self {
            Self::Management => "management",
            Self::DataPlane(_) => "data-plane",
        }
    }
}

/// Container operation that failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerOperation {
    /// Creating a container.
    Create,
    /// Deleting a container.
    Delete,
}

impl std::fmt::Display for ContainerOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Delete => "delete",
        })
    }
}

/// Errors raised by [`ContainerLifecycle`].
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The container name is empty.
    #[error("containerName is empty")]
    EmptyName,
    /// The remote call failed after retrying.
    #[error("failed to {operation} container({container}) on {account}: {source}")]
    Remote {
        /// Operation attempted.
        operation: ContainerOperation,
        /// Container name.
        container: String,
        /// Account addressed.
        account: String,
        /// Underlying failure.
        source: RetryError<RemoteError>,
    },
}

/// Creates and deletes containers through the remote planes.
#[derive(Debug)]
pub struct ContainerLifecycle<'a, M, D> {
    management: &'a M,
    data_plane: &'a D,
    policy: RetryPolicy,
}

impl<'a, M: ManagementPlane, D: DataPlane> ContainerLifecycle<'a, M, D> {
    /// Creates a lifecycle helper over both planes.
    #[must_use]
    pub const fn new(management: &'a M, data_plane: &'a D, policy: RetryPolicy) -> Self {
        Self {
            management,
            data_plane,
            policy,
        }
    }

    /// Creates `container` under `account`, retrying while an earlier
    /// container of the same name is being deleted.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::EmptyName`] for an empty name and
    /// [`ContainerError::Remote`] when the remote call fails.
    pub async fn create(
        &self,
        ctx: &OperationContext,
        account: &AccountRef,
        container: &str,
        mode: &CredentialMode,
    ) -> Result<(), ContainerError> {
        if container.is_empty() {
            return Err(ContainerError::EmptyName);
        }
        info!(
            %account,
            container,
            mode = mode.label(),
            "creating container"
        );
        self.policy
            .run(ctx, "create container", || async move {
                match self.create_once(account, container, mode).await {
                    Ok(()) => Attempt::Done(()),
                    Err(err) if err.kind == RemoteErrorKind::ContainerBeingDeleted => {
                        Attempt::Retry(err)
                    }
                    Err(err) => Attempt::Fail(err),
                }
            })
            .await
            .map_err(|source| ContainerError::Remote {
                operation: ContainerOperation::Create,
                container: container.to_owned(),
                account: account.to_string(),
                source,
            })
    }

    /// Deletes `container` under `account`. A container that is already gone
    /// or already being deleted counts as deleted.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::EmptyName`] for an empty name and
    /// [`ContainerError::Remote`] once retries are exhausted.
    pub async fn delete(
        &self,
        ctx: &OperationContext,
        account: &AccountRef,
        container: &str,
        mode: &CredentialMode,
    ) -> Result<(), ContainerError> {
        if container.is_empty() {
            return Err(ContainerError::EmptyName);
        }
        info!(
            %account,
            container,
            mode = mode.label(),
            "deleting container"
        );
        self.policy
            .run(ctx, "delete container", || async move {
                match self.delete_once(account, container, mode).await {
                    Ok(()) => Attempt::Done(()),
                    Err(err)
                        if matches!(
                            err.kind,
                            RemoteErrorKind::ContainerBeingDeleted | RemoteErrorKind::NotFound
                        ) =>
                    {
                        debug!(container, kind = %err.kind, "container already gone");
                        Attempt::Done(())
                    }
                    Err(err) => Attempt::Retry(err),
                }
            })
            .await
            .map_err(|source| ContainerError::Remote {
                operation: ContainerOperation::Delete,
                container: container.to_owned(),
                account: account.to_string(),
                source,
            })
    }

    /// Reports whether `container` exists.
    ///
    /// # Errors
    ///
    /// Returns the [`RemoteError`] from the underlying call.
    pub async fn exists(
        &self,
        account: &AccountRef,
        container: &str,
        mode: &CredentialMode,
    ) -> Result<bool, RemoteError> {
        match mode {
            CredentialMode::Management => {
                self.management.container_exists(account, container).await
            }
            CredentialMode::DataPlane(credentials) => {
                self.data_plane.container_exists(credentials, container).await
            }
        }
    }

    async fn create_once(
        &self,
        account: &AccountRef,
        container: &str,
        mode: &CredentialMode,
    ) -> Result<(), RemoteError> {
        match mode {
            CredentialMode::Management => {
                self.management.create_container(account, container).await
            }
            CredentialMode::DataPlane(credentials) => {
                self.data_plane
                    .create_container_if_missing(credentials, container)
                    .await
            }
        }
    }

    async fn delete_once(
        &self,
        account: &AccountRef,
        container: &str,
        mode: &CredentialMode,
    ) -> Result<(), RemoteError> {
        match mode {
            CredentialMode::Management => {
                self.management.delete_container(account, container).await
            }
            CredentialMode::DataPlane(credentials) => {
                self.data_plane
                    .delete_container_if_exists(credentials, container)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::DataPlaneSecret;
    use crate::test_support::{FakeDataPlane, FakeManagementPlane, RemoteCall};
    use rstest::rstest;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(10),
            factor_percent: 150,
            steps: 4,
            max_delay: Duration::from_secs(1),
        }
    }

    fn account() -> AccountRef {
        AccountRef::new(None, "rg", "acct")
    }

    fn data_plane_mode() -> CredentialMode {
        CredentialMode::DataPlane(DataPlaneCredentials {
            account: String::from("acct"),
            secret: DataPlaneSecret::AccountKey(String::from("a2V5")),
            endpoint_suffix: String::from("core.windows.net"),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn create_retries_while_name_is_released() {
        let management = FakeManagementPlane::new();
        management.fail_next(
            RemoteCall::CreateContainer,
            RemoteError::new(RemoteErrorKind::ContainerBeingDeleted, "being deleted"),
        );
        let data_plane = FakeDataPlane::new();
        let lifecycle = ContainerLifecycle::new(&management, &data_plane, policy());

        lifecycle
            .create(&OperationContext::unbounded(), &account(), "c1", &CredentialMode::Management)
            .await
            .unwrap_or_else(|err| panic!("create: {err}"));

        assert_eq!(management.calls_of(RemoteCall::CreateContainer), 2);
        assert!(management.has_container("c1"));
    }

    #[rstest]
    #[case(RemoteErrorKind::Unauthorized)]
    #[case(RemoteErrorKind::NotFound)]
    #[case(RemoteErrorKind::Other)]
    #[tokio::test(start_paused = true)]
    async fn create_stops_on_other_failures(#[case] kind: RemoteErrorKind) {
        let management = FakeManagementPlane::new();
        management.fail_next(RemoteCall::CreateContainer, RemoteError::new(kind, "nope"));
        let data_plane = FakeDataPlane::new();
        let lifecycle = ContainerLifecycle::new(&management, &data_plane, policy());

        let err = lifecycle
            .create(&OperationContext::unbounded(), &account(), "c1", &CredentialMode::Management)
            .await
            .expect_err("create should fail");

        assert!(matches!(
            err,
            ContainerError::Remote {
                source: RetryError::Terminal(_),
                ..
            }
        ));
        assert_eq!(management.calls_of(RemoteCall::CreateContainer), 1);
    }

    #[rstest]
    #[case(RemoteErrorKind::NotFound)]
    #[case(RemoteErrorKind::ContainerBeingDeleted)]
    #[tokio::test(start_paused = true)]
    async fn delete_treats_missing_container_as_success(#[case] kind: RemoteErrorKind) {
        let management = FakeManagementPlane::new();
        management.fail_next(RemoteCall::DeleteContainer, RemoteError::new(kind, "gone"));
        let data_plane = FakeDataPlane::new();
        let lifecycle = ContainerLifecycle::new(&management, &data_plane, policy());

        lifecycle
            .delete(&OperationContext::unbounded(), &account(), "c1", &CredentialMode::Management)
            .await
            .unwrap_or_else(|err| panic!("delete: {err}"));

        assert_eq!(management.calls_of(RemoteCall::DeleteContainer), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_retries_other_failures_until_exhausted() {
        let management = FakeManagementPlane::new();
        for _ in 0..4 {
            management.fail_next(
                RemoteCall::DeleteContainer,
                RemoteError::new(RemoteErrorKind::Other, "internal"),
            );
        }
        let data_plane = FakeDataPlane::new();
        let lifecycle = ContainerLifecycle::new(&management, &data_plane, policy());

        let err = lifecycle
            .delete(&OperationContext::unbounded(), &account(), "c1", &CredentialMode::Management)
            .await
            .expect_err("delete should fail");

        assert!(matches!(
            err,
            ContainerError::Remote {
                source: RetryError::Exhausted { attempts: 4, .. },
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_stops_at_caller_deadline() {
        let management = FakeManagementPlane::new();
        for _ in 0..4 {
            management.fail_next(
                RemoteCall::DeleteContainer,
                RemoteError::new(RemoteErrorKind::Other, "internal"),
            );
        }
        let data_plane = FakeDataPlane::new();
        let lifecycle = ContainerLifecycle::new(&management, &data_plane, policy());
        let ctx = OperationContext::with_timeout(Duration::from_millis(20));

        let err = lifecycle
            .delete(&ctx, &account(), "c1", &CredentialMode::Management)
            .await
            .expect_err("delete should fail");

        assert!(matches!(
            err,
            ContainerError::Remote {
                source: RetryError::DeadlineExceeded { .. },
                ..
            }
        ));
        assert!(management.calls_of(RemoteCall::DeleteContainer) < 4);
    }

    #[tokio::test]
    async fn data_plane_mode_bypasses_management() {
        let management = FakeManagementPlane::new();
        let data_plane = FakeDataPlane::new();
        let lifecycle = ContainerLifecycle::new(&management, &data_plane, policy());
        let ctx = OperationContext::unbounded();
        let mode = data_plane_mode();

        lifecycle
            .create(&ctx, &account(), "c1", &mode)
            .await
            .unwrap_or_else(|err| panic!("create: {err}"));
        assert!(data_plane.has_container("c1"));
        assert!(
            lifecycle
                .exists(&account(), "c1", &mode)
                .await
                .unwrap_or_else(|err| panic!("exists: {err}"))
        );

        lifecycle
            .delete(&ctx, &account(), "c1", &mode)
            .await
            .unwrap_or_else(|err| panic!("delete: {err}"));
        assert!(!data_plane.has_container("c1"));
        assert!(management.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_container_name_is_rejected() {
        let management = FakeManagementPlane::new();
        let data_plane = FakeDataPlane::new();
        let lifecycle = ContainerLifecycle::new(&management, &data_plane, policy());

        let err = lifecycle
            .create(&OperationContext::unbounded(), &account(), "", &CredentialMode::Management)
            .await
            .expect_err("empty name");
        assert!(matches!(err, ContainerError::EmptyName));
        assert!(management.calls().is_empty());
    }
}

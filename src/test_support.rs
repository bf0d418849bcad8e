//! Test support utilities shared across unit and integration tests.
//!
//! The fakes record every call behind shared state so a clone handed to the
//! code under test can be inspected afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::time::Instant;

use crate::account::AccountOptions;
use crate::clone::{TickFuture, Ticker};
use crate::command::{CommandOutput, CommandRunner, SpawnError};
use crate::copy::{CopyError, CopyFuture, CopyTool, JobStatus};
use crate::remote::{
    AccountRef, DataPlane, DataPlaneCredentials, EnsuredAccount, ManagementPlane, RemoteError,
    RemoteFuture, SubnetRef,
};
use crate::secret_store::{AccountSecret, SecretStore, SecretStoreError, StoreOutcome};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SpawnError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        lock(&self.responses).pop_front().ok_or_else(|| SpawnError {
            program: program.to_owned(),
            message: String::from("no scripted response available"),
        })
    }
}

/// Remote call recorded by the fake planes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RemoteCall {
    /// Account match or creation.
    EnsureAccount,
    /// Account key lookup.
    AccountKey,
    /// Container creation.
    CreateContainer,
    /// Container deletion.
    DeleteContainer,
    /// Container existence check.
    ContainerExists,
    /// Subnet service endpoint update.
    EnsureSubnet,
}

/// Deterministic base64 key the fake planes hand out for `account`.
#[must_use]
pub fn fake_key(account: &str) -> String {
    STANDARD.encode(format!("key-{account}"))
}

#[derive(Debug, Default)]
struct ManagementState {
    calls: Vec<RemoteCall>,
    failures: HashMap<RemoteCall, VecDeque<RemoteError>>,
    containers: BTreeSet<(String, String)>,
    ensured: Vec<AccountOptions>,
    generated_accounts: u32,
    latest_key_requests: u32,
    subnets: Vec<SubnetRef>,
    key_accounts: Vec<AccountRef>,
    ensure_delay: Duration,
}

impl ManagementState {
    fn record(&mut self, call: RemoteCall) -> Result<(), RemoteError> {
        self.calls.push(call);
        self.failures
            .get_mut(&call)
            .and_then(VecDeque::pop_front)
            .map_or(Ok(()), Err)
    }
}

/// In-memory management plane.
#[derive(Clone, Debug, Default)]
pub struct FakeManagementPlane {
    state: Arc<Mutex<ManagementState>>,
}

impl FakeManagementPlane {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `call` fail with `error`. Failures queue in order.
    pub fn fail_next(&self, call: RemoteCall, error: RemoteError) {
        lock(&self.state)
            .failures
            .entry(call)
            .or_default()
            .push_back(error);
    }

    /// Delays every account ensure by `delay`.
    pub fn set_ensure_delay(&self, delay: Duration) {
        lock(&self.state).ensure_delay = delay;
    }

    /// Seeds an existing container.
    pub fn insert_container(&self, account: &str, container: &str) {
        lock(&self.state)
            .containers
            .insert((account.to_owned(), container.to_owned()));
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.state).calls.clone()
    }

    /// Number of times `call` was made.
    #[must_use]
    pub fn calls_of(&self, call: RemoteCall) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|made| **made == call)
            .count()
    }

    /// Whether any account holds `container`.
    #[must_use]
    pub fn has_container(&self, container: &str) -> bool {
        lock(&self.state)
            .containers
            .iter()
            .any(|(_, name)| name == container)
    }

    /// Whether `account` holds `container`.
    #[must_use]
    pub fn has_container_in(&self, account: &str, container: &str) -> bool {
        lock(&self.state)
            .containers
            .contains(&(account.to_owned(), container.to_owned()))
    }

    /// Account options passed to every ensure call.
    #[must_use]
    pub fn ensured_accounts(&self) -> Vec<AccountOptions> {
        lock(&self.state).ensured.clone()
    }

    /// Accounts whose keys were requested.
    #[must_use]
    pub fn key_requests(&self) -> Vec<AccountRef> {
        lock(&self.state).key_accounts.clone()
    }

    /// Number of key lookups that asked for the newest key.
    #[must_use]
    pub fn latest_key_requests(&self) -> u32 {
        lock(&self.state).latest_key_requests
    }

    /// Subnets whose service endpoints were ensured.
    #[must_use]
    pub fn subnets(&self) -> Vec<SubnetRef> {
        lock(&self.state).subnets.clone()
    }

    /// Key returned for `account`.
    #[must_use]
    pub fn key_for(&self, account: &str) -> String {
        fake_key(account)
    }
}

impl ManagementPlane for FakeManagementPlane {
    fn ensure_account<'a>(
        &'a self,
        options: &'a AccountOptions,
    ) -> RemoteFuture<'a, EnsuredAccount> {
        Box::pin(async move {
            let delay = lock(&self.state).ensure_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut state = lock(&self.state);
            state.record(RemoteCall::EnsureAccount)?;
            state.ensured.push(options.clone());
            let name = if let Some(name) = &options.name {
                name.clone()
            } else {
                state.generated_accounts = state.generated_accounts.saturating_add(1);
                format!("generated{}", state.generated_accounts)
            };
            Ok(EnsuredAccount {
                key: Some(fake_key(&name)),
                name,
            })
        })
    }

    fn account_key<'a>(&'a self, account: &'a AccountRef, latest: bool) -> RemoteFuture<'a, String> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(RemoteCall::AccountKey)?;
            state.key_accounts.push(account.clone());
            if latest {
                state.latest_key_requests = state.latest_key_requests.saturating_add(1);
            }
            Ok(fake_key(&account.account))
        })
    }

    fn create_container<'a>(
        &'a self,
        account: &'a AccountRef,
        container: &'a str,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(RemoteCall::CreateContainer)?;
            state
                .containers
                .insert((account.account.clone(), container.to_owned()));
            Ok(())
        })
    }

    fn delete_container<'a>(
        &'a self,
        account: &'a AccountRef,
        container: &'a str,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(RemoteCall::DeleteContainer)?;
            state
                .containers
                .remove(&(account.account.clone(), container.to_owned()));
            Ok(())
        })
    }

    fn container_exists<'a>(
        &'a self,
        account: &'a AccountRef,
        container: &'a str,
    ) -> RemoteFuture<'a, bool> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(RemoteCall::ContainerExists)?;
            Ok(state
                .containers
                .contains(&(account.account.clone(), container.to_owned())))
        })
    }

    fn ensure_subnet_service_endpoint<'a>(
        &'a self,
        subnet: &'a SubnetRef,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(RemoteCall::EnsureSubnet)?;
            state.subnets.push(subnet.clone());
            Ok(())
        })
    }
}

#[derive(Debug, Default)]
struct DataPlaneState {
    calls: Vec<RemoteCall>,
    failures: HashMap<RemoteCall, VecDeque<RemoteError>>,
    containers: BTreeSet<(String, String)>,
    credentials: Vec<DataPlaneCredentials>,
}

impl DataPlaneState {
    fn record(
        &mut self,
        call: RemoteCall,
        credentials: &DataPlaneCredentials,
    ) -> Result<(), RemoteError> {
        self.calls.push(call);
        self.credentials.push(credentials.clone());
        self.failures
            .get_mut(&call)
            .and_then(VecDeque::pop_front)
            .map_or(Ok(()), Err)
    }
}

/// In-memory data plane.
#[derive(Clone, Debug, Default)]
pub struct FakeDataPlane {
    state: Arc<Mutex<DataPlaneState>>,
}

impl FakeDataPlane {
    /// Creates an empty fake.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `call` fail with `error`.
    pub fn fail_next(&self, call: RemoteCall, error: RemoteError) {
        lock(&self.state)
            .failures
            .entry(call)
            .or_default()
            .push_back(error);
    }

    /// Seeds an existing container.
    pub fn insert_container(&self, account: &str, container: &str) {
        lock(&self.state)
            .containers
            .insert((account.to_owned(), container.to_owned()));
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.state).calls.clone()
    }

    /// Credentials presented with every call.
    #[must_use]
    pub fn credentials_seen(&self) -> Vec<DataPlaneCredentials> {
        lock(&self.state).credentials.clone()
    }

    /// Whether any account holds `container`.
    #[must_use]
    pub fn has_container(&self, container: &str) -> bool {
        lock(&self.state)
            .containers
            .iter()
            .any(|(_, name)| name == container)
    }
}

impl DataPlane for FakeDataPlane {
    fn create_container_if_missing<'a>(
        &'a self,
        credentials: &'a DataPlaneCredentials,
        container: &'a str,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(RemoteCall::CreateContainer, credentials)?;
            state
                .containers
                .insert((credentials.account.clone(), container.to_owned()));
            Ok(())
        })
    }

    fn delete_container_if_exists<'a>(
        &'a self,
        credentials: &'a DataPlaneCredentials,
        container: &'a str,
    ) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(RemoteCall::DeleteContainer, credentials)?;
            state
                .containers
                .remove(&(credentials.account.clone(), container.to_owned()));
            Ok(())
        })
    }

    fn container_exists<'a>(
        &'a self,
        credentials: &'a DataPlaneCredentials,
        container: &'a str,
    ) -> RemoteFuture<'a, bool> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.record(RemoteCall::ContainerExists, credentials)?;
            Ok(state
                .containers
                .contains(&(credentials.account.clone(), container.to_owned())))
        })
    }
}

#[derive(Debug, Default)]
struct CopyState {
    statuses: VecDeque<JobStatus>,
    copy_results: VecDeque<Result<(), String>>,
    copies: Vec<(String, String)>,
    queries: usize,
}

/// Copy tool replaying scripted job states.
///
/// Statuses are consumed in order; the last one repeats. With nothing
/// scripted every query reports [`JobStatus::NotFound`]. Copies succeed
/// unless a failure was queued.
#[derive(Clone, Debug, Default)]
pub struct ScriptedCopyTool {
    state: Arc<Mutex<CopyState>>,
}

impl ScriptedCopyTool {
    /// Creates a tool with no scripted statuses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tool replaying `statuses`.
    #[must_use]
    pub fn with_statuses(statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        let tool = Self::default();
        lock(&tool.state).statuses.extend(statuses);
        tool
    }

    /// Queues the outcome of the next copy.
    pub fn push_copy_result(&self, result: Result<(), String>) {
        lock(&self.state).copy_results.push_back(result);
    }

    /// Source and destination URLs of every copy.
    #[must_use]
    pub fn copies(&self) -> Vec<(String, String)> {
        lock(&self.state).copies.clone()
    }

    /// Number of status queries.
    #[must_use]
    pub fn queries(&self) -> usize {
        lock(&self.state).queries
    }
}

impl CopyTool for ScriptedCopyTool {
    fn job_status<'a>(&'a self, _destination: &'a str) -> CopyFuture<'a, JobStatus> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.queries = state.queries.saturating_add(1);
            if state.statuses.len() > 1 {
                state.statuses.pop_front().unwrap_or(JobStatus::NotFound)
            } else {
                state.statuses.front().cloned().unwrap_or(JobStatus::NotFound)
            }
        })
    }

    fn copy<'a>(
        &'a self,
        source_url: &'a str,
        destination_url: &'a str,
    ) -> CopyFuture<'a, Result<(), CopyError>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state
                .copies
                .push((source_url.to_owned(), destination_url.to_owned()));
            state
                .copy_results
                .pop_front()
                .unwrap_or(Ok(()))
                .map_err(|output| CopyError::Failed {
                    code: Some(1),
                    output,
                })
        })
    }
}

/// Secret store keeping secrets in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySecretStore {
    secrets: Arc<Mutex<Vec<AccountSecret>>>,
}

impl MemorySecretStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored secret.
    #[must_use]
    pub fn stored(&self) -> Vec<AccountSecret> {
        lock(&self.secrets).clone()
    }
}

impl SecretStore for MemorySecretStore {
    fn store(&self, secret: &AccountSecret) -> Result<StoreOutcome, SecretStoreError> {
        let mut secrets = lock(&self.secrets);
        if secrets
            .iter()
            .any(|held| held.name == secret.name && held.namespace == secret.namespace)
        {
            return Ok(StoreOutcome::AlreadyExists);
        }
        secrets.push(secret.clone());
        Ok(StoreOutcome::Created)
    }
}

/// Virtual clock that advances only when slept on.
#[derive(Clone, Debug)]
pub struct ManualTicker {
    origin: Instant,
    elapsed: Arc<Mutex<Duration>>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl ManualTicker {
    /// Creates a ticker starting at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Arc::default(),
            sleeps: Arc::default(),
        }
    }

    /// Virtual time elapsed so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *lock(&self.elapsed)
    }

    /// Every requested sleep, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

impl Default for ManualTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for ManualTicker {
    fn now(&self) -> Instant {
        self.origin + *lock(&self.elapsed)
    }

    fn sleep(&self, duration: Duration) -> TickFuture<'_> {
        lock(&self.sleeps).push(duration);
        let mut elapsed = lock(&self.elapsed);
        *elapsed = elapsed.saturating_add(duration);
        Box::pin(std::future::ready(()))
    }
}

/// Builds a parameter or secret map from string pairs.
#[must_use]
pub fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

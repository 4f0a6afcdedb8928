//! Platform adapter (spec §4.A): the narrow capability interfaces the rest
//! of the core depends on. Each trait has a Windows implementation behind
//! `cfg(windows)` and an in-memory fake used by tests, matching the
//! capability-injection design called out in spec §9.

use std::path::Path;
use std::time::Duration;

use crate::error::{ErrorKind, PlatformError};

pub mod fake;
#[cfg(windows)]
pub mod windows_impl;

/// Status values a service may report, per spec §4.A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatusKind {
    Stopped,
    StartPending,
    StopPending,
    Running,
    ContinuePending,
    PausePending,
    Paused,
}

/// The recovery policy attached to a service registration, mirrored from
/// [`crate::config::RecoveryAction`] at the SCM boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPolicy {
    None,
    RestartProcess,
    RestartService,
    RestartComputer,
}

/// Everything the façade needs to create or update an SCM registration.
#[derive(Debug, Clone)]
pub struct ServiceRegistration {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub image_path: String,
    pub startup_type: StartupTypeKind,
    pub dependencies: Vec<String>,
    pub account: ServiceAccount,
}

/// SCM startup type, mirrored from [`crate::config::StartupType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupTypeKind {
    Automatic,
    Manual,
    Disabled,
}

/// The account a service runs under.
#[derive(Debug, Clone)]
pub enum ServiceAccount {
    LocalSystem,
    User { name: String, password: String },
}

/// Service control: create/update/delete, recovery policy, dependencies,
/// status, start/stop/wait.
pub trait ServiceControl: Send + Sync {
    fn create(&self, registration: &ServiceRegistration) -> Result<(), PlatformError>;
    fn update(&self, registration: &ServiceRegistration) -> Result<(), PlatformError>;
    fn delete(&self, name: &str) -> Result<(), PlatformError>;
    fn set_recovery_policy(
        &self,
        name: &str,
        policy: RecoveryPolicy,
    ) -> Result<(), PlatformError>;
    fn set_dependencies(&self, name: &str, dependencies: &[String]) -> Result<(), PlatformError>;
    fn query_status(&self, name: &str) -> Result<ServiceStatusKind, PlatformError>;
    fn start(&self, name: &str) -> Result<(), PlatformError>;
    fn stop(&self, name: &str) -> Result<(), PlatformError>;
    fn get_startup_type(&self, name: &str) -> Result<StartupTypeKind, PlatformError>;
    fn wait_for_status(
        &self,
        name: &str,
        target: ServiceStatusKind,
        timeout: Duration,
        cancel: &crate::host::ShutdownToken,
    ) -> Result<(), PlatformError>;
}

/// A handle to a process-group (job object) that terminates its members
/// when the handle is dropped/closed.
pub trait JobHandle: Send + Sync {
    /// Closes the job object, terminating any surviving member processes.
    fn close(&self) -> Result<(), PlatformError>;
}

/// A handle to a spawned child process.
pub trait ChildHandle: Send {
    /// Non-blocking exit code check; `None` if still running.
    fn try_exit_code(&mut self) -> Result<Option<i32>, PlatformError>;
    /// Blocks up to `timeout` for the child to exit, returning its code.
    fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<i32>, PlatformError>;
    /// Sends a graceful close signal (close-main-window equivalent).
    fn request_graceful_stop(&mut self) -> Result<(), PlatformError>;
    /// Forcefully terminates the process.
    fn kill(&mut self) -> Result<(), PlatformError>;
    fn pid(&self) -> u32;

    /// Takes ownership of the child's stdout read-end, if stdio redirection
    /// was requested for that stream at spawn time. Returns `None` on
    /// implementations that never attach a pipe, and at most once per
    /// child — the host drains this into the rotating log writer (spec
    /// §4.F.3).
    fn take_stdout(&mut self) -> Option<Box<dyn std::io::Read + Send>> {
        None
    }

    /// Same as [`ChildHandle::take_stdout`] for the stderr stream.
    fn take_stderr(&mut self) -> Option<Box<dyn std::io::Read + Send>> {
        None
    }
}

/// Stdio redirection targets for a spawned process.
#[derive(Debug, Clone, Default)]
pub struct StdioRedirection {
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
}

/// Process supervision: create a process-group, spawn within it, inspect,
/// wait, kill.
pub trait ProcessSpawner: Send + Sync {
    fn create_job(&self) -> Result<Box<dyn JobHandle>, PlatformError>;

    #[allow(clippy::too_many_arguments)]
    fn spawn_in_job(
        &self,
        job: &dyn JobHandle,
        executable_path: &Path,
        arguments: &str,
        working_directory: &Path,
        environment: &std::collections::HashMap<String, String>,
        priority: crate::config::Priority,
        stdio: StdioRedirection,
    ) -> Result<Box<dyn ChildHandle>, PlatformError>;
}

/// Verifies `(user, password)` against the local or domain authority.
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, user: &str, password: &str) -> Result<(), PlatformError>;
}

/// Seals/unseals a byte array bound to the local machine.
pub trait SecretStore: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, PlatformError>;
    fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, PlatformError>;
}

/// Severity of an event sink entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

/// Writes structured entries to the OS event log under a fixed source.
pub trait EventSink: Send + Sync {
    fn report(&self, severity: EventSeverity, service_name: Option<&str>, message: &str);
}

/// Launches the out-of-process restarter helper (spec §4.G) for
/// `RestartService` recovery, then returns immediately — the helper
/// outlives the host process that spawned it.
pub trait RestarterLauncher: Send + Sync {
    fn launch(&self, service_name: &str) -> Result<(), PlatformError>;
}

/// Requests an immediate OS reboot for `RestartComputer` recovery.
pub trait RebootRequester: Send + Sync {
    fn request_reboot(&self) -> Result<(), PlatformError>;
}

/// Maps a raw OS error message onto one of the platform error kinds,
/// shared by every adapter implementation so the mapping stays consistent.
pub fn classify_os_error(raw_message: &str, kind_hint: ErrorKind) -> PlatformError {
    PlatformError::new(kind_hint, raw_message.to_string())
}

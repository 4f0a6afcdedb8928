//! In-memory fakes for the platform adapter traits, used by unit and
//! integration tests so the façade and host runtime are testable without
//! a real SCM or Win32 process.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{ErrorKind, PlatformError};

use super::{
    ChildHandle, CredentialValidator, EventSeverity, EventSink, JobHandle, ProcessSpawner,
    RebootRequester, RecoveryPolicy, RestarterLauncher, SecretStore, ServiceControl,
    ServiceRegistration, ServiceStatusKind, StartupTypeKind, StdioRedirection,
};

/// A recorded event sink entry, for assertions in tests.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub severity: EventSeverity,
    pub service_name: Option<String>,
    pub message: String,
}

/// An in-memory event sink that records every call.
#[derive(Default)]
pub struct FakeEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl FakeEventSink {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventSink for FakeEventSink {
    fn report(&self, severity: EventSeverity, service_name: Option<&str>, message: &str) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedEvent {
                severity,
                service_name: service_name.map(str::to_string),
                message: message.to_string(),
            });
    }
}

struct FakeServiceRecord {
    registration: ServiceRegistration,
    status: ServiceStatusKind,
    recovery_policy: RecoveryPolicy,
}

/// An in-memory `ServiceControl` that models a minimal SCM: services can
/// be created/deleted/started/stopped, and `query_status` reflects the
/// last transition requested.
#[derive(Default)]
pub struct FakeServiceControl {
    services: Mutex<HashMap<String, FakeServiceRecord>>,
    /// When set, `start`/`stop`/`create` fail for the named service —
    /// lets tests simulate SCM failures for rollback assertions.
    pub fail_for: Mutex<Option<String>>,
}

impl FakeServiceControl {
    fn should_fail(&self, name: &str) -> bool {
        self.fail_for
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_deref()
            == Some(name)
    }
}

impl ServiceControl for FakeServiceControl {
    fn create(&self, registration: &ServiceRegistration) -> Result<(), PlatformError> {
        if self.should_fail(&registration.name) {
            return Err(PlatformError::new(ErrorKind::OsFailure, "simulated create failure"));
        }
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        if services.contains_key(&registration.name) {
            return Err(PlatformError::new(
                ErrorKind::AlreadyExists,
                format!("service '{}' already registered", registration.name),
            ));
        }
        services.insert(
            registration.name.clone(),
            FakeServiceRecord {
                registration: registration.clone(),
                status: ServiceStatusKind::Stopped,
                recovery_policy: RecoveryPolicy::None,
            },
        );
        Ok(())
    }

    fn update(&self, registration: &ServiceRegistration) -> Result<(), PlatformError> {
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        let record = services
            .get_mut(&registration.name)
            .ok_or_else(|| PlatformError::new(ErrorKind::NotFound, "service not found"))?;
        record.registration = registration.clone();
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), PlatformError> {
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        services
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| PlatformError::new(ErrorKind::NotFound, "service not found"))
    }

    fn set_recovery_policy(&self, name: &str, policy: RecoveryPolicy) -> Result<(), PlatformError> {
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        let record = services
            .get_mut(name)
            .ok_or_else(|| PlatformError::new(ErrorKind::NotFound, "service not found"))?;
        record.recovery_policy = policy;
        Ok(())
    }

    fn set_dependencies(&self, name: &str, dependencies: &[String]) -> Result<(), PlatformError> {
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        let record = services
            .get_mut(name)
            .ok_or_else(|| PlatformError::new(ErrorKind::NotFound, "service not found"))?;
        record.registration.dependencies = dependencies.to_vec();
        Ok(())
    }

    fn query_status(&self, name: &str) -> Result<ServiceStatusKind, PlatformError> {
        let services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        services
            .get(name)
            .map(|r| r.status)
            .ok_or_else(|| PlatformError::new(ErrorKind::NotFound, "service not found"))
    }

    fn start(&self, name: &str) -> Result<(), PlatformError> {
        if self.should_fail(name) {
            return Err(PlatformError::new(ErrorKind::OsFailure, "simulated start failure"));
        }
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        let record = services
            .get_mut(name)
            .ok_or_else(|| PlatformError::new(ErrorKind::NotFound, "service not found"))?;
        if record.registration.startup_type == StartupTypeKind::Disabled {
            return Err(PlatformError::new(
                ErrorKind::ConfigInvalid,
                "service is disabled",
            ));
        }
        for dependency in record.registration.dependencies.clone() {
            let dep_status = services.get(&dependency).map(|r| r.status);
            match dep_status {
                Some(ServiceStatusKind::Running) => {}
                Some(_) => {
                    if let Some(dep) = services.get_mut(&dependency) {
                        dep.status = ServiceStatusKind::Running;
                    }
                }
                None => {
                    return Err(PlatformError::new(
                        ErrorKind::NotFound,
                        format!("dependency '{dependency}' not found"),
                    ))
                }
            }
        }
        let record = services.get_mut(name).expect("checked above");
        record.status = ServiceStatusKind::Running;
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<(), PlatformError> {
        if self.should_fail(name) {
            return Err(PlatformError::new(ErrorKind::OsFailure, "simulated stop failure"));
        }
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        let record = services
            .get_mut(name)
            .ok_or_else(|| PlatformError::new(ErrorKind::NotFound, "service not found"))?;
        record.status = ServiceStatusKind::Stopped;
        Ok(())
    }

    fn get_startup_type(&self, name: &str) -> Result<StartupTypeKind, PlatformError> {
        let services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        services
            .get(name)
            .map(|r| r.registration.startup_type)
            .ok_or_else(|| PlatformError::new(ErrorKind::NotFound, "service not found"))
    }

    fn wait_for_status(
        &self,
        name: &str,
        target: ServiceStatusKind,
        timeout: Duration,
        cancel: &crate::host::ShutdownToken,
    ) -> Result<(), PlatformError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.query_status(name)? == target {
                return Ok(());
            }
            if std::time::Instant::now() >= deadline {
                return Err(PlatformError::new(ErrorKind::Timeout, "wait_for_status timed out"));
            }
            if cancel.wait(Duration::from_millis(10)) {
                return Err(PlatformError::new(ErrorKind::Cancelled, "wait_for_status cancelled"));
            }
        }
    }
}

/// A no-op job handle for tests.
pub struct FakeJobHandle;

impl JobHandle for FakeJobHandle {
    fn close(&self) -> Result<(), PlatformError> {
        Ok(())
    }
}

/// An in-memory child handle that reports a fixed exit code after a
/// configured number of `try_exit_code` polls, letting tests drive the
/// health timer deterministically.
pub struct FakeChildHandle {
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub polls_until_exit: u32,
    polls_seen: u32,
    pub killed: bool,
    stdout_data: Option<Vec<u8>>,
    stderr_data: Option<Vec<u8>>,
}

impl FakeChildHandle {
    pub fn running(pid: u32) -> Self {
        Self {
            pid,
            exit_code: None,
            polls_until_exit: u32::MAX,
            polls_seen: 0,
            killed: false,
            stdout_data: None,
            stderr_data: None,
        }
    }

    pub fn exits_after(pid: u32, polls: u32, code: i32) -> Self {
        Self {
            pid,
            exit_code: Some(code),
            polls_until_exit: polls,
            polls_seen: 0,
            killed: false,
            stdout_data: None,
            stderr_data: None,
        }
    }

    /// Scripts the bytes a test's call to `take_stdout` hands back,
    /// simulating a child that wrote the given lines before exiting.
    pub fn with_stdout_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdout_data = Some(data.into());
        self
    }

    /// Same as [`FakeChildHandle::with_stdout_data`] for stderr.
    pub fn with_stderr_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stderr_data = Some(data.into());
        self
    }
}

impl ChildHandle for FakeChildHandle {
    fn try_exit_code(&mut self) -> Result<Option<i32>, PlatformError> {
        self.polls_seen += 1;
        if self.polls_seen >= self.polls_until_exit {
            Ok(self.exit_code)
        } else {
            Ok(None)
        }
    }

    fn wait_timeout(&mut self, _timeout: Duration) -> Result<Option<i32>, PlatformError> {
        self.try_exit_code()
    }

    fn request_graceful_stop(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn kill(&mut self) -> Result<(), PlatformError> {
        self.killed = true;
        self.exit_code = Some(-1);
        Ok(())
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn take_stdout(&mut self) -> Option<Box<dyn std::io::Read + Send>> {
        self.stdout_data
            .take()
            .map(|data| Box::new(std::io::Cursor::new(data)) as Box<dyn std::io::Read + Send>)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn std::io::Read + Send>> {
        self.stderr_data
            .take()
            .map(|data| Box::new(std::io::Cursor::new(data)) as Box<dyn std::io::Read + Send>)
    }
}

/// A `ProcessSpawner` that always returns a child immediately exiting 0,
/// for tests that only need the spawn call to succeed.
#[derive(Default)]
pub struct FakeProcessSpawner {
    pub next_pid: Mutex<u32>,
}

impl ProcessSpawner for FakeProcessSpawner {
    fn create_job(&self) -> Result<Box<dyn JobHandle>, PlatformError> {
        Ok(Box::new(FakeJobHandle))
    }

    fn spawn_in_job(
        &self,
        _job: &dyn JobHandle,
        _executable_path: &Path,
        _arguments: &str,
        _working_directory: &Path,
        _environment: &HashMap<String, String>,
        _priority: crate::config::Priority,
        _stdio: StdioRedirection,
    ) -> Result<Box<dyn ChildHandle>, PlatformError> {
        let mut guard = self.next_pid.lock().unwrap_or_else(|e| e.into_inner());
        *guard += 1;
        Ok(Box::new(FakeChildHandle::running(*guard)))
    }
}

/// A credential validator that accepts a fixed allow-list.
#[derive(Default)]
pub struct FakeCredentialValidator {
    pub valid: Mutex<HashMap<String, String>>,
}

impl CredentialValidator for FakeCredentialValidator {
    fn validate(&self, user: &str, password: &str) -> Result<(), PlatformError> {
        let valid = self.valid.lock().unwrap_or_else(|e| e.into_inner());
        match valid.get(user) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(PlatformError::new(
                ErrorKind::CredentialInvalid,
                "credential validation failed",
            )),
        }
    }
}

/// An in-memory secret store that just copies bytes — tests don't need
/// real DPAPI semantics, only the seal/unseal round trip.
#[derive(Default)]
pub struct FakeSecretStore;

impl SecretStore for FakeSecretStore {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, PlatformError> {
        Ok(plaintext.to_vec())
    }

    fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, PlatformError> {
        Ok(sealed.to_vec())
    }
}

/// A `RestarterLauncher` that records every service name it was asked to
/// restart, and fails when `fail` is set — used to drive `RestartService`
/// recovery deterministically in host tests.
#[derive(Default)]
pub struct FakeRestarterLauncher {
    pub launched: Mutex<Vec<String>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl RestarterLauncher for FakeRestarterLauncher {
    fn launch(&self, service_name: &str) -> Result<(), PlatformError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(PlatformError::new(
                ErrorKind::OsFailure,
                "simulated restarter launch failure",
            ));
        }
        self.launched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(service_name.to_string());
        Ok(())
    }
}

/// A `RebootRequester` that records whether it was called, and fails when
/// `fail` is set.
#[derive(Default)]
pub struct FakeRebootRequester {
    pub requested: std::sync::atomic::AtomicBool,
    pub fail: std::sync::atomic::AtomicBool,
}

impl RebootRequester for FakeRebootRequester {
    fn request_reboot(&self) -> Result<(), PlatformError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(PlatformError::new(
                ErrorKind::OsFailure,
                "simulated reboot request failure",
            ));
        }
        self.requested.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

mod common;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use servy::config::{Priority, RecoveryAction};
use servy::constants::{EXIT_OK, EXIT_OS_CALL_FAILED, EXIT_RECOVERY_EXHAUSTED};
use servy::error::PlatformError;
use servy::host::{Host, StartOptions};
use servy::platform::fake::{
    FakeChildHandle, FakeEventSink, FakeJobHandle, FakeProcessSpawner, FakeRebootRequester,
    FakeRestarterLauncher,
};
use servy::platform::{ChildHandle, JobHandle, ProcessSpawner, StdioRedirection};

use common::TestHomeGuard;

fn new_host(
    options: StartOptions,
    spawner: Box<dyn ProcessSpawner>,
) -> Host {
    Host::new(
        options,
        spawner,
        Box::new(FakeEventSink::default()),
        Box::new(FakeRestarterLauncher::default()),
        Box::new(FakeRebootRequester::default()),
        PathBuf::from("C:\\Windows\\System32"),
    )
}

/// A spawner whose first child reports a non-zero exit on the first poll,
/// and whose every subsequent child runs indefinitely — used to drive the
/// host through exactly one `RestartProcess` recovery cycle.
#[derive(Default)]
struct FailOnceThenHealthySpawner {
    spawn_count: AtomicU32,
}

impl ProcessSpawner for FailOnceThenHealthySpawner {
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
        _priority: Priority,
        _stdio: StdioRedirection,
    ) -> Result<Box<dyn ChildHandle>, PlatformError> {
        let count = self.spawn_count.fetch_add(1, Ordering::SeqCst);
        if count == 0 {
            Ok(Box::new(FakeChildHandle::exits_after(100, 1, 1)))
        } else {
            Ok(Box::new(FakeChildHandle::running(200 + count)))
        }
    }
}

/// A spawner whose every child exits cleanly (code 0) on the first poll.
struct ExitsCleanSpawner;

impl ProcessSpawner for ExitsCleanSpawner {
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
        _priority: Priority,
        _stdio: StdioRedirection,
    ) -> Result<Box<dyn ChildHandle>, PlatformError> {
        Ok(Box::new(FakeChildHandle::exits_after(100, 1, 0)))
    }
}

fn options(recovery: RecoveryAction, max_restarts: u32, max_failed: u32) -> StartOptions {
    StartOptions {
        name: "svc".into(),
        exe: "C:\\svc\\app.exe".into(),
        args: String::new(),
        cwd: String::new(),
        priority: Priority::Normal,
        stdout: None,
        stderr: None,
        rotate_bytes: 0,
        env: String::new(),
        heartbeat_seconds: 5,
        max_failed,
        max_restarts,
        recovery,
        pre_exe: None,
        pre_args: String::new(),
        pre_cwd: String::new(),
        pre_env: String::new(),
        pre_stdout: None,
        pre_stderr: None,
        pre_timeout_seconds: 5,
        pre_retries: 0,
        pre_ignore_failure: false,
    }
}

#[test]
fn healthy_child_never_triggers_recovery() {
    let host = new_host(
        options(RecoveryAction::RestartProcess, 3, 2),
        Box::new(FakeProcessSpawner::default()),
    );

    host.startup().unwrap();
    host.spawn_main_child().unwrap();

    for _ in 0..10 {
        host.health_tick();
    }

    host.shutdown();
}

#[test]
fn clean_exit_stops_the_service_normally_even_with_health_monitoring_off() {
    let host = new_host(
        options(RecoveryAction::None, 0, 1),
        Box::new(ExitsCleanSpawner),
    );

    host.startup().unwrap();
    host.spawn_main_child().unwrap();
    host.health_tick();

    assert_eq!(host.take_requested_exit(), Some(EXIT_OK));

    host.shutdown();
}

#[test]
fn restart_process_respawns_after_max_failed_checks() {
    let host = new_host(
        options(RecoveryAction::RestartProcess, 5, 2),
        Box::new(FailOnceThenHealthySpawner::default()),
    );

    host.startup().unwrap();
    host.spawn_main_child().unwrap();

    // Two consecutive failed ticks reach max_failed_checks=2 and trigger
    // RestartProcess recovery, which respawns via the healthy branch of
    // the spawner.
    host.health_tick();
    host.health_tick();

    // The respawned child never exits, so further ticks stay quiescent.
    for _ in 0..3 {
        host.health_tick();
    }

    host.shutdown();
}

#[test]
fn restart_process_gives_up_once_max_restarts_exhausted() {
    let host = new_host(
        options(RecoveryAction::RestartProcess, 0, 1),
        Box::new(FailOnceThenHealthySpawner::default()),
    );

    host.startup().unwrap();
    host.spawn_main_child().unwrap();

    // max_failed_checks=1 trips recovery on the very first tick, but
    // max_restarts=0 means the host must not attempt a respawn, and the
    // host must request the "recovery exhausted" exit code (spec §6).
    host.health_tick();

    assert_eq!(host.take_requested_exit(), Some(EXIT_RECOVERY_EXHAUSTED));

    host.shutdown();
}

#[test]
fn recovery_action_none_just_resets_failed_checks() {
    let host = new_host(
        options(RecoveryAction::None, 0, 1),
        Box::new(FakeProcessSpawner::default()),
    );

    host.startup().unwrap();
    host.spawn_main_child().unwrap();
    host.health_tick();
    host.shutdown();
}

#[test]
fn shutdown_is_idempotent_and_closes_the_job() {
    let host = new_host(
        options(RecoveryAction::None, 0, 1),
        Box::new(FakeProcessSpawner::default()),
    );

    host.startup().unwrap();
    host.spawn_main_child().unwrap();
    host.shutdown();
    host.shutdown();
}

#[test]
fn restart_service_launches_restarter_and_requests_normal_exit() {
    let restarter = std::sync::Arc::new(FakeRestarterLauncher::default());
    let host = Host::new(
        options(RecoveryAction::RestartService, 0, 1),
        Box::new(FailOnceThenHealthySpawner::default()),
        Box::new(FakeEventSink::default()),
        Box::new(FakeRestarterLauncherHandle(restarter.clone())),
        Box::new(FakeRebootRequester::default()),
        PathBuf::from("C:\\Windows\\System32"),
    );

    host.startup().unwrap();
    host.spawn_main_child().unwrap();
    host.health_tick();

    assert_eq!(restarter.launched.lock().unwrap().as_slice(), ["svc"]);
    assert_eq!(host.take_requested_exit(), Some(EXIT_OK));

    host.shutdown();
}

#[test]
fn restart_service_failure_requests_os_call_failed_exit() {
    let restarter = std::sync::Arc::new(FakeRestarterLauncher::default());
    restarter.fail.store(true, Ordering::SeqCst);
    let host = Host::new(
        options(RecoveryAction::RestartService, 0, 1),
        Box::new(FailOnceThenHealthySpawner::default()),
        Box::new(FakeEventSink::default()),
        Box::new(FakeRestarterLauncherHandle(restarter)),
        Box::new(FakeRebootRequester::default()),
        PathBuf::from("C:\\Windows\\System32"),
    );

    host.startup().unwrap();
    host.spawn_main_child().unwrap();
    host.health_tick();

    assert_eq!(host.take_requested_exit(), Some(EXIT_OS_CALL_FAILED));

    host.shutdown();
}

#[test]
fn restart_computer_requests_reboot_and_normal_exit() {
    let reboot = std::sync::Arc::new(FakeRebootRequester::default());
    let host = Host::new(
        options(RecoveryAction::RestartComputer, 0, 1),
        Box::new(FailOnceThenHealthySpawner::default()),
        Box::new(FakeEventSink::default()),
        Box::new(FakeRestarterLauncher::default()),
        Box::new(FakeRebootRequesterHandle(reboot.clone())),
        PathBuf::from("C:\\Windows\\System32"),
    );

    host.startup().unwrap();
    host.spawn_main_child().unwrap();
    host.health_tick();

    assert!(reboot.requested.load(Ordering::SeqCst));
    assert_eq!(host.take_requested_exit(), Some(EXIT_OK));

    host.shutdown();
}

/// Wraps a shared `FakeRestarterLauncher` so a test can both hand the
/// trait object to `Host` and keep an `Arc` to inspect it afterward.
struct FakeRestarterLauncherHandle(std::sync::Arc<FakeRestarterLauncher>);

impl servy::platform::RestarterLauncher for FakeRestarterLauncherHandle {
    fn launch(&self, service_name: &str) -> Result<(), PlatformError> {
        self.0.launch(service_name)
    }
}

/// Same wrapping trick as [`FakeRestarterLauncherHandle`], for the reboot
/// requester.
struct FakeRebootRequesterHandle(std::sync::Arc<FakeRebootRequester>);

impl servy::platform::RebootRequester for FakeRebootRequesterHandle {
    fn request_reboot(&self) -> Result<(), PlatformError> {
        self.0.request_reboot()
    }
}

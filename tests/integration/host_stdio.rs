use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use servy::config::{Priority, RecoveryAction};
use servy::error::PlatformError;
use servy::host::{Host, StartOptions};
use servy::platform::fake::{FakeChildHandle, FakeEventSink, FakeJobHandle, FakeRebootRequester, FakeRestarterLauncher};
use servy::platform::{ChildHandle, JobHandle, ProcessSpawner, StdioRedirection};

/// Spawns one child whose stdout/stderr are pre-scripted, so the host's
/// reader threads have something to drain.
struct ScriptedSpawner {
    stdout: &'static [u8],
    stderr: &'static [u8],
}

impl ProcessSpawner for ScriptedSpawner {
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
        Ok(Box::new(
            FakeChildHandle::running(1)
                .with_stdout_data(self.stdout.to_vec())
                .with_stderr_data(self.stderr.to_vec()),
        ))
    }
}

fn options(stdout: PathBuf, stderr: PathBuf) -> StartOptions {
    StartOptions {
        name: "svc".into(),
        exe: "C:\\svc\\app.exe".into(),
        args: String::new(),
        cwd: String::new(),
        priority: Priority::Normal,
        stdout: Some(stdout.display().to_string()),
        stderr: Some(stderr.display().to_string()),
        rotate_bytes: 0,
        env: String::new(),
        heartbeat_seconds: 5,
        max_failed: 3,
        max_restarts: 3,
        recovery: RecoveryAction::None,
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

/// Polls `path` until its contents satisfy `predicate` or the deadline
/// passes, since the stdio reader threads drain concurrently with the
/// test thread.
fn wait_for_contents(path: &Path, predicate: impl Fn(&str) -> bool) -> String {
    for _ in 0..100 {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if predicate(&contents) {
                return contents;
            }
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    std::fs::read_to_string(path).unwrap_or_default()
}

#[test]
fn main_child_stdout_and_stderr_are_captured_into_rotating_writers() {
    let dir = tempfile::tempdir().unwrap();
    let stdout_path = dir.path().join("out.log");
    let stderr_path = dir.path().join("err.log");

    let host = Host::new(
        options(stdout_path.clone(), stderr_path.clone()),
        Box::new(ScriptedSpawner {
            stdout: b"hello from stdout\nsecond line\n",
            stderr: b"a warning\n",
        }),
        Box::new(FakeEventSink::default()),
        Box::new(FakeRestarterLauncher::default()),
        Box::new(FakeRebootRequester::default()),
        PathBuf::from("C:\\Windows\\System32"),
    );

    host.startup().unwrap();
    host.spawn_main_child().unwrap();

    let stdout_contents = wait_for_contents(&stdout_path, |c| c.contains("second line"));
    assert!(stdout_contents.contains("hello from stdout"));
    assert!(stdout_contents.contains("second line"));

    let stderr_contents = wait_for_contents(&stderr_path, |c| c.contains("a warning"));
    assert!(stderr_contents.contains("a warning"));

    host.shutdown();
}

#[test]
fn stream_without_configured_path_is_never_captured() {
    let dir = tempfile::tempdir().unwrap();
    let stdout_path = dir.path().join("out.log");

    let mut opts = options(stdout_path.clone(), PathBuf::new());
    opts.stderr = None;

    let host = Host::new(
        opts,
        Box::new(ScriptedSpawner {
            stdout: b"only stream\n",
            stderr: b"should never be read",
        }),
        Box::new(FakeEventSink::default()),
        Box::new(FakeRestarterLauncher::default()),
        Box::new(FakeRebootRequester::default()),
        PathBuf::from("C:\\Windows\\System32"),
    );

    host.startup().unwrap();
    host.spawn_main_child().unwrap();

    let stdout_contents = wait_for_contents(&stdout_path, |c| c.contains("only stream"));
    assert!(stdout_contents.contains("only stream"));

    host.shutdown();
    assert!(!dir.path().join("err.log").exists());
}

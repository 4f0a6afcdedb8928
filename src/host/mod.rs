//! The service host runtime (spec §4.F): the wrapper process launched by
//! SCM. Structured as a `Host` value owning every piece of state for its
//! lifetime — no ambient statics (spec §9).

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{RecoveryAction, ServiceDefinition};
use crate::constants::{
    GRACEFUL_KILL_TIMEOUT, HostLock, EXIT_OK, EXIT_OS_CALL_FAILED, EXIT_RECOVERY_EXHAUSTED,
};
use crate::env_list;
use crate::error::HostError;
use crate::logs::writer::RotatingWriter;
use crate::platform::{
    ChildHandle, EventSeverity, EventSink, JobHandle, ProcessSpawner, RebootRequester,
    RestarterLauncher, StdioRedirection,
};

pub mod recovery;

pub use recovery::HealthState;

/// Options parsed from the host runtime's command line (spec §6),
/// equivalently constructed by [`crate::manager`] when building an SCM
/// image-path argument vector.
#[derive(Debug, Clone, PartialEq)]
pub struct StartOptions {
    pub name: String,
    pub exe: String,
    pub args: String,
    pub cwd: String,
    pub priority: crate::config::Priority,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub rotate_bytes: u64,
    pub env: String,
    pub heartbeat_seconds: u64,
    pub max_failed: u32,
    pub max_restarts: u32,
    pub recovery: RecoveryAction,
    pub pre_exe: Option<String>,
    pub pre_args: String,
    pub pre_cwd: String,
    pub pre_env: String,
    pub pre_stdout: Option<String>,
    pub pre_stderr: Option<String>,
    pub pre_timeout_seconds: u64,
    pub pre_retries: u32,
    pub pre_ignore_failure: bool,
}

impl StartOptions {
    /// Builds `StartOptions` from a persisted definition, the shape the
    /// façade uses to construct a service's SCM image-path arguments.
    pub fn from_definition(def: &ServiceDefinition) -> Self {
        Self {
            name: def.name.clone(),
            exe: def.executable_path.clone(),
            args: def.parameters.clone(),
            cwd: def.startup_directory.clone(),
            priority: def.priority,
            stdout: non_empty(&def.stdout_path),
            stderr: non_empty(&def.stderr_path),
            rotate_bytes: if def.enable_rotation {
                def.rotation_size_bytes
            } else {
                0
            },
            env: def.environment_variables.clone(),
            heartbeat_seconds: if def.enable_health_monitoring {
                def.heartbeat_interval_seconds
            } else {
                0
            },
            max_failed: def.max_failed_checks,
            max_restarts: def.max_restart_attempts,
            recovery: if def.enable_health_monitoring {
                def.recovery_action
            } else {
                RecoveryAction::None
            },
            pre_exe: non_empty(&def.pre_launch_executable_path),
            pre_args: def.pre_launch_parameters.clone(),
            pre_cwd: def.pre_launch_startup_directory.clone(),
            pre_env: def.pre_launch_environment_variables.clone(),
            pre_stdout: non_empty(&def.pre_launch_stdout_path),
            pre_stderr: non_empty(&def.pre_launch_stderr_path),
            pre_timeout_seconds: def.pre_launch_timeout_seconds,
            pre_retries: def.pre_launch_retry_attempts,
            pre_ignore_failure: def.pre_launch_ignore_failure,
        }
    }

    /// Validates the minimal shape the host runtime needs before it may
    /// attempt to spawn anything (spec §4.F.1.3).
    pub fn validate(&self) -> Result<(), HostError> {
        if self.name.trim().is_empty() {
            return Err(HostError::InvalidOptions("service name is required".into()));
        }
        if self.exe.trim().is_empty() {
            return Err(HostError::InvalidOptions(
                "child executable path is required".into(),
            ));
        }
        Ok(())
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// A cooperative cancellation token shared by every blocking OS wait in
/// the host runtime and the tailer (spec §5: "all blocking OS calls must
/// be cancellable via a host-wide shutdown token").
#[derive(Clone)]
pub struct ShutdownToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Signals cancellation; wakes every thread parked in `wait`.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks up to `timeout`, returning early if cancellation fires.
    /// Returns `true` if cancelled, `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        if *guard {
            return true;
        }
        let (guard, result) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|e| e.into_inner());
        let _ = result;
        *guard
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Which stdio stream a rotating writer serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// The host runtime's owned state for its lifetime (spec §4.F, §9: "an
/// explicit `Host` value ... no ambient state").
pub struct Host {
    pub options: StartOptions,
    spawner: Box<dyn ProcessSpawner>,
    sink: Arc<dyn EventSink>,
    restarter: Box<dyn RestarterLauncher>,
    reboot: Box<dyn RebootRequester>,
    job: Mutex<Option<Box<dyn JobHandle>>>,
    child: Mutex<Option<Box<dyn ChildHandle>>>,
    health: Mutex<HealthState>,
    recovering: std::sync::atomic::AtomicBool,
    logs: Arc<Mutex<HashMap<StreamKind, RotatingWriter>>>,
    shutdown: ShutdownToken,
    system_directory: std::path::PathBuf,
    requested_exit: Mutex<Option<i32>>,
}

impl Host {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        options: StartOptions,
        spawner: Box<dyn ProcessSpawner>,
        sink: Box<dyn EventSink>,
        restarter: Box<dyn RestarterLauncher>,
        reboot: Box<dyn RebootRequester>,
        system_directory: std::path::PathBuf,
    ) -> Self {
        Self {
            options,
            spawner,
            sink: Arc::from(sink),
            restarter,
            reboot,
            job: Mutex::new(None),
            child: Mutex::new(None),
            health: Mutex::new(HealthState::default()),
            recovering: std::sync::atomic::AtomicBool::new(false),
            logs: Arc::new(Mutex::new(HashMap::new())),
            shutdown: ShutdownToken::new(),
            system_directory,
            requested_exit: Mutex::new(None),
        }
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Records the exit code a recovery action has decided the process
    /// must use once the health loop unwinds, and wakes anything blocked
    /// on the shutdown token so that unwind happens promptly.
    fn request_exit(&self, code: i32) {
        *self.requested_exit.lock().unwrap_or_else(|e| e.into_inner()) = Some(code);
        self.shutdown.cancel();
    }

    /// Consumed by `servy-host`'s `main` once the health loop returns, to
    /// pick the exit code a recovery action decided on rather than the
    /// default "stopped normally" code.
    pub fn take_requested_exit(&self) -> Option<i32> {
        self.requested_exit.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Phase 1: startup (spec §4.F.1). Validates options, resolves the
    /// working directory, and creates the process-group.
    pub fn startup(&self) -> Result<(), HostError> {
        self.options.validate()?;
        let job = self
            .spawner
            .create_job()
            .map_err(HostError::ChildStartFailed)?;
        *self.job.lock().unwrap_or_else(|e| e.into_inner()) = Some(job);
        self.sink.report(
            EventSeverity::Info,
            Some(&self.options.name),
            "service host starting",
        );
        Ok(())
    }

    fn resolve_working_directory(&self, cwd: &str, exe: &str) -> std::path::PathBuf {
        if !cwd.is_empty() {
            let candidate = std::path::Path::new(cwd);
            if candidate.is_dir() {
                return candidate.to_path_buf();
            }
        }
        if let Some(parent) = std::path::Path::new(exe).parent() {
            if parent.is_dir() {
                return parent.to_path_buf();
            }
        }
        self.system_directory.clone()
    }

    /// Phase 2: pre-launch hook (spec §4.F.2).
    pub fn pre_launch(&self) -> Result<(), HostError> {
        let Some(pre_exe) = self.options.pre_exe.clone() else {
            return Ok(());
        };

        let job_guard = self.job.lock().unwrap_or_else(|e| e.into_inner());
        let job = job_guard
            .as_ref()
            .expect("startup() must run before pre_launch()");

        let cwd = self.resolve_working_directory(&self.options.pre_cwd, &pre_exe);
        let entries = env_list::parse(&self.options.pre_env);
        let env = env_list::layer(&std::env::vars().collect(), &entries);
        let stdio = StdioRedirection {
            stdout_path: self.options.pre_stdout.clone(),
            stderr_path: self.options.pre_stderr.clone(),
        };

        let mut attempt = 0u32;
        loop {
            let spawn_result = self.spawner.spawn_in_job(
                job.as_ref(),
                std::path::Path::new(&pre_exe),
                &self.options.pre_args,
                &cwd,
                &env,
                crate::config::Priority::Normal,
                stdio.clone(),
            );

            let mut child = match spawn_result {
                Ok(child) => child,
                Err(err) => {
                    attempt += 1;
                    if attempt > self.options.pre_retries {
                        return self.finish_pre_launch_failure(HostError::ChildStartFailed(err));
                    }
                    continue;
                }
            };

            let timeout = Duration::from_secs(self.options.pre_timeout_seconds);
            let exit = child.wait_timeout(timeout).map_err(HostError::ChildStartFailed)?;
            match exit {
                Some(0) => return Ok(()),
                Some(_) | None => {
                    if exit.is_none() {
                        let _ = child.kill();
                    }
                    attempt += 1;
                    if attempt > self.options.pre_retries {
                        return self.finish_pre_launch_failure(HostError::InvalidOptions(
                            "pre-launch hook failed after exhausting retries".into(),
                        ));
                    }
                }
            }
        }
    }

    fn finish_pre_launch_failure(&self, err: HostError) -> Result<(), HostError> {
        if self.options.pre_ignore_failure {
            warn!(service = %self.options.name, error = %err, "pre-launch hook failed, continuing per ignore_failure");
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Phase 3: spawn the main child (spec §4.F.3). Returns the spawned
    /// child's start time for diagnostic purposes.
    pub fn spawn_main_child(&self) -> Result<Instant, HostError> {
        let job_guard = self.job.lock().unwrap_or_else(|e| e.into_inner());
        let job = job_guard
            .as_ref()
            .expect("startup() must run before spawn_main_child()");

        let cwd = self.resolve_working_directory(&self.options.cwd, &self.options.exe);
        let entries = env_list::parse(&self.options.env);
        let env = env_list::layer(&std::env::vars().collect(), &entries);
        let stdio = StdioRedirection {
            stdout_path: self.options.stdout.clone(),
            stderr_path: self.options.stderr.clone(),
        };

        let mut child = self
            .spawner
            .spawn_in_job(
                job.as_ref(),
                std::path::Path::new(&self.options.exe),
                &self.options.args,
                &cwd,
                &env,
                self.options.priority,
                stdio,
            )
            .map_err(HostError::ChildStartFailed)?;

        self.attach_stdio_readers(child.as_mut());

        *self.child.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);
        info!(service = %self.options.name, "child process spawned");
        Ok(Instant::now())
    }

    /// Attaches line-buffered readers to whichever of the child's
    /// stdout/stderr streams were configured with a log path (spec
    /// §4.F.3). Each line is appended to the corresponding rotating
    /// writer and mirrored to the event sink.
    fn attach_stdio_readers(&self, child: &mut dyn ChildHandle) {
        if let Some(path) = self.options.stdout.clone() {
            if let Some(reader) = child.take_stdout() {
                self.spawn_stream_reader(StreamKind::Stdout, path, reader, EventSeverity::Info);
            }
        }
        if let Some(path) = self.options.stderr.clone() {
            if let Some(reader) = child.take_stderr() {
                self.spawn_stream_reader(StreamKind::Stderr, path, reader, EventSeverity::Warning);
            }
        }
    }

    fn spawn_stream_reader(
        &self,
        kind: StreamKind,
        configured_path: String,
        reader: Box<dyn std::io::Read + Send>,
        mirror_severity: EventSeverity,
    ) {
        let Some(resolved) = crate::logs::resolve_log_path(&configured_path) else {
            return;
        };

        let writer = RotatingWriter::new(resolved, self.options.rotate_bytes);
        self.logs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind, writer);

        let logs = self.logs.clone();
        let sink = self.sink.clone();
        let service_name = self.options.name.clone();

        std::thread::spawn(move || {
            use std::io::BufRead;
            let buffered = std::io::BufReader::new(reader);
            for line in buffered.lines() {
                let Ok(line) = line else {
                    break;
                };
                {
                    let writers = logs.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(writer) = writers.get(&kind) {
                        writer.write_line(&line, sink.as_ref());
                    }
                }
                sink.report(mirror_severity, Some(&service_name), &line);
            }
        });
    }

    /// The health-timer tick (spec §4.F.4), also used as the child-exit
    /// watch's callback (spec §4.F.3): "subscribe to child exit; on a
    /// clean exit without outstanding recovery, stop the service
    /// normally; on a non-clean exit, treat as a failed check." Locked
    /// behind [`HostLock::Health`] conceptually — `health` is the only
    /// mutex this method touches, acquired before any `LogWriters` lock
    /// elsewhere in the host.
    pub fn health_tick(&self) {
        if self
            .recovering
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return;
        }

        enum Exit {
            Running,
            Clean,
            Failed,
        }

        let exit = {
            let mut child_guard = self.child.lock().unwrap_or_else(|e| e.into_inner());
            match child_guard.as_mut() {
                None => Exit::Failed,
                Some(child) => match child.try_exit_code() {
                    Ok(Some(0)) => Exit::Clean,
                    Ok(Some(_)) => Exit::Failed,
                    Ok(None) => Exit::Running,
                    Err(_) => Exit::Failed,
                },
            }
        };

        if matches!(exit, Exit::Clean) {
            self.request_exit(EXIT_OK);
            return;
        }

        let exited_non_zero = matches!(exit, Exit::Failed);

        let should_recover = {
            let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
            let result = health.observe_tick(exited_non_zero, self.options.max_failed, &self.options.name);
            health.persist(&self.options.name);
            result
        };

        if should_recover {
            self.recovering.store(true, std::sync::atomic::Ordering::SeqCst);
            self.execute_recovery();
            self.persist_health();
            self.recovering.store(false, std::sync::atomic::Ordering::SeqCst);
        }
    }

    fn persist_health(&self) {
        let health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        health.persist(&self.options.name);
    }

    fn execute_recovery(&self) {
        match self.options.recovery {
            RecoveryAction::None => {
                let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
                health.failed_checks = 0;
            }
            RecoveryAction::RestartProcess => self.recover_restart_process(),
            RecoveryAction::RestartService => self.recover_restart_service(),
            RecoveryAction::RestartComputer => self.recover_restart_computer(),
        }
    }

    fn recover_restart_process(&self) {
        let attempts_exhausted = {
            let health = self.health.lock().unwrap_or_else(|e| e.into_inner());
            health.restart_attempts >= self.options.max_restarts
        };

        if attempts_exhausted {
            let err = HostError::RecoveryExhausted {
                attempts: self
                    .health
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .restart_attempts,
            };
            warn!(service = %self.options.name, error = %err, "stopping service");
            self.sink.report(EventSeverity::Error, Some(&self.options.name), &err.to_string());
            self.request_exit(EXIT_RECOVERY_EXHAUSTED);
            return;
        }

        self.kill_current_child();

        {
            let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
            health.failed_checks = 0;
        }

        if let Err(err) = self.spawn_main_child() {
            warn!(service = %self.options.name, error = %err, "failed to respawn child during recovery");
            self.sink.report(
                EventSeverity::Error,
                Some(&self.options.name),
                &format!("failed to respawn child during recovery: {err}"),
            );
            return;
        }

        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        health.restart_attempts += 1;
    }

    /// A service cannot restart itself through the SCM from inside its own
    /// process (spec §4.G), so this hands off to the standalone restarter
    /// helper and stops the host — the helper issues the actual SCM
    /// stop/start once this process is gone.
    fn recover_restart_service(&self) {
        self.sink.report(
            EventSeverity::Warning,
            Some(&self.options.name),
            "launching restarter helper for RestartService recovery",
        );
        match self.restarter.launch(&self.options.name) {
            Ok(()) => {
                info!(service = %self.options.name, "restarter launched, host stopping");
                self.request_exit(EXIT_OK);
            }
            Err(platform_err) => {
                let err = HostError::RecoveryActionFailed(platform_err);
                warn!(service = %self.options.name, error = %err, "stopping service");
                self.sink.report(EventSeverity::Error, Some(&self.options.name), &err.to_string());
                self.request_exit(EXIT_OS_CALL_FAILED);
            }
        }
    }

    fn recover_restart_computer(&self) {
        self.sink.report(
            EventSeverity::Warning,
            Some(&self.options.name),
            "RestartComputer recovery requested",
        );
        match self.reboot.request_reboot() {
            Ok(()) => {
                info!(service = %self.options.name, "OS reboot requested, host stopping");
                self.request_exit(EXIT_OK);
            }
            Err(platform_err) => {
                let err = HostError::RecoveryActionFailed(platform_err);
                warn!(service = %self.options.name, error = %err, "stopping service");
                self.sink.report(EventSeverity::Error, Some(&self.options.name), &err.to_string());
                self.request_exit(EXIT_OS_CALL_FAILED);
            }
        }
    }

    /// Kill semantics (spec §4.F.6): graceful close, then forced terminate
    /// after a grace period. Errors are swallowed with a warning.
    fn kill_current_child(&self) {
        let mut child_guard = self.child.lock().unwrap_or_else(|e| e.into_inner());
        let Some(child) = child_guard.as_mut() else {
            return;
        };

        if let Err(err) = child.request_graceful_stop() {
            warn!(service = %self.options.name, error = %err, "graceful stop request failed");
        }

        match child.wait_timeout(GRACEFUL_KILL_TIMEOUT) {
            Ok(Some(_)) => {}
            _ => {
                warn!(service = %self.options.name, "graceful stop timed out, forcing termination");
                if let Err(err) = child.kill() {
                    warn!(service = %self.options.name, error = %err, "forced termination failed");
                }
            }
        }
    }

    /// Phase 5: shutdown (spec §4.F.5).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.kill_current_child();
        {
            let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
            for (_, writer) in logs.drain() {
                writer.flush_and_close();
            }
        }
        if let Some(job) = self.job.lock().unwrap_or_else(|e| e.into_inner()).take() {
            if let Err(err) = job.close() {
                warn!(service = %self.options.name, error = %err, "failed to close process group during shutdown");
            }
        }
        self.sink.report(
            EventSeverity::Info,
            Some(&self.options.name),
            "service host stopped",
        );
    }

}

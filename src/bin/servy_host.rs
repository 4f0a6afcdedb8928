//! The service host runtime executable (spec §4.F). Registered as the
//! SCM image path for every installed Servy service; parses its own
//! command line, runs the five-phase lifecycle, and exits with the
//! codes defined in spec §6.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use servy::cli::HostArgs;
use servy::constants::{
    CHILD_EXIT_POLL_INTERVAL, EXIT_CHILD_START_FAILED, EXIT_CONFIG_INVALID, EXIT_OK,
    EXIT_OS_CALL_FAILED, EXIT_RECOVERY_EXHAUSTED,
};
use servy::host::Host;
use servy::platform::{EventSink, ProcessSpawner, RebootRequester, RestarterLauncher};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    servy::runtime::init();

    let args = HostArgs::parse_process_args();
    let options = match args.into_start_options() {
        Ok(options) => options,
        Err(err) => {
            error!(error = %err, "invalid start options");
            std::process::exit(EXIT_CONFIG_INVALID);
        }
    };

    #[cfg(windows)]
    let sink: Box<dyn EventSink> = match servy::platform::windows_impl::WindowsEventSink::register() {
        Ok(sink) => Box::new(sink),
        Err(err) => {
            eprintln!("failed to register event source: {err}");
            std::process::exit(EXIT_OS_CALL_FAILED);
        }
    };
    #[cfg(not(windows))]
    let sink: Box<dyn EventSink> = Box::new(servy::platform::fake::FakeEventSink::default());

    #[cfg(windows)]
    let spawner: Box<dyn ProcessSpawner> = Box::new(servy::platform::windows_impl::WindowsProcessSpawner);
    #[cfg(not(windows))]
    let spawner: Box<dyn ProcessSpawner> = Box::new(servy::platform::fake::FakeProcessSpawner::default());

    #[cfg(windows)]
    let restarter: Box<dyn RestarterLauncher> =
        Box::new(servy::platform::windows_impl::WindowsRestarterLauncher);
    #[cfg(not(windows))]
    let restarter: Box<dyn RestarterLauncher> =
        Box::new(servy::platform::fake::FakeRestarterLauncher::default());

    #[cfg(windows)]
    let reboot: Box<dyn RebootRequester> =
        Box::new(servy::platform::windows_impl::WindowsRebootRequester);
    #[cfg(not(windows))]
    let reboot: Box<dyn RebootRequester> = Box::new(servy::platform::fake::FakeRebootRequester::default());

    let host = Arc::new(Host::new(
        options,
        spawner,
        sink,
        restarter,
        reboot,
        servy::runtime::system_directory(),
    ));

    if let Err(err) = host.startup() {
        error!(error = %err, "startup failed");
        std::process::exit(EXIT_CONFIG_INVALID);
    }

    register_scm_control_handler(host.clone());

    if let Err(err) = host.pre_launch() {
        error!(error = %err, "pre-launch hook failed");
        host.shutdown();
        std::process::exit(EXIT_CHILD_START_FAILED);
    }

    if let Err(err) = host.spawn_main_child() {
        error!(error = %err, "failed to start main child process");
        host.shutdown();
        std::process::exit(EXIT_CHILD_START_FAILED);
    }

    // The health timer (spec §4.F.3's "start the health timer" — only
    // armed when health monitoring is enabled) runs on its own thread;
    // the child-exit watch (spec §4.F.3's "subscribe to child exit" —
    // always armed) runs on this one, so a clean exit stops the service
    // even when health monitoring is off.
    let health_loop_handle = {
        let host = host.clone();
        std::thread::spawn(move || run_health_loop(host))
    };

    run_exit_watch(host.clone());

    host.shutdown_token().cancel();
    let _ = health_loop_handle.join();

    host.shutdown();
    let exit_code = host.take_requested_exit().unwrap_or(EXIT_OK);
    info!(exit_code, "servy-host exiting");
    std::process::exit(exit_code);
}

/// Ticks the recovery state machine at `heartbeat_interval_seconds` until
/// the shutdown token fires (spec §4.F.3's "start the health timer"
/// requirement). A no-op when health monitoring is disabled.
fn run_health_loop(host: Arc<Host>) {
    if host.options.heartbeat_seconds == 0 {
        return;
    }
    let token = host.shutdown_token();
    let interval = Duration::from_secs(host.options.heartbeat_seconds);
    loop {
        if token.wait(interval) {
            return;
        }
        host.health_tick();
    }
}

/// Watches for the main child exiting, independent of the health timer
/// (spec §4.F.3, §5's concurrency requirement: the health check and the
/// child-exit callback may fire on separate threads, with re-entrance
/// prevented by `recovering`). Runs for the lifetime of the process.
fn run_exit_watch(host: Arc<Host>) {
    let token = host.shutdown_token();
    loop {
        if token.wait(CHILD_EXIT_POLL_INTERVAL) {
            return;
        }
        host.health_tick();
    }
}

/// Registers the SCM `Stop`/`Shutdown` control handler (spec §4.F.1.4).
/// On non-Windows test builds this is a no-op: the shutdown token is
/// still cancellable directly by the process (e.g. Ctrl+C), which is all
/// integration tests need.
fn register_scm_control_handler(host: Arc<Host>) {
    #[cfg(windows)]
    {
        use windows_service::service::{ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState, ServiceStatus, ServiceType};
        use windows_service::service_control_handler::{self, ServiceControlHandlerResult};

        let service_name = host.options.name.clone();
        let token = host.shutdown_token();

        let event_handler = move |control_event: ServiceControl| -> ServiceControlHandlerResult {
            match control_event {
                ServiceControl::Stop | ServiceControl::Shutdown => {
                    token.cancel();
                    ServiceControlHandlerResult::NoError
                }
                ServiceControl::Interrogate => ServiceControlHandlerResult::NoError,
                _ => ServiceControlHandlerResult::NotImplemented,
            }
        };

        match service_control_handler::register(&service_name, event_handler) {
            Ok(handle) => {
                let _ = handle.set_service_status(ServiceStatus {
                    service_type: ServiceType::OWN_PROCESS,
                    current_state: ServiceState::Running,
                    controls_accepted: ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN,
                    exit_code: ServiceExitCode::Win32(0),
                    checkpoint: 0,
                    wait_hint: Duration::default(),
                    process_id: None,
                });
            }
            Err(err) => {
                error!(error = %err, "failed to register SCM control handler");
            }
        }
    }
    #[cfg(not(windows))]
    {
        let _ = host;
    }
}

/// Retained for symmetry with the exit-code table in spec §6; referenced
/// by tests that assert the host never exits with an undocumented code.
#[allow(dead_code)]
fn known_exit_codes() -> [i32; 5] {
    [
        EXIT_OK,
        EXIT_CONFIG_INVALID,
        EXIT_CHILD_START_FAILED,
        EXIT_RECOVERY_EXHAUSTED,
        EXIT_OS_CALL_FAILED,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = known_exit_codes();
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }
}

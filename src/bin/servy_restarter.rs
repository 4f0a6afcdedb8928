//! The out-of-process restarter helper (spec §4.G). Launched by the host
//! runtime for `RestartService` recovery, since a service cannot
//! reliably restart itself through the SCM from inside its own process.

use std::time::Duration;

use tracing::{error, info};

use servy::cli::RestarterArgs;
use servy::constants::{EXIT_OK, EXIT_OS_CALL_FAILED};
use servy::host::ShutdownToken;
use servy::platform::{ServiceControl, ServiceStatusKind};

use clap::Parser;

const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

// The restarter has no notion of "configuration invalid" or "recovery
// exhausted" (spec §6's exit-code table names those for the host); every
// failure it can hit — stop, wait, start — maps onto "OS call failed".
const EXIT_STOP_FAILED: i32 = EXIT_OS_CALL_FAILED;
const EXIT_START_FAILED: i32 = EXIT_OS_CALL_FAILED;
const EXIT_WAIT_TIMED_OUT: i32 = EXIT_OS_CALL_FAILED;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = RestarterArgs::parse();

    #[cfg(windows)]
    let control: Box<dyn ServiceControl> =
        Box::new(servy::platform::windows_impl::WindowsServiceControl);
    #[cfg(not(windows))]
    let control: Box<dyn ServiceControl> =
        Box::new(servy::platform::fake::FakeServiceControl::default());

    let cancel = ShutdownToken::new();
    std::process::exit(run(control.as_ref(), &args.service_name, &cancel));
}

/// Stops the named service, waits for it to report `Stopped`, starts it
/// again, then waits for it to report `Running` — each wait bounded by
/// [`WAIT_TIMEOUT`] per spec §4.G.
fn run(control: &dyn ServiceControl, service_name: &str, cancel: &ShutdownToken) -> i32 {
    info!(service = service_name, "restarter stopping service");
    if let Err(err) = control.stop(service_name) {
        error!(service = service_name, error = %err, "failed to stop service");
        return EXIT_STOP_FAILED;
    }

    if let Err(err) =
        control.wait_for_status(service_name, ServiceStatusKind::Stopped, WAIT_TIMEOUT, cancel)
    {
        error!(service = service_name, error = %err, "timed out waiting for service to stop");
        return EXIT_WAIT_TIMED_OUT;
    }

    info!(service = service_name, "restarter starting service");
    if let Err(err) = control.start(service_name) {
        error!(service = service_name, error = %err, "failed to start service");
        return EXIT_START_FAILED;
    }

    if let Err(err) =
        control.wait_for_status(service_name, ServiceStatusKind::Running, WAIT_TIMEOUT, cancel)
    {
        error!(service = service_name, error = %err, "timed out waiting for service to start");
        return EXIT_WAIT_TIMED_OUT;
    }

    info!(service = service_name, "restarter completed successfully");
    EXIT_OK
}

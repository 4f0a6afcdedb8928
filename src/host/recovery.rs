//! The recovery state machine (spec §4.F.4): `failed_checks`,
//! `restart_attempts`, and the `recovering` re-entrance guard. Split out
//! from `host::mod` because the counters and their transition logic are
//! the one piece of the host runtime dense enough to warrant isolated
//! unit tests independent of a real process spawner.

use serde::Serialize;
use tracing::{info, warn};

/// Mutable counters guarded by a single mutex in [`super::Host`]
/// (`HostLock::Health`). `recovering` itself lives as an atomic on `Host`
/// for the fast re-entrance check; this struct owns the rest.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HealthState {
    pub failed_checks: u32,
    pub restart_attempts: u32,
}

impl HealthState {
    /// Best-effort snapshot to `<recovery_state_dir>/<service>.json`
    /// (spec §4.F supplementary feature). Purely observational: a manager
    /// UI's inspect view reads it between host restarts, but nothing in
    /// this process ever reads it back to make a decision. Failures are
    /// logged and otherwise ignored — this must never affect recovery.
    pub fn persist(&self, service: &str) {
        let dir = crate::runtime::recovery_state_dir();
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!(service, error = %err, "failed to create recovery state directory");
            return;
        }
        let path = dir.join(format!("{service}.json"));
        match serde_json::to_vec_pretty(self) {
            Ok(bytes) => {
                if let Err(err) = std::fs::write(&path, bytes) {
                    warn!(service, error = %err, "failed to persist recovery state sidecar");
                }
            }
            Err(err) => warn!(service, error = %err, "failed to serialize recovery state sidecar"),
        }
    }

    /// Applies one heartbeat tick's worth of health information, per the
    /// pseudocode in spec §4.F.4. Returns `true` if the caller should run
    /// `execute_recovery()` for this tick.
    pub fn observe_tick(&mut self, child_failed: bool, max_failed_checks: u32, service: &str) -> bool {
        if child_failed {
            self.failed_checks += 1;
            warn!(
                service,
                failed_checks = self.failed_checks,
                max_failed_checks,
                "health check failed"
            );
            self.failed_checks >= max_failed_checks
        } else {
            if self.failed_checks > 0 {
                info!(service, "child process is healthy");
            }
            self.failed_checks = 0;
            false
        }
    }
}

//! Constants and configuration values used throughout servy.
//!
//! Centralizes magic numbers so the invariants in `spec.md` §3 and the
//! timing behavior in §4.F have one place to read and change.

use std::time::Duration;

// ============================================================================
// Lock ordering
// ============================================================================

/// Typed lock abstraction enforcing a consistent acquisition order inside
/// the host runtime, so the health timer thread and the child-exit callback
/// can never deadlock against each other.
///
/// Locks MUST be acquired in ascending order of their discriminant:
/// 1. `Health` — the recovery state machine's counters and re-entrance guard.
/// 2. `LogWriters` — the per-stream rotating log writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HostLock {
    /// Guards `failed_checks`, `restart_attempts`, and `recovering`.
    Health = 1,
    /// Guards the map of per-stream rotating log writers.
    LogWriters = 2,
}

impl HostLock {
    /// Numeric priority; lower must be acquired before higher.
    pub const fn priority(&self) -> u8 {
        *self as u8
    }
}

// ============================================================================
// Store invariants (spec §3)
// ============================================================================

/// Minimum rotation threshold once rotation is enabled.
pub const MIN_ROTATION_SIZE_BYTES: u64 = 1024 * 1024;

/// Minimum heartbeat interval once health monitoring is enabled.
pub const MIN_HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// Minimum value for `max_failed_checks` once health monitoring is enabled.
pub const MIN_MAX_FAILED_CHECKS: u32 = 1;

/// Minimum value for `pre_launch_timeout_seconds`.
pub const MIN_PRE_LAUNCH_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Process exit codes (spec §6: "Exit codes (host and restarter)")
// ============================================================================

/// Normal exit: stopped via SCM request, or a recovery handoff completed
/// (restarter launched, reboot requested).
pub const EXIT_OK: i32 = 0;
/// `StartOptions` failed validation before any process was spawned.
pub const EXIT_CONFIG_INVALID: i32 = 1;
/// The main (or pre-launch) child process failed to start.
pub const EXIT_CHILD_START_FAILED: i32 = 2;
/// `RestartProcess` recovery exhausted `max_restart_attempts`.
pub const EXIT_RECOVERY_EXHAUSTED: i32 = 3;
/// An OS call required by a recovery action failed (reboot request,
/// restarter launch, or a restarter-helper SCM call).
pub const EXIT_OS_CALL_FAILED: i32 = 4;

// ============================================================================
// Kill / recovery timing (spec §4.F.4, §4.F.6)
// ============================================================================

/// Grace period between a graceful close signal and a forced terminate.
pub const GRACEFUL_KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval used while waiting for SCM status transitions.
pub const SCM_STATUS_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Poll interval for the child-exit watch (spec §4.F.3's "subscribe to
/// child exit"), which runs independently of the health timer so a clean
/// exit stops the service even when health monitoring is disabled.
pub const CHILD_EXIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Restarter helper timing (spec §4.G)
// ============================================================================

/// Maximum time the restarter helper waits for the service to reach `Stopped`.
pub const RESTARTER_STOP_WAIT: Duration = Duration::from_secs(60);

/// Maximum time the restarter helper waits for the service to reach `Running`.
pub const RESTARTER_START_WAIT: Duration = Duration::from_secs(60);

// ============================================================================
// Log tailer timing (spec §4.H)
// ============================================================================

/// Chunk size used when scanning backwards from end-of-file for history.
pub const TAIL_SCAN_CHUNK_BYTES: usize = 4096;

/// Poll interval used by the forward-tail loop.
pub const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Retry delay when the tailed file is temporarily missing.
pub const TAIL_MISSING_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum number of lines delivered to a tail callback in one batch.
pub const TAIL_MAX_BATCH: usize = 500;

// ============================================================================
// Secure-data engine (spec §4.C)
// ============================================================================

/// Chunk size used when copying plaintext during encryption, to avoid
/// large single allocations for big secrets.
pub const CRYPTO_CHUNK_BYTES: usize = 4096;

/// Prefix marking the current (v2) authenticated-encryption format.
pub const ENC_PREFIX_V2: &str = "SERVY_ENC:v2:";

/// Prefix marking the legacy (v1) static-IV format, accepted on read only.
pub const ENC_PREFIX_V1: &str = "SERVY_ENC:v1:";

/// Prefix shared by both formats, used to recognize encrypted-looking input
/// whose version tag is otherwise unparseable.
pub const ENC_PREFIX_BARE: &str = "SERVY_ENC:";

// ============================================================================
// File naming (spec §4.B, §6)
// ============================================================================

/// Event log source name registered for Servy-originated entries.
pub const EVENT_SOURCE_NAME: &str = "Servy";

/// File name of the service definitions store under the state directory.
pub const STORE_FILE_NAME: &str = "services.json";

/// File name suffix for the sealed master key.
pub const MASTER_KEY_FILE_NAME: &str = "master.key";

/// File name suffix for the sealed legacy IV.
pub const LEGACY_IV_FILE_NAME: &str = "legacy.iv";

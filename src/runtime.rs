//! Runtime paths: resolves the directories Servy's state, logs, and
//! secrets live under. On Windows this is always `%ProgramData%\Servy`;
//! a `SERVY_TEST_HOME` override lets tests run without touching the
//! real machine-wide directory.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static STATE_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Initializes the runtime's directory roots. Idempotent; later calls
/// are ignored, matching the teacher's `OnceLock`-guarded init pattern.
pub fn init() {
    let _ = STATE_ROOT.get_or_init(resolve_state_root);
}

/// Test-only initialization that pins the state root under a caller-
/// provided temporary directory, so parallel tests never collide on the
/// real `%ProgramData%\Servy`.
#[cfg(test)]
pub fn init_with_test_home(path: &Path) {
    let _ = STATE_ROOT.get_or_init(|| path.to_path_buf());
}

fn resolve_state_root() -> PathBuf {
    if let Ok(test_home) = std::env::var("SERVY_TEST_HOME") {
        return Path::new(&test_home).join("Servy");
    }
    let program_data = std::env::var("ProgramData").unwrap_or_else(|_| "C:\\ProgramData".to_string());
    Path::new(&program_data).join("Servy")
}

fn state_root() -> PathBuf {
    STATE_ROOT.get_or_init(resolve_state_root).clone()
}

/// Directory holding `services.json`, the sealed key files, and the
/// per-service recovery-state sidecar files.
pub fn state_dir() -> PathBuf {
    state_root()
}

/// Directory holding rotated logs when a service definition leaves
/// `stdout_path`/`stderr_path` relative.
pub fn log_dir() -> PathBuf {
    state_root().join("logs")
}

/// Directory holding per-service recovery-state sidecar files (spec §4.F
/// supplementary feature).
pub fn recovery_state_dir() -> PathBuf {
    state_root().join("state")
}

/// The OS system directory, used as the final fallback when resolving a
/// working directory (spec §4.F.1.2).
pub fn system_directory() -> PathBuf {
    if let Ok(test_home) = std::env::var("SERVY_TEST_HOME") {
        return Path::new(&test_home).join("system32");
    }
    let windir = std::env::var("WINDIR").unwrap_or_else(|_| "C:\\Windows".to_string());
    Path::new(&windir).join("System32")
}

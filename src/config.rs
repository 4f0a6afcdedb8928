//! The `ServiceDefinition` data model (spec §3): the single entity
//! persisted by [`crate::store`], round-tripped through JSON and XML, and
//! consumed by [`crate::manager`] and the host runtime's command line.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    MIN_HEARTBEAT_INTERVAL_SECS, MIN_MAX_FAILED_CHECKS, MIN_PRE_LAUNCH_TIMEOUT_SECS,
    MIN_ROTATION_SIZE_BYTES,
};
use crate::env_list;

/// Scheduling priority class applied to the spawned child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Idle,
    BelowNormal,
    Normal,
    AboveNormal,
    High,
    RealTime,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::BelowNormal => "BelowNormal",
            Self::Normal => "Normal",
            Self::AboveNormal => "AboveNormal",
            Self::High => "High",
            Self::RealTime => "RealTime",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "belownormal" | "below_normal" => Ok(Self::BelowNormal),
            "normal" => Ok(Self::Normal),
            "abovenormal" | "above_normal" => Ok(Self::AboveNormal),
            "high" => Ok(Self::High),
            "realtime" | "real_time" => Ok(Self::RealTime),
            other => Err(format!("unknown priority class '{other}'")),
        }
    }
}

/// SCM startup type. Mirrors the values the Windows service control
/// manager itself exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupType {
    Automatic,
    Manual,
    Disabled,
}

impl Default for StartupType {
    fn default() -> Self {
        Self::Manual
    }
}

impl fmt::Display for StartupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Automatic => "Automatic",
            Self::Manual => "Manual",
            Self::Disabled => "Disabled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for StartupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(Self::Automatic),
            "manual" => Ok(Self::Manual),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown startup type '{other}'")),
        }
    }
}

/// Action taken when the recovery state machine reaches `max_failed_checks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryAction {
    None,
    RestartProcess,
    RestartService,
    RestartComputer,
}

impl Default for RecoveryAction {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "None",
            Self::RestartProcess => "RestartProcess",
            Self::RestartService => "RestartService",
            Self::RestartComputer => "RestartComputer",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for RecoveryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "restartprocess" | "restart_process" => Ok(Self::RestartProcess),
            "restartservice" | "restart_service" => Ok(Self::RestartService),
            "restartcomputer" | "restart_computer" => Ok(Self::RestartComputer),
            other => Err(format!("unknown recovery action '{other}'")),
        }
    }
}

/// The single persisted entity (spec §3), field-for-field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Opaque integer identity, assigned by the store on insert. `0` until
    /// assigned.
    #[serde(default)]
    pub id: i64,
    /// Unique under case-insensitive comparison.
    pub name: String,
    #[serde(default)]
    pub description: String,

    // Process
    pub executable_path: String,
    #[serde(default)]
    pub startup_directory: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub priority: Priority,

    // SCM settings
    #[serde(default)]
    pub startup_type: StartupType,
    #[serde(default)]
    pub service_dependencies: Vec<String>,

    // Identity
    #[serde(default)]
    pub run_as_local_system: bool,
    #[serde(default)]
    pub user_account: String,
    /// Always a `SERVY_ENC:v2:`-prefixed ciphertext at rest; plaintext only
    /// transiently in memory, via [`crate::crypto`].
    #[serde(default)]
    pub password: String,

    // Logging
    #[serde(default)]
    pub stdout_path: String,
    #[serde(default)]
    pub stderr_path: String,
    #[serde(default)]
    pub enable_rotation: bool,
    #[serde(default)]
    pub rotation_size_bytes: u64,

    // Environment
    #[serde(default)]
    pub environment_variables: String,

    // Health
    #[serde(default)]
    pub enable_health_monitoring: bool,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_max_failed_checks")]
    pub max_failed_checks: u32,
    #[serde(default)]
    pub recovery_action: RecoveryAction,
    #[serde(default)]
    pub max_restart_attempts: u32,

    // Pre-launch hook
    #[serde(default)]
    pub pre_launch_executable_path: String,
    #[serde(default)]
    pub pre_launch_startup_directory: String,
    #[serde(default)]
    pub pre_launch_parameters: String,
    #[serde(default)]
    pub pre_launch_environment_variables: String,
    #[serde(default)]
    pub pre_launch_stdout_path: String,
    #[serde(default)]
    pub pre_launch_stderr_path: String,
    #[serde(default = "default_pre_launch_timeout")]
    pub pre_launch_timeout_seconds: u64,
    #[serde(default)]
    pub pre_launch_retry_attempts: u32,
    #[serde(default)]
    pub pre_launch_ignore_failure: bool,

    /// Best-effort annotation updated by the façade after each SCM
    /// round-trip; never consulted as a source of truth (§4.E's ordering
    /// rule keeps the SCM authoritative for "is this installed").
    #[serde(default)]
    pub last_known_status: String,
    /// Best-effort annotation of the last error observed for this service.
    #[serde(default)]
    pub last_error: String,
}

fn default_heartbeat_interval() -> u64 {
    MIN_HEARTBEAT_INTERVAL_SECS
}

fn default_max_failed_checks() -> u32 {
    MIN_MAX_FAILED_CHECKS
}

fn default_pre_launch_timeout() -> u64 {
    MIN_PRE_LAUNCH_TIMEOUT_SECS
}

impl Default for ServiceDefinition {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            description: String::new(),
            executable_path: String::new(),
            startup_directory: String::new(),
            parameters: String::new(),
            priority: Priority::default(),
            startup_type: StartupType::default(),
            service_dependencies: Vec::new(),
            run_as_local_system: false,
            user_account: String::new(),
            password: String::new(),
            stdout_path: String::new(),
            stderr_path: String::new(),
            enable_rotation: false,
            rotation_size_bytes: 0,
            environment_variables: String::new(),
            enable_health_monitoring: false,
            heartbeat_interval_seconds: default_heartbeat_interval(),
            max_failed_checks: default_max_failed_checks(),
            recovery_action: RecoveryAction::default(),
            max_restart_attempts: 0,
            pre_launch_executable_path: String::new(),
            pre_launch_startup_directory: String::new(),
            pre_launch_parameters: String::new(),
            pre_launch_environment_variables: String::new(),
            pre_launch_stdout_path: String::new(),
            pre_launch_stderr_path: String::new(),
            pre_launch_timeout_seconds: default_pre_launch_timeout(),
            pre_launch_retry_attempts: 0,
            pre_launch_ignore_failure: false,
            last_known_status: String::new(),
            last_error: String::new(),
        }
    }
}

impl ServiceDefinition {
    /// Validates every invariant from spec §3 that can be checked without
    /// touching the OS (credential validation against the principal store
    /// happens in [`crate::manager`], which owns the `CredentialValidator`
    /// capability).
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if self.executable_path.trim().is_empty() {
            return Err("executable_path must not be empty".into());
        }
        if self.executable_path.trim() != self.executable_path {
            return Err("executable_path must not have leading or trailing whitespace".into());
        }

        if self.enable_rotation && self.rotation_size_bytes < MIN_ROTATION_SIZE_BYTES {
            return Err(format!(
                "rotation_size_bytes must be at least {MIN_ROTATION_SIZE_BYTES} when rotation is enabled"
            ));
        }

        if self.enable_health_monitoring {
            if self.heartbeat_interval_seconds < MIN_HEARTBEAT_INTERVAL_SECS {
                return Err(format!(
                    "heartbeat_interval_seconds must be at least {MIN_HEARTBEAT_INTERVAL_SECS}"
                ));
            }
            if self.max_failed_checks < MIN_MAX_FAILED_CHECKS {
                return Err(format!(
                    "max_failed_checks must be at least {MIN_MAX_FAILED_CHECKS}"
                ));
            }
        }

        if !self.pre_launch_executable_path.is_empty()
            && self.pre_launch_timeout_seconds < MIN_PRE_LAUNCH_TIMEOUT_SECS
        {
            return Err(format!(
                "pre_launch_timeout_seconds must be at least {MIN_PRE_LAUNCH_TIMEOUT_SECS}"
            ));
        }

        if !self.run_as_local_system && self.user_account.trim().is_empty() {
            return Err("user_account is required unless run_as_local_system is set".into());
        }

        env_list::parse(&self.environment_variables);
        env_list::parse(&self.pre_launch_environment_variables);

        Ok(())
    }

    /// Resolves the working directory to use when spawning the main child,
    /// per spec §4.F.1.2: the configured directory if valid, else the
    /// executable's parent directory, else the OS system directory.
    pub fn resolve_startup_directory(&self, system_directory: &Path) -> std::path::PathBuf {
        if !self.startup_directory.is_empty() {
            let candidate = Path::new(&self.startup_directory);
            if candidate.is_dir() {
                return candidate.to_path_buf();
            }
        }
        if let Some(parent) = Path::new(&self.executable_path).parent() {
            if parent.is_dir() {
                return parent.to_path_buf();
            }
        }
        system_directory.to_path_buf()
    }

    /// Parses `environment_variables` into an ordered list of entries,
    /// per spec §3 and [`crate::env_list`].
    pub fn parsed_environment(&self) -> Vec<env_list::EnvEntry> {
        env_list::parse(&self.environment_variables)
    }

    /// Parses `pre_launch_environment_variables` the same way.
    pub fn parsed_pre_launch_environment(&self) -> Vec<env_list::EnvEntry> {
        env_list::parse(&self.pre_launch_environment_variables)
    }
}

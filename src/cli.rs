//! Command-line parsing for the host runtime (spec §6) and the shared
//! encoder the façade uses to build the SCM image-path argument vector —
//! a single source of truth so both binaries agree on escaping.

use clap::Parser;

use crate::config::{Priority, RecoveryAction};
use crate::host::StartOptions;

/// The host runtime's recognized command-line options (spec §6).
#[derive(Parser, Debug)]
#[command(name = "servy-host", about = "Servy service host runtime")]
pub struct HostArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub exe: String,
    #[arg(long, default_value = "")]
    pub args: String,
    #[arg(long, default_value = "")]
    pub cwd: String,
    #[arg(long, default_value = "normal")]
    pub priority: String,
    #[arg(long)]
    pub stdout: Option<String>,
    #[arg(long)]
    pub stderr: Option<String>,
    #[arg(long, default_value_t = 0)]
    pub rotate: u64,
    #[arg(long, default_value = "")]
    pub env: String,
    #[arg(long, default_value_t = 30)]
    pub heartbeat: u64,
    #[arg(long = "max-failed", default_value_t = 3)]
    pub max_failed: u32,
    #[arg(long = "max-restarts", default_value_t = 0)]
    pub max_restarts: u32,
    #[arg(long, default_value = "none")]
    pub recovery: String,
    #[arg(long = "pre-exe")]
    pub pre_exe: Option<String>,
    #[arg(long = "pre-args", default_value = "")]
    pub pre_args: String,
    #[arg(long = "pre-cwd", default_value = "")]
    pub pre_cwd: String,
    #[arg(long = "pre-env", default_value = "")]
    pub pre_env: String,
    #[arg(long = "pre-stdout")]
    pub pre_stdout: Option<String>,
    #[arg(long = "pre-stderr")]
    pub pre_stderr: Option<String>,
    #[arg(long = "pre-timeout", default_value_t = 30)]
    pub pre_timeout: u64,
    #[arg(long = "pre-retries", default_value_t = 0)]
    pub pre_retries: u32,
    #[arg(long = "pre-ignore-failure", default_value_t = false)]
    pub pre_ignore_failure: bool,
}

impl HostArgs {
    /// Parses the process's own command-line arguments.
    pub fn parse_process_args() -> Self {
        Self::parse()
    }

    /// Converts into [`StartOptions`], trimming spaces and surrounding
    /// quotes from every token (spec §4.F.1.1).
    pub fn into_start_options(self) -> Result<StartOptions, String> {
        Ok(StartOptions {
            name: sanitize(&self.name),
            exe: sanitize(&self.exe),
            args: sanitize(&self.args),
            cwd: sanitize(&self.cwd),
            priority: self.priority.parse::<Priority>()?,
            stdout: self.stdout.map(|s| sanitize(&s)),
            stderr: self.stderr.map(|s| sanitize(&s)),
            rotate_bytes: self.rotate,
            env: self.env,
            heartbeat_seconds: self.heartbeat,
            max_failed: self.max_failed,
            max_restarts: self.max_restarts,
            recovery: self.recovery.parse::<RecoveryAction>()?,
            pre_exe: self.pre_exe.map(|s| sanitize(&s)),
            pre_args: sanitize(&self.pre_args),
            pre_cwd: sanitize(&self.pre_cwd),
            pre_env: self.pre_env,
            pre_stdout: self.pre_stdout.map(|s| sanitize(&s)),
            pre_stderr: self.pre_stderr.map(|s| sanitize(&s)),
            pre_timeout_seconds: self.pre_timeout,
            pre_retries: self.pre_retries,
            pre_ignore_failure: self.pre_ignore_failure,
        })
    }
}

/// Trims surrounding whitespace, then a single matching pair of
/// surrounding double quotes, per spec §4.F.1.1.
fn sanitize(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Single positional argument of the restarter helper (spec §4.G).
#[derive(Parser, Debug)]
#[command(name = "servy-restarter", about = "Servy out-of-process restarter")]
pub struct RestarterArgs {
    pub service_name: String,
}

/// Builds the argument vector the façade places after the host
/// executable in the SCM image path, the exact inverse of
/// [`HostArgs::into_start_options`]. Every value that might contain
/// spaces is double-quoted.
pub fn encode_start_options(options: &StartOptions) -> String {
    let mut parts = Vec::new();
    parts.push(format!("--name {}", quote(&options.name)));
    parts.push(format!("--exe {}", quote(&options.exe)));
    if !options.args.is_empty() {
        parts.push(format!("--args {}", quote(&options.args)));
    }
    if !options.cwd.is_empty() {
        parts.push(format!("--cwd {}", quote(&options.cwd)));
    }
    parts.push(format!("--priority {}", options.priority));
    if let Some(stdout) = &options.stdout {
        parts.push(format!("--stdout {}", quote(stdout)));
    }
    if let Some(stderr) = &options.stderr {
        parts.push(format!("--stderr {}", quote(stderr)));
    }
    parts.push(format!("--rotate {}", options.rotate_bytes));
    if !options.env.is_empty() {
        parts.push(format!("--env {}", quote(&options.env)));
    }
    parts.push(format!("--heartbeat {}", options.heartbeat_seconds));
    parts.push(format!("--max-failed {}", options.max_failed));
    parts.push(format!("--max-restarts {}", options.max_restarts));
    parts.push(format!("--recovery {}", options.recovery));
    if let Some(pre_exe) = &options.pre_exe {
        parts.push(format!("--pre-exe {}", quote(pre_exe)));
        if !options.pre_args.is_empty() {
            parts.push(format!("--pre-args {}", quote(&options.pre_args)));
        }
        if !options.pre_cwd.is_empty() {
            parts.push(format!("--pre-cwd {}", quote(&options.pre_cwd)));
        }
        if !options.pre_env.is_empty() {
            parts.push(format!("--pre-env {}", quote(&options.pre_env)));
        }
        if let Some(pre_stdout) = &options.pre_stdout {
            parts.push(format!("--pre-stdout {}", quote(pre_stdout)));
        }
        if let Some(pre_stderr) = &options.pre_stderr {
            parts.push(format!("--pre-stderr {}", quote(pre_stderr)));
        }
        parts.push(format!("--pre-timeout {}", options.pre_timeout_seconds));
        parts.push(format!("--pre-retries {}", options.pre_retries));
        if options.pre_ignore_failure {
            parts.push("--pre-ignore-failure".to_string());
        }
    }
    parts.join(" ")
}

fn quote(value: &str) -> String {
    format!("\"{value}\"")
}

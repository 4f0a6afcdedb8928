//! Servy: a Windows service supervisor. Wraps an arbitrary executable as
//! a system-managed service, monitors it, rotates its logs, and recovers
//! it on failure.

#![warn(unused_crate_dependencies)]

/// CLI parsing shared by the host runtime and the façade's image-path
/// encoder.
pub mod cli;

/// The `ServiceDefinition` data model.
pub mod config;

/// Constants shared across subsystems.
pub mod constants;

/// Secure-data engine: authenticated encryption for secrets.
pub mod crypto;

/// Environment-variable list parsing and `%VAR%` expansion.
pub mod env_list;

/// Error types.
pub mod error;

/// The service host runtime: lifecycle, health loop, recovery.
pub mod host;

/// Log handling: the rotating writer.
pub mod logs;

/// The service manager façade.
pub mod manager;

/// The platform adapter traits and implementations.
pub mod platform;

/// Runtime paths (program data directories, system directory).
pub mod runtime;

/// The service configuration store.
pub mod store;

/// The log tailer.
pub mod tailer;

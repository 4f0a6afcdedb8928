//! Error handling for servy.
//!
//! Every subsystem defines its own `thiserror` enum; each converts into
//! [`ServyError`], which carries the domain-independent [`ErrorKind`] the
//! rest of the system (CLI, GUI, event log) branches on, plus a short
//! English diagnostic. Only the `kind` and `message` are meant to cross
//! the boundary into user-facing surfaces — those surfaces localize the
//! kind themselves.

use std::fmt;

/// Domain-independent classification of a failure, surfaced to callers
/// outside the core (CLI, GUI, event log consumers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A `ServiceDefinition` failed validation (bad path, out-of-range value, etc.).
    ConfigInvalid,
    /// The requested entity does not exist.
    NotFound,
    /// The entity already exists (e.g. a name collision on insert).
    AlreadyExists,
    /// The OS denied the operation due to insufficient privileges.
    AccessDenied,
    /// Credential validation against the local/domain authority failed.
    CredentialInvalid,
    /// A filesystem or stream I/O operation failed.
    IoFailure,
    /// Authenticated-encryption or key-sealing failure.
    CryptoFailure,
    /// An operation exceeded its allotted wait.
    Timeout,
    /// An underlying OS call failed for a reason not covered above.
    OsFailure,
    /// The operation was cancelled via a shutdown token.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConfigInvalid => "config invalid",
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::AccessDenied => "access denied",
            Self::CredentialInvalid => "credential invalid",
            Self::IoFailure => "I/O failure",
            Self::CryptoFailure => "crypto failure",
            Self::Timeout => "timeout",
            Self::OsFailure => "OS failure",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Top-level error type surfaced by the store, façade, and host runtime.
#[derive(Debug)]
pub struct ServyError {
    /// Domain-independent kind, used by callers to branch or localize.
    pub kind: ErrorKind,
    /// Short English diagnostic; never shown to end users without translation.
    pub message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ServyError {
    /// Builds an error with no underlying source.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Builds an error wrapping an underlying source error.
    pub fn wrap(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for ServyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ServyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for ServyError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::AccessDenied,
            std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
            _ => ErrorKind::IoFailure,
        };
        ServyError::wrap(kind, "I/O operation failed", err)
    }
}

impl From<CryptoError> for ServyError {
    fn from(err: CryptoError) -> Self {
        ServyError::wrap(ErrorKind::CryptoFailure, err.to_string(), err)
    }
}

impl From<StoreError> for ServyError {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Invalid(_) => ErrorKind::ConfigInvalid,
            StoreError::Io(_) => ErrorKind::IoFailure,
            StoreError::Serde(_) => ErrorKind::ConfigInvalid,
            StoreError::Xml(_) => ErrorKind::ConfigInvalid,
            StoreError::Cancelled => ErrorKind::Cancelled,
        };
        ServyError::wrap(kind, err.to_string(), err)
    }
}

impl From<PlatformError> for ServyError {
    fn from(err: PlatformError) -> Self {
        let kind = err.kind;
        ServyError::wrap(kind, err.to_string(), err)
    }
}

impl From<ManagerError> for ServyError {
    fn from(err: ManagerError) -> Self {
        let kind = match &err {
            ManagerError::Invalid(_) => ErrorKind::ConfigInvalid,
            ManagerError::CredentialInvalid(_) => ErrorKind::CredentialInvalid,
            ManagerError::Platform(p) => p.kind,
            ManagerError::Store(_) => ErrorKind::IoFailure,
            ManagerError::NotFound(_) => ErrorKind::NotFound,
            ManagerError::Disabled { .. } => ErrorKind::ConfigInvalid,
        };
        ServyError::wrap(kind, err.to_string(), err)
    }
}

/// Errors raised by the secure-data engine (§4.C).
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Attempted to encrypt an empty plaintext.
    #[error("refusing to encrypt empty plaintext")]
    EmptyPlaintext,
    /// The master key or legacy IV could not be loaded or generated.
    #[error("key material unavailable: {0}")]
    KeyUnavailable(String),
    /// The master key and legacy IV were configured with the same file path.
    #[error("master key path and legacy IV path must differ")]
    IdenticalKeyPaths,
    /// Underlying platform secret-sealing failure.
    #[error("failed to seal or unseal key material: {0}")]
    Seal(#[from] PlatformError),
    /// A cipher operation failed (bad padding, wrong key length, etc.).
    #[error("cipher operation failed: {0}")]
    Cipher(String),
}

/// Errors raised by the service configuration store (§4.D).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Insert collided with an existing name under case-insensitive comparison.
    #[error("a service definition named '{name}' already exists")]
    AlreadyExists {
        /// The colliding name.
        name: String,
    },
    /// The requested id or name has no matching definition.
    #[error("no service definition found for '{key}'")]
    NotFound {
        /// The id or name that was looked up.
        key: String,
    },
    /// The definition failed shape/invariant validation.
    #[error("invalid service definition: {0}")]
    Invalid(String),
    /// Failure reading or writing the backing store file.
    #[error("store I/O failure: {0}")]
    Io(#[from] std::io::Error),
    /// Failure (de)serializing the JSON store or export payload.
    #[error("store serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
    /// Failure (de)serializing an XML export/import payload.
    #[error("store XML failure: {0}")]
    Xml(String),
    /// The in-flight operation observed a cancellation request.
    #[error("operation cancelled")]
    Cancelled,
}

/// Errors raised by the platform adapter (§4.A). Every adapter method maps
/// an OS error onto one of the kinds below; the `kind` field is the
/// contract the rest of the core relies on.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct PlatformError {
    /// Classification the caller uses to decide how to propagate.
    pub kind: ErrorKind,
    /// Short diagnostic describing what failed.
    pub message: String,
}

impl PlatformError {
    /// Builds a platform error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Errors raised by the host runtime (§4.F).
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Command-line parsing or `ServiceDefinition` validation failed.
    #[error("invalid start options: {0}")]
    InvalidOptions(String),
    /// The main child process could not be spawned.
    #[error("failed to start child process: {0}")]
    ChildStartFailed(#[source] PlatformError),
    /// Recovery attempts were exhausted and the service is stopping.
    #[error("recovery exhausted after {attempts} restart attempt(s)")]
    RecoveryExhausted {
        /// Number of restart attempts performed before giving up.
        attempts: u32,
    },
    /// A recovery action requiring OS cooperation failed (reboot, restarter launch).
    #[error("recovery action failed: {0}")]
    RecoveryActionFailed(#[source] PlatformError),
    /// Underlying platform adapter failure not covered above.
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Errors raised by the service manager façade (§4.E).
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The definition failed validation before any SCM/store mutation.
    #[error("invalid service definition: {0}")]
    Invalid(String),
    /// Credential validation failed for a non-system service account.
    #[error("credential validation failed: {0}")]
    CredentialInvalid(String),
    /// Underlying platform adapter failure.
    #[error(transparent)]
    Platform(#[from] PlatformError),
    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The named service was not found in the store or SCM.
    #[error("service '{0}' not found")]
    NotFound(String),
    /// The service's startup type forbids the requested operation.
    #[error("service '{name}' is disabled and cannot be started")]
    Disabled {
        /// The disabled service's name.
        name: String,
    },
}

use thiserror::Error;

use crate::lock::LeaseToken;

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors that can occur while configuring, acquiring or releasing a lock.
#[derive(Error, Debug)]
pub enum LockError {
    /// A required option is missing or an option value is malformed.
    /// `backend` is filled in once the failing lock section is known.
    #[error("{}{key} {reason}", backend_prefix(.backend))]
    ConfigInvalid {
        backend: Option<String>,
        key: String,
        reason: String,
    },

    #[error("no lock implementation found for {0}")]
    BackendNotFound(String),

    #[error("credentials missing: {0}")]
    CredentialsMissing(String),

    #[error("{0} does not exist")]
    ResourceNotFound(String),

    /// Another holder currently owns the lock.
    #[error("lock is held by another operator: {0}")]
    LockContention(String),

    /// The lock was acquired but the backup copy could not be written.
    /// The lease is still held.
    #[error("unable to backup state: {reason}")]
    BackupFailed { lease: LeaseToken, reason: String },

    #[error("no lock is held on {0}")]
    LockNotHeld(String),

    #[error("{operation} failed for {resource}: {message}")]
    Transport {
        operation: String,
        resource: String,
        message: String,
    },
}

impl LockError {
    pub fn config(key: impl Into<String>, reason: impl Into<String>) -> Self {
        LockError::ConfigInvalid {
            backend: None,
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(
        operation: impl Into<String>,
        resource: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        LockError::Transport {
            operation: operation.into(),
            resource: resource.into(),
            message: message.to_string(),
        }
    }

    /// Attach the backend name to a configuration error; other kinds pass through.
    pub fn in_backend(self, name: &str) -> Self {
        match self {
            LockError::ConfigInvalid { key, reason, .. } => LockError::ConfigInvalid {
                backend: Some(name.to_string()),
                key,
                reason,
            },
            other => other,
        }
    }

    /// Contention is an expected outcome (another operator is active);
    /// every other kind needs investigation.
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::LockContention(_))
    }
}

fn backend_prefix(backend: &Option<String>) -> String {
    match backend {
        Some(name) => format!("unable to configure lock {}: ", name),
        None => String::new(),
    }
}

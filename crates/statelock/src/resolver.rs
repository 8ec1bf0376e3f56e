use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use statelock_core::{LockResult, LockSpec};
use thiserror::Error;
use tracing::debug;

use crate::registry::{BackendKind, BackendLock};

/// Resolve a lock spec into a concrete lock.
///
/// Looks the backend name up in the built-in table, then parses and validates
/// its options. Never performs I/O.
pub fn resolve_lock(spec: &LockSpec) -> LockResult<BackendLock> {
    let kind: BackendKind = spec.backend.parse()?;
    debug!(backend = %kind, "Resolving lock configuration");
    kind.build(spec.options())
        .map_err(|e| e.in_backend(kind.name()))
}

/// Errors reading a configuration file from disk.
#[derive(Error, Debug)]
pub enum ConfigFileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The decoded configuration file.
///
/// Only the `lock` section is interpreted; `remote_state` is carried through
/// untouched for whoever manages remote state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub lock: Option<LockSpec>,
    #[serde(default)]
    pub remote_state: Option<serde_json::Value>,
}

impl ConfigFile {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A configuration file with its lock section resolved.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub lock: Option<BackendLock>,
    pub remote_state: Option<serde_json::Value>,
}

pub fn resolve_config(file: ConfigFile) -> LockResult<ResolvedConfig> {
    let lock = file.lock.as_ref().map(resolve_lock).transpose()?;
    Ok(ResolvedConfig {
        lock,
        remote_state: file.remote_state,
    })
}

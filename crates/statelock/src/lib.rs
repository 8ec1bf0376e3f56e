//! Pluggable distributed locks for infrastructure state files.
//!
//! A `LockSpec` (backend name plus flat string options) is turned into a
//! ready-to-use `BackendLock` by [`resolve_lock`]. Resolution validates the
//! options and applies defaults without touching the network; clients are
//! created when the lock is first acquired or released.
//!
//! ```no_run
//! use statelock::{resolve_lock, Lock, LockSpec};
//!
//! # async fn demo() -> statelock::LockResult<()> {
//! let spec = LockSpec::new("dynamodb").with_option("state_file_id", "prod/terraform.tfstate");
//! let lock = resolve_lock(&spec)?;
//! lock.acquire().await?;
//! // ... mutate the state file ...
//! lock.release().await?;
//! # Ok(())
//! # }
//! ```

pub mod registry;
pub mod resolver;

pub use registry::{BackendKind, BackendLock, BUILTIN_BACKENDS};
pub use resolver::{resolve_config, resolve_lock, ConfigFile, ConfigFileError, ResolvedConfig};
pub use statelock_core::{LeaseToken, Lock, LockError, LockGrant, LockResult, LockSpec};

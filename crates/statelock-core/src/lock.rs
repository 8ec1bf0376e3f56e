use std::fmt;

use async_trait::async_trait;

use crate::error::LockResult;

/// Provider-issued proof that the current holder owns a lease.
///
/// A fresh token is proposed on every acquisition attempt and is only
/// meaningful for that one acquire/release cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a successful acquisition hands back to the caller.
///
/// The caller threads this into whatever runs under the lock instead of
/// reading it back from process-wide state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockGrant {
    lease: Option<LeaseToken>,
    backup_key: Option<String>,
}

impl LockGrant {
    /// Grant for backends whose hold is the existence of a record.
    pub fn held() -> Self {
        Self::default()
    }

    pub fn with_lease(lease: LeaseToken) -> Self {
        Self {
            lease: Some(lease),
            backup_key: None,
        }
    }

    pub fn with_backup(mut self, backup_key: impl Into<String>) -> Self {
        self.backup_key = Some(backup_key.into());
        self
    }

    pub fn lease(&self) -> Option<&LeaseToken> {
        self.lease.as_ref()
    }

    /// Key of the backup copy written during acquisition, if any.
    pub fn backup_key(&self) -> Option<&str> {
        self.backup_key.as_deref()
    }
}

/// Mutual exclusion over a remote artifact, enforced by a cloud backend.
///
/// Implementations hold only configuration fixed at construction; all lock
/// state lives in the backend, so a single instance can be shared between
/// tasks.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Acquire the lock.
    ///
    /// Returns once the backend has definitively granted or refused the lock.
    /// Safe to call again after a failed attempt.
    ///
    /// # Returns
    /// - `Ok(LockGrant)`: lock held
    /// - `Err(LockError::LockContention)`: another holder owns it
    async fn acquire(&self) -> LockResult<LockGrant>;

    /// Release whatever hold the most recent successful `acquire` established.
    ///
    /// Calling this without a prior acquisition is allowed and may report
    /// `LockError::LockNotHeld`.
    async fn release(&self) -> LockResult<()>;

    /// Human-readable identity of the protected resource.
    fn describe(&self) -> String;

    /// Environment variables a child process needs to operate on the
    /// protected resource while `grant` is held.
    fn handoff_env(&self, grant: &LockGrant) -> Vec<(&'static str, String)> {
        let _ = grant;
        Vec::new()
    }
}

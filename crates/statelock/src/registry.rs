use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use statelock_azure::StorageLock;
use statelock_core::{Lock, LockError, LockGrant, LockResult, OptionMap};
use statelock_dynamodb::DynamoDbLock;

/// The lock backends built into this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Blob lease on Azure Storage (`statelock-azure`)
    Azure,
    /// Conditional item write on DynamoDB (`statelock-dynamodb`)
    DynamoDb,
}

/// Backend names accepted in a `LockSpec`, matched exactly.
pub static BUILTIN_BACKENDS: &[(&str, BackendKind)] = &[
    ("azure", BackendKind::Azure),
    ("dynamodb", BackendKind::DynamoDb),
];

impl BackendKind {
    pub fn lookup(name: &str) -> Option<Self> {
        BUILTIN_BACKENDS
            .iter()
            .find(|(registered, _)| *registered == name)
            .map(|(_, kind)| *kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Azure => "azure",
            BackendKind::DynamoDb => "dynamodb",
        }
    }

    /// Parse `options` for this backend and construct the lock. No client is
    /// created here.
    pub fn build(self, options: OptionMap<'_>) -> LockResult<BackendLock> {
        match self {
            BackendKind::Azure => Ok(BackendLock::Azure(StorageLock::from_options(options)?)),
            BackendKind::DynamoDb => Ok(BackendLock::DynamoDb(DynamoDbLock::from_options(
                options,
            )?)),
        }
    }
}

impl FromStr for BackendKind {
    type Err = LockError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::lookup(name).ok_or_else(|| LockError::BackendNotFound(name.to_string()))
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A resolved lock of one of the built-in backends.
#[derive(Debug)]
pub enum BackendLock {
    Azure(StorageLock),
    DynamoDb(DynamoDbLock),
}

impl BackendLock {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendLock::Azure(_) => BackendKind::Azure,
            BackendLock::DynamoDb(_) => BackendKind::DynamoDb,
        }
    }
}

#[async_trait]
impl Lock for BackendLock {
    async fn acquire(&self) -> LockResult<LockGrant> {
        match self {
            BackendLock::Azure(lock) => lock.acquire().await,
            BackendLock::DynamoDb(lock) => lock.acquire().await,
        }
    }

    async fn release(&self) -> LockResult<()> {
        match self {
            BackendLock::Azure(lock) => lock.release().await,
            BackendLock::DynamoDb(lock) => lock.release().await,
        }
    }

    fn describe(&self) -> String {
        match self {
            BackendLock::Azure(lock) => lock.describe(),
            BackendLock::DynamoDb(lock) => lock.describe(),
        }
    }

    fn handoff_env(&self, grant: &LockGrant) -> Vec<(&'static str, String)> {
        match self {
            BackendLock::Azure(lock) => lock.handoff_env(grant),
            BackendLock::DynamoDb(lock) => lock.handoff_env(grant),
        }
    }
}

impl fmt::Display for BackendLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_roundtrip_through_table() {
        for (name, kind) in BUILTIN_BACKENDS {
            assert_eq!(kind.name(), *name);
            assert_eq!(name.parse::<BackendKind>().unwrap(), *kind);
        }
    }

    #[test]
    fn test_lookup_is_exact() {
        assert_eq!(BackendKind::lookup("azure"), Some(BackendKind::Azure));
        assert_eq!(BackendKind::lookup("Azure"), None);
        assert_eq!(BackendKind::lookup("dynamo"), None);
        assert_eq!(BackendKind::lookup(""), None);
    }

    #[test]
    fn test_unknown_backend_error() {
        let err = "consul".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, LockError::BackendNotFound(ref name) if name == "consul"));
        assert_eq!(err.to_string(), "no lock implementation found for consul");
    }
}

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use statelock_core::{LeaseToken, Lock, LockError, LockGrant, LockResult, OptionMap};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::SharedKeyCredential;
use crate::client::{BlobStore, RestBlobStore};
use crate::config::StorageLockConfig;

/// Environment variable a child process reads the held lease id from.
pub const LEASE_ID_ENV: &str = "ARM_LEASE_ID";

/// Name of the backup copy of `key` taken at `at`: `<key>.<RFC3339>`.
pub fn backup_key(key: &str, at: DateTime<Utc>) -> String {
    format!("{}.{}", key, at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Lock backed by an infinite lease on an existing Azure Storage blob.
///
/// State machine: `Unleased -> acquire -> Leased -> release -> Unleased`.
/// Nothing is tracked locally; the Blob service is the only source of truth.
pub struct StorageLock {
    config: StorageLockConfig,
    store: Option<Arc<dyn BlobStore>>,
    key_lookup: fn(&str) -> Option<String>,
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

impl StorageLock {
    /// Create a lock that builds its Blob service client from
    /// `ARM_ACCESS_KEY` on every operation.
    pub fn new(config: StorageLockConfig) -> Self {
        Self {
            config,
            store: None,
            key_lookup: env_lookup,
        }
    }

    pub fn from_options(options: OptionMap<'_>) -> LockResult<Self> {
        Ok(Self::new(StorageLockConfig::from_options(options)?))
    }

    /// Create a lock that uses the given store instead of building one.
    pub fn with_store(config: StorageLockConfig, store: Arc<dyn BlobStore>) -> Self {
        Self {
            config,
            store: Some(store),
            key_lookup: env_lookup,
        }
    }

    /// Resolve `ARM_ACCESS_KEY` through `lookup` instead of the process environment.
    #[cfg(test)]
    fn with_key_lookup(mut self, lookup: fn(&str) -> Option<String>) -> Self {
        self.key_lookup = lookup;
        self
    }

    pub fn config(&self) -> &StorageLockConfig {
        &self.config
    }

    fn connect(&self) -> LockResult<Arc<dyn BlobStore>> {
        if let Some(store) = &self.store {
            return Ok(Arc::clone(store));
        }
        let credential =
            SharedKeyCredential::from_lookup(&self.config.storage_account_name, self.key_lookup)?;
        Ok(Arc::new(RestBlobStore::new(
            self.config.endpoint.clone(),
            credential,
        )))
    }

    /// Copy the state blob to a timestamped sibling. Returns the backup key.
    async fn backup_blob(&self, store: &dyn BlobStore) -> LockResult<String> {
        let data = store
            .get_blob(&self.config.container_name, &self.config.key)
            .await?;
        let backup = backup_key(&self.config.key, Utc::now());
        store
            .put_blob(&self.config.container_name, &backup, data)
            .await?;
        Ok(backup)
    }
}

#[async_trait]
impl Lock for StorageLock {
    #[instrument(skip(self), fields(blob = %self.config.blob_path()))]
    async fn acquire(&self) -> LockResult<LockGrant> {
        info!("Attempting to acquire lease on {}", self.config.blob_path());

        let store = self.connect()?;
        let (container, key) = (&self.config.container_name, &self.config.key);

        if !store.blob_exists(container, key).await? {
            return Err(LockError::ResourceNotFound(format!(
                "lock blob {}",
                self.config.blob_path()
            )));
        }

        let proposed = LeaseToken::new(Uuid::new_v4().to_string());
        let lease = store.acquire_lease(container, key, &proposed).await?;
        info!("Lease acquired on {}", self.config.blob_path());

        if !self.config.backup {
            return Ok(LockGrant::with_lease(lease));
        }

        info!("Backing up {}", self.config.blob_path());
        match self.backup_blob(store.as_ref()).await {
            Ok(backup) => {
                info!("Backup written to {}", backup);
                Ok(LockGrant::with_lease(lease).with_backup(backup))
            }
            Err(e) => {
                warn!("Backup of {} failed, lease is still held: {}", self.config.blob_path(), e);
                Err(LockError::BackupFailed {
                    lease,
                    reason: e.to_string(),
                })
            }
        }
    }

    #[instrument(skip(self), fields(blob = %self.config.blob_path()))]
    async fn release(&self) -> LockResult<()> {
        info!("Attempting to release lease on {}", self.config.blob_path());

        let store = self.connect()?;
        store
            .break_lease(&self.config.container_name, &self.config.key)
            .await?;

        info!("Lease released on {}", self.config.blob_path());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("azure.StorageLock for state file {}", self.config.blob_path())
    }

    fn handoff_env(&self, grant: &LockGrant) -> Vec<(&'static str, String)> {
        grant
            .lease()
            .map(|lease| vec![(LEASE_ID_ENV, lease.to_string())])
            .unwrap_or_default()
    }
}

impl fmt::Debug for StorageLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageLock")
            .field("config", &self.config)
            .field("injected_store", &self.store.is_some())
            .finish()
    }
}

impl fmt::Display for StorageLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

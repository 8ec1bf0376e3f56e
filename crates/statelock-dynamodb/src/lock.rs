use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use statelock_core::{Lock, LockError, LockGrant, LockResult, OptionMap};
use tracing::{info, instrument, warn};

use crate::config::DynamoDbLockConfig;
use crate::table::{DynamoDbTable, LockRecord, LockTable};

/// Lock backed by a conditionally written item in a DynamoDB table.
///
/// Acquisition makes up to `max_lock_retries` conditional puts, waiting
/// `retry_interval` between attempts. Release deletes the item and succeeds
/// whether or not it existed.
pub struct DynamoDbLock {
    config: DynamoDbLockConfig,
    table: Option<Arc<dyn LockTable>>,
}

impl DynamoDbLock {
    /// Create a lock that builds its DynamoDB client from the default AWS
    /// credential chain on every operation.
    pub fn new(config: DynamoDbLockConfig) -> Self {
        Self {
            config,
            table: None,
        }
    }

    pub fn from_options(options: OptionMap<'_>) -> LockResult<Self> {
        Ok(Self::new(DynamoDbLockConfig::from_options(options)?))
    }

    pub fn with_table(config: DynamoDbLockConfig, table: Arc<dyn LockTable>) -> Self {
        Self {
            config,
            table: Some(table),
        }
    }

    pub fn config(&self) -> &DynamoDbLockConfig {
        &self.config
    }

    async fn connect(&self) -> LockResult<Arc<dyn LockTable>> {
        match &self.table {
            Some(table) => Ok(Arc::clone(table)),
            None => Ok(Arc::new(
                DynamoDbTable::connect(&self.config.aws_region).await?,
            )),
        }
    }

    async fn current_holder(&self, table: &dyn LockTable) -> Option<LockRecord> {
        match table
            .get_record(&self.config.table_name, &self.config.state_file_id)
            .await
        {
            Ok(holder) => holder,
            Err(e) => {
                warn!("Could not read current lock holder: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Lock for DynamoDbLock {
    #[instrument(skip(self), fields(state_file_id = %self.config.state_file_id))]
    async fn acquire(&self) -> LockResult<LockGrant> {
        let config = &self.config;
        info!(
            "Attempting to acquire lock for state file {} in DynamoDB table {}",
            config.state_file_id, config.table_name
        );

        let table = self.connect().await?;
        table.ensure_table(&config.table_name).await?;

        let record = LockRecord::for_current_process(&config.state_file_id);
        let mut holder = None;

        for attempt in 1..=config.max_lock_retries {
            if table.put_if_absent(&config.table_name, &record).await? {
                info!(attempt, "Lock acquired for state file {}", config.state_file_id);
                return Ok(LockGrant::held());
            }

            holder = self.current_holder(table.as_ref()).await;
            let held_by = holder
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "an unknown holder".to_string());

            if attempt < config.max_lock_retries {
                info!(
                    attempt,
                    max_attempts = config.max_lock_retries,
                    "State file {} is locked by {}, retrying in {:?}",
                    config.state_file_id,
                    held_by,
                    config.retry_interval
                );
                tokio::time::sleep(config.retry_interval).await;
            }
        }

        let reason = match holder {
            Some(holder) => format!(
                "state file {} is locked by {} (gave up after {} attempts)",
                config.state_file_id, holder, config.max_lock_retries
            ),
            None => format!(
                "state file {} is still locked after {} attempts",
                config.state_file_id, config.max_lock_retries
            ),
        };
        Err(LockError::LockContention(reason))
    }

    #[instrument(skip(self), fields(state_file_id = %self.config.state_file_id))]
    async fn release(&self) -> LockResult<()> {
        info!(
            "Attempting to release lock for state file {} in DynamoDB table {}",
            self.config.state_file_id, self.config.table_name
        );

        let table = self.connect().await?;
        table
            .delete_record(&self.config.table_name, &self.config.state_file_id)
            .await?;

        info!("Lock released for state file {}", self.config.state_file_id);
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "dynamodb.DynamoDbLock for state file {} in table {} ({})",
            self.config.state_file_id, self.config.table_name, self.config.aws_region
        )
    }
}

impl fmt::Debug for DynamoDbLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamoDbLock")
            .field("config", &self.config)
            .field("injected_table", &self.table.is_some())
            .finish()
    }
}

impl fmt::Display for DynamoDbLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let lock = DynamoDbLock::new(DynamoDbLockConfig::new("prod/terraform.tfstate"));
        assert_eq!(
            lock.describe(),
            "dynamodb.DynamoDbLock for state file prod/terraform.tfstate in table terragrunt_locks (us-east-1)"
        );
        assert!(lock.handoff_env(&LockGrant::held()).is_empty());
    }
}

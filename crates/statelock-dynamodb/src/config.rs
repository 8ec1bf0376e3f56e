use std::time::Duration;

use statelock_core::{LockError, LockResult, OptionMap};

pub const DEFAULT_AWS_REGION: &str = "us-east-1";
pub const DEFAULT_TABLE_NAME: &str = "terragrunt_locks";
pub const DEFAULT_MAX_LOCK_RETRIES: u32 = 360;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

pub const STATE_FILE_ID: &str = "state_file_id";
pub const AWS_REGION: &str = "aws_region";
pub const TABLE_NAME: &str = "table_name";
pub const MAX_LOCK_RETRIES: &str = "max_lock_retries";
pub const LOCK_RETRY_INTERVAL_SECS: &str = "lock_retry_interval_secs";

/// Validated configuration for a `DynamoDbLock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamoDbLockConfig {
    /// Logical lock id; the partition key of the lock item
    pub state_file_id: String,
    pub aws_region: String,
    pub table_name: String,
    /// Maximum number of conditional-put attempts per acquisition (at least 1)
    pub max_lock_retries: u32,
    /// Fixed wait between attempts
    pub retry_interval: Duration,
}

impl DynamoDbLockConfig {
    pub fn new(state_file_id: impl Into<String>) -> Self {
        Self {
            state_file_id: state_file_id.into(),
            aws_region: DEFAULT_AWS_REGION.to_string(),
            table_name: DEFAULT_TABLE_NAME.to_string(),
            max_lock_retries: DEFAULT_MAX_LOCK_RETRIES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Parse the `dynamodb` lock options.
    ///
    /// Required: `state_file_id`.
    /// Optional: `aws_region`, `table_name`, `max_lock_retries`,
    /// `lock_retry_interval_secs`; each falls back to its `DEFAULT_*` constant.
    pub fn from_options(options: OptionMap<'_>) -> LockResult<Self> {
        let state_file_id = options.required(STATE_FILE_ID)?;

        let max_lock_retries = validate_max_lock_retries(
            options.number_or(MAX_LOCK_RETRIES, DEFAULT_MAX_LOCK_RETRIES)?,
        )?;

        let interval_secs =
            options.number_or(LOCK_RETRY_INTERVAL_SECS, DEFAULT_RETRY_INTERVAL.as_secs())?;

        Ok(Self {
            state_file_id: state_file_id.to_string(),
            aws_region: options.string_or(AWS_REGION, DEFAULT_AWS_REGION)?,
            table_name: options.string_or(TABLE_NAME, DEFAULT_TABLE_NAME)?,
            max_lock_retries,
            retry_interval: Duration::from_secs(interval_secs),
        })
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    /// Fails with `ConfigInvalid` for zero, like the `max_lock_retries` option.
    pub fn with_max_lock_retries(mut self, max_lock_retries: u32) -> LockResult<Self> {
        self.max_lock_retries = validate_max_lock_retries(max_lock_retries)?;
        Ok(self)
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }
}

fn validate_max_lock_retries(max_lock_retries: u32) -> LockResult<u32> {
    if max_lock_retries == 0 {
        return Err(LockError::config(MAX_LOCK_RETRIES, "must be at least 1"));
    }
    Ok(max_lock_retries)
}

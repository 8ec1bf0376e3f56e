//! DynamoDB conditional-write lock backend.
//!
//! Holding the lock means owning the item keyed by the state file id in the
//! lock table. The item is written with `attribute_not_exists`, so DynamoDB
//! lets exactly one writer in; the others retry on a fixed interval until the
//! configured attempt ceiling.
//!
//! ## Table schema
//! ```text
//! Partition Key: StateFileId (S)
//! Attributes:
//!   - Username: String (who holds the lock)
//!   - Hostname: String (where the holder runs)
//!   - CreationDate: String (RFC3339, when the lock was taken)
//! ```

mod config;
mod lock;
mod table;

pub use config::{
    DynamoDbLockConfig, DEFAULT_AWS_REGION, DEFAULT_MAX_LOCK_RETRIES, DEFAULT_RETRY_INTERVAL,
    DEFAULT_TABLE_NAME,
};
pub use lock::DynamoDbLock;
pub use table::{DynamoDbTable, LockRecord, LockTable};

//! Azure Blob Storage lease backend.
//!
//! The protected state file is a blob; holding the lock means holding an
//! infinite lease on it. The blob must already exist, this backend never
//! creates it.
//!
//! - `StorageLock`: the `Lock` implementation
//! - `BlobStore`: the blob operations the lock needs, implemented over the
//!   REST API by `RestBlobStore`
//! - `SharedKeyCredential`: request signing with the `ARM_ACCESS_KEY` account key

mod auth;
mod client;
mod config;
mod lock;

pub use auth::{SharedKeyCredential, ACCESS_KEY_ENV};
pub use client::{BlobStore, RestBlobStore};
pub use config::StorageLockConfig;
pub use lock::{backup_key, StorageLock, LEASE_ID_ENV};

//! Core traits and types for statelock lock backends.
//!
//! This crate defines the abstractions shared between the cloud lock implementations:
//! - `Lock`: Acquire/release contract every backend satisfies
//! - `LockGrant` / `LeaseToken`: What a successful acquisition hands back to the caller
//! - `LockSpec`: Backend name plus flat option map, as produced by a config decoder
//! - `OptionMap`: Typed access to a backend's option map
//! - `LockError`: Error taxonomy shared by all backends

mod error;
mod lock;
pub mod options;
mod spec;

pub use error::{LockError, LockResult};
pub use lock::{LeaseToken, Lock, LockGrant};
pub use options::OptionMap;
pub use spec::LockSpec;

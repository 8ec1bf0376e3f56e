//! Typed access to a backend's flat option map.
//!
//! Every accessor reports failures as `LockError::ConfigInvalid` naming the
//! offending key. Nothing here touches the network.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{LockError, LockResult};

/// Read-only view over the `string -> string` options of one lock section.
#[derive(Debug, Clone, Copy)]
pub struct OptionMap<'a> {
    options: &'a HashMap<String, String>,
}

impl<'a> OptionMap<'a> {
    pub fn new(options: &'a HashMap<String, String>) -> Self {
        Self { options }
    }

    /// Value for `key`. Present but blank values are rejected.
    pub fn optional(&self, key: &str) -> LockResult<Option<&'a str>> {
        match self.options.get(key) {
            None => Ok(None),
            Some(value) if value.trim().is_empty() => {
                Err(LockError::config(key, "cannot be empty"))
            }
            Some(value) => Ok(Some(value.as_str())),
        }
    }

    pub fn required(&self, key: &str) -> LockResult<&'a str> {
        self.optional(key)?
            .ok_or_else(|| LockError::config(key, "must be set"))
    }

    pub fn string_or(&self, key: &str, default: &str) -> LockResult<String> {
        Ok(self.optional(key)?.unwrap_or(default).to_string())
    }

    /// Boolean option; accepts `true`/`false`/`1`/`0` in any case.
    pub fn bool_or(&self, key: &str, default: bool) -> LockResult<bool> {
        let Some(raw) = self.optional(key)? else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(LockError::config(
                key,
                format!("must be a boolean, got {:?}", raw),
            )),
        }
    }

    /// Numeric option parsed with `FromStr`.
    pub fn number_or<T>(&self, key: &str, default: T) -> LockResult<T>
    where
        T: FromStr,
    {
        match self.optional(key)? {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<T>().map_err(|_| {
                LockError::config(key, format!("must be a non-negative integer, got {:?}", raw))
            }),
        }
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::options::OptionMap;

/// A lock section as produced by the configuration decoder: the backend name
/// and its options, not yet validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSpec {
    pub backend: String,
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl LockSpec {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            config: HashMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn options(&self) -> OptionMap<'_> {
        OptionMap::new(&self.config)
    }
}

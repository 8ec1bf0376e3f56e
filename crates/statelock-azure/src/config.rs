use reqwest::Url;
use statelock_core::{LockError, LockResult, OptionMap};

pub const STORAGE_ACCOUNT_NAME: &str = "storage_account_name";
pub const CONTAINER_NAME: &str = "container_name";
pub const KEY: &str = "key";
pub const BACKUP: &str = "backup";
pub const ENDPOINT: &str = "endpoint";

/// Validated configuration for a `StorageLock`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLockConfig {
    /// Storage account holding the state container
    pub storage_account_name: String,
    /// Container holding the state blob
    pub container_name: String,
    /// Blob name of the state file
    pub key: String,
    /// Copy the state blob to `<key>.<timestamp>` after acquiring
    pub backup: bool,
    /// Blob service endpoint (defaults to the public Azure endpoint for the account)
    pub endpoint: Url,
}

impl StorageLockConfig {
    pub fn new(
        storage_account_name: impl Into<String>,
        container_name: impl Into<String>,
        key: impl Into<String>,
    ) -> LockResult<Self> {
        let storage_account_name = storage_account_name.into();
        validate_account_name(&storage_account_name)?;
        let endpoint = default_endpoint(&storage_account_name)?;
        Ok(Self {
            storage_account_name,
            container_name: container_name.into(),
            key: key.into(),
            backup: false,
            endpoint,
        })
    }

    /// Parse the `azure` lock options.
    ///
    /// Required: `storage_account_name`, `container_name`, `key`.
    /// Optional: `backup` (default `false`), `endpoint`.
    pub fn from_options(options: OptionMap<'_>) -> LockResult<Self> {
        let account = options.required(STORAGE_ACCOUNT_NAME)?;
        let container = options.required(CONTAINER_NAME)?;
        let key = options.required(KEY)?;

        let mut config = Self::new(account, container, key)?;
        config.backup = options.bool_or(BACKUP, false)?;

        if let Some(raw) = options.optional(ENDPOINT)? {
            config.endpoint = parse_endpoint(raw)?;
        }

        Ok(config)
    }

    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    /// `account/container/key`, used in logs and error messages.
    pub fn blob_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.storage_account_name, self.container_name, self.key
        )
    }
}

/// Account names are 3 to 24 lowercase letters and digits.
fn validate_account_name(name: &str) -> LockResult<()> {
    let valid_len = (3..=24).contains(&name.len());
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if valid_len && valid_chars {
        Ok(())
    } else {
        Err(LockError::config(
            STORAGE_ACCOUNT_NAME,
            format!(
                "must be 3-24 lowercase letters or digits, got {:?}",
                name
            ),
        ))
    }
}

fn default_endpoint(account: &str) -> LockResult<Url> {
    parse_endpoint(&format!("https://{}.blob.core.windows.net", account))
}

fn parse_endpoint(raw: &str) -> LockResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| LockError::config(ENDPOINT, format!("is not a valid URL: {}", e)))?;
    match url.scheme() {
        "http" | "https" if !url.cannot_be_a_base() => Ok(url),
        _ => Err(LockError::config(
            ENDPOINT,
            format!("must be an http(s) URL, got {:?}", raw),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse(pairs: &[(&str, &str)]) -> LockResult<StorageLockConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StorageLockConfig::from_options(OptionMap::new(&map))
    }

    fn missing_key(result: LockResult<StorageLockConfig>) -> String {
        match result {
            Err(LockError::ConfigInvalid { key, .. }) => key,
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_storage_account_name() {
        assert_eq!(missing_key(parse(&[])), STORAGE_ACCOUNT_NAME);
    }

    #[test]
    fn test_missing_container_name() {
        let result = parse(&[(STORAGE_ACCOUNT_NAME, "account")]);
        assert_eq!(missing_key(result), CONTAINER_NAME);
    }

    #[test]
    fn test_missing_key() {
        let result = parse(&[
            (STORAGE_ACCOUNT_NAME, "account"),
            (CONTAINER_NAME, "container"),
        ]);
        assert_eq!(missing_key(result), KEY);
    }

    #[test]
    fn test_valid_minimal() {
        let config = parse(&[
            (STORAGE_ACCOUNT_NAME, "account"),
            (CONTAINER_NAME, "container"),
            (KEY, "key"),
        ])
        .unwrap();

        assert_eq!(config.storage_account_name, "account");
        assert_eq!(config.container_name, "container");
        assert_eq!(config.key, "key");
        assert!(!config.backup);
        assert_eq!(
            config.endpoint.as_str(),
            "https://account.blob.core.windows.net/"
        );
        assert_eq!(config.blob_path(), "account/container/key");
    }

    #[test]
    fn test_valid_full() {
        let config = parse(&[
            (STORAGE_ACCOUNT_NAME, "devstoreaccount1"),
            (CONTAINER_NAME, "tfstate"),
            (KEY, "prod/terraform.tfstate"),
            (BACKUP, "true"),
            (ENDPOINT, "http://127.0.0.1:10000/devstoreaccount1"),
        ])
        .unwrap();

        assert!(config.backup);
        assert_eq!(
            config.endpoint.as_str(),
            "http://127.0.0.1:10000/devstoreaccount1"
        );
    }

    #[test]
    fn test_invalid_backup_flag() {
        let result = parse(&[
            (STORAGE_ACCOUNT_NAME, "account"),
            (CONTAINER_NAME, "container"),
            (KEY, "key"),
            (BACKUP, "sometimes"),
        ]);
        assert_eq!(missing_key(result), BACKUP);
    }

    #[test]
    fn test_invalid_account_name() {
        let result = parse(&[
            (STORAGE_ACCOUNT_NAME, "Not_Valid"),
            (CONTAINER_NAME, "container"),
            (KEY, "key"),
        ]);
        assert_eq!(missing_key(result), STORAGE_ACCOUNT_NAME);
    }

    #[test]
    fn test_invalid_endpoint() {
        let result = parse(&[
            (STORAGE_ACCOUNT_NAME, "account"),
            (CONTAINER_NAME, "container"),
            (KEY, "key"),
            (ENDPOINT, "ftp://example.com"),
        ]);
        assert_eq!(missing_key(result), ENDPOINT);
    }
}

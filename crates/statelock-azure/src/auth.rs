use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;
use sha2::Sha256;
use statelock_core::{LockError, LockResult};

/// Environment variable holding the storage account access key.
pub const ACCESS_KEY_ENV: &str = "ARM_ACCESS_KEY";

type HmacSha256 = Hmac<Sha256>;

/// Headers that appear, in this order, as bare values in the string to sign.
const SIGNED_STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

/// Storage account Shared Key used to sign Blob service requests.
#[derive(Clone)]
pub struct SharedKeyCredential {
    account: String,
    key: Vec<u8>,
}

impl SharedKeyCredential {
    /// Create a credential from a base64-encoded account key.
    pub fn new(account: impl Into<String>, access_key: &str) -> LockResult<Self> {
        let key = STANDARD.decode(access_key.trim()).map_err(|e| {
            LockError::CredentialsMissing(format!(
                "{} is not a valid base64 account key: {}",
                ACCESS_KEY_ENV, e
            ))
        })?;
        Ok(Self {
            account: account.into(),
            key,
        })
    }

    /// Read the account key from `ARM_ACCESS_KEY`.
    pub fn from_env(account: impl Into<String>) -> LockResult<Self> {
        Self::from_lookup(account, |name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(
        account: impl Into<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> LockResult<Self> {
        match lookup(ACCESS_KEY_ENV) {
            Some(access_key) if !access_key.trim().is_empty() => Self::new(account, &access_key),
            _ => Err(LockError::CredentialsMissing(format!(
                "{} environment variable must be set",
                ACCESS_KEY_ENV
            ))),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Add the `Authorization: SharedKey` header to a fully built request.
    ///
    /// Every `x-ms-*` header and the final URL must already be in place.
    pub fn sign(&self, request: &mut Request) -> LockResult<()> {
        let string_to_sign = self.string_to_sign(request);

        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| LockError::CredentialsMissing(format!("unusable account key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        let value = HeaderValue::from_str(&format!("SharedKey {}:{}", self.account, signature))
            .map_err(|e| {
                LockError::CredentialsMissing(format!("invalid authorization header: {}", e))
            })?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }

    pub(crate) fn string_to_sign(&self, request: &Request) -> String {
        let headers = request.headers();
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .trim()
                .to_string()
        };

        let mut parts: Vec<String> = vec![request.method().as_str().to_string()];
        for name in SIGNED_STANDARD_HEADERS {
            let value = header(name);
            // A zero length is signed as an empty string.
            if name == "content-length" && value == "0" {
                parts.push(String::new());
            } else {
                parts.push(value);
            }
        }

        let mut ms_headers: Vec<(String, String)> = headers
            .iter()
            .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or("").trim().to_string(),
                )
            })
            .collect();
        ms_headers.sort();

        let mut canonical = parts.join("\n");
        canonical.push('\n');
        for (name, value) in ms_headers {
            canonical.push_str(&format!("{}:{}\n", name, value));
        }

        canonical.push_str(&format!("/{}{}", self.account, request.url().path()));
        let mut params: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
            .collect();
        params.sort();
        for (name, value) in params {
            canonical.push_str(&format!("\n{}:{}", name, value));
        }

        canonical
    }
}

impl fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

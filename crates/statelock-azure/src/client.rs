use async_trait::async_trait;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client as HttpClient, Method, RequestBuilder, Response, StatusCode, Url};
use statelock_core::{LeaseToken, LockError, LockResult};
use tracing::{debug, instrument};

use crate::auth::SharedKeyCredential;

/// Blob service REST API version sent with every request.
const API_VERSION: &str = "2021-08-06";

/// Blob operations needed by the lease lock.
///
/// `RestBlobStore` talks to the Blob service; tests substitute an in-memory
/// store to count calls and simulate contention.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether the blob exists. A missing container reads as a missing blob.
    async fn blob_exists(&self, container: &str, key: &str) -> LockResult<bool>;

    /// Acquire an infinite lease using `proposed` as the lease id.
    ///
    /// # Returns
    /// - `Ok(LeaseToken)`: the granted lease id
    /// - `Err(LockError::LockContention)`: the blob is already leased
    async fn acquire_lease(
        &self,
        container: &str,
        key: &str,
        proposed: &LeaseToken,
    ) -> LockResult<LeaseToken>;

    /// Break the current lease immediately (zero break period).
    async fn break_lease(&self, container: &str, key: &str) -> LockResult<()>;

    async fn get_blob(&self, container: &str, key: &str) -> LockResult<Vec<u8>>;

    /// Write `data` as a block blob, replacing any existing blob.
    async fn put_blob(&self, container: &str, key: &str, data: Vec<u8>) -> LockResult<()>;
}

/// Blob service client signed with a Shared Key credential.
pub struct RestBlobStore {
    http_client: HttpClient,
    endpoint: Url,
    credential: SharedKeyCredential,
}

impl RestBlobStore {
    pub fn new(endpoint: Url, credential: SharedKeyCredential) -> Self {
        Self {
            http_client: HttpClient::new(),
            endpoint,
            credential,
        }
    }

    /// `{endpoint}/{container}/{key}`, keeping `/` inside the key as path separators.
    fn blob_url(&self, container: &str, key: &str) -> LockResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                LockError::config("endpoint", format!("{} cannot be a base URL", self.endpoint))
            })?
            .pop_if_empty()
            .push(container)
            .extend(key.split('/'));
        Ok(url)
    }

    fn lease_url(&self, container: &str, key: &str) -> LockResult<Url> {
        let mut url = self.blob_url(container, key)?;
        url.query_pairs_mut().append_pair("comp", "lease");
        Ok(url)
    }

    fn resource(&self, container: &str, key: &str) -> String {
        format!("{}/{}/{}", self.credential.account(), container, key)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .header("x-ms-version", API_VERSION)
            .header(
                "x-ms-date",
                chrono::Utc::now()
                    .format("%a, %d %b %Y %H:%M:%S GMT")
                    .to_string(),
            )
    }

    /// Build, sign and send a request.
    async fn send(
        &self,
        operation: &str,
        resource: &str,
        builder: RequestBuilder,
    ) -> LockResult<Response> {
        let mut request = builder
            .build()
            .map_err(|e| LockError::transport(operation, resource, e))?;
        self.credential.sign(&mut request)?;

        self.http_client
            .execute(request)
            .await
            .map_err(|e| LockError::transport(operation, resource, e))
    }

    async fn unexpected_status(operation: &str, resource: &str, response: Response) -> LockError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        LockError::transport(
            operation,
            resource,
            format!("unexpected status {}: {}", status, text),
        )
    }
}

#[async_trait]
impl BlobStore for RestBlobStore {
    #[instrument(skip(self), level = "debug")]
    async fn blob_exists(&self, container: &str, key: &str) -> LockResult<bool> {
        let resource = self.resource(container, key);
        let url = self.blob_url(container, key)?;
        let response = self
            .send("get blob properties", &resource, self.request(Method::HEAD, url))
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => {
                debug!("Blob {} not found", resource);
                Ok(false)
            }
            _ => Err(Self::unexpected_status("get blob properties", &resource, response).await),
        }
    }

    #[instrument(skip(self, proposed), level = "debug", fields(proposed = %proposed))]
    async fn acquire_lease(
        &self,
        container: &str,
        key: &str,
        proposed: &LeaseToken,
    ) -> LockResult<LeaseToken> {
        let resource = self.resource(container, key);
        let url = self.lease_url(container, key)?;
        let builder = self
            .request(Method::PUT, url)
            .header(CONTENT_LENGTH, "0")
            .header("x-ms-lease-action", "acquire")
            .header("x-ms-lease-duration", "-1")
            .header("x-ms-proposed-lease-id", proposed.as_str());
        let response = self.send("acquire lease", &resource, builder).await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let granted = response
                    .headers()
                    .get("x-ms-lease-id")
                    .and_then(|v| v.to_str().ok())
                    .map(LeaseToken::new)
                    .unwrap_or_else(|| proposed.clone());
                debug!("Lease {} granted on {}", granted, resource);
                Ok(granted)
            }
            StatusCode::CONFLICT => Err(LockError::LockContention(format!(
                "{} is already leased",
                resource
            ))),
            StatusCode::NOT_FOUND => Err(LockError::ResourceNotFound(resource)),
            _ => Err(Self::unexpected_status("acquire lease", &resource, response).await),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn break_lease(&self, container: &str, key: &str) -> LockResult<()> {
        let resource = self.resource(container, key);
        let url = self.lease_url(container, key)?;
        let builder = self
            .request(Method::PUT, url)
            .header(CONTENT_LENGTH, "0")
            .header("x-ms-lease-action", "break")
            .header("x-ms-lease-break-period", "0");
        let response = self.send("break lease", &resource, builder).await?;

        match response.status() {
            StatusCode::ACCEPTED | StatusCode::OK => Ok(()),
            StatusCode::CONFLICT => Err(LockError::LockNotHeld(resource)),
            StatusCode::NOT_FOUND => Err(LockError::ResourceNotFound(resource)),
            _ => Err(Self::unexpected_status("break lease", &resource, response).await),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_blob(&self, container: &str, key: &str) -> LockResult<Vec<u8>> {
        let resource = self.resource(container, key);
        let url = self.blob_url(container, key)?;
        let response = self
            .send("get blob", &resource, self.request(Method::GET, url))
            .await?;

        match response.status() {
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| LockError::transport("read blob body", &resource, e))?;
                debug!("GET {} ({} bytes)", resource, bytes.len());
                Ok(bytes.to_vec())
            }
            StatusCode::NOT_FOUND => Err(LockError::ResourceNotFound(resource)),
            _ => Err(Self::unexpected_status("get blob", &resource, response).await),
        }
    }

    #[instrument(skip(self, data), level = "debug", fields(data_len = data.len()))]
    async fn put_blob(&self, container: &str, key: &str, data: Vec<u8>) -> LockResult<()> {
        let resource = self.resource(container, key);
        let url = self.blob_url(container, key)?;
        let len = data.len();
        let builder = self
            .request(Method::PUT, url)
            .header(CONTENT_LENGTH, len.to_string())
            .header("x-ms-blob-type", "BlockBlob")
            .body(data);
        let response = self.send("put blob", &resource, builder).await?;

        if response.status().is_success() {
            debug!("PUT {} ({} bytes)", resource, len);
            Ok(())
        } else {
            Err(Self::unexpected_status("put blob", &resource, response).await)
        }
    }
}

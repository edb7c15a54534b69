//! HTTP client abstraction for testability

use super::types::{BoxFuture, ProviderError};

/// Trait for async HTTP client operations.
///
/// This abstraction allows for dependency injection and easier testing
/// by enabling mock HTTP clients in tests. The returned future must not
/// borrow the client so it can be spawned onto the runtime.
pub trait AsyncHttpClient: Send + Sync {
    /// Performs an HTTP GET request.
    ///
    /// # Arguments
    ///
    /// * `url` - The URL to request
    ///
    /// # Returns
    ///
    /// The response body as bytes or an error.
    fn get(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, ProviderError>>;
}

/// Real HTTP client implementation using reqwest.
#[derive(Clone)]
pub struct AsyncReqwestClient {
    client: reqwest::Client,
}

impl AsyncReqwestClient {
    /// Creates a new client with a 30 second timeout.
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_timeout(30)
    }

    /// Creates a new client with custom timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                ProviderError::HttpError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }
}

impl AsyncHttpClient for AsyncReqwestClient {
    fn get(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, ProviderError>> {
        let client = self.client.clone();
        let url = url.to_string();
        Box::pin(async move {
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|e| ProviderError::HttpError(format!("Request failed: {}", e)))?;

            // Check HTTP status
            if !response.status().is_success() {
                return Err(ProviderError::HttpError(format!(
                    "HTTP {} from {}",
                    response.status(),
                    url
                )));
            }

            let body: bytes::Bytes = response
                .bytes()
                .await
                .map_err(|e| ProviderError::HttpError(format!("Failed to read response: {}", e)))?;
            Ok(body.to_vec())
        })
    }
}

//! Livecast HTTP Client
//!
//! Typed access to the controller's REST API. Request and response bodies
//! are the `livecast_core` DTOs; any non-2xx answer becomes a
//! [`ClientError::ApiError`] carrying the controller's `{"error": ...}`
//! message.
//!
//! ```no_run
//! # async fn run() -> livecast_client::Result<()> {
//! let controller = livecast_client::ControllerClient::new("http://127.0.0.1:8090");
//! let summary = controller.status().await?;
//! println!("{} live of {}", summary.counts.live, summary.counts.total);
//! # Ok(())
//! # }
//! ```

pub mod error;
mod jobs;
mod system;

pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// Handle on one controller
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ControllerClient {
    /// Scheme, host and port, without a trailing slash
    base_url: String,
    client: Client,
}

impl ControllerClient {
    /// Points a client with default reqwest settings at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Same as [`ControllerClient::new`] but reuses a preconfigured
    /// reqwest client, e.g. one with a request timeout
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an API path such as `/api/jobs`
    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decodes a JSON body, or turns a failure status into an error
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Unexpected response body: {}", e)))
    }

    /// For endpoints answering `204 No Content`
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        Self::check_status(response).await.map(|_| ())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
        Err(ClientError::api_error(status.as_u16(), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ControllerClient::new("http://localhost:8090");
        assert_eq!(client.base_url(), "http://localhost:8090");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = ControllerClient::new("http://localhost:8090//");
        assert_eq!(client.base_url(), "http://localhost:8090");
        assert_eq!(
            client.endpoint("/api/jobs"),
            "http://localhost:8090/api/jobs"
        );
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap();
        let client = ControllerClient::with_client("http://10.0.0.2:8090/", http_client);
        assert_eq!(client.endpoint("/health"), "http://10.0.0.2:8090/health");
    }
}

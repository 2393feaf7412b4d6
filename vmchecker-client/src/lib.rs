//! Vmchecker Callback Client
//!
//! A simple, type-safe HTTP client for reporting submission progress back to
//! the upstream submission service.
//!
//! The queue manager uses this client to announce `PROCESSING` when a
//! submission starts and `DONE` when its results are ready, attaching the
//! `.vmr` artifacts the executor produced.
//!
//! # Example
//!
//! ```no_run
//! use vmchecker_client::CallbackClient;
//! use vmchecker_core::domain::submission::SubmissionStatus;
//! use vmchecker_core::dto::report::StatusUpdate;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = CallbackClient::new("http://localhost:8080");
//!
//!     client.send_status(&StatusUpdate {
//!         bundle: "student42.tar.gz".to_string(),
//!         status: SubmissionStatus::Processing,
//!         reported_at: chrono::Utc::now(),
//!         artifacts: Vec::new(),
//!     }).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
mod submissions;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;

/// HTTP client for the upstream submission service
///
/// The upstream service exposes one endpoint per bundle for status updates;
/// the client is shared by every worker and is cheap to clone.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    /// Base URL of the upstream service (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl CallbackClient {
    /// Create a new callback client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the upstream service
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Create a new callback client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the upstream service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Handle an API response that returns no content
    ///
    /// This method checks the status code and returns an error if the request
    /// failed.
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = CallbackClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = CallbackClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = CallbackClient::with_client("http://localhost:8080", http_client);
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}

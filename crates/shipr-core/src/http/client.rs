//! HTTP client for artifact retrieval.
//!
//! A wrapper around `reqwest` with the features the installer needs:
//! - Automatic retry with exponential backoff on server errors
//! - Chunked, cancellable downloads with progress reporting
//! - Custom User-Agent, connection pooling, and timeout handling
//!
//! # Examples
//!
//! ```no_run
//! use shipr_core::http::HttpClient;
//! use shipr_core::fetch::CancelToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new()?;
//! let cancel = CancelToken::new();
//!
//! client
//!     .download(
//!         "https://storage.googleapis.com/nimbus-install/latest-release",
//!         "/tmp/latest-release".as_ref(),
//!         4096,
//!         &cancel,
//!         |transferred, total| {
//!             println!("{} of {:?} bytes", transferred, total);
//!         },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use reqwest::{Client, Response, StatusCode};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::fetch::CancelToken;

const DEFAULT_USER_AGENT: &str = concat!("shipr/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Max retries exceeded for {url}")]
    MaxRetries { url: String },
}

pub struct HttpClient {
    client: Client,
    user_agent: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent);

        // Add proxy if configured
        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build()?;

        Ok(Self {
            client,
            user_agent: config.user_agent,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        })
    }

    /// Perform GET request with automatic retries
    pub async fn get(&self, url: &str) -> Result<Response, HttpError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        // Retry on server errors and rate limits
                        last_error = Some(HttpError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    } else {
                        // Don't retry on client errors (4xx except 429)
                        return Err(HttpError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                }
                Err(e) => {
                    last_error = Some(HttpError::Request(e));
                }
            }

            // Don't sleep after the last attempt
            if attempt < self.max_retries {
                // Exponential backoff: 1s, 2s, 4s, 8s, etc.
                let delay = self.retry_delay * 2_u32.pow(attempt);
                tokio::time::sleep(delay).await;
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Err(HttpError::MaxRetries {
                url: url.to_string(),
            }),
        }
    }

    /// GET and return the body as text
    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let response = self.get(url).await?;
        Ok(response.text().await?)
    }

    /// Download a file to `dest`, reporting progress per written chunk.
    ///
    /// The total size comes from the Content-Length header and stays `None`
    /// when the server does not send one. Cancellation is cooperative: the
    /// token is checked after each chunk write and the transfer stops early
    /// without an error, leaving a partial file behind.
    ///
    /// Returns the number of bytes written.
    pub async fn download<F>(
        &self,
        url: &str,
        dest: &Path,
        chunk_size: usize,
        cancel: &CancelToken,
        mut progress: F,
    ) -> Result<u64, HttpError>
    where
        F: FnMut(u64, Option<u64>),
    {
        log::info!("Requesting {}", url);
        let response = self.get(url).await?;

        let total_size = response.content_length();

        // Create parent directories if they don't exist
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = File::create(dest).await?;
        let mut transferred: u64 = 0;

        let mut stream = response.bytes_stream();

        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for piece in chunk.chunks(chunk_size.max(1)) {
                file.write_all(piece).await?;
                transferred += piece.len() as u64;
                progress(transferred, total_size);

                if cancel.is_cancelled() {
                    file.flush().await?;
                    return Ok(transferred);
                }
            }
        }

        file.flush().await?;
        log::info!("Downloaded {}", dest.display());

        Ok(transferred)
    }

    /// Get the configured user agent
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Get the maximum number of retries
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new().expect("Failed to create default HTTP client")
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub proxy: Option<String>,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = HttpClientConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_max_retries(5)
            .with_user_agent("Test/1.0".to_string());

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.user_agent, "Test/1.0");
    }

    #[test]
    fn test_default_config() {
        let config = HttpClientConfig::default();

        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.retry_delay, DEFAULT_RETRY_DELAY);
        assert!(config.proxy.is_none());
    }

    #[test]
    fn test_config_with_proxy() {
        let config = HttpClientConfig::new().with_proxy("http://proxy.example.com:8080".to_string());

        assert_eq!(config.proxy, Some("http://proxy.example.com:8080".to_string()));
    }

    #[test]
    fn test_http_error_display() {
        let err = HttpError::HttpStatus {
            status: 404,
            url: "https://example.com/not-found".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 404: https://example.com/not-found");

        let err = HttpError::MaxRetries {
            url: "https://example.com/timeout".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Max retries exceeded for https://example.com/timeout"
        );
    }

    #[test]
    fn test_exponential_backoff_calculation() {
        // Verify the exponential backoff formula: delay * 2^attempt
        let base_delay = Duration::from_secs(1);

        assert_eq!(base_delay * 2_u32.pow(0), Duration::from_secs(1));
        assert_eq!(base_delay * 2_u32.pow(1), Duration::from_secs(2));
        assert_eq!(base_delay * 2_u32.pow(2), Duration::from_secs(4));
        assert_eq!(base_delay * 2_u32.pow(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = HttpClient::new();
        assert!(client.is_ok());

        let client = client.unwrap();
        assert_eq!(client.user_agent(), DEFAULT_USER_AGENT);
        assert_eq!(client.max_retries(), DEFAULT_MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_client_with_config() {
        let config = HttpClientConfig::new()
            .with_timeout(Duration::from_secs(60))
            .with_max_retries(5);

        let client = HttpClient::with_config(config);
        assert!(client.is_ok());
        assert_eq!(client.unwrap().max_retries(), 5);
    }
}

use std::time::Duration;
use tokio::time::timeout;

use crate::config::Config;

/// HTTP client for fetching index, detail and sub-resource pages
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout_duration: Duration,
    user_agent: String,
    max_content_size: usize,
    max_retries: u32,
}

impl HttpClient {
    /// Create a client with the default content limit and retry budget
    pub fn new(user_agent: String, timeout_secs: u64) -> Result<Self, FetchError> {
        Self::with_limits(user_agent, timeout_secs, Config::MAX_CONTENT_SIZE, Config::MAX_RETRIES)
    }

    pub fn with_limits(
        user_agent: String,
        timeout_secs: u64,
        max_content_size: usize,
        max_retries: u32,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(Config::CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(Config::POOL_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(Config::POOL_IDLE_TIMEOUT_SECS))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| FetchError::ConnectionFailed(format!("client setup: {}", e)))?;

        Ok(Self {
            client,
            timeout_duration: Duration::from_secs(timeout_secs),
            user_agent,
            max_content_size,
            max_retries,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Fetch a URL and return the body of a 200 response.
    /// Transient errors are retried with linear backoff; once retries run out the
    /// last error is returned as a terminal failure.
    pub async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff_ms = Config::RETRY_BACKOFF_MS * attempt as u64;
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }

            match self.fetch_once(url).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    tracing::debug!(url, attempt, error = %e, "retrying fetch");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::ConnectionFailed("Max retries exceeded".to_string())))
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchResult, FetchError> {
        let response = timeout(
            self.timeout_duration,
            self.client
                .get(url)
                .header(
                    "Accept",
                    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
                )
                .header("Accept-Language", "en-US,en;q=0.5")
                .send(),
        )
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(Self::classify_error)?;

        let status_code = response.status().as_u16();
        if status_code != 200 {
            return Err(FetchError::HttpStatus(status_code));
        }

        if let Some(length) = response.content_length()
            && length as usize > self.max_content_size
        {
            return Err(FetchError::ContentTooLarge(length as usize, self.max_content_size));
        }

        let content = timeout(self.timeout_duration, response.text())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::Body(e.to_string()))?;

        if content.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(content.len(), self.max_content_size));
        }

        Ok(FetchResult {
            content,
            status_code,
        })
    }

    fn classify_error(error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            return FetchError::Timeout;
        }
        if let Some(status) = error.status() {
            return FetchError::HttpStatus(status.as_u16());
        }
        FetchError::ConnectionFailed(error.to_string())
    }
}

/// Body of a successful fetch
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub content: String,
    pub status_code: u16,
}

/// Why a page could not be turned into an extraction
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("Request timeout")]
    Timeout,

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Content too large: {0} bytes (max: {1} bytes)")]
    ContentTooLarge(usize, usize),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether the transport should try again
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::HttpStatus(code) => *code == 429 || (500..600).contains(code),
            FetchError::ConnectionFailed(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("broken pipe")
                    || msg_lower.contains("connection reset")
                    || msg_lower.contains("temporary")
            }
            FetchError::Body(_) => false,
            FetchError::ContentTooLarge(_, _) => false,
            FetchError::Extraction(_) => false,
            FetchError::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_invalid_url() {
        let client = HttpClient::with_limits("TestBot/1.0".to_string(), 5, 1024, 0).unwrap();
        let result = client.fetch("not-a-url").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_http_client_creation() {
        let client = HttpClient::new("TestBot/1.0".to_string(), 30).unwrap();
        assert_eq!(client.user_agent(), "TestBot/1.0");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::HttpStatus(503).is_retryable());
        assert!(FetchError::HttpStatus(429).is_retryable());
        assert!(!FetchError::HttpStatus(404).is_retryable());
        assert!(FetchError::ConnectionFailed("connection reset by peer".to_string()).is_retryable());
        assert!(!FetchError::ConnectionFailed("dns error".to_string()).is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
    }
}

use async_trait::async_trait;

use crate::extract::{ExtractError, ExtractionProfiles, Extractor};
use crate::network::{FetchError, HttpClient};
use crate::transport::{Extraction, FetchPurpose, Transport};

/// Live transport: fetch over HTTP, then run the purpose's extraction profile
pub struct HttpTransport {
    http: HttpClient,
    extractor: Extractor,
}

impl HttpTransport {
    pub fn new(http: HttpClient, profiles: &ExtractionProfiles) -> Result<Self, ExtractError> {
        Ok(Self {
            http,
            extractor: Extractor::new(profiles)?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str, purpose: FetchPurpose) -> Result<Extraction, FetchError> {
        let page = self.http.fetch(url).await?;
        let extraction = self.extractor.extract(purpose, &page.content, url);
        if extraction.values.is_empty() && extraction.groups.values().all(Vec::is_empty) {
            tracing::debug!(url, %purpose, "profile matched nothing on page");
        }
        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_failure_surfaces_as_fetch_error() {
        let http = HttpClient::with_limits("test-agent".to_string(), 1, 1024, 0).unwrap();
        let transport = HttpTransport::new(http, &ExtractionProfiles::default()).unwrap();

        // port 9 on loopback is closed in test environments
        let result = transport.fetch("http://127.0.0.1:9/", FetchPurpose::Index).await;
        assert!(matches!(
            result,
            Err(FetchError::ConnectionFailed(_)) | Err(FetchError::Timeout)
        ));
    }

    #[test]
    fn test_bad_profile_rejected_at_construction() {
        let mut profiles = ExtractionProfiles::default();
        profiles.index.groups[0].selector = ":::".to_string();
        let http = HttpClient::new("test-agent".to_string(), 1).unwrap();
        assert!(HttpTransport::new(http, &profiles).is_err());
    }
}

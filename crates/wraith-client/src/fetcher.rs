use std::time::Duration;

use wraith_core::error::ScrapeError;
use wraith_core::traits::Fetcher;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP fetcher backed by reqwest.
///
/// Downloads page bodies with a wraith User-Agent and a configurable
/// timeout. Non-2xx statuses are errors; redirects follow reqwest's
/// defaults.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, ScrapeError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("wraith/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::Http(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        tracing::info!(%url, "fetching");
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                ScrapeError::Network(format!("connection failed: {e}"))
            } else {
                ScrapeError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Http(format!(
                "HTTP {} for {url}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ScrapeError::Http(format!("failed to read response body: {e}")))?;
        tracing::debug!(bytes = body.len(), "fetched");
        Ok(body)
    }
}

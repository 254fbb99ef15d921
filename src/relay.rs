use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};

/// Public relays used when configuration doesn't override them.
pub const DEFAULT_RELAYS: [&str; 3] = [
    "https://api.allorigins.win/raw?url=",
    "https://corsproxy.io/?",
    "https://api.codetabs.com/v1/proxy?quest=",
];

pub const FEED_TIMEOUT: Duration = Duration::from_millis(8_000);
pub const PAGE_TIMEOUT: Duration = Duration::from_millis(12_000);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("all {attempts} relay endpoints failed for {url}")]
    RelayExhausted { url: String, attempts: usize },
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Retrieves remote bodies through an ordered chain of forwarding endpoints.
/// One pass, no backoff: the first endpoint that answers wins.
pub struct RelayFetcher {
    client: Client,
    endpoints: Vec<String>,
}

impl RelayFetcher {
    pub fn new(endpoints: Vec<String>, user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn relay_url(endpoint: &str, target: &str) -> String {
        format!("{}{}", endpoint, urlencoding::encode(target))
    }

    pub async fn fetch(&self, target: &str, timeout: Duration) -> Result<String, FetchError> {
        for endpoint in &self.endpoints {
            let url = Self::relay_url(endpoint, target);
            match self.try_endpoint(&url, timeout).await {
                Ok(body) => return Ok(body),
                Err(e) => debug!("Relay {} failed for {}: {}", endpoint, target, e),
            }
        }

        warn!("All relays exhausted for {}", target);
        Err(FetchError::RelayExhausted {
            url: target.to_string(),
            attempts: self.endpoints.len(),
        })
    }

    async fn try_endpoint(&self, url: &str, timeout: Duration) -> reqwest::Result<String> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        response.text().await
    }
}

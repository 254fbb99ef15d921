use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::bail;
use serde::Deserialize;

use crate::model::Topic;
use crate::relay::{DEFAULT_RELAYS, FEED_TIMEOUT, PAGE_TIMEOUT};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Refresh interval in minutes; 0 disables background refresh
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub relay: RelayConfig,
    pub topics: Vec<Topic>,
}

fn default_refresh_interval() -> u64 {
    15
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_feed_timeout_ms")]
    pub feed_timeout_ms: u64,
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            feed_timeout_ms: default_feed_timeout_ms(),
            page_timeout_ms: default_page_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl RelayConfig {
    pub fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }
}

fn default_endpoints() -> Vec<String> {
    DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect()
}

fn default_feed_timeout_ms() -> u64 {
    FEED_TIMEOUT.as_millis() as u64
}

fn default_page_timeout_ms() -> u64 {
    PAGE_TIMEOUT.as_millis() as u64
}

fn default_user_agent() -> String {
    "DevFeed/1.0 (Feed Aggregator)".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut keys = HashSet::new();
        for topic in &self.topics {
            if topic.key.trim().is_empty() {
                bail!("topic '{}' has an empty key", topic.name);
            }
            if !keys.insert(topic.key.as_str()) {
                bail!("duplicate topic key '{}'", topic.key);
            }
            if topic.sources.is_empty() {
                bail!("topic '{}' has no sources", topic.key);
            }
        }
        Ok(())
    }
}

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use thiserror::Error;
use tracing::{info, warn};

use crate::dates::parse_timestamp;
use crate::model::{Article, Source, Topic};
use crate::normalizer::NormalizerRegistry;
use crate::relay::{RelayFetcher, FEED_TIMEOUT};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
    #[error("topic '{topic}' has no source named '{source_name}'")]
    UnknownSource { topic: String, source_name: String },
}

/// Fans a topic out over its active sources and merges the results.
/// Holds no per-call state; callers own caching.
pub struct Aggregator {
    relays: Arc<RelayFetcher>,
    normalizers: NormalizerRegistry,
    feed_timeout: Duration,
}

impl Aggregator {
    pub fn new(relays: Arc<RelayFetcher>, normalizers: NormalizerRegistry) -> Self {
        Self {
            relays,
            normalizers,
            feed_timeout: FEED_TIMEOUT,
        }
    }

    pub fn with_feed_timeout(mut self, timeout: Duration) -> Self {
        self.feed_timeout = timeout;
        self
    }

    pub fn relays(&self) -> &RelayFetcher {
        &self.relays
    }

    /// Merged, newest-first, title-deduplicated articles from every source the
    /// predicate accepts. Source failures only shrink the result.
    pub async fn aggregate<F>(&self, topic: &Topic, is_enabled: F) -> Vec<Article>
    where
        F: Fn(&Source) -> bool,
    {
        let active: Vec<&Source> = topic.sources.iter().filter(|s| is_enabled(*s)).collect();

        let per_source = join_all(active.iter().map(|source| self.fetch_source(source))).await;
        let fetched: usize = per_source.iter().filter(|list| !list.is_empty()).count();

        let mut articles: Vec<Article> = per_source.into_iter().flatten().collect();
        sort_newest_first(&mut articles);
        let articles = dedup_by_title(articles);

        info!(
            "Aggregated {} articles for '{}' from {}/{} sources",
            articles.len(),
            topic.key,
            fetched,
            active.len()
        );
        articles
    }

    async fn fetch_source(&self, source: &Source) -> Vec<Article> {
        let raw = match self.relays.fetch(&source.url, self.feed_timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Source '{}' unavailable: {}", source.name, e);
                return Vec::new();
            }
        };

        match self.normalizers.normalize(&raw, source) {
            Ok(articles) => articles,
            Err(e) => {
                warn!("Source '{}' skipped: {}", source.name, e);
                Vec::new()
            }
        }
    }
}

/// Stable newest-first ordering. Articles whose date doesn't parse keep their
/// slot; only the dated articles are reordered among themselves, so equal or
/// unparseable dates never swap relative order.
pub fn sort_newest_first(articles: &mut Vec<Article>) {
    let stamps: Vec<Option<i64>> = articles
        .iter()
        .map(|a| parse_timestamp(&a.date).map(|d| d.timestamp_millis()))
        .collect();

    let slots: Vec<usize> = (0..articles.len()).filter(|&i| stamps[i].is_some()).collect();
    let mut ordered = slots.clone();
    ordered.sort_by(|&a, &b| stamps[b].cmp(&stamps[a]));

    let mut taken: Vec<Option<Article>> = articles.drain(..).map(Some).collect();
    let mut placement: Vec<Option<usize>> = vec![None; taken.len()];
    for (slot, from) in slots.iter().zip(ordered.iter()) {
        placement[*slot] = Some(*from);
    }

    for (i, from) in placement.iter().enumerate() {
        let idx = from.unwrap_or(i);
        if let Some(article) = taken[idx].take() {
            articles.push(article);
        }
    }
}

/// Drops every article whose dedup key was already seen; first wins.
pub fn dedup_by_title(articles: Vec<Article>) -> Vec<Article> {
    let mut seen = HashSet::new();
    articles
        .into_iter()
        .filter(|a| seen.insert(a.dedup_key()))
        .collect()
}

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::aggregator::AggregateError;
use crate::model::{source_key, Article, Source, Topic};

/// The two enable maps. Absent keys read as enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnableState {
    pub topics: HashMap<String, bool>,
    pub sources: HashMap<String, bool>,
}

impl EnableState {
    pub fn topic_enabled(&self, topic_key: &str) -> bool {
        self.topics.get(topic_key).copied().unwrap_or(true)
    }

    pub fn source_enabled(&self, topic_key: &str, source_name: &str) -> bool {
        self.sources
            .get(&source_key(topic_key, source_name))
            .copied()
            .unwrap_or(true)
    }
}

/// Topics plus their enable state, owned by the caller and handed to the
/// aggregator as a plain predicate.
#[derive(Debug, Clone, Default)]
pub struct FeedContext {
    topics: Vec<Topic>,
    pub enabled: EnableState,
}

impl FeedContext {
    pub fn new(topics: Vec<Topic>, enabled: EnableState) -> Self {
        Self { topics, enabled }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn topic(&self, key: &str) -> Result<&Topic, AggregateError> {
        self.topics
            .iter()
            .find(|t| t.key == key)
            .ok_or_else(|| AggregateError::UnknownTopic(key.to_string()))
    }

    pub fn enabled_topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics
            .iter()
            .filter(|t| self.enabled.topic_enabled(&t.key))
    }

    /// Owned predicate over a topic's sources, detached from `self` so the
    /// aggregation can run without holding the context.
    pub fn source_filter(&self, topic_key: &str) -> impl Fn(&Source) -> bool + Send + Sync {
        let enabled = self.enabled.clone();
        let topic_key = topic_key.to_string();
        move |source: &Source| enabled.source_enabled(&topic_key, &source.name)
    }

    /// Flips a topic and returns its new state.
    pub fn toggle_topic(&mut self, key: &str) -> Result<bool, AggregateError> {
        self.topic(key)?;
        let next = !self.enabled.topic_enabled(key);
        self.enabled.topics.insert(key.to_string(), next);
        Ok(next)
    }

    /// Flips a source and returns its new state.
    pub fn toggle_source(&mut self, topic_key: &str, source_name: &str) -> Result<bool, AggregateError> {
        let topic = self.topic(topic_key)?;
        if !topic.sources.iter().any(|s| s.name == source_name) {
            return Err(AggregateError::UnknownSource {
                topic: topic_key.to_string(),
                source_name: source_name.to_string(),
            });
        }
        let next = !self.enabled.source_enabled(topic_key, source_name);
        self.enabled
            .sources
            .insert(source_key(topic_key, source_name), next);
        Ok(next)
    }

    /// Adds a topic derived from free text. Returns `None` when the name is
    /// unusable or its key is taken. New topics and their sources start enabled.
    pub fn add_custom_topic(&mut self, raw_name: &str) -> Option<&Topic> {
        let topic = Topic::custom(raw_name, self.topics.len())?;
        if self.topics.iter().any(|t| t.key == topic.key) {
            return None;
        }

        self.enabled.topics.insert(topic.key.clone(), true);
        for source in &topic.sources {
            self.enabled
                .sources
                .insert(source_key(&topic.key, &source.name), true);
        }
        self.topics.push(topic);
        self.topics.last()
    }

    /// Appends topics whose keys are not already present.
    pub fn merge_topics(&mut self, topics: Vec<Topic>) {
        for topic in topics {
            if !self.topics.iter().any(|t| t.key == topic.key) {
                self.topics.push(topic);
            }
        }
    }
}

/// Token identifying one aggregation request for a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

#[derive(Debug, Default)]
struct Slot {
    issued: u64,
    articles: Option<Arc<Vec<Article>>>,
}

/// Per-topic article cache. Each aggregation takes a [`Generation`] before it
/// starts; only the newest issued generation may commit, so a slow, stale
/// request can never overwrite a fresher result.
#[derive(Debug, Default)]
pub struct TopicCache {
    slots: RwLock<HashMap<String, Slot>>,
}

impl TopicCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Vec<Article>>> {
        self.slots
            .read()
            .await
            .get(key)
            .and_then(|slot| slot.articles.clone())
    }

    pub async fn begin(&self, key: &str) -> Generation {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(key.to_string()).or_default();
        slot.issued += 1;
        Generation(slot.issued)
    }

    /// Stores `articles` if `generation` is still the newest issued for `key`.
    pub async fn commit(
        &self,
        key: &str,
        generation: Generation,
        articles: Vec<Article>,
    ) -> Option<Arc<Vec<Article>>> {
        let mut slots = self.slots.write().await;
        let slot = slots.get_mut(key)?;
        if slot.issued != generation.0 {
            return None;
        }
        let articles = Arc::new(articles);
        slot.articles = Some(articles.clone());
        Some(articles)
    }

    /// Drops the cached result and retires any in-flight generation.
    pub async fn invalidate(&self, key: &str) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(key) {
            slot.issued += 1;
            slot.articles = None;
        }
    }

    pub async fn invalidate_all(&self) {
        let mut slots = self.slots.write().await;
        for slot in slots.values_mut() {
            slot.issued += 1;
            slot.articles = None;
        }
    }

    /// First cached article with the given link, in any topic.
    pub async fn find_by_link(&self, link: &str) -> Option<Article> {
        self.slots
            .read()
            .await
            .values()
            .filter_map(|slot| slot.articles.as_ref())
            .flat_map(|articles| articles.iter())
            .find(|a| a.link == link)
            .cloned()
    }

    pub async fn counts(&self) -> HashMap<String, usize> {
        self.slots
            .read()
            .await
            .iter()
            .filter_map(|(k, slot)| slot.articles.as_ref().map(|a| (k.clone(), a.len())))
            .collect()
    }
}

//! Feed normalization: turns a raw payload plus source metadata into
//! [`Article`] records.
//!
//! Each source type maps to one [`Normalizer`] strategy. Plain RSS/Atom goes
//! through [`GenericFeed`]; site-specific scrapers are registered by their
//! type tag and never touch the generic path.

mod advisory;
mod generic;

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use thiserror::Error;

use crate::model::{Article, Source, ADVISORY_TABLE, GENERIC};

pub use advisory::{AdvisoryTable, ADVISORY_CAP};
pub use generic::{GenericFeed, GENERIC_CAP};

pub const DESCRIPTION_LIMIT: usize = 300;
pub const WORDS_PER_MINUTE: usize = 220;

static IMG_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["']"#).expect("valid img regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("malformed feed from {source_name}: {reason}")]
    MalformedFeed { source_name: String, reason: String },
    #[error("no normalizer registered for source type '{0}'")]
    UnknownSourceType(String),
}

pub trait Normalizer: Send + Sync {
    /// Most articles a single source may contribute.
    fn cap(&self) -> usize;

    fn normalize(&self, raw: &str, source: &Source) -> Result<Vec<Article>, NormalizeError>;
}

/// Strategy table keyed by `Source.type`.
pub struct NormalizerRegistry {
    generic: Box<dyn Normalizer>,
    site_specific: HashMap<String, Box<dyn Normalizer>>,
}

impl Default for NormalizerRegistry {
    fn default() -> Self {
        Self::new().register(ADVISORY_TABLE, AdvisoryTable)
    }
}

impl NormalizerRegistry {
    /// A registry that only knows plain feeds.
    pub fn new() -> Self {
        Self {
            generic: Box::new(GenericFeed),
            site_specific: HashMap::new(),
        }
    }

    pub fn register(mut self, kind: &str, normalizer: impl Normalizer + 'static) -> Self {
        self.site_specific
            .insert(kind.to_string(), Box::new(normalizer));
        self
    }

    pub fn for_source(&self, source: &Source) -> Result<&dyn Normalizer, NormalizeError> {
        match source.kind() {
            GENERIC => Ok(self.generic.as_ref()),
            other => self
                .site_specific
                .get(other)
                .map(|n| n.as_ref())
                .ok_or_else(|| NormalizeError::UnknownSourceType(other.to_string())),
        }
    }

    pub fn normalize(&self, raw: &str, source: &Source) -> Result<Vec<Article>, NormalizeError> {
        let normalizer = self.for_source(source)?;
        let mut articles = normalizer.normalize(raw, source)?;
        articles.truncate(normalizer.cap());
        Ok(articles)
    }
}

/// Plain text of an HTML snippet with whitespace collapsed.
pub fn strip_html(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    collapse_whitespace(&text)
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Truncates on a character boundary.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// `"<n> min read"` at 220 words per minute, never below one minute.
pub fn reading_time(text: &str) -> String {
    let words = text.split_whitespace().count();
    let minutes = ((words as f64) / WORDS_PER_MINUTE as f64).round() as usize;
    format!("{} min read", minutes.max(1))
}

/// `src` of the first `<img>` tag in raw markup.
pub fn first_image_src(html: &str) -> Option<String> {
    IMG_SRC
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

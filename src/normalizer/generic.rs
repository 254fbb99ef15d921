use feed_rs::model::Entry;
use feed_rs::parser;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{
    first_image_src, reading_time, strip_html, truncate_chars, NormalizeError, Normalizer,
    DESCRIPTION_LIMIT,
};
use crate::model::{Article, Source};

pub const GENERIC_CAP: usize = 12;

/// Date elements in precedence order.
const DATE_TAGS: &[&str] = &["pubDate", "published", "updated", "dc:date"];

static ITEM_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<(?:item|entry)(?:\s[^>]*)?>(.*?)</(?:item|entry)>").unwrap());

static DATE_ELEMENTS: Lazy<Vec<Regex>> =
    Lazy::new(|| DATE_TAGS.iter().map(|tag| element_regex(tag)).collect());

static CREATOR: Lazy<Regex> = Lazy::new(|| element_regex("dc:creator"));

static LINK_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<link\s[^>]*?href\s*=\s*["']([^"']*)["']"#).unwrap());

static CDATA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^<!\[CDATA\[(.*)\]\]>$").unwrap());

fn element_regex(tag: &str) -> Regex {
    Regex::new(&format!(r"(?s)<{tag}(?:\s[^>]*)?>(.*?)</{tag}>")).unwrap()
}

/// Fields read straight from an item's XML, which feed-rs either reparses or
/// does not expose.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    /// Text of the first non-empty date element, untouched.
    pub date: Option<String>,
    pub link_href: Option<String>,
    pub creator: Option<String>,
}

impl RawItem {
    /// One entry per `<item>`/`<entry>` block, in document order.
    pub fn scan(xml: &str) -> Vec<RawItem> {
        ITEM_BLOCK
            .captures_iter(xml)
            .filter_map(|caps| caps.get(1))
            .map(|block| Self::from_block(block.as_str()))
            .collect()
    }

    fn from_block(block: &str) -> RawItem {
        RawItem {
            date: DATE_ELEMENTS
                .iter()
                .find_map(|element| element_text(element, block)),
            link_href: LINK_HREF
                .captures(block)
                .and_then(|caps| caps.get(1))
                .map(|href| html_escape::decode_html_entities(href.as_str().trim()).into_owned())
                .filter(|href| !href.is_empty()),
            creator: element_text(&CREATOR, block),
        }
    }
}

/// Trimmed, entity-decoded text of the element, or `None` when absent or empty.
fn element_text(element: &Regex, block: &str) -> Option<String> {
    let inner = element.captures(block)?.get(1)?.as_str().trim();
    let text = match CDATA.captures(inner).and_then(|caps| caps.get(1)) {
        Some(cdata) => cdata.as_str().trim().to_string(),
        None => html_escape::decode_html_entities(inner).trim().to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// RSS 2.0 / Atom 1.0 feeds.
pub struct GenericFeed;

impl Normalizer for GenericFeed {
    fn cap(&self) -> usize {
        GENERIC_CAP
    }

    fn normalize(&self, raw: &str, source: &Source) -> Result<Vec<Article>, NormalizeError> {
        let parsed = parser::parse(raw.as_bytes()).map_err(|e| NormalizeError::MalformedFeed {
            source_name: source.name.clone(),
            reason: e.to_string(),
        })?;

        let mut raw_items = RawItem::scan(raw);
        if raw_items.len() != parsed.entries.len() {
            debug!(
                "Found {} raw items but {} entries in '{}'; using parsed fields only",
                raw_items.len(),
                parsed.entries.len(),
                source.name
            );
            raw_items.clear();
        }

        debug!("Parsed {} entries from '{}'", parsed.entries.len(), source.name);

        let fallback = RawItem::default();
        Ok(parsed
            .entries
            .iter()
            .enumerate()
            .take(GENERIC_CAP)
            .map(|(i, entry)| Self::to_article(entry, raw_items.get(i).unwrap_or(&fallback), source))
            .collect())
    }
}

impl GenericFeed {
    pub fn to_article(entry: &Entry, raw: &RawItem, source: &Source) -> Article {
        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let link = entry
            .links
            .iter()
            .map(|l| l.href.trim())
            .find(|href| !href.is_empty())
            .map(str::to_string)
            .or_else(|| raw.link_href.clone())
            .unwrap_or_default();

        // Without the raw item, the parsed timestamp is the best remaining text.
        let date = raw
            .date
            .clone()
            .or_else(|| entry.published.or(entry.updated).map(|dt| dt.to_rfc3339()))
            .unwrap_or_default();

        let raw_body = Self::raw_description(entry);
        let plain = strip_html(&raw_body);
        let description = truncate_chars(&plain, DESCRIPTION_LIMIT);

        let image = Self::media_image(entry)
            .or_else(|| first_image_src(&raw_body))
            .unwrap_or_default();

        let author = entry
            .authors
            .iter()
            .map(|p| p.name.trim())
            .find(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| raw.creator.clone());

        Article {
            title,
            link,
            date,
            reading_time: reading_time(&description),
            description,
            image,
            source_name: source.name.clone(),
            site: source.site.clone(),
            author,
        }
    }

    /// Description, else summary, else full content; first non-empty wins.
    /// RSS `description` and Atom `summary` both land in `entry.summary`.
    fn raw_description(entry: &Entry) -> String {
        entry
            .summary
            .as_ref()
            .map(|s| s.content.clone())
            .filter(|s| !s.trim().is_empty())
            .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
            .unwrap_or_default()
    }

    /// Enclosures, then thumbnails, then any other media content.
    fn media_image(entry: &Entry) -> Option<String> {
        let enclosure = entry
            .media
            .iter()
            .filter(|m| m.thumbnails.is_empty())
            .flat_map(|m| m.content.iter())
            .find_map(|c| c.url.as_ref().map(|u| u.to_string()));

        enclosure
            .or_else(|| {
                entry
                    .media
                    .iter()
                    .flat_map(|m| m.thumbnails.iter())
                    .map(|t| t.image.uri.trim().to_string())
                    .find(|uri| !uri.is_empty())
            })
            .or_else(|| {
                entry
                    .media
                    .iter()
                    .flat_map(|m| m.content.iter())
                    .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
            })
    }
}

use serde::{Deserialize, Serialize};

/// Source type tag selecting the site-specific scraper for advisory listings.
pub const ADVISORY_TABLE: &str = "advisory-table";

/// Source type tag for plain RSS/Atom feeds. An absent tag means the same thing.
pub const GENERIC: &str = "generic";

const PALETTE: [&str; 7] = [
    "#7b68ee", "#60a5fa", "#34d399", "#fb923c", "#f472b6", "#a78bfa", "#38bdf8",
];
const ICONS: [&str; 7] = ["📰", "💬", "🔧", "📡", "🚀", "⚙️", "🌟"];

/// One feed or page endpoint contributing articles to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: String,
    pub site: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Source {
    pub fn new(name: &str, url: &str, site: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            site: site.to_string(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    /// The strategy tag, with an absent tag reported as generic.
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(GENERIC)
    }
}

/// Key under which a source's enabled flag is stored.
pub fn source_key(topic_key: &str, source_name: &str) -> String {
    format!("{}__{}", topic_key, source_name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub key: String,
    pub name: String,
    pub color: String,
    pub icon: String,
    pub sources: Vec<Source>,
}

impl Topic {
    /// Builds a user-added topic from free text. `ordinal` picks the colour and
    /// icon so consecutive additions look different. Returns `None` when the
    /// name has no ASCII alphanumerics to derive a key from.
    pub fn custom(raw_name: &str, ordinal: usize) -> Option<Self> {
        let raw = raw_name.trim();
        let key: String = raw
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if key.is_empty() {
            return None;
        }

        let mut chars = raw.chars();
        let name: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => return None,
        };

        let idx = ordinal % PALETTE.len();
        let sources = vec![
            Source::new(
                &format!("{} Blog", name),
                &format!("https://{}.io/feed/", key),
                &format!("https://{}.io", key),
            ),
            Source::new(
                &format!("{} News", name),
                &format!("https://{}news.com/feed/", key),
                &format!("https://{}news.com", key),
            ),
        ];

        Some(Self {
            key,
            name,
            color: PALETTE[idx].to_string(),
            icon: ICONS[idx].to_string(),
            sources,
        })
    }
}

/// A normalized unit of content, independent of the format it came from.
/// `link` is the identity used for read-state tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub link: String,
    /// Raw date text; may or may not parse as a timestamp.
    pub date: String,
    pub description: String,
    pub image: String,
    pub source_name: String,
    pub site: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub reading_time: String,
}

impl Article {
    /// Case-insensitive, whitespace-trimmed title used to collapse duplicates.
    pub fn dedup_key(&self) -> String {
        self.title.trim().to_lowercase()
    }
}

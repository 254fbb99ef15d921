use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{collapse_whitespace, truncate_chars, NormalizeError, Normalizer, DESCRIPTION_LIMIT};
use crate::model::{Article, Source};

pub const ADVISORY_CAP: usize = 20;
pub const ADVISORY_AUTHOR: &str = "Vulnerability Database";
pub const ADVISORY_READING_TIME: &str = "1 min read";

/// Listing rows link into this path prefix.
pub const ADVISORY_PATH: &str = "/database/";

static ROW_LINKS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(&format!(r#"table tr a[href*="{}"]"#, ADVISORY_PATH))
        .expect("valid advisory link selector")
});
static NAME: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"[class*="name"]"#).expect("valid name selector"));
static VERSION: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"[class*="version"]"#).expect("valid version selector"));
static TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"[class*="title"]"#).expect("valid title selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("valid cell selector"));

/// Vulnerability-disclosure listing scraped from an HTML table. Each row
/// carries an anchor holding the affected component's name, the vulnerable
/// version range and the advisory title; the row's last cell holds the date.
pub struct AdvisoryTable;

impl Normalizer for AdvisoryTable {
    fn cap(&self) -> usize {
        ADVISORY_CAP
    }

    fn normalize(&self, raw: &str, source: &Source) -> Result<Vec<Article>, NormalizeError> {
        let document = Html::parse_document(raw);
        let base = Url::parse(&source.site).or_else(|_| Url::parse(&source.url)).ok();

        Ok(document
            .select(&ROW_LINKS)
            .take(ADVISORY_CAP)
            .map(|anchor| Self::to_article(anchor, base.as_ref(), source))
            .collect())
    }
}

impl AdvisoryTable {
    fn to_article(anchor: ElementRef<'_>, base: Option<&Url>, source: &Source) -> Article {
        let name = first_text(anchor, &NAME);
        let version = first_text(anchor, &VERSION);
        let headline = anchor
            .value()
            .attr("title")
            .map(collapse_whitespace)
            .filter(|t| !t.is_empty())
            .or_else(|| Some(first_text(anchor, &TITLE)).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| element_text(anchor));

        let description = [name.as_str(), version.as_str(), headline.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" – ");

        let title = [name.as_str(), headline.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" – ");

        let href = anchor.value().attr("href").unwrap_or_default();
        let link = match base {
            Some(base) => base
                .join(href)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| href.to_string()),
            None => href.to_string(),
        };

        Article {
            title: if title.is_empty() { "Untitled".to_string() } else { title },
            link,
            date: row_date(anchor).unwrap_or_default(),
            description: truncate_chars(&description, DESCRIPTION_LIMIT),
            image: String::new(),
            source_name: source.name.clone(),
            site: source.site.clone(),
            author: Some(ADVISORY_AUTHOR.to_string()),
            reading_time: ADVISORY_READING_TIME.to_string(),
        }
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn first_text(element: ElementRef<'_>, selector: &Selector) -> String {
    element
        .select(selector)
        .next()
        .map(element_text)
        .unwrap_or_default()
}

/// Text of the trailing cell of the row containing `anchor`.
fn row_date(anchor: ElementRef<'_>) -> Option<String> {
    let row = anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "tr")?;
    let last = row.select(&CELL).last()?;
    if last.select(&ROW_LINKS).next().is_some() {
        return None;
    }
    Some(element_text(last)).filter(|t| !t.is_empty())
}

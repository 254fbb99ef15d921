//! Readable-content extraction.
//!
//! The page is parsed once with scraper and every pass walks its arena with an
//! explicit work stack, so nesting depth never reaches the call stack. Noise
//! subtrees are skipped during the walk, the container is chosen from what is
//! left, and the container's markup is handed to ammonia for the allow-list,
//! attribute scrubbing and safe anchors.

use std::collections::{HashMap, HashSet};

use html_escape::{encode_double_quoted_attribute, encode_text};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};

use crate::normalizer::collapse_whitespace;

/// Below this many characters of text the extraction is considered a miss.
pub const MIN_TEXT_LEN: usize = 60;

/// Containers with this much text or more are treated as page wrappers.
pub const MAX_CONTAINER_LEN: usize = 50_000;

const NOISE_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "nav", "footer", "aside", "form", "button",
    "iframe", "frame", "embed", "object", "video", "audio", "canvas", "svg", "link", "meta",
];

/// Matched against the first or last `-`/`_` segment of each class or id token.
const NOISE_MARKERS: &[&str] = &[
    "ad", "ads", "advert", "advertisement", "adsbygoogle", "sponsor", "sponsored", "cookie",
    "cookies", "consent", "gdpr", "popup", "modal", "newsletter", "subscribe", "menu", "nav",
    "navbar", "footer", "sidebar", "share", "sharing", "social", "related", "comment",
    "comments", "banner", "promo",
];

/// State modifiers such as `has-sidebar` describe a layout, not a widget.
const STATE_PREFIXES: &[&str] = &["has", "is", "no", "with"];

const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "hr", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre", "code", "em",
    "strong", "b", "i", "u", "s", "sub", "sup", "small", "mark", "a", "img", "figure",
    "figcaption", "picture", "ul", "ol", "li", "dl", "dt", "dd", "table", "thead", "tbody",
    "tfoot", "tr", "th", "td", "caption",
];

const URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

const CONTAINER_TAGS: &[&str] = &["div", "section", "main"];

/// Page-level elements whose class lists describe the whole page, not a widget.
const STRUCTURAL_TAGS: &[&str] = &["html", "body", "main", "article"];

static TRAILING_EMPTY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\s*<p>(?:\s|&nbsp;|<br>)*</p>)*\s*$").unwrap());

fn sanitizer() -> ammonia::Builder<'static> {
    let mut builder = ammonia::Builder::default();
    builder
        .tags(ALLOWED_TAGS.iter().copied().collect())
        .clean_content_tags(NOISE_TAGS.iter().copied().collect())
        .generic_attributes(HashSet::new())
        .tag_attributes(HashMap::from([
            ("img", HashSet::from(["src", "alt"])),
            ("a", HashSet::from(["href"])),
        ]))
        .url_schemes(URL_SCHEMES.iter().copied().collect())
        .link_rel(Some("noopener noreferrer"))
        .set_tag_attribute_value("a", "target", "_blank");
    builder
}

enum Visit<'a> {
    Open(ElementRef<'a>),
    Close(ElementRef<'a>),
    Text(&'a str),
}

/// Depth-first walk over `root` in document order, skipping noise subtrees.
fn walk<'a>(root: ElementRef<'a>, mut visit: impl FnMut(Visit<'a>)) {
    let mut stack = vec![Visit::Open(root)];
    while let Some(step) = stack.pop() {
        let element = match step {
            Visit::Open(element) => element,
            other => {
                visit(other);
                continue;
            }
        };
        if is_noise(element) {
            continue;
        }
        visit(Visit::Open(element));
        stack.push(Visit::Close(element));
        for child in element.children().rev() {
            if let Some(child) = ElementRef::wrap(child) {
                stack.push(Visit::Open(child));
            } else if let Some(text) = child.value().as_text() {
                stack.push(Visit::Text(&text.text));
            }
        }
    }
}

fn is_noise(element: ElementRef<'_>) -> bool {
    let name = element.value().name();
    if NOISE_TAGS.contains(&name) {
        return true;
    }
    if STRUCTURAL_TAGS.contains(&name) {
        return false;
    }
    let value = element.value();
    value
        .classes()
        .chain(value.id())
        .any(|token| is_noise_token(&token.to_lowercase()))
}

fn is_noise_token(token: &str) -> bool {
    let mut segments = token.split(['-', '_']).filter(|s| !s.is_empty());
    let Some(first) = segments.next() else {
        return false;
    };
    if STATE_PREFIXES.contains(&first) {
        return false;
    }
    let last = segments.last().unwrap_or(first);
    NOISE_MARKERS.contains(&first) || NOISE_MARKERS.contains(&last)
}

/// First `<article>` outside noise, else the `div`/`section`/`main` with the
/// most text that is still below [`MAX_CONTAINER_LEN`]. Text is counted in
/// non-whitespace characters. Ties go to the container that closes first, so
/// the innermost of equally sized nested containers wins.
pub fn select_container(root: ElementRef<'_>) -> Option<ElementRef<'_>> {
    let mut article = None;
    let mut best: Option<(ElementRef<'_>, usize)> = None;
    let mut lengths: Vec<usize> = Vec::new();

    walk(root, |step| match step {
        Visit::Open(element) => {
            if article.is_none() && element.value().name() == "article" {
                article = Some(element);
            }
            lengths.push(0);
        }
        Visit::Text(text) => {
            if let Some(len) = lengths.last_mut() {
                *len += text.chars().filter(|c| !c.is_whitespace()).count();
            }
        }
        Visit::Close(element) => {
            let len = lengths.pop().unwrap_or(0);
            if let Some(parent) = lengths.last_mut() {
                *parent += len;
            }
            if CONTAINER_TAGS.contains(&element.value().name())
                && len < MAX_CONTAINER_LEN
                && best.map_or(true, |(_, best_len)| len > best_len)
            {
                best = Some((element, len));
            }
        }
    });

    article.or(best.map(|(element, _)| element))
}

/// Concatenated text of `element`, noise excluded.
pub fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    walk(element, |step| {
        if let Visit::Text(text) = step {
            out.push_str(text);
        }
    });
    out
}

/// Markup of the children of `container` with noise subtrees left out.
/// Attributes are carried as-is; sanitizing is ammonia's job.
fn content_markup(container: ElementRef<'_>) -> String {
    let mut out = String::new();
    walk(container, |step| match step {
        Visit::Open(element) if element.id() != container.id() => {
            let value = element.value();
            out.push('<');
            out.push_str(value.name());
            for (name, attr) in value.attrs() {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&encode_double_quoted_attribute(attr));
                out.push('"');
            }
            out.push('>');
        }
        Visit::Close(element) if element.id() != container.id() => {
            let name = element.value().name();
            if !VOID_TAGS.contains(&name) {
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
        }
        Visit::Text(text) => out.push_str(&encode_text(text)),
        _ => {}
    });
    out
}

/// Removes empty paragraphs (and whitespace) from the end of sanitized markup.
pub fn trim_trailing_empty(html: &str) -> String {
    TRAILING_EMPTY.replace(html, "").into_owned()
}

/// Sanitized markup of the page's probable main content, or `None` when no
/// container holds at least [`MIN_TEXT_LEN`] characters of text.
pub fn extract_readable_content(page_html: &str) -> Option<String> {
    let document = Html::parse_document(page_html);
    let container = select_container(document.root_element())?;
    if collapse_whitespace(&visible_text(container)).chars().count() < MIN_TEXT_LEN {
        return None;
    }

    let cleaned = sanitizer().clean(&content_markup(container)).to_string();
    Some(trim_trailing_empty(&cleaned))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "Rust's ownership model guarantees memory safety without a garbage collector, \
                        and the borrow checker enforces it at compile time.";

    mod extract_tests {
        use super::*;

        #[test]
        fn test_short_article_is_a_miss() {
            let html = "<html><body><article><p>Only forty characters of text in here.</p></article></body></html>";
            assert_eq!(extract_readable_content(html), None);
        }

        #[test]
        fn test_article_is_preferred() {
            let html = format!(
                r#"<html><body>
                    <div class="wrapper"><p>{body} {body} {body}</p></div>
                    <article><h1>Title</h1><p>{body}</p></article>
                </body></html>"#,
                body = BODY
            );
            let out = extract_readable_content(&html).unwrap();
            assert!(out.starts_with("<h1>Title</h1>"));
            assert_eq!(out.matches("ownership").count(), 1);
        }

        #[test]
        fn test_largest_container_without_article() {
            let html = format!(
                r#"<html><body>
                    <div id="teaser"><p>Short teaser paragraph that is not the content.</p></div>
                    <section class="post-body"><p>{body}</p><p>{body}</p></section>
                </body></html>"#,
                body = BODY
            );
            let out = extract_readable_content(&html).unwrap();
            assert!(out.contains("ownership"));
            assert!(!out.contains("teaser"));
        }

        #[test]
        fn test_oversized_wrapper_is_skipped() {
            let huge = "x".repeat(MAX_CONTAINER_LEN);
            let html = format!(
                r#"<html><body><div><main><p>{body}</p></main><div>{huge}</div></div></body></html>"#,
                body = BODY,
                huge = huge
            );
            let out = extract_readable_content(&html).unwrap();
            assert_eq!(out, format!("<p>{}</p>", BODY));
        }

        #[test]
        fn test_page_level_classes_are_not_noise() {
            let html = format!(
                r#"<html><body class="single has-sidebar cookie-consent-shown"><article class="post share-enabled"><p>{body}</p></article></body></html>"#,
                body = BODY
            );
            assert!(extract_readable_content(&html).unwrap().contains("ownership"));
        }

        #[test]
        fn test_layout_wrapper_classes_are_not_noise() {
            let html = format!(
                r#"<html><body>
                    <div class="site-content has-sidebar">
                        <div class="downloads-section"><p>{body}</p><p>{body}</p></div>
                        <div class="sidebar-widgets"><p>{body} {body} {body}</p></div>
                    </div>
                </body></html>"#,
                body = BODY
            );
            let out = extract_readable_content(&html).unwrap();
            assert_eq!(out.matches("ownership").count(), 2);
        }

        #[test]
        fn test_no_container_at_all() {
            assert_eq!(extract_readable_content("<html><body>loose text</body></html>"), None);
        }

        #[test]
        fn test_noise_text_does_not_count() {
            let html = format!(
                r#"<html><body><article><p>Tiny.</p><script>var x = "{body}";</script></article></body></html>"#,
                body = BODY
            );
            assert_eq!(extract_readable_content(&html), None);
        }

        #[test]
        fn test_article_inside_noise_is_ignored() {
            let html = format!(
                r#"<html><body>
                    <aside><article><p>{body}</p></article></aside>
                    <section><p>{body}</p></section>
                </body></html>"#,
                body = BODY
            );
            let out = extract_readable_content(&html).unwrap();
            assert_eq!(out.matches("ownership").count(), 1);
        }

        #[test]
        fn test_deeply_nested_page() {
            let depth = 50_000;
            let html = format!(
                "<html><body>{}<p>{}</p>{}</body></html>",
                "<div>".repeat(depth),
                BODY,
                "</div>".repeat(depth)
            );
            let out = extract_readable_content(&html).unwrap();
            assert_eq!(out, format!("<p>{}</p>", BODY));
        }

        #[test]
        fn test_deeply_nested_article_content() {
            let depth = 50_000;
            let html = format!(
                "<html><body><article>{}{}{}</article></body></html>",
                "<span>".repeat(depth),
                BODY,
                "</span>".repeat(depth)
            );
            let out = extract_readable_content(&html).unwrap();
            assert!(out.contains("ownership"));
            assert!(!out.contains("<span"));
        }

        #[test]
        fn test_sanitized_output() {
            let html = format!(
                r#"<html><body><article class="post" onclick="steal()">
                    <div class="cookie-consent">Accept cookies?</div>
                    <p style="color:red" onmouseover="x()">{body}
                        <a href="https://example.com/more" class="link" onclick="y()">more</a>
                        <a href="javascript:alert(1)">bad</a>
                    </p>
                    <figure><img src="https://cdn.example.com/a.png" alt="diagram" width="400" onerror="z()"></figure>
                    <span class="highlight">kept text</span>
                    <script>alert('x')</script>
                    <style>p {{ color: red }}</style>
                    <p> </p>
                    <p></p>
                </article></body></html>"#,
                body = BODY
            );
            let out = extract_readable_content(&html).unwrap();

            assert!(!out.contains("<script"));
            assert!(!out.contains("<style"));
            assert!(!out.contains("onclick"));
            assert!(!out.contains("onerror"));
            assert!(!out.contains("onmouseover"));
            assert!(!out.contains("style="));
            assert!(!out.contains("class="));
            assert!(!out.contains("width="));
            assert!(!out.contains("javascript"));
            assert!(!out.contains("Accept cookies"));
            assert!(!out.contains("<span"));
            assert!(out.contains("kept text"));
            assert!(out.contains(r#"href="https://example.com/more""#));
            assert!(out.contains(r#"target="_blank""#));
            assert!(out.contains(r#"rel="noopener noreferrer""#));
            assert!(out.contains(">bad</a>"));
            assert!(out.contains(r#"src="https://cdn.example.com/a.png""#));
            assert!(out.contains(r#"alt="diagram""#));
            assert!(out.ends_with("kept text"));
        }
    }

    mod noise_tests {
        use super::*;

        #[test]
        fn test_marker_tokens() {
            for token in [
                "ad-slot", "cookie-consent", "newsletter-signup", "modal-overlay", "site-footer",
                "post_comments", "adsbygoogle", "share",
            ] {
                assert!(is_noise_token(token), "{token} should be noise");
            }
        }

        #[test]
        fn test_substrings_are_not_markers() {
            for token in [
                "downloads-section", "has-sidebar", "is-menu-open", "site-content", "shadow",
                "loaded", "navigation-free", "",
            ] {
                assert!(!is_noise_token(token), "{token} should not be noise");
            }
        }

        #[test]
        fn test_element_markers_read_class_and_id() {
            let html = Html::parse_fragment(
                r#"<div id="Newsletter-Signup"></div><div class="content Modal-Overlay"></div><div class="content"></div><nav></nav>"#,
            );
            let flags: Vec<bool> = html
                .root_element()
                .children()
                .filter_map(ElementRef::wrap)
                .map(is_noise)
                .collect();
            assert_eq!(flags, vec![true, true, false, true]);
        }

        #[test]
        fn test_trim_trailing_empty_keeps_inner_empties() {
            let html = "<p>one</p><p></p><p>two</p>\n  <p><br></p><p>  </p><p>&nbsp;</p>\n";
            assert_eq!(trim_trailing_empty(html), "<p>one</p><p></p><p>two</p>");
        }

        #[test]
        fn test_trailing_image_paragraph_is_kept() {
            let html = r#"<p><img src="a.png"></p>"#;
            assert_eq!(trim_trailing_empty(html), html);
        }
    }
}

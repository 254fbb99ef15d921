//! Integration tests for the devfeed aggregator
//!
//! These tests drive the public API end to end: configuration loading,
//! relay retrieval against mock servers, normalization, aggregation,
//! readable-content extraction and persistence.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use wiremock::matchers::query_param;
use wiremock::{Mock, MockServer, ResponseTemplate};

use devfeed::aggregator::Aggregator;
use devfeed::model::{Source, Topic, ADVISORY_TABLE};
use devfeed::normalizer::NormalizerRegistry;
use devfeed::relay::RelayFetcher;

mod common {
    use super::*;
    use tempfile::TempDir;

    /// Create a temporary directory for test databases
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp directory")
    }

    /// Create a test database path
    pub fn create_db_path(temp_dir: &TempDir) -> String {
        let db_path = temp_dir.path().join("test.db");
        format!("sqlite:{}?mode=rwc", db_path.display())
    }

    pub fn relay_endpoint(server: &MockServer) -> String {
        format!("{}/raw?url=", server.uri())
    }

    pub fn aggregator(endpoints: Vec<String>) -> Aggregator {
        let relays = RelayFetcher::new(endpoints, "devfeed-tests").unwrap();
        Aggregator::new(Arc::new(relays), NormalizerRegistry::default())
            .with_feed_timeout(Duration::from_secs(2))
    }

    pub fn topic(sources: Vec<Source>) -> Topic {
        Topic {
            key: "test".to_string(),
            name: "Test".to_string(),
            color: "#7b68ee".to_string(),
            icon: "T".to_string(),
            sources,
        }
    }

    /// RSS 2.0 document with one item per (title, pubDate) pair.
    pub fn rss(items: &[(String, String)]) -> String {
        let items: String = items
            .iter()
            .enumerate()
            .map(|(i, (title, date))| {
                format!(
                    "<item><title>{}</title><link>https://blog.test/posts/{}</link>\
                     <pubDate>{}</pubDate>\
                     <description>&lt;p&gt;Post number {} covers release notes, migration tips and a short benchmark.&lt;/p&gt;</description></item>",
                    title, i, date, i
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>Blog</title><link>https://blog.test</link><description>Posts</description>{}</channel></rss>"#,
            items
        )
    }

    pub async fn serve(server: &MockServer, target: &str, body: String) {
        Mock::given(query_param("url", target))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }
}

#[cfg(test)]
mod config_integration_tests {
    use super::*;
    use devfeed::config::Config;

    #[test]
    fn test_load_shipped_config() {
        // Test loading the actual devfeed.toml from the project
        let config = Config::load("devfeed.toml");
        assert!(config.is_ok(), "Failed to load devfeed.toml: {:?}", config.err());

        let config = config.unwrap();
        assert_eq!(config.topics.len(), 9);
        assert!(config.refresh_interval > 0, "refresh_interval should be positive");
        assert_eq!(config.relay.endpoints.len(), 3);

        let patchstack = config.topics.iter().find(|t| t.key == "patchstack").unwrap();
        assert!(patchstack.sources.iter().any(|s| s.kind() == ADVISORY_TABLE));
    }

    #[test]
    fn test_config_round_trip() {
        let toml_content = r##"
            refresh_interval = 0

            [[topics]]
            key = "rust"
            name = "Rust"
            color = "#f74c00"
            icon = "🦀"

            [[topics.sources]]
            name = "This Week in Rust"
            url = "https://this-week-in-rust.org/rss.xml"
            site = "https://this-week-in-rust.org"

            [[topics.sources]]
            name = "Inside Rust"
            url = "https://blog.rust-lang.org/inside-rust/feed.xml"
            site = "https://blog.rust-lang.org/inside-rust"
            type = "generic"
        "##;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.refresh_interval, 0);
        assert_eq!(config.topics[0].sources.len(), 2);
        assert_eq!(config.topics[0].sources[0].kind, None);
        assert_eq!(config.topics[0].sources[1].kind(), "generic");
    }
}

#[cfg(test)]
mod end_to_end_tests {
    use super::common::*;
    use super::*;
    use devfeed::extractor::extract_readable_content;
    use devfeed::normalizer::{ADVISORY_CAP, GENERIC_CAP};
    use wiremock::matchers::any;

    #[tokio::test]
    async fn test_generic_feed_capped_and_sorted() {
        let server = MockServer::start().await;
        let items: Vec<(String, String)> = (0..15)
            .map(|i| {
                (
                    format!("Post {}", i),
                    format!("{:02} Dec 2024 10:00:00 GMT", 20 - i),
                )
            })
            .collect();
        serve(&server, "https://blog.test/feed", rss(&items)).await;

        let topic = topic(vec![Source::new("Blog", "https://blog.test/feed", "https://blog.test")]);
        let articles = aggregator(vec![relay_endpoint(&server)])
            .aggregate(&topic, |_| true)
            .await;

        assert_eq!(articles.len(), GENERIC_CAP);
        assert_eq!(articles[0].title, "Post 0");
        assert_eq!(articles[11].title, "Post 11");
        assert!(articles.iter().all(|a| a.reading_time.ends_with("min read")));
        assert!(articles.iter().all(|a| a.description.chars().count() <= 300));
    }

    #[tokio::test]
    async fn test_duplicate_titles_across_sources() {
        let server = MockServer::start().await;
        serve(
            &server,
            "https://a.test/feed",
            rss(&[("  Released v2  ".to_string(), "Mon, 09 Dec 2024 12:00:00 GMT".to_string())]),
        )
        .await;
        serve(
            &server,
            "https://b.test/feed",
            rss(&[
                ("released v2".to_string(), "Mon, 09 Dec 2024 11:00:00 GMT".to_string()),
                ("Something else".to_string(), "Mon, 09 Dec 2024 10:00:00 GMT".to_string()),
            ]),
        )
        .await;

        let topic = topic(vec![
            Source::new("A", "https://a.test/feed", "https://a.test"),
            Source::new("B", "https://b.test/feed", "https://b.test"),
        ]);
        let articles = aggregator(vec![relay_endpoint(&server)])
            .aggregate(&topic, |_| true)
            .await;

        let released: Vec<_> = articles
            .iter()
            .filter(|a| a.title.trim().eq_ignore_ascii_case("released v2"))
            .collect();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].source_name, "A");
        assert_eq!(articles.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_source_does_not_affect_others() {
        let healthy = MockServer::start().await;
        serve(
            &healthy,
            "https://good.test/feed",
            rss(&[
                ("One".to_string(), "Mon, 09 Dec 2024 12:00:00 GMT".to_string()),
                ("Two".to_string(), "Mon, 09 Dec 2024 11:00:00 GMT".to_string()),
            ]),
        )
        .await;

        // Every relay errors for the broken source.
        let broken = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(502))
            .mount(&broken)
            .await;
        Mock::given(query_param("url", "https://bad.test/feed"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&healthy)
            .await;

        let topic = topic(vec![
            Source::new("Bad", "https://bad.test/feed", "https://bad.test"),
            Source::new("Good", "https://good.test/feed", "https://good.test"),
        ]);
        let articles = aggregator(vec![relay_endpoint(&broken), relay_endpoint(&healthy)])
            .aggregate(&topic, |_| true)
            .await;

        let titles: Vec<_> = articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["One", "Two"]);
    }

    #[tokio::test]
    async fn test_advisory_table_capped() {
        let server = MockServer::start().await;
        let rows: String = (0..25)
            .map(|i| {
                format!(
                    r#"<tr><td><a href="/database/wordpress/plugin/plugin-{i}" title="Cross Site Scripting in plugin {i}">
                        <span class="name">Plugin {i}</span><span class="version">&lt;= 1.{i}</span>
                        <span class="title">Cross Site Scripting</span></a></td><td>9 December 2024</td></tr>"#
                )
            })
            .collect();
        let page = format!("<html><body><table><tbody>{}</tbody></table></body></html>", rows);
        serve(&server, "https://vulns.test/database/", page).await;

        let topic = topic(vec![Source::new(
            "Advisories",
            "https://vulns.test/database/",
            "https://vulns.test",
        )
        .with_kind(ADVISORY_TABLE)]);
        let articles = aggregator(vec![relay_endpoint(&server)])
            .aggregate(&topic, |_| true)
            .await;

        assert_eq!(articles.len(), ADVISORY_CAP);
        assert!(articles[0].link.starts_with("https://vulns.test/database/"));
        assert_eq!(articles[0].author.as_deref(), Some("Vulnerability Database"));
    }

    #[test]
    fn test_short_article_is_an_extraction_miss() {
        let text = "Only forty characters of text in here!!!";
        assert_eq!(text.len(), 40);
        let page = format!("<html><body><article><p>{}</p></article></body></html>", text);
        assert!(extract_readable_content(&page).is_none());
    }

    #[tokio::test]
    async fn test_disabling_a_source_removes_its_articles() {
        let server = MockServer::start().await;
        serve(
            &server,
            "https://a.test/feed",
            rss(&[("From A".to_string(), "Mon, 09 Dec 2024 12:00:00 GMT".to_string())]),
        )
        .await;
        serve(
            &server,
            "https://b.test/feed",
            rss(&[("From B".to_string(), "Mon, 09 Dec 2024 11:00:00 GMT".to_string())]),
        )
        .await;

        let topic = topic(vec![
            Source::new("A", "https://a.test/feed", "https://a.test"),
            Source::new("B", "https://b.test/feed", "https://b.test"),
        ]);
        let aggregator = aggregator(vec![relay_endpoint(&server)]);

        let all = aggregator.aggregate(&topic, |_| true).await;
        let without_b = aggregator.aggregate(&topic, |s| s.name != "B").await;

        assert_eq!(all.len(), 2);
        assert_eq!(without_b.len(), 1);
        assert!(without_b.iter().all(|a| a.source_name == "A"));
    }
}

#[cfg(test)]
mod persistence_integration_tests {
    use super::common::*;
    use super::*;
    use devfeed::db::Database;
    use devfeed::state::FeedContext;

    #[tokio::test]
    async fn test_state_survives_restart() {
        let temp_dir = create_temp_dir();
        let db_url = create_db_path(&temp_dir);

        let builtin = vec![topic(vec![
            Source::new("A", "https://a.test/feed", "https://a.test"),
            Source::new("B", "https://b.test/feed", "https://b.test"),
        ])];

        // First session: add a topic, disable a source, read an article
        {
            let db = Database::new(&db_url).await.unwrap();
            db.initialize().await.unwrap();

            let mut context = FeedContext::new(builtin.clone(), db.enable_state().await.unwrap());
            let added = context.add_custom_topic("Rust").unwrap().clone();
            db.save_custom_topic(&added).await.unwrap();

            let enabled = context.toggle_source("test", "B").unwrap();
            db.set_source_enabled("test", "B", enabled).await.unwrap();
            db.mark_read("https://a.test/posts/0").await.unwrap();
        }

        // Second session: rebuild the context from storage
        {
            let db = Database::new(&db_url).await.unwrap();
            db.initialize().await.unwrap();

            let mut context = FeedContext::new(builtin.clone(), db.enable_state().await.unwrap());
            context.merge_topics(db.custom_topics().await.unwrap());

            assert_eq!(context.topics().len(), 2);
            assert!(context.topic("rust").is_ok());
            assert!(!context.enabled.source_enabled("test", "B"));
            assert!(context.enabled.source_enabled("test", "A"));

            let filter = context.source_filter("test");
            let active: Vec<_> = builtin[0].sources.iter().filter(|s| filter(*s)).collect();
            assert_eq!(active.len(), 1);

            assert!(db.read_links().await.unwrap().contains("https://a.test/posts/0"));
        }
    }
}

use std::collections::HashSet;

use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::model::{source_key, Source, Topic};
use crate::state::EnableState;

const SCOPE_TOPIC: &str = "topic";
const SCOPE_SOURCE: &str = "source";

#[derive(Debug, Clone, FromRow)]
struct TopicRow {
    key: String,
    name: String,
    color: String,
    icon: String,
}

#[derive(Debug, Clone, FromRow)]
struct SourceRow {
    topic_key: String,
    name: String,
    url: String,
    site: String,
    kind: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct ToggleRow {
    key: String,
    scope: String,
    enabled: bool,
}

/// User-added topics, enable state and read-state. Built-in topics come from
/// configuration and are never written here.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS custom_topics (
                key TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                color TEXT NOT NULL,
                icon TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS custom_sources (
                topic_key TEXT NOT NULL REFERENCES custom_topics(key),
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                site TEXT NOT NULL,
                kind TEXT,
                PRIMARY KEY (topic_key, position)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS toggles (
                key TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                enabled INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS read_articles (
                link TEXT PRIMARY KEY,
                read_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn save_custom_topic(&self, topic: &Topic) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO custom_topics (key, name, color, icon, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                name = excluded.name,
                color = excluded.color,
                icon = excluded.icon
            "#,
        )
        .bind(&topic.key)
        .bind(&topic.name)
        .bind(&topic.color)
        .bind(&topic.icon)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM custom_sources WHERE topic_key = ?")
            .bind(&topic.key)
            .execute(&mut *tx)
            .await?;

        for (position, source) in topic.sources.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO custom_sources (topic_key, position, name, url, site, kind)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&topic.key)
            .bind(position as i64)
            .bind(&source.name)
            .bind(&source.url)
            .bind(&source.site)
            .bind(&source.kind)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Custom topics in creation order, each with its sources in order.
    pub async fn custom_topics(&self) -> anyhow::Result<Vec<Topic>> {
        let topics = sqlx::query_as::<_, TopicRow>(
            "SELECT key, name, color, icon FROM custom_topics ORDER BY created_at, rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let sources = sqlx::query_as::<_, SourceRow>(
            "SELECT topic_key, name, url, site, kind FROM custom_sources ORDER BY topic_key, position",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(topics
            .into_iter()
            .map(|row| Topic {
                sources: sources
                    .iter()
                    .filter(|s| s.topic_key == row.key)
                    .map(|s| Source {
                        name: s.name.clone(),
                        url: s.url.clone(),
                        site: s.site.clone(),
                        kind: s.kind.clone(),
                    })
                    .collect(),
                key: row.key,
                name: row.name,
                color: row.color,
                icon: row.icon,
            })
            .collect())
    }

    pub async fn set_topic_enabled(&self, topic_key: &str, enabled: bool) -> anyhow::Result<()> {
        self.set_toggle(topic_key, SCOPE_TOPIC, enabled).await
    }

    pub async fn set_source_enabled(
        &self,
        topic_key: &str,
        source_name: &str,
        enabled: bool,
    ) -> anyhow::Result<()> {
        self.set_toggle(&source_key(topic_key, source_name), SCOPE_SOURCE, enabled)
            .await
    }

    async fn set_toggle(&self, key: &str, scope: &str, enabled: bool) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO toggles (key, scope, enabled)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                scope = excluded.scope,
                enabled = excluded.enabled
            "#,
        )
        .bind(key)
        .bind(scope)
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn enable_state(&self) -> anyhow::Result<EnableState> {
        let rows = sqlx::query_as::<_, ToggleRow>("SELECT key, scope, enabled FROM toggles")
            .fetch_all(&self.pool)
            .await?;

        let mut state = EnableState::default();
        for row in rows {
            match row.scope.as_str() {
                SCOPE_TOPIC => state.topics.insert(row.key, row.enabled),
                _ => state.sources.insert(row.key, row.enabled),
            };
        }
        Ok(state)
    }

    pub async fn mark_read(&self, link: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO read_articles (link, read_at)
            VALUES (?, ?)
            ON CONFLICT(link) DO NOTHING
            "#,
        )
        .bind(link)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn read_links(&self) -> anyhow::Result<HashSet<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT link FROM read_articles")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(link,)| link).collect())
    }
}

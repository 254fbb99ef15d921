use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use askama::Template;
use axum::{
    extract::{Form, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::aggregator::{AggregateError, Aggregator};
use crate::dates::format_relative;
use crate::db::Database;
use crate::extractor::extract_readable_content;
use crate::model::{Article, Topic};
use crate::state::{FeedContext, TopicCache};

pub struct AppState {
    pub db: Arc<Database>,
    pub aggregator: Arc<Aggregator>,
    pub context: RwLock<FeedContext>,
    pub cache: TopicCache,
    pub page_timeout: Duration,
    refreshing: RwLock<bool>,
}

impl AppState {
    pub fn new(
        db: Arc<Database>,
        aggregator: Arc<Aggregator>,
        context: FeedContext,
        page_timeout: Duration,
    ) -> Self {
        Self {
            db,
            aggregator,
            context: RwLock::new(context),
            cache: TopicCache::new(),
            page_timeout,
            refreshing: RwLock::new(false),
        }
    }

    pub async fn is_refreshing(&self) -> bool {
        *self.refreshing.read().await
    }

    /// Cached articles for a topic, aggregating on a miss. The result is
    /// committed only if no newer request for the same topic began meanwhile.
    pub async fn load_topic(&self, key: &str) -> Result<Arc<Vec<Article>>, AggregateError> {
        if let Some(cached) = self.cache.get(key).await {
            return Ok(cached);
        }

        // Issued before the context is read, so a toggle landing after this
        // point retires the generation.
        let generation = self.cache.begin(key).await;
        let (topic, filter) = {
            let context = self.context.read().await;
            (context.topic(key)?.clone(), context.source_filter(key))
        };

        let articles = self.aggregator.aggregate(&topic, filter).await;

        match self.cache.commit(key, generation, articles.clone()).await {
            Some(committed) => Ok(committed),
            None => {
                debug!("Discarding superseded result for '{}'", key);
                Ok(Arc::new(articles))
            }
        }
    }

    /// Drops every cached topic and re-aggregates the enabled ones.
    pub async fn refresh_all(&self) {
        {
            let mut refreshing = self.refreshing.write().await;
            if *refreshing {
                info!("Refresh already in progress, skipping");
                return;
            }
            *refreshing = true;
        }

        self.cache.invalidate_all().await;
        let keys: Vec<String> = self
            .context
            .read()
            .await
            .enabled_topics()
            .map(|t| t.key.clone())
            .collect();

        let results = join_all(keys.iter().map(|key| self.load_topic(key))).await;
        let total: usize = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|articles| articles.len())
            .sum();
        info!("Refreshed {} topics, {} articles", keys.len(), total);

        *self.refreshing.write().await = false;
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/topics/:key/articles", get(topic_articles))
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .route("/settings", get(settings))
        .route("/settings/topics", post(add_topic))
        .route("/settings/topics/:key/toggle", post(toggle_topic))
        .route(
            "/settings/topics/:key/sources/:name/toggle",
            post(toggle_source),
        )
        .route("/read", get(read))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn start_background_refresh(state: Arc<AppState>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);

    info!("Starting initial topic refresh");
    state.refresh_all().await;

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled topic refresh");
        state.refresh_all().await;
    }
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub tabs: Vec<TabView>,
    pub active: Option<TabView>,
    pub cards: Vec<CardView>,
    pub refreshing: bool,
}

#[derive(Clone)]
pub struct TabView {
    pub key: String,
    pub name: String,
    pub icon: String,
    pub color: String,
    pub count: Option<usize>,
    pub active: bool,
}

pub struct CardView {
    pub title: String,
    pub link: String,
    pub reader_href: String,
    pub description: String,
    pub image: String,
    pub source_name: String,
    pub favicon: String,
    pub when: String,
    pub reading_time: String,
    pub author: Option<String>,
    pub read: bool,
}

impl CardView {
    /// Links and images that are not http(s) are left empty.
    fn new(article: &Article, read_links: &HashSet<String>) -> Self {
        let link = web_url(&article.link);
        Self {
            title: article.title.clone(),
            reader_href: if link.is_empty() {
                String::new()
            } else {
                format!("/read?link={}", urlencoding::encode(&link))
            },
            link,
            description: article.description.clone(),
            image: web_url(&article.image),
            source_name: article.source_name.clone(),
            favicon: favicon_url(&article.site),
            when: format_relative(&article.date, Utc::now()),
            reading_time: article.reading_time.clone(),
            author: article.author.clone(),
            read: read_links.contains(&article.link),
        }
    }
}

#[derive(Template)]
#[template(path = "settings.html")]
pub struct SettingsTemplate {
    pub topics: Vec<SettingsTopicView>,
    pub rejected: Option<String>,
}

pub struct SettingsTopicView {
    pub name: String,
    pub icon: String,
    pub color: String,
    pub enabled: bool,
    pub toggle_action: String,
    pub sources: Vec<SettingsSourceView>,
}

pub struct SettingsSourceView {
    pub name: String,
    pub site: String,
    pub kind: String,
    pub enabled: bool,
    pub toggle_action: String,
}

#[derive(Template)]
#[template(path = "reader.html")]
pub struct ReaderTemplate {
    pub title: String,
    pub link: String,
    pub source_name: String,
    pub when: String,
    pub author: Option<String>,
    pub reading_time: String,
    pub content: Option<String>,
    pub description: String,
}

#[derive(Template)]
#[template(path = "refresh_button.html")]
pub struct RefreshButtonTemplate {
    pub refreshing: bool,
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

// Unknown topics and sources are the caller's mistake; everything else is ours.
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.0.downcast_ref::<AggregateError>().is_some() {
            StatusCode::NOT_FOUND
        } else {
            error!("Request failed: {:#}", self.0);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, format!("Error: {}", self.0)).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError(err.into())
    }
}

fn is_web_url(raw: &str) -> bool {
    matches!(Url::parse(raw.trim()), Ok(url) if matches!(url.scheme(), "http" | "https"))
}

fn web_url(raw: &str) -> String {
    if is_web_url(raw) {
        raw.trim().to_string()
    } else {
        String::new()
    }
}

fn favicon_url(site: &str) -> String {
    match Url::parse(site) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            format!("{}/favicon.ico", url.origin().ascii_serialization())
        }
        _ => String::new(),
    }
}

fn tab_view(topic: &Topic, count: Option<usize>, active: bool) -> TabView {
    TabView {
        key: topic.key.clone(),
        name: topic.name.clone(),
        icon: topic.icon.clone(),
        color: topic.color.clone(),
        count,
        active,
    }
}

// Route handlers
#[derive(Deserialize)]
pub struct IndexQuery {
    pub topic: Option<String>,
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IndexQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (enabled, selected) = {
        let context = state.context.read().await;
        let enabled: Vec<Topic> = context.enabled_topics().cloned().collect();
        let selected = match query.topic.as_deref() {
            Some(key) => Some(context.topic(key)?.clone()),
            None => enabled.first().cloned(),
        };
        (enabled, selected)
    };

    let mut cards = Vec::new();
    if let Some(topic) = &selected {
        let articles = state.load_topic(&topic.key).await?;
        let read_links = state.db.read_links().await?;
        cards = articles
            .iter()
            .map(|article| CardView::new(article, &read_links))
            .collect();
    }

    let counts = state.cache.counts().await;
    let selected_key = selected.as_ref().map(|t| t.key.as_str());
    let tabs: Vec<TabView> = enabled
        .iter()
        .map(|t| tab_view(t, counts.get(&t.key).copied(), Some(t.key.as_str()) == selected_key))
        .collect();
    let active = selected.as_ref().map(|t| {
        tab_view(t, counts.get(&t.key).copied(), true)
    });

    Ok(HtmlTemplate(IndexTemplate {
        tabs,
        active,
        cards,
        refreshing: state.is_refreshing().await,
    }))
}

pub async fn topic_articles(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Vec<Article>>, AppError> {
    let articles = state.load_topic(&key).await?;
    Ok(Json(articles.as_ref().clone()))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    // Spawn the refresh task
    let background = state.clone();
    tokio::spawn(async move {
        background.refresh_all().await;
    });

    // Return refreshing state immediately
    Ok(HtmlTemplate(RefreshButtonTemplate { refreshing: true }))
}

pub async fn refresh_status(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let refreshing = state.is_refreshing().await;
    Ok(HtmlTemplate(RefreshButtonTemplate { refreshing }))
}

#[derive(Deserialize)]
pub struct SettingsQuery {
    pub rejected: Option<String>,
}

pub async fn settings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SettingsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let context = state.context.read().await;
    let topics = context
        .topics()
        .iter()
        .map(|topic| SettingsTopicView {
            name: topic.name.clone(),
            icon: topic.icon.clone(),
            color: topic.color.clone(),
            enabled: context.enabled.topic_enabled(&topic.key),
            toggle_action: format!("/settings/topics/{}/toggle", topic.key),
            sources: topic
                .sources
                .iter()
                .map(|source| SettingsSourceView {
                    name: source.name.clone(),
                    site: source.site.clone(),
                    kind: source.kind().to_string(),
                    enabled: context.enabled.source_enabled(&topic.key, &source.name),
                    toggle_action: format!(
                        "/settings/topics/{}/sources/{}/toggle",
                        topic.key,
                        urlencoding::encode(&source.name)
                    ),
                })
                .collect(),
        })
        .collect();

    Ok(HtmlTemplate(SettingsTemplate {
        topics,
        rejected: query.rejected,
    }))
}

#[derive(Deserialize)]
pub struct AddTopicForm {
    pub name: String,
}

pub async fn add_topic(
    State(state): State<Arc<AppState>>,
    Form(form): Form<AddTopicForm>,
) -> Result<Redirect, AppError> {
    let added = state.context.write().await.add_custom_topic(&form.name).cloned();

    match added {
        Some(topic) => {
            state.db.save_custom_topic(&topic).await?;
            info!("Added topic '{}' with {} sources", topic.key, topic.sources.len());
            Ok(Redirect::to("/settings"))
        }
        None => {
            warn!("Rejected topic name '{}'", form.name);
            Ok(Redirect::to(&format!(
                "/settings?rejected={}",
                urlencoding::encode(form.name.trim())
            )))
        }
    }
}

pub async fn toggle_topic(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Redirect, AppError> {
    let enabled = state.context.write().await.toggle_topic(&key)?;
    state.db.set_topic_enabled(&key, enabled).await?;
    state.cache.invalidate(&key).await;

    info!("Topic '{}' enabled: {}", key, enabled);
    Ok(Redirect::to("/settings"))
}

pub async fn toggle_source(
    State(state): State<Arc<AppState>>,
    Path((key, name)): Path<(String, String)>,
) -> Result<Redirect, AppError> {
    let enabled = state.context.write().await.toggle_source(&key, &name)?;
    state.db.set_source_enabled(&key, &name, enabled).await?;
    state.cache.invalidate(&key).await;

    info!("Source '{}' in '{}' enabled: {}", name, key, enabled);
    Ok(Redirect::to("/settings"))
}

#[derive(Deserialize)]
pub struct ReadQuery {
    pub link: String,
}

pub async fn read(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ReadQuery>,
) -> Result<Response, AppError> {
    let link = query.link;
    if !is_web_url(&link) {
        return Ok((StatusCode::BAD_REQUEST, "Invalid article link").into_response());
    }

    state.db.mark_read(&link).await?;
    let article = state.cache.find_by_link(&link).await;

    let content = match state.aggregator.relays().fetch(&link, state.page_timeout).await {
        Ok(html) => extract_readable_content(&html),
        Err(e) => {
            warn!("Article page '{}' unavailable: {}", link, e);
            None
        }
    };
    if content.is_none() {
        debug!("No readable content for '{}', showing summary", link);
    }

    let template = match article {
        Some(article) => ReaderTemplate {
            title: article.title,
            when: format_relative(&article.date, Utc::now()),
            source_name: article.source_name,
            author: article.author,
            reading_time: article.reading_time,
            description: article.description,
            content,
            link,
        },
        None => ReaderTemplate {
            title: link.clone(),
            when: String::new(),
            source_name: String::new(),
            author: None,
            reading_time: String::new(),
            description: String::new(),
            content,
            link,
        },
    };

    Ok(HtmlTemplate(template).into_response())
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}

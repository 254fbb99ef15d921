use std::sync::Arc;

use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use devfeed::aggregator::Aggregator;
use devfeed::config::Config;
use devfeed::db::Database;
use devfeed::normalizer::NormalizerRegistry;
use devfeed::relay::RelayFetcher;
use devfeed::routes::{self, AppState};
use devfeed::state::FeedContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devfeed=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("DEVFEED_CONFIG").unwrap_or_else(|_| "devfeed.toml".to_string());
    let config = Config::load(&config_path)?;
    info!(
        "Loaded {} topics from {}",
        config.topics.len(),
        config_path
    );

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:devfeed.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    // Built-in topics first, then the ones users added
    let mut context = FeedContext::new(config.topics.clone(), db.enable_state().await?);
    let custom = db.custom_topics().await?;
    info!("Restored {} custom topics", custom.len());
    context.merge_topics(custom);

    let relays = RelayFetcher::new(config.relay.endpoints.clone(), &config.relay.user_agent)?;
    info!("Using {} relay endpoints", relays.endpoints().len());
    let aggregator = Aggregator::new(Arc::new(relays), NormalizerRegistry::default())
        .with_feed_timeout(config.relay.feed_timeout());

    let state = Arc::new(AppState::new(
        Arc::new(db),
        Arc::new(aggregator),
        context,
        config.relay.page_timeout(),
    ));

    // Start background refresh task
    if config.refresh_interval > 0 {
        let bg_state = state.clone();
        let refresh_interval = config.refresh_interval;
        tokio::spawn(async move {
            routes::start_background_refresh(bg_state, refresh_interval).await;
        });
    } else {
        info!("Background refresh disabled");
    }

    let app = routes::router(state)
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("Server starting on http://{}", config.bind);

    axum::serve(listener, app).await?;

    Ok(())
}

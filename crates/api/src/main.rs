//! SupportChat API server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use supportchat_api::{
    attachments::LocalAttachmentStore,
    create_router,
    store::{ChatStore, MemoryChatStore, PgChatStore},
    websocket::ChatHub,
    AppState, Config,
};
use supportchat_shared::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging(&config);

    tracing::info!("Starting SupportChat API server");

    let store: Arc<dyn ChatStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL");
            let pool = db::create_pool(url, config.database_max_connections).await?;
            db::run_migrations(&pool).await?;
            tracing::info!("Database ready");
            Arc::new(PgChatStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory chat store");
            Arc::new(MemoryChatStore::new())
        }
    };

    tokio::fs::create_dir_all(&config.attachment_dir).await?;
    let assets = Arc::new(LocalAttachmentStore::new(config.attachment_dir.clone()));

    let bind_address = config.bind_address.clone();
    let presence_retention = config.presence_retention;
    let state = AppState::new(config, store, assets);
    spawn_presence_sweeper(Arc::clone(&state.hub), presence_retention);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Server listening on {}", bind_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Periodically drop presence entries of users offline longer than `retention`
fn spawn_presence_sweeper(hub: Arc<ChatHub>, retention: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(retention.min(Duration::from_secs(3600)));
        loop {
            interval.tick().await;
            let pruned = hub.presence().prune_offline(retention);
            if pruned > 0 {
                tracing::debug!(pruned, "Pruned offline presence entries");
            }
        }
    });
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("supportchat_api=debug,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

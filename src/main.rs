use std::sync::Arc;

use silentpairs::{app, chat, config::Config, store::SqliteStore, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,silentpairs=debug")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(?config, "loaded configuration");

    let store = SqliteStore::connect(&config.database_url, 16).await?;
    let db_pool = store.pool().clone();

    let coordinator = Arc::new(chat::Coordinator::new(
        Arc::new(store),
        config.send_queue,
        config.match_attempts,
    ));
    let _sweeper =
        chat::spawn_sweeper(coordinator.clone(), config.sweep_interval, config.stale_after);

    let app_state = AppState {
        db_pool,
        coordinator,
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app(app_state)).await?;

    Ok(())
}

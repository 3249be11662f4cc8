pub mod appresult;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod store;

use std::sync::Arc;

use axum::{extract::FromRef, routing::get, Router};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;

pub use appresult::{AppError, AppResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub coordinator: Arc<chat::Coordinator>,
}

pub fn app(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .merge(chat::router())
        .with_state(app_state)
        .layer(CorsLayer::permissive())
}

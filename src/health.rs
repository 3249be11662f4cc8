use std::sync::Arc;

use axum::{debug_handler, extract::State, Json};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::{chat::Coordinator, AppResult, AppState};

#[debug_handler(state = AppState)]
pub async fn health(
    State(db_pool): State<SqlitePool>,
    State(coordinator): State<Arc<Coordinator>>,
) -> AppResult<Json<Value>> {
    sqlx::query("SELECT 1")
        .execute(&db_pool)
        .await?;

    Ok(Json(json!({
        "status": "ok",
        "connections": coordinator.registry().connection_count().await,
        "searching": coordinator.pool().len().await,
    })))
}

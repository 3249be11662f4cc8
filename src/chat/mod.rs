mod coordinator;
mod pairing;
mod pool;
mod registry;
mod relay;
mod session;
mod sweeper;
mod ws;

pub mod events;


use axum::{routing::get, Router};

use crate::AppState;

pub use coordinator::Coordinator;
pub use pool::WaitingPool;
pub use registry::{ConnectionId, Registry};
pub use session::SessionState;
pub use sweeper::spawn_sweeper;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::chat_ws))
}

use std::sync::Arc;

use axum::{routing::get, Router};

use priority_board_cell::{create_priority_board_router, BoardEngine};

pub fn create_router(engine: Arc<BoardEngine>) -> Router {
    Router::new()
        .route("/", get(|| async { "Priority board API is running!" }))
        .nest("/priority", create_priority_board_router(engine))
}

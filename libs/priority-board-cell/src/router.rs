use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers::{
    drag_cancel,
    drag_end,
    drag_start,
    get_board,
    get_notifications,
    push_event,
    reconcile,
    undo,
    undo_status,
};
use crate::BoardEngine;

pub fn create_priority_board_router(engine: Arc<BoardEngine>) -> Router {
    Router::new()
        .route("/board", get(get_board))
        .route("/drag/start", post(drag_start))
        .route("/drag/end", post(drag_end))
        .route("/drag/cancel", post(drag_cancel))
        .route("/undo", get(undo_status).post(undo))
        .route("/reconcile", post(reconcile))
        .route("/events", post(push_event))
        .route("/notifications", get(get_notifications))
        .with_state(engine)
}

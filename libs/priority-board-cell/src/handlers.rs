use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info};

use shared_models::AppError;

use crate::{
    BoardEngine, DragEndRequest, ItemKey, NotificationsQuery, PriorityBoardError, RealtimeEvent,
};

const DEFAULT_NOTIFICATION_LIMIT: usize = 20;

fn to_app_error(e: PriorityBoardError) -> AppError {
    match e {
        PriorityBoardError::ItemNotFound(_) => AppError::NotFound(e.to_string()),
        PriorityBoardError::InvalidDragTransition { .. }
        | PriorityBoardError::ActiveItemMismatch { .. } => AppError::Conflict(e.to_string()),
        PriorityBoardError::UnregisteredQuery(_) | PriorityBoardError::SerializationError(_) => {
            AppError::BadRequest(e.to_string())
        }
        PriorityBoardError::Transport(_) | PriorityBoardError::Rejected { .. } => {
            AppError::Upstream(e.to_string())
        }
        _ => AppError::Internal(e.to_string()),
    }
}

/// Currently published board
pub async fn get_board(State(engine): State<Arc<BoardEngine>>) -> Result<Json<Value>, AppError> {
    Ok(Json(json!({
        "version": engine.board_version(),
        "board": engine.board().as_ref(),
    })))
}

pub async fn drag_start(
    State(engine): State<Arc<BoardEngine>>,
    Json(active): Json<ItemKey>,
) -> Result<Json<Value>, AppError> {
    engine.on_drag_start(active).await.map_err(to_app_error)?;

    Ok(Json(json!({
        "phase": engine.phase().await,
    })))
}

pub async fn drag_end(
    State(engine): State<Arc<BoardEngine>>,
    Json(request): Json<DragEndRequest>,
) -> Result<Json<Value>, AppError> {
    let pending = engine
        .on_drag_end(request.active, request.over)
        .await
        .map_err(to_app_error)?;

    // The returned handle is dropped; persistence keeps running detached.
    Ok(Json(match pending {
        Some(pending) => json!({
            "committed": true,
            "gesture_id": pending.gesture_id(),
            "moves": pending.move_count(),
            "version": engine.board_version(),
        }),
        None => json!({
            "committed": false,
            "version": engine.board_version(),
        }),
    }))
}

pub async fn drag_cancel(
    State(engine): State<Arc<BoardEngine>>,
) -> Result<Json<Value>, AppError> {
    engine.on_drag_cancel().await.map_err(to_app_error)?;

    Ok(Json(json!({
        "phase": engine.phase().await,
    })))
}

pub async fn undo(State(engine): State<Arc<BoardEngine>>) -> Result<Json<Value>, AppError> {
    let pending = engine.undo().await;

    Ok(Json(match pending {
        Some(pending) => {
            info!("Undo requested, gesture {}", pending.gesture_id());
            json!({
                "undone": true,
                "gesture_id": pending.gesture_id(),
                "moves": pending.move_count(),
                "version": engine.board_version(),
            })
        }
        None => json!({
            "undone": false,
        }),
    }))
}

pub async fn undo_status(
    State(engine): State<Arc<BoardEngine>>,
) -> Result<Json<Value>, AppError> {
    let status = engine.undo_status(Utc::now()).await;
    serde_json::to_value(status)
        .map(Json)
        .map_err(|e| AppError::Internal(e.to_string()))
}

pub async fn reconcile(State(engine): State<Arc<BoardEngine>>) -> Result<Json<Value>, AppError> {
    let outcome = engine.reconcile().await.map_err(|e| {
        error!("Manual reconcile failed: {}", e);
        to_app_error(e)
    })?;

    Ok(Json(json!({
        "outcome": outcome,
        "version": engine.board_version(),
    })))
}

/// Ingress for realtime pushes from the scheduling backend
pub async fn push_event(
    State(engine): State<Arc<BoardEngine>>,
    Json(event): Json<RealtimeEvent>,
) -> Result<Json<Value>, AppError> {
    let delivered = engine.realtime().publish(&event).map_err(to_app_error)?;

    Ok(Json(json!({
        "accepted": true,
        "listeners": delivered,
    })))
}

pub async fn get_notifications(
    State(engine): State<Arc<BoardEngine>>,
    Query(query): Query<NotificationsQuery>,
) -> Result<Json<Value>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_NOTIFICATION_LIMIT);
    let notifications = engine.notifications().recent(limit).await;

    Ok(Json(json!({
        "notifications": notifications,
    })))
}

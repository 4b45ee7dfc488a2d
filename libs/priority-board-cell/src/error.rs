use thiserror::Error;

use crate::DragPhase;

#[derive(Error, Debug)]
pub enum PriorityBoardError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Scheduling API rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Item not found on board: {0}")]
    ItemNotFound(String),

    #[error("Invalid drag transition from {from:?} to {to:?}")]
    InvalidDragTransition { from: DragPhase, to: DragPhase },

    #[error("Drag ended for {ended} but started for {started}")]
    ActiveItemMismatch { started: String, ended: String },

    #[error("Query is not registered with the invalidation coordinator: {0}")]
    UnregisteredQuery(String),

    #[error("Read for {0} was cancelled")]
    ReadCancelled(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

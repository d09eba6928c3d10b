// src/errors.rs
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Room is not active. Orders are only accepted in active rooms.")]
    RoomNotActive,

    #[error("Room is full")]
    RoomFull,

    #[error("Trade not found")]
    TradeNotFound,

    #[error("Trade is already closed")]
    AlreadyClosed,

    #[error("Access denied")]
    Forbidden,

    #[error("Insufficient balance for the entry fee")]
    InsufficientBalance,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short machine-readable tag used in WebSocket error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::RoomNotFound => "room_not_found",
            EngineError::RoomNotActive => "room_not_active",
            EngineError::RoomFull => "room_full",
            EngineError::TradeNotFound => "trade_not_found",
            EngineError::AlreadyClosed => "already_closed",
            EngineError::Forbidden => "forbidden",
            EngineError::InsufficientBalance => "insufficient_balance",
            EngineError::Validation(_) => "validation",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::RoomNotFound | EngineError::TradeNotFound => StatusCode::NOT_FOUND,
            EngineError::Forbidden => StatusCode::FORBIDDEN,
            EngineError::RoomNotActive
            | EngineError::RoomFull
            | EngineError::AlreadyClosed
            | EngineError::InsufficientBalance
            | EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Internal(msg) => {
                tracing::error!("Internal engine error: {}", msg);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "success": false,
            "error": self.kind(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

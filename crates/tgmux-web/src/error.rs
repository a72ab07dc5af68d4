//! Crate-spanning API error, composed at the HTTP boundary from each
//! lower crate's own error type — following the teacher's per-crate error
//! convention (`openintent-vault::VaultError`, `openintent-store::StoreError`,
//! ...) rather than one error enum reaching all the way down.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use tgmux_bridge::BridgeError;
use tgmux_kernel::KernelError;
use tgmux_protocol::ProtocolError;
use tgmux_router::RouterError;
use tgmux_store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("username not occupied: {0}")]
    UsernameNotOccupied(String),

    #[error("file reference expired: {0}")]
    FileReferenceExpired(String),

    #[error("flood wait, retry after {seconds}s")]
    FloodWait { seconds: u32 },

    #[error("no healthy accounts available for this service")]
    PoolEmpty,

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] KernelError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::FloodWait { seconds } => ApiError::FloodWait { seconds },
            ProtocolError::UsernameNotOccupied(detail) => ApiError::UsernameNotOccupied(detail),
            ProtocolError::PeerIdInvalid(detail) => ApiError::BadRequest(detail),
            ProtocolError::FileReferenceExpired(detail) => ApiError::FileReferenceExpired(detail),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::UsernameNotOccupied(_) => (StatusCode::NOT_FOUND, None),
            ApiError::FileReferenceExpired(_) => (StatusCode::GONE, None),
            ApiError::FloodWait { seconds } => (StatusCode::TOO_MANY_REQUESTS, Some(*seconds)),
            ApiError::PoolEmpty => (StatusCode::SERVICE_UNAVAILABLE, None),
            ApiError::Router(RouterError::PoolEmpty { .. }) => (StatusCode::SERVICE_UNAVAILABLE, None),
            ApiError::Bridge(BridgeError::Protocol(ProtocolError::PeerIdInvalid(_))) => (StatusCode::BAD_REQUEST, None),
            ApiError::Bridge(BridgeError::Protocol(ProtocolError::UsernameNotOccupied(_))) => (StatusCode::NOT_FOUND, None),
            ApiError::Bridge(BridgeError::Protocol(ProtocolError::FileReferenceExpired(_))) => (StatusCode::GONE, None),
            ApiError::Bridge(BridgeError::Protocol(ProtocolError::FloodWait { seconds })) => {
                (StatusCode::TOO_MANY_REQUESTS, Some(*seconds))
            }
            ApiError::Scheduler(KernelError::Timeout { .. }) => (StatusCode::SERVICE_UNAVAILABLE, None),
            ApiError::Scheduler(KernelError::SchedulerShutdown) => (StatusCode::SERVICE_UNAVAILABLE, None),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        let mut body = json!({ "status": "error", "error": self.to_string() });
        if let Some(seconds) = retry_after {
            body["retry_after"] = json!(seconds);
        }
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

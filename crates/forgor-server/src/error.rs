//! HTTP error rendering and storage-error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use forgor_core::ApiError;
use forgor_store::StoreError;

/// Wraps [`ApiError`] for axum: renders `{"code": ..., "message": ...}` with
/// the carried status.
#[derive(Debug)]
pub struct AppError(pub ApiError);

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}

/// Map a storage failure onto the wire. The chain/nonce/duplicate variants
/// are the losing side of a write race and keep their semantic codes;
/// everything else collapses to `internal_error` and is logged.
pub fn store_error(err: StoreError) -> AppError {
    let api = match err {
        StoreError::MembershipChainConflict => ApiError::membership_chain_broken(),
        StoreError::EventChainConflict => ApiError::event_chain_broken(),
        StoreError::NonceReused => ApiError::nonce_reused(),
        StoreError::Duplicate(message) => ApiError::conflict(message),
        other => {
            tracing::error!(error = %other, "storage error");
            ApiError::internal_error()
        }
    };
    AppError(api)
}

pub fn vault_id_mismatch() -> AppError {
    AppError(ApiError::bad_request(
        "vault_id_mismatch",
        "vault_id in path does not match body",
    ))
}

//! Request extractors with wire-conformant rejections.

use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use forgor_core::ApiError;

use crate::error::AppError;

/// JSON body extractor whose rejection is the `invalid_json` wire error.
/// Unknown fields are rejected by the models' `deny_unknown_fields`.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(AppError(ApiError::invalid_json(format!(
                "failed to parse JSON: {rejection}"
            )))),
        }
    }
}

/// Parse a path `vault_id` (or other UUID segment), case-insensitively.
pub fn parse_uuid(field: &'static str, raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(&raw.to_lowercase()).map_err(|_| AppError(ApiError::invalid_uuid(field)))
}

/// Parse an optional `since_seq` query value.
pub fn parse_since_seq(raw: Option<&String>) -> Result<u64, AppError> {
    match raw {
        None => Ok(0),
        Some(s) => s.parse::<u64>().map_err(|_| {
            AppError(ApiError::bad_request(
                "invalid_since_seq",
                "since_seq must be a valid integer",
            ))
        }),
    }
}

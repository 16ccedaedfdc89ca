//! Device registration and lookup.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use forgor_core::models::{Base64Bytes, DeviceBundle};
use forgor_core::{ApiError, DeviceId};
use forgor_store::{DeviceRow, Store};

use crate::error::{store_error, AppError};
use crate::extract::AppJson;
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    AppJson(bundle): AppJson<DeviceBundle>,
) -> Result<Response, AppError> {
    state.devices.validate_bundle(&bundle)?;
    state.devices.check_immutability(&bundle).await?;

    let existing = state
        .store
        .get_device(&bundle.device_id)
        .await
        .map_err(store_error)?;
    if existing.is_some() {
        // Identical re-registration is idempotent.
        return Ok((StatusCode::OK, Json(bundle)).into_response());
    }

    let row = DeviceRow {
        device_id: bundle.device_id.clone(),
        pubkey_sign: bundle.device_pubkey_sign.as_slice().to_vec(),
        pubkey_box: bundle.device_pubkey_box.as_slice().to_vec(),
        bundle_sig: bundle.device_bundle_sig.as_slice().to_vec(),
        created_at: String::new(),
    };
    state.store.insert_device(&row).await.map_err(store_error)?;

    Ok((StatusCode::CREATED, Json(bundle)).into_response())
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Response, AppError> {
    let device_id = DeviceId::new(device_id);
    device_id
        .validate()
        .map_err(|_| AppError(ApiError::invalid_device_id()))?;

    let device = state
        .store
        .get_device(&device_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| AppError(ApiError::not_found("device")))?;

    let bundle = DeviceBundle {
        device_id: device.device_id,
        device_pubkey_sign: Base64Bytes(device.pubkey_sign),
        device_pubkey_box: Base64Bytes(device.pubkey_box),
        device_bundle_sig: Base64Bytes(device.bundle_sig),
    };

    Ok((StatusCode::OK, Json(bundle)).into_response())
}

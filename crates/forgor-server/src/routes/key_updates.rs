//! Key-update and key-update-ack endpoints.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use forgor_core::models::{Base64Bytes, KeyUpdate, KeyUpdateAck, U64String};
use forgor_store::Store;

use crate::error::{store_error, vault_id_mismatch, AppError};
use crate::extract::{parse_uuid, AppJson};
use crate::routes::invites::required_device_id;
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    AppJson(ku): AppJson<KeyUpdate>,
) -> Result<Response, AppError> {
    let vault_id = parse_uuid("vault_id", &vault_id)?;
    if ku.vault_id != vault_id {
        return Err(vault_id_mismatch());
    }

    let row = state.key_updates.validate_key_update(&ku).await?;
    state
        .store
        .apply_key_update(&row)
        .await
        .map_err(store_error)?;

    Ok((StatusCode::CREATED, Json(ku)).into_response())
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let device_id = required_device_id(&query, "device_id")?;

    let rows = state
        .store
        .list_key_updates_for_target(&device_id)
        .await
        .map_err(store_error)?;

    let response: Vec<KeyUpdate> = rows
        .into_iter()
        .map(|row| KeyUpdate {
            msg_type: "key_update".into(),
            key_update_id: row.key_update_id,
            vault_id: row.vault_id,
            member_seq: U64String(row.member_seq),
            member_head_hash: Base64Bytes(row.member_head_hash),
            target_device_id: row.target_device_id,
            key_epoch: U64String(row.key_epoch),
            nonce: Base64Bytes(row.nonce),
            wrapped_payload: Base64Bytes(row.wrapped_payload),
            created_by_device_id: row.created_by_device_id,
            signature: Base64Bytes(row.signature),
            created_at: Some(row.created_at),
        })
        .collect();

    Ok((StatusCode::OK, Json(response)).into_response())
}

pub async fn ack(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    AppJson(ack): AppJson<KeyUpdateAck>,
) -> Result<Response, AppError> {
    let vault_id = parse_uuid("vault_id", &vault_id)?;
    if ack.vault_id != vault_id {
        return Err(vault_id_mismatch());
    }

    let row = state.key_updates.validate_key_update_ack(&ack).await?;
    // Ack insert and the member's key_epoch update are one transaction.
    state
        .store
        .apply_key_update_ack(&row)
        .await
        .map_err(store_error)?;

    Ok((StatusCode::CREATED, Json(ack)).into_response())
}

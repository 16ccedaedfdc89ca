//! Invite and invite-claim endpoints.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use forgor_core::models::{Base64Bytes, Invite, InviteClaim};
use forgor_core::{ApiError, DeviceId};
use forgor_store::Store;

use crate::error::{store_error, vault_id_mismatch, AppError};
use crate::extract::{parse_uuid, AppJson};
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    AppJson(invite): AppJson<Invite>,
) -> Result<Response, AppError> {
    let vault_id = parse_uuid("vault_id", &vault_id)?;
    if invite.vault_id != vault_id {
        return Err(vault_id_mismatch());
    }

    let row = state.invites.validate_invite(&invite).await?;
    // Nonce and invite land in the same transaction.
    state.store.apply_invite(&row).await.map_err(store_error)?;

    Ok((StatusCode::CREATED, Json(invite)).into_response())
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let device_id = required_device_id(&query, "device_id")?;

    let rows = state
        .store
        .list_invites_for_target(&device_id)
        .await
        .map_err(store_error)?;

    let response: Vec<Invite> = rows
        .into_iter()
        .map(|row| Invite {
            msg_type: "invite".into(),
            invite_id: row.invite_id,
            vault_id: row.vault_id,
            target_device_id: row.target_device_id,
            target_device_pubkey_sign: Base64Bytes(row.target_pubkey_sign),
            target_device_pubkey_box: Base64Bytes(row.target_pubkey_box),
            target_device_bundle_sig: Base64Bytes(row.target_bundle_sig),
            nonce: Base64Bytes(row.nonce),
            wrapped_payload: Base64Bytes(row.wrapped_payload),
            created_by_device_id: row.created_by_device_id,
            single_use: row.single_use,
            signature: Base64Bytes(row.signature),
            created_at: Some(row.created_at),
        })
        .collect();

    Ok((StatusCode::OK, Json(response)).into_response())
}

pub async fn claim(
    State(state): State<AppState>,
    Path(invite_id): Path<String>,
    AppJson(claim): AppJson<InviteClaim>,
) -> Result<Response, AppError> {
    let invite_id = parse_uuid("invite_id", &invite_id)?;
    if claim.invite_id != invite_id {
        return Err(AppError(ApiError::bad_request(
            "invite_id_mismatch",
            "invite_id in path does not match body",
        )));
    }

    let row = state.invites.validate_invite_claim(&claim).await?;
    // Idempotent: replaying an identical claim is a no-op success.
    state
        .store
        .insert_invite_claim(&row)
        .await
        .map_err(store_error)?;

    Ok((StatusCode::CREATED, Json(claim)).into_response())
}

pub async fn claims_list(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let creator = required_device_id(&query, "created_by_device_id")?;

    let rows = state
        .store
        .list_claims_by_creator(&creator)
        .await
        .map_err(store_error)?;

    let response: Vec<InviteClaim> = rows
        .into_iter()
        .map(|row| InviteClaim {
            msg_type: "invite_claim".into(),
            invite_id: row.invite_id,
            vault_id: row.vault_id,
            device_id: row.device_id,
            signature: Base64Bytes(row.claim_sig),
            created_at: Some(row.created_at),
        })
        .collect();

    Ok((StatusCode::OK, Json(response)).into_response())
}

pub(crate) fn required_device_id(
    query: &HashMap<String, String>,
    param: &'static str,
) -> Result<DeviceId, AppError> {
    let raw = query.get(param).ok_or_else(|| {
        AppError(ApiError::bad_request(
            "missing_device_id",
            format!("{param} query parameter is required"),
        ))
    })?;
    let device_id = DeviceId::new(raw.clone());
    device_id
        .validate()
        .map_err(|_| AppError(ApiError::invalid_device_id()))?;
    Ok(device_id)
}

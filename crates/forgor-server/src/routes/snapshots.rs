//! Snapshot endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use forgor_core::models::{Base64Bytes, Snapshot, U64String};
use forgor_core::ApiError;
use forgor_store::Store;

use crate::error::{store_error, vault_id_mismatch, AppError};
use crate::extract::{parse_uuid, AppJson};
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    AppJson(snapshot): AppJson<Snapshot>,
) -> Result<Response, AppError> {
    let vault_id = parse_uuid("vault_id", &vault_id)?;
    if snapshot.vault_id != vault_id {
        return Err(vault_id_mismatch());
    }

    let row = state.snapshots.validate_snapshot(&snapshot).await?;
    state
        .store
        .apply_snapshot(&row)
        .await
        .map_err(store_error)?;

    // Retention runs off the request path; a pruning failure never affects
    // the accepted write.
    let store = state.store.clone();
    let keep = state.snapshot_keep;
    tokio::spawn(async move {
        if let Err(err) = store.prune_snapshots(&vault_id, keep).await {
            tracing::warn!(error = %err, vault_id = %vault_id, "snapshot prune failed");
        }
    });

    Ok((StatusCode::CREATED, Json(snapshot)).into_response())
}

pub async fn latest(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
) -> Result<Response, AppError> {
    let vault_id = parse_uuid("vault_id", &vault_id)?;

    let row = state
        .store
        .latest_snapshot(&vault_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| AppError(ApiError::not_found("snapshot")))?;

    let response = Snapshot {
        msg_type: "snapshot".into(),
        snapshot_id: row.snapshot_id,
        vault_id: row.vault_id,
        base_seq: U64String(row.base_seq),
        member_seq: U64String(row.member_seq),
        member_head_hash: Base64Bytes(row.member_head_hash),
        base_counter_map: Base64Bytes(row.base_counter_map),
        head_hash_map: Base64Bytes(row.head_hash_map),
        lamport_at_snapshot: U64String(row.lamport_at_snapshot),
        key_epoch: U64String(row.key_epoch),
        nonce: Base64Bytes(row.nonce),
        ciphertext: Base64Bytes(row.ciphertext),
        signature: Base64Bytes(row.signature),
        created_by_device_id: row.created_by_device_id,
        created_at: Some(row.created_at),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

//! Per-device event endpoints.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use forgor_core::models::{Base64Bytes, Event, EventAccepted, U64String};
use forgor_store::Store;

use crate::error::{store_error, vault_id_mismatch, AppError};
use crate::extract::{parse_since_seq, parse_uuid, AppJson};
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    AppJson(event): AppJson<Event>,
) -> Result<Response, AppError> {
    let vault_id = parse_uuid("vault_id", &vault_id)?;
    if event.vault_id != vault_id {
        return Err(vault_id_mismatch());
    }

    let row = state.events.validate_event(&event).await?;
    let seq = state.store.apply_event(&row).await.map_err(store_error)?;

    let response = EventAccepted {
        seq: U64String(seq),
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

pub async fn list(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let vault_id = parse_uuid("vault_id", &vault_id)?;
    let since_seq = parse_since_seq(query.get("since_seq"))?;

    let rows = state
        .store
        .list_events_since(&vault_id, since_seq)
        .await
        .map_err(store_error)?;

    let response: Vec<Event> = rows
        .into_iter()
        .map(|row| Event {
            msg_type: "event".into(),
            event_id: row.event_id,
            vault_id: row.vault_id,
            device_id: row.device_id,
            counter: U64String(row.counter),
            lamport: U64String(row.lamport),
            key_epoch: U64String(row.key_epoch),
            prev_hash: Base64Bytes(row.prev_hash),
            nonce: Base64Bytes(row.nonce),
            ciphertext: Base64Bytes(row.ciphertext),
            signature: Base64Bytes(row.signature),
            seq: Some(U64String(row.seq)),
            created_at: Some(row.created_at),
        })
        .collect();

    Ok((StatusCode::OK, Json(response)).into_response())
}

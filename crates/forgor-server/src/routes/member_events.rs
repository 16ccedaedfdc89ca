//! Membership-chain endpoints: event submission, event listing, and the
//! current member set.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use forgor_core::models::{
    Base64Bytes, MemberEvent, U64String, VaultMember, VaultMembershipResponse,
};
use forgor_core::ApiError;
use forgor_store::{MemberEventRow, Store};
use uuid::Uuid;

use crate::error::{store_error, vault_id_mismatch, AppError};
use crate::extract::{parse_since_seq, parse_uuid, AppJson};
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
    AppJson(event): AppJson<MemberEvent>,
) -> Result<Response, AppError> {
    let vault_id = parse_uuid("vault_id", &vault_id)?;
    if event.vault_id != vault_id {
        return Err(vault_id_mismatch());
    }

    let row = match event.msg_type.as_str() {
        "member_add" => state.membership.validate_member_add(&event).await?,
        "member_remove" => state.membership.validate_member_remove(&event).await?,
        _ => {
            return Err(AppError(ApiError::bad_request(
                "invalid_msg_type",
                "msg_type must be 'member_add' or 'member_remove'",
            )))
        }
    };

    state
        .store
        .apply_member_event(&row)
        .await
        .map_err(store_error)?;

    Ok((StatusCode::CREATED, Json(event)).into_response())
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
        .list_member_events_since(&vault_id, since_seq)
        .await
        .map_err(store_error)?;

    let response: Vec<MemberEvent> = rows.into_iter().map(row_to_wire).collect();
    Ok((StatusCode::OK, Json(response)).into_response())
}

pub async fn members(
    State(state): State<AppState>,
    Path(vault_id): Path<String>,
) -> Result<Response, AppError> {
    let vault_id = parse_uuid("vault_id", &vault_id)?;

    let head = state
        .store
        .get_membership_head(&vault_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| AppError(ApiError::not_found("vault")))?;

    let members = state
        .store
        .list_members(&vault_id)
        .await
        .map_err(store_error)?;

    let response = VaultMembershipResponse {
        member_seq: U64String(head.member_seq),
        head_hash: Base64Bytes(head.member_head_hash),
        members: members
            .into_iter()
            .map(|m| VaultMember {
                device_id: m.device_id,
                device_pubkey_sign: Base64Bytes(m.pubkey_sign),
                device_pubkey_box: Base64Bytes(m.pubkey_box),
                key_epoch: U64String(m.key_epoch),
            })
            .collect(),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

fn row_to_wire(row: MemberEventRow) -> MemberEvent {
    let is_add = row.msg_type == "member_add";
    MemberEvent {
        msg_type: row.msg_type,
        member_event_id: row.member_event_id,
        vault_id: row.vault_id,
        member_seq: U64String(row.member_seq),
        prev_hash: Base64Bytes(row.prev_hash),
        actor_device_id: row.actor_device_id,
        subject_device_id: row.subject_device_id,
        subject_pubkey_sign: if is_add {
            Base64Bytes(row.subject_pubkey_sign)
        } else {
            Base64Bytes::default()
        },
        subject_pubkey_box: if is_add {
            Base64Bytes(row.subject_pubkey_box)
        } else {
            Base64Bytes::default()
        },
        subject_bundle_sig: if is_add {
            Base64Bytes(row.subject_bundle_sig)
        } else {
            Base64Bytes::default()
        },
        invite_id: if is_add {
            row.invite_id.unwrap_or_else(Uuid::nil)
        } else {
            Uuid::nil()
        },
        claim_sig: if is_add {
            Base64Bytes(row.claim_sig)
        } else {
            Base64Bytes::default()
        },
        signature: Base64Bytes(row.signature),
        created_at: Some(row.created_at),
    }
}

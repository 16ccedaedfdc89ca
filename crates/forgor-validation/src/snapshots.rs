//! Snapshot validation.
//!
//! Snapshots are owner-issued encrypted checkpoints bound to the current
//! membership head. The counter and hash maps inside arrive pre-encoded from
//! the client; the server only bounds their size.

use std::sync::Arc;

use forgor_core::models::{
    Snapshot, HASH_LEN, MAX_BASE_COUNTER_MAP, MAX_HEAD_HASH_MAP, MAX_SNAPSHOT_CIPHERTEXT,
    NONCE_LEN, SIGNATURE_LEN,
};
use forgor_core::{signbytes, ApiError, PublicKey, Signature};
use forgor_store::{NonceKind, SnapshotRow, Store};

use crate::internal;

pub struct SnapshotsValidator<S> {
    store: Arc<S>,
}

impl<S: Store> SnapshotsValidator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn validate_snapshot(&self, snapshot: &Snapshot) -> Result<SnapshotRow, ApiError> {
        if snapshot.msg_type != "snapshot" {
            return Err(ApiError::bad_request(
                "invalid_msg_type",
                "expected 'snapshot'",
            ));
        }

        if snapshot.nonce.len() != NONCE_LEN {
            return Err(ApiError::invalid_nonce());
        }
        if snapshot.signature.len() != SIGNATURE_LEN {
            return Err(ApiError::invalid_signature());
        }
        if snapshot.member_head_hash.len() != HASH_LEN {
            return Err(ApiError::invalid_hash());
        }
        if snapshot.ciphertext.len() > MAX_SNAPSHOT_CIPHERTEXT {
            return Err(ApiError::payload_too_large(
                "snapshot ciphertext exceeds maximum size",
            ));
        }
        if snapshot.base_counter_map.len() > MAX_BASE_COUNTER_MAP {
            return Err(ApiError::payload_too_large(
                "base_counter_map exceeds maximum size",
            ));
        }
        if snapshot.head_hash_map.len() > MAX_HEAD_HASH_MAP {
            return Err(ApiError::payload_too_large(
                "head_hash_map exceeds maximum size",
            ));
        }

        snapshot
            .created_by_device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;

        let vault = self
            .store
            .get_vault(&snapshot.vault_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found("vault"))?;

        if snapshot.created_by_device_id != vault.owner_device_id {
            return Err(ApiError::owner_required());
        }

        let creator = self
            .store
            .get_member(&snapshot.vault_id, &snapshot.created_by_device_id)
            .await
            .map_err(internal)?;
        let creator = match creator {
            Some(creator) if creator.is_member => creator,
            _ => return Err(ApiError::membership_required()),
        };

        let head = self
            .store
            .get_membership_head(&snapshot.vault_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| {
                ApiError::bad_request(
                    "missing_membership_head",
                    "vault membership head is missing",
                )
            })?;

        if snapshot.member_seq.get() != head.member_seq {
            return Err(ApiError::bad_request(
                "member_seq_mismatch",
                "member_seq does not match current membership head",
            ));
        }
        if snapshot.member_head_hash.as_slice() != head.member_head_hash.as_slice() {
            return Err(ApiError::bad_request(
                "member_head_hash_mismatch",
                "member_head_hash does not match current membership head",
            ));
        }

        let used = self
            .store
            .nonce_used(
                NonceKind::Snapshot,
                &snapshot.vault_id,
                &snapshot.created_by_device_id,
                &snapshot.nonce,
            )
            .await
            .map_err(internal)?;
        if used {
            return Err(ApiError::nonce_reused());
        }

        let creator_device_id_bytes = snapshot
            .created_by_device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;

        let message = signbytes::snapshot(
            &snapshot.snapshot_id,
            &snapshot.vault_id,
            snapshot.base_seq.get(),
            snapshot.member_seq.get(),
            snapshot
                .member_head_hash
                .as_array::<HASH_LEN>()
                .ok_or_else(ApiError::invalid_hash)?,
            &snapshot.base_counter_map,
            &snapshot.head_hash_map,
            snapshot.lamport_at_snapshot.get(),
            snapshot.key_epoch.get(),
            snapshot
                .nonce
                .as_array::<NONCE_LEN>()
                .ok_or_else(ApiError::invalid_nonce)?,
            &snapshot.ciphertext,
            &creator_device_id_bytes,
        );

        let creator_pubkey = PublicKey::from_bytes(
            creator
                .pubkey_sign
                .as_slice()
                .try_into()
                .map_err(|_| ApiError::internal_error())?,
        );
        let signature = Signature::from_bytes(
            *snapshot
                .signature
                .as_array::<SIGNATURE_LEN>()
                .ok_or_else(ApiError::invalid_signature)?,
        );
        creator_pubkey
            .verify(&message, &signature)
            .map_err(|_| ApiError::invalid_signature())?;

        Ok(SnapshotRow {
            snapshot_id: snapshot.snapshot_id,
            vault_id: snapshot.vault_id,
            base_seq: snapshot.base_seq.get(),
            member_seq: snapshot.member_seq.get(),
            member_head_hash: snapshot.member_head_hash.as_slice().to_vec(),
            base_counter_map: snapshot.base_counter_map.as_slice().to_vec(),
            head_hash_map: snapshot.head_hash_map.as_slice().to_vec(),
            lamport_at_snapshot: snapshot.lamport_at_snapshot.get(),
            key_epoch: snapshot.key_epoch.get(),
            nonce: snapshot.nonce.as_slice().to_vec(),
            ciphertext: snapshot.ciphertext.as_slice().to_vec(),
            signature: snapshot.signature.as_slice().to_vec(),
            created_by_device_id: snapshot.created_by_device_id.clone(),
            created_at: snapshot.created_at.clone().unwrap_or_default(),
        })
    }
}

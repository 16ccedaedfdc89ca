//! Key-update and key-update-ack validation.
//!
//! Both bind to the current membership head: the head at validation time is
//! the authorization context. Key updates are owner-issued per-target
//! envelopes; acks are each member's adoption of an epoch.

use std::sync::Arc;

use forgor_core::models::{
    KeyUpdate, KeyUpdateAck, HASH_LEN, MAX_WRAPPED_PAYLOAD, NONCE_LEN, SIGNATURE_LEN,
};
use forgor_core::{signbytes, ApiError, PublicKey, Signature};
use forgor_store::{KeyUpdateAckRow, KeyUpdateRow, NonceKind, Store};

use crate::internal;

pub struct KeyUpdatesValidator<S> {
    store: Arc<S>,
}

impl<S: Store> KeyUpdatesValidator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn validate_key_update(&self, ku: &KeyUpdate) -> Result<KeyUpdateRow, ApiError> {
        if ku.msg_type != "key_update" {
            return Err(ApiError::bad_request(
                "invalid_msg_type",
                "expected 'key_update'",
            ));
        }

        if ku.nonce.len() != NONCE_LEN {
            return Err(ApiError::invalid_nonce());
        }
        if ku.signature.len() != SIGNATURE_LEN {
            return Err(ApiError::invalid_signature());
        }
        if ku.member_head_hash.len() != HASH_LEN {
            return Err(ApiError::invalid_hash());
        }
        if ku.wrapped_payload.len() > MAX_WRAPPED_PAYLOAD {
            return Err(ApiError::payload_too_large(
                "wrapped_payload exceeds maximum size",
            ));
        }

        ku.target_device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;
        ku.created_by_device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;

        let vault = self
            .store
            .get_vault(&ku.vault_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found("vault"))?;

        if ku.created_by_device_id != vault.owner_device_id {
            return Err(ApiError::owner_required());
        }

        let creator = self
            .store
            .get_member(&ku.vault_id, &ku.created_by_device_id)
            .await
            .map_err(internal)?;
        let creator = match creator {
            Some(creator) if creator.is_member => creator,
            _ => return Err(ApiError::membership_required()),
        };

        let target_is_member = self
            .store
            .is_member(&ku.vault_id, &ku.target_device_id)
            .await
            .map_err(internal)?;
        if !target_is_member {
            return Err(ApiError::bad_request(
                "target_not_member",
                "target_device_id is not a current member",
            ));
        }

        let head = self
            .store
            .get_membership_head(&ku.vault_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| {
                ApiError::bad_request(
                    "missing_membership_head",
                    "vault membership head is missing",
                )
            })?;

        if ku.member_seq.get() != head.member_seq {
            return Err(ApiError::bad_request(
                "member_seq_mismatch",
                "member_seq does not match current membership head",
            ));
        }
        if ku.member_head_hash.as_slice() != head.member_head_hash.as_slice() {
            return Err(ApiError::bad_request(
                "member_head_hash_mismatch",
                "member_head_hash does not match current membership head",
            ));
        }

        let exists = self
            .store
            .key_update_exists(&ku.vault_id, ku.key_epoch.get(), &ku.target_device_id)
            .await
            .map_err(internal)?;
        if exists {
            return Err(ApiError::conflict(
                "key update for this epoch and target already exists",
            ));
        }

        let used = self
            .store
            .nonce_used(
                NonceKind::KeyUpdate,
                &ku.vault_id,
                &ku.created_by_device_id,
                &ku.nonce,
            )
            .await
            .map_err(internal)?;
        if used {
            return Err(ApiError::nonce_reused());
        }

        let target_device_id_bytes = ku
            .target_device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;
        let creator_device_id_bytes = ku
            .created_by_device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;

        let message = signbytes::key_update(
            &ku.key_update_id,
            &ku.vault_id,
            ku.member_seq.get(),
            ku.member_head_hash
                .as_array::<HASH_LEN>()
                .ok_or_else(ApiError::invalid_hash)?,
            &target_device_id_bytes,
            ku.key_epoch.get(),
            ku.nonce
                .as_array::<NONCE_LEN>()
                .ok_or_else(ApiError::invalid_nonce)?,
            &ku.wrapped_payload,
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
            *ku.signature
                .as_array::<SIGNATURE_LEN>()
                .ok_or_else(ApiError::invalid_signature)?,
        );
        creator_pubkey
            .verify(&message, &signature)
            .map_err(|_| ApiError::invalid_signature())?;

        Ok(KeyUpdateRow {
            key_update_id: ku.key_update_id,
            vault_id: ku.vault_id,
            member_seq: ku.member_seq.get(),
            member_head_hash: ku.member_head_hash.as_slice().to_vec(),
            target_device_id: ku.target_device_id.clone(),
            key_epoch: ku.key_epoch.get(),
            nonce: ku.nonce.as_slice().to_vec(),
            wrapped_payload: ku.wrapped_payload.as_slice().to_vec(),
            created_by_device_id: ku.created_by_device_id.clone(),
            signature: ku.signature.as_slice().to_vec(),
            created_at: ku.created_at.clone().unwrap_or_default(),
        })
    }

    pub async fn validate_key_update_ack(
        &self,
        ack: &KeyUpdateAck,
    ) -> Result<KeyUpdateAckRow, ApiError> {
        if ack.msg_type != "key_update_ack" {
            return Err(ApiError::bad_request(
                "invalid_msg_type",
                "expected 'key_update_ack'",
            ));
        }

        if ack.signature.len() != SIGNATURE_LEN {
            return Err(ApiError::invalid_signature());
        }
        if ack.member_head_hash.len() != HASH_LEN {
            return Err(ApiError::invalid_hash());
        }

        ack.device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;

        let member = self
            .store
            .get_member(&ack.vault_id, &ack.device_id)
            .await
            .map_err(internal)?;
        let member = match member {
            Some(member) if member.is_member => member,
            _ => return Err(ApiError::membership_required()),
        };

        let head = self
            .store
            .get_membership_head(&ack.vault_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| {
                ApiError::bad_request(
                    "missing_membership_head",
                    "vault membership head is missing",
                )
            })?;

        if ack.member_seq.get() != head.member_seq {
            return Err(ApiError::bad_request(
                "member_seq_mismatch",
                "member_seq does not match current membership head",
            ));
        }
        if ack.member_head_hash.as_slice() != head.member_head_hash.as_slice() {
            return Err(ApiError::bad_request(
                "member_head_hash_mismatch",
                "member_head_hash does not match current membership head",
            ));
        }

        let device_id_bytes = ack
            .device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;

        let message = signbytes::key_update_ack(
            &ack.vault_id,
            &device_id_bytes,
            ack.key_epoch.get(),
            ack.member_seq.get(),
            ack.member_head_hash
                .as_array::<HASH_LEN>()
                .ok_or_else(ApiError::invalid_hash)?,
        );

        let member_pubkey = PublicKey::from_bytes(
            member
                .pubkey_sign
                .as_slice()
                .try_into()
                .map_err(|_| ApiError::internal_error())?,
        );
        let signature = Signature::from_bytes(
            *ack.signature
                .as_array::<SIGNATURE_LEN>()
                .ok_or_else(ApiError::invalid_signature)?,
        );
        member_pubkey
            .verify(&message, &signature)
            .map_err(|_| ApiError::invalid_signature())?;

        Ok(KeyUpdateAckRow {
            vault_id: ack.vault_id,
            key_epoch: ack.key_epoch.get(),
            device_id: ack.device_id.clone(),
            member_seq: ack.member_seq.get(),
            member_head_hash: ack.member_head_hash.as_slice().to_vec(),
            signature: ack.signature.as_slice().to_vec(),
            created_at: ack.created_at.clone().unwrap_or_default(),
        })
    }
}

//! Per-device encrypted event validation.
//!
//! Each `(vault, device)` pair carries its own hash chain: counter dense
//! from 1, prev_hash linking to the previous event's hash, zero at genesis.
//! The server treats `lamport` and `key_epoch` as opaque; clients arbitrate
//! those.

use std::sync::Arc;

use forgor_core::models::{Event, HASH_LEN, MAX_EVENT_CIPHERTEXT, NONCE_LEN, SIGNATURE_LEN};
use forgor_core::{signbytes, ApiError, PublicKey, Sha256Hash, Signature};
use forgor_store::{EventRow, Store};

use crate::internal;

pub struct EventsValidator<S> {
    store: Arc<S>,
}

impl<S: Store> EventsValidator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn validate_event(&self, event: &Event) -> Result<EventRow, ApiError> {
        if event.msg_type != "event" {
            return Err(ApiError::bad_request("invalid_msg_type", "expected 'event'"));
        }

        if event.prev_hash.len() != HASH_LEN {
            return Err(ApiError::invalid_hash());
        }
        if event.nonce.len() != NONCE_LEN {
            return Err(ApiError::invalid_nonce());
        }
        if event.signature.len() != SIGNATURE_LEN {
            return Err(ApiError::invalid_signature());
        }
        if event.ciphertext.len() > MAX_EVENT_CIPHERTEXT {
            return Err(ApiError::payload_too_large(
                "event ciphertext exceeds maximum size",
            ));
        }

        event
            .device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;

        self.store
            .get_vault(&event.vault_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found("vault"))?;

        let member = self
            .store
            .get_member(&event.vault_id, &event.device_id)
            .await
            .map_err(internal)?;
        let member = match member {
            Some(member) if member.is_member => member,
            _ => return Err(ApiError::membership_required()),
        };

        let counter = event.counter.get();
        let prev_hash = event
            .prev_hash
            .as_array::<HASH_LEN>()
            .ok_or_else(ApiError::invalid_hash)?;

        let head = self
            .store
            .get_event_head(&event.vault_id, &event.device_id)
            .await
            .map_err(internal)?;
        match head {
            None => {
                if counter != 1 || prev_hash != &[0u8; 32] {
                    return Err(ApiError::event_chain_broken());
                }
            }
            Some(head) => {
                if counter != head.last_counter + 1
                    || prev_hash.as_slice() != head.last_hash.as_slice()
                {
                    return Err(ApiError::event_chain_broken());
                }
            }
        }

        let exists = self
            .store
            .event_id_exists(&event.vault_id, &event.device_id, &event.event_id)
            .await
            .map_err(internal)?;
        if exists {
            return Err(ApiError::conflict("event_id already exists"));
        }

        let device_id_bytes = event
            .device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;

        let message = signbytes::event(
            &event.event_id,
            &event.vault_id,
            &device_id_bytes,
            counter,
            event.lamport.get(),
            event.key_epoch.get(),
            prev_hash,
            event.nonce.as_array::<NONCE_LEN>().ok_or_else(ApiError::invalid_nonce)?,
            &event.ciphertext,
        );

        let member_pubkey = PublicKey::from_bytes(
            member
                .pubkey_sign
                .as_slice()
                .try_into()
                .map_err(|_| ApiError::internal_error())?,
        );
        let signature = Signature::from_bytes(
            *event
                .signature
                .as_array::<SIGNATURE_LEN>()
                .ok_or_else(ApiError::invalid_signature)?,
        );
        member_pubkey
            .verify(&message, &signature)
            .map_err(|_| ApiError::invalid_signature())?;

        let event_hash = Sha256Hash::hash(&message);

        Ok(EventRow {
            seq: 0,
            event_id: event.event_id,
            event_hash: event_hash.0.to_vec(),
            vault_id: event.vault_id,
            device_id: event.device_id.clone(),
            counter,
            lamport: event.lamport.get(),
            key_epoch: event.key_epoch.get(),
            prev_hash: event.prev_hash.as_slice().to_vec(),
            nonce: event.nonce.as_slice().to_vec(),
            ciphertext: event.ciphertext.as_slice().to_vec(),
            signature: event.signature.as_slice().to_vec(),
            created_at: event.created_at.clone().unwrap_or_default(),
        })
    }
}

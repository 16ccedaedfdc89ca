//! Invite and invite-claim validation.
//!
//! An invite pre-stages a device's admission: the creator (any current
//! member) signs the target's full bundle plus a wrapped key payload under a
//! fresh nonce. The claim is the target's proof of key possession over
//! `(invite_id, vault_id, device_id)`.

use std::sync::Arc;

use forgor_core::models::{
    Invite, InviteClaim, MAX_WRAPPED_PAYLOAD, NONCE_LEN, PUBLIC_KEY_LEN, SIGNATURE_LEN,
};
use forgor_core::{signbytes, ApiError, PublicKey, Signature};
use forgor_store::{InviteClaimRow, InviteRow, NonceKind, Store};

use crate::internal;

pub struct InvitesValidator<S> {
    store: Arc<S>,
}

impl<S: Store> InvitesValidator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn validate_invite(&self, invite: &Invite) -> Result<InviteRow, ApiError> {
        if invite.msg_type != "invite" {
            return Err(ApiError::bad_request("invalid_msg_type", "expected 'invite'"));
        }

        if invite.nonce.len() != NONCE_LEN {
            return Err(ApiError::invalid_nonce());
        }
        if invite.signature.len() != SIGNATURE_LEN {
            return Err(ApiError::invalid_signature());
        }
        if invite.wrapped_payload.len() > MAX_WRAPPED_PAYLOAD {
            return Err(ApiError::payload_too_large(
                "wrapped_payload exceeds maximum size",
            ));
        }
        if invite.target_device_pubkey_sign.len() != PUBLIC_KEY_LEN {
            return Err(ApiError::invalid_public_key());
        }
        if invite.target_device_pubkey_box.len() != PUBLIC_KEY_LEN {
            return Err(ApiError::invalid_public_key());
        }
        if invite.target_device_bundle_sig.len() != SIGNATURE_LEN {
            return Err(ApiError::invalid_signature());
        }

        invite
            .target_device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;
        invite
            .created_by_device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;

        self.store
            .get_vault(&invite.vault_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found("vault"))?;

        let creator = self
            .store
            .get_member(&invite.vault_id, &invite.created_by_device_id)
            .await
            .map_err(internal)?;
        let creator = match creator {
            Some(creator) if creator.is_member => creator,
            _ => return Err(ApiError::membership_required()),
        };

        let target_pubkey_sign = PublicKey::from_bytes(
            *invite
                .target_device_pubkey_sign
                .as_array::<PUBLIC_KEY_LEN>()
                .ok_or_else(ApiError::invalid_public_key)?,
        );
        invite
            .target_device_id
            .verify_pubkey(&target_pubkey_sign)
            .map_err(|_| {
                ApiError::bad_request(
                    "target_device_id_mismatch",
                    "target_device_id does not match sha256(target_device_pubkey_sign)",
                )
            })?;

        let target_device_id_bytes = invite
            .target_device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;
        let target_pubkey_box = invite
            .target_device_pubkey_box
            .as_array::<PUBLIC_KEY_LEN>()
            .ok_or_else(ApiError::invalid_public_key)?;
        let target_bundle_sig = Signature::from_bytes(
            *invite
                .target_device_bundle_sig
                .as_array::<SIGNATURE_LEN>()
                .ok_or_else(ApiError::invalid_signature)?,
        );

        let bundle_message = signbytes::device_bundle(
            &target_device_id_bytes,
            target_pubkey_sign.as_bytes(),
            target_pubkey_box,
        );
        target_pubkey_sign
            .verify(&bundle_message, &target_bundle_sig)
            .map_err(|_| {
                ApiError::bad_request(
                    "invalid_target_bundle_sig",
                    "target bundle signature verification failed",
                )
            })?;

        let used = self
            .store
            .nonce_used(
                NonceKind::Invite,
                &invite.vault_id,
                &invite.created_by_device_id,
                &invite.nonce,
            )
            .await
            .map_err(internal)?;
        if used {
            return Err(ApiError::nonce_reused());
        }

        let creator_device_id_bytes = invite
            .created_by_device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;

        let message = signbytes::invite(
            &invite.invite_id,
            &invite.vault_id,
            &target_device_id_bytes,
            target_pubkey_sign.as_bytes(),
            target_pubkey_box,
            target_bundle_sig.as_bytes(),
            invite
                .nonce
                .as_array::<NONCE_LEN>()
                .ok_or_else(ApiError::invalid_nonce)?,
            &invite.wrapped_payload,
            &creator_device_id_bytes,
            invite.single_use,
        );

        let creator_pubkey = PublicKey::from_bytes(
            creator
                .pubkey_sign
                .as_slice()
                .try_into()
                .map_err(|_| ApiError::internal_error())?,
        );
        let signature = Signature::from_bytes(
            *invite
                .signature
                .as_array::<SIGNATURE_LEN>()
                .ok_or_else(ApiError::invalid_signature)?,
        );
        creator_pubkey
            .verify(&message, &signature)
            .map_err(|_| ApiError::invalid_signature())?;

        Ok(InviteRow {
            invite_id: invite.invite_id,
            vault_id: invite.vault_id,
            target_device_id: invite.target_device_id.clone(),
            target_pubkey_sign: invite.target_device_pubkey_sign.as_slice().to_vec(),
            target_pubkey_box: invite.target_device_pubkey_box.as_slice().to_vec(),
            target_bundle_sig: invite.target_device_bundle_sig.as_slice().to_vec(),
            nonce: invite.nonce.as_slice().to_vec(),
            wrapped_payload: invite.wrapped_payload.as_slice().to_vec(),
            created_by_device_id: invite.created_by_device_id.clone(),
            single_use: invite.single_use,
            used: false,
            signature: invite.signature.as_slice().to_vec(),
            created_at: invite.created_at.clone().unwrap_or_default(),
        })
    }

    pub async fn validate_invite_claim(
        &self,
        claim: &InviteClaim,
    ) -> Result<InviteClaimRow, ApiError> {
        if claim.msg_type != "invite_claim" {
            return Err(ApiError::bad_request(
                "invalid_msg_type",
                "expected 'invite_claim'",
            ));
        }

        if claim.signature.len() != SIGNATURE_LEN {
            return Err(ApiError::invalid_signature());
        }

        claim
            .device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;

        let invite = self
            .store
            .get_invite(&claim.invite_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found("invite"))?;

        if invite.vault_id != claim.vault_id {
            return Err(ApiError::bad_request(
                "vault_mismatch",
                "vault_id does not match invite",
            ));
        }
        if invite.target_device_id != claim.device_id {
            return Err(ApiError::bad_request(
                "device_mismatch",
                "device_id does not match invite target",
            ));
        }

        let device = self
            .store
            .get_device(&claim.device_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found("device"))?;

        let device_id_bytes = claim
            .device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;

        let message =
            signbytes::invite_claim(&claim.invite_id, &claim.vault_id, &device_id_bytes);

        let device_pubkey = PublicKey::from_bytes(
            device
                .pubkey_sign
                .as_slice()
                .try_into()
                .map_err(|_| ApiError::internal_error())?,
        );
        let signature = Signature::from_bytes(
            *claim
                .signature
                .as_array::<SIGNATURE_LEN>()
                .ok_or_else(ApiError::invalid_signature)?,
        );
        device_pubkey
            .verify(&message, &signature)
            .map_err(|_| ApiError::invalid_signature())?;

        Ok(InviteClaimRow {
            invite_id: claim.invite_id,
            vault_id: claim.vault_id,
            device_id: claim.device_id.clone(),
            claim_sig: claim.signature.as_slice().to_vec(),
            created_at: claim.created_at.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgor_core::models::Base64Bytes;
    use forgor_store::MemoryStore;
    use forgor_testkit::{genesis_member_add, invite, invite_claim, TestDevice};
    use uuid::Uuid;

    async fn setup_vault() -> (InvitesValidator<MemoryStore>, Arc<MemoryStore>, TestDevice, Uuid)
    {
        let store = Arc::new(MemoryStore::new());
        let owner = TestDevice::from_seed(1);
        let vault_id = Uuid::new_v4();

        let membership = crate::MembershipValidator::new(Arc::clone(&store));
        let genesis = genesis_member_add(&owner, vault_id);
        let row = membership.validate_member_add(&genesis).await.unwrap();
        store.apply_member_event(&row).await.unwrap();

        (InvitesValidator::new(Arc::clone(&store)), store, owner, vault_id)
    }

    #[tokio::test]
    async fn test_valid_invite() {
        let (validator, store, owner, vault_id) = setup_vault().await;
        let target = TestDevice::from_seed(2);

        let wire = invite(&owner, &target, vault_id, [1; 24], true);
        let row = validator.validate_invite(&wire).await.unwrap();
        assert!(!row.used);
        store.apply_invite(&row).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_member_creator_rejected() {
        let (validator, _store, _owner, vault_id) = setup_vault().await;
        let stranger = TestDevice::from_seed(3);
        let target = TestDevice::from_seed(2);

        let wire = invite(&stranger, &target, vault_id, [1; 24], true);
        assert_eq!(
            validator.validate_invite(&wire).await.unwrap_err().code,
            "membership_required"
        );
    }

    #[tokio::test]
    async fn test_nonce_replay_rejected() {
        let (validator, store, owner, vault_id) = setup_vault().await;
        let target = TestDevice::from_seed(2);

        let first = invite(&owner, &target, vault_id, [5; 24], true);
        let row = validator.validate_invite(&first).await.unwrap();
        store.apply_invite(&row).await.unwrap();

        let second = invite(&owner, &target, vault_id, [5; 24], true);
        assert_eq!(
            validator.validate_invite(&second).await.unwrap_err().code,
            "nonce_reused"
        );
    }

    #[tokio::test]
    async fn test_target_bundle_must_self_verify() {
        let (validator, _store, owner, vault_id) = setup_vault().await;
        let target = TestDevice::from_seed(2);

        let mut wire = invite(&owner, &target, vault_id, [1; 24], true);
        wire.target_device_bundle_sig = Base64Bytes(vec![0xaa; 64]);
        assert_eq!(
            validator.validate_invite(&wire).await.unwrap_err().code,
            "invalid_target_bundle_sig"
        );
    }

    #[tokio::test]
    async fn test_oversized_wrapped_payload() {
        let (validator, _store, owner, vault_id) = setup_vault().await;
        let target = TestDevice::from_seed(2);

        let mut wire = invite(&owner, &target, vault_id, [1; 24], true);
        wire.wrapped_payload = Base64Bytes(vec![0; MAX_WRAPPED_PAYLOAD + 1]);
        assert_eq!(
            validator.validate_invite(&wire).await.unwrap_err().code,
            "payload_too_large"
        );
    }

    #[tokio::test]
    async fn test_valid_claim() {
        let (validator, store, owner, vault_id) = setup_vault().await;
        let target = TestDevice::from_seed(2);
        store.insert_device(&target.device_row()).await.unwrap();

        let wire = invite(&owner, &target, vault_id, [1; 24], true);
        let row = validator.validate_invite(&wire).await.unwrap();
        store.apply_invite(&row).await.unwrap();

        let claim = invite_claim(&target, wire.invite_id, vault_id);
        let claim_row = validator.validate_invite_claim(&claim).await.unwrap();
        assert_eq!(claim_row.claim_sig, claim.signature.as_slice());
    }

    #[tokio::test]
    async fn test_claim_for_unknown_invite() {
        let (validator, _store, _owner, vault_id) = setup_vault().await;
        let target = TestDevice::from_seed(2);

        let claim = invite_claim(&target, Uuid::new_v4(), vault_id);
        assert_eq!(
            validator.validate_invite_claim(&claim).await.unwrap_err().code,
            "not_found"
        );
    }

    #[tokio::test]
    async fn test_claim_device_must_match_target() {
        let (validator, store, owner, vault_id) = setup_vault().await;
        let target = TestDevice::from_seed(2);
        let impostor = TestDevice::from_seed(4);
        store.insert_device(&impostor.device_row()).await.unwrap();

        let wire = invite(&owner, &target, vault_id, [1; 24], true);
        let row = validator.validate_invite(&wire).await.unwrap();
        store.apply_invite(&row).await.unwrap();

        let claim = invite_claim(&impostor, wire.invite_id, vault_id);
        assert_eq!(
            validator.validate_invite_claim(&claim).await.unwrap_err().code,
            "device_mismatch"
        );
    }

    #[tokio::test]
    async fn test_claim_requires_registered_device() {
        let (validator, store, owner, vault_id) = setup_vault().await;
        let target = TestDevice::from_seed(2);

        let wire = invite(&owner, &target, vault_id, [1; 24], true);
        let row = validator.validate_invite(&wire).await.unwrap();
        store.apply_invite(&row).await.unwrap();

        // Target never registered.
        let claim = invite_claim(&target, wire.invite_id, vault_id);
        assert_eq!(
            validator.validate_invite_claim(&claim).await.unwrap_err().code,
            "not_found"
        );
    }
}

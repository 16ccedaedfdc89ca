//! Membership-chain validation: `member_add` and `member_remove`.
//!
//! The membership log is the vault's authorization spine. Genesis creates
//! the vault (actor == subject, self-signed); every later event is
//! owner-only and must extend the head exactly. An invited `member_add`
//! additionally binds to an invite and the subject's stored claim.

use std::sync::Arc;

use forgor_core::models::{MemberEvent, HASH_LEN, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use forgor_core::{signbytes, ApiError, PublicKey, Sha256Hash, Signature};
use forgor_store::{MemberEventRow, Store};
use uuid::Uuid;

use crate::internal;

pub struct MembershipValidator<S> {
    store: Arc<S>,
}

impl<S: Store> MembershipValidator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn validate_member_add(
        &self,
        event: &MemberEvent,
    ) -> Result<MemberEventRow, ApiError> {
        if event.msg_type != "member_add" {
            return Err(ApiError::bad_request("invalid_msg_type", "expected member_add"));
        }

        if event.prev_hash.len() != HASH_LEN {
            return Err(ApiError::invalid_hash());
        }
        if event.signature.len() != SIGNATURE_LEN {
            return Err(ApiError::invalid_signature());
        }
        if event.subject_pubkey_sign.len() != PUBLIC_KEY_LEN {
            return Err(ApiError::invalid_public_key());
        }
        if event.subject_pubkey_box.len() != PUBLIC_KEY_LEN {
            return Err(ApiError::invalid_public_key());
        }
        if event.subject_bundle_sig.len() != SIGNATURE_LEN {
            return Err(ApiError::invalid_signature());
        }
        if event.claim_sig.len() != SIGNATURE_LEN {
            return Err(ApiError::invalid_signature());
        }

        event
            .actor_device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;
        event
            .subject_device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;

        let subject_pubkey_sign = PublicKey::from_bytes(
            *event
                .subject_pubkey_sign
                .as_array::<PUBLIC_KEY_LEN>()
                .ok_or_else(ApiError::invalid_public_key)?,
        );
        event
            .subject_device_id
            .verify_pubkey(&subject_pubkey_sign)
            .map_err(|_| {
                ApiError::bad_request(
                    "subject_device_id_mismatch",
                    "subject_device_id does not match sha256(subject_pubkey_sign)",
                )
            })?;

        let subject_device_id_bytes = event
            .subject_device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;
        let subject_pubkey_box = event
            .subject_pubkey_box
            .as_array::<PUBLIC_KEY_LEN>()
            .ok_or_else(ApiError::invalid_public_key)?;
        let subject_bundle_sig = Signature::from_bytes(
            *event
                .subject_bundle_sig
                .as_array::<SIGNATURE_LEN>()
                .ok_or_else(ApiError::invalid_signature)?,
        );

        let bundle_message = signbytes::device_bundle(
            &subject_device_id_bytes,
            subject_pubkey_sign.as_bytes(),
            subject_pubkey_box,
        );
        subject_pubkey_sign
            .verify(&bundle_message, &subject_bundle_sig)
            .map_err(|_| {
                ApiError::bad_request(
                    "invalid_subject_bundle_sig",
                    "subject bundle signature verification failed",
                )
            })?;

        let vault = self
            .store
            .get_vault(&event.vault_id)
            .await
            .map_err(internal)?;

        let member_seq = event.member_seq.get();
        let is_genesis = member_seq == 1;
        let prev_hash = event
            .prev_hash
            .as_array::<HASH_LEN>()
            .ok_or_else(ApiError::invalid_hash)?;

        if is_genesis {
            if vault.is_some() {
                return Err(ApiError::conflict("vault already exists"));
            }
            if event.actor_device_id != event.subject_device_id {
                return Err(ApiError::bad_request(
                    "genesis_actor_mismatch",
                    "genesis member_add must have actor_device_id == subject_device_id",
                ));
            }
            if prev_hash != &[0u8; 32] {
                return Err(ApiError::bad_request(
                    "genesis_prev_hash",
                    "genesis member_add must have prev_hash = zero",
                ));
            }
        } else {
            let vault = vault.ok_or_else(|| ApiError::not_found("vault"))?;

            if event.actor_device_id != vault.owner_device_id {
                return Err(ApiError::owner_required());
            }

            let head = self
                .store
                .get_membership_head(&event.vault_id)
                .await
                .map_err(internal)?
                .ok_or_else(|| {
                    ApiError::bad_request(
                        "missing_membership_head",
                        "vault exists but membership head is missing",
                    )
                })?;

            if member_seq != head.member_seq + 1 {
                return Err(ApiError::membership_chain_broken());
            }
            if prev_hash.as_slice() != head.member_head_hash.as_slice() {
                return Err(ApiError::membership_chain_broken());
            }

            let invite = self
                .store
                .get_invite(&event.invite_id)
                .await
                .map_err(internal)?
                .ok_or_else(|| ApiError::not_found("invite"))?;

            if invite.vault_id != event.vault_id {
                return Err(ApiError::bad_request(
                    "invite_vault_mismatch",
                    "invite is for a different vault",
                ));
            }
            if invite.target_device_id != event.subject_device_id {
                return Err(ApiError::bad_request(
                    "invite_target_mismatch",
                    "invite is for a different device",
                ));
            }
            if invite.single_use && invite.used {
                return Err(ApiError::invite_already_used());
            }

            let claim = self
                .store
                .get_invite_claim(&invite.invite_id, &event.subject_device_id)
                .await
                .map_err(internal)?
                .ok_or_else(|| {
                    ApiError::bad_request("missing_invite_claim", "invite has not been claimed")
                })?;

            if claim.claim_sig.as_slice() != event.claim_sig.as_slice() {
                return Err(ApiError::bad_request(
                    "claim_sig_mismatch",
                    "claim_sig does not match stored claim",
                ));
            }

            let claim_message = signbytes::invite_claim(
                &invite.invite_id,
                &event.vault_id,
                &subject_device_id_bytes,
            );
            let claim_sig = Signature::from_bytes(
                *event
                    .claim_sig
                    .as_array::<SIGNATURE_LEN>()
                    .ok_or_else(ApiError::invalid_signature)?,
            );
            subject_pubkey_sign
                .verify(&claim_message, &claim_sig)
                .map_err(|_| {
                    ApiError::bad_request(
                        "invalid_claim_sig",
                        "claim signature verification failed",
                    )
                })?;
        }

        let actor_device_id_bytes = event
            .actor_device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;

        // Genesis signs over zero placeholders regardless of what was sent.
        let sign_invite_id = if is_genesis { Uuid::nil() } else { event.invite_id };
        let zero_sig = [0u8; 64];
        let sign_claim_sig: &[u8; 64] = if is_genesis {
            &zero_sig
        } else {
            event
                .claim_sig
                .as_array::<SIGNATURE_LEN>()
                .ok_or_else(ApiError::invalid_signature)?
        };

        let message = signbytes::member_add(
            &event.member_event_id,
            &event.vault_id,
            member_seq,
            prev_hash,
            &actor_device_id_bytes,
            &subject_device_id_bytes,
            &sign_invite_id,
            sign_claim_sig,
            subject_bundle_sig.as_bytes(),
            subject_pubkey_sign.as_bytes(),
            subject_pubkey_box,
        );

        let signer_pubkey = if is_genesis {
            subject_pubkey_sign
        } else {
            let actor = self
                .store
                .get_member(&event.vault_id, &event.actor_device_id)
                .await
                .map_err(internal)?;
            match actor {
                Some(actor) if actor.is_member => PublicKey::from_bytes(
                    actor
                        .pubkey_sign
                        .as_slice()
                        .try_into()
                        .map_err(|_| ApiError::internal_error())?,
                ),
                _ => return Err(ApiError::membership_required()),
            }
        };

        let signature = Signature::from_bytes(
            *event
                .signature
                .as_array::<SIGNATURE_LEN>()
                .ok_or_else(ApiError::invalid_signature)?,
        );
        signer_pubkey
            .verify(&message, &signature)
            .map_err(|_| ApiError::invalid_signature())?;

        let member_hash = Sha256Hash::hash(&message);

        Ok(MemberEventRow {
            member_event_id: event.member_event_id,
            vault_id: event.vault_id,
            member_seq,
            prev_hash: event.prev_hash.as_slice().to_vec(),
            actor_device_id: event.actor_device_id.clone(),
            subject_device_id: event.subject_device_id.clone(),
            msg_type: "member_add".into(),
            subject_pubkey_sign: event.subject_pubkey_sign.as_slice().to_vec(),
            subject_pubkey_box: event.subject_pubkey_box.as_slice().to_vec(),
            subject_bundle_sig: event.subject_bundle_sig.as_slice().to_vec(),
            invite_id: Some(event.invite_id),
            claim_sig: event.claim_sig.as_slice().to_vec(),
            signature: event.signature.as_slice().to_vec(),
            member_hash: member_hash.0.to_vec(),
            created_at: event.created_at.clone().unwrap_or_default(),
        })
    }

    pub async fn validate_member_remove(
        &self,
        event: &MemberEvent,
    ) -> Result<MemberEventRow, ApiError> {
        if event.msg_type != "member_remove" {
            return Err(ApiError::bad_request(
                "invalid_msg_type",
                "expected member_remove",
            ));
        }

        if event.prev_hash.len() != HASH_LEN {
            return Err(ApiError::invalid_hash());
        }
        if event.signature.len() != SIGNATURE_LEN {
            return Err(ApiError::invalid_signature());
        }

        event
            .actor_device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;
        event
            .subject_device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;

        let vault = self
            .store
            .get_vault(&event.vault_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::not_found("vault"))?;

        if event.actor_device_id != vault.owner_device_id {
            return Err(ApiError::owner_required());
        }

        let head = self
            .store
            .get_membership_head(&event.vault_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| {
                ApiError::bad_request(
                    "missing_membership_head",
                    "vault membership head is missing",
                )
            })?;

        let member_seq = event.member_seq.get();
        if member_seq != head.member_seq + 1 {
            return Err(ApiError::membership_chain_broken());
        }
        let prev_hash = event
            .prev_hash
            .as_array::<HASH_LEN>()
            .ok_or_else(ApiError::invalid_hash)?;
        if prev_hash.as_slice() != head.member_head_hash.as_slice() {
            return Err(ApiError::membership_chain_broken());
        }

        let is_member = self
            .store
            .is_member(&event.vault_id, &event.subject_device_id)
            .await
            .map_err(internal)?;
        if !is_member {
            return Err(ApiError::bad_request(
                "subject_not_member",
                "subject_device_id is not a current member",
            ));
        }

        let actor_device_id_bytes = event
            .actor_device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;
        let subject_device_id_bytes = event
            .subject_device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;

        let message = signbytes::member_remove(
            &event.member_event_id,
            &event.vault_id,
            member_seq,
            prev_hash,
            &actor_device_id_bytes,
            &subject_device_id_bytes,
        );

        let actor = self
            .store
            .get_member(&event.vault_id, &event.actor_device_id)
            .await
            .map_err(internal)?;
        let actor_pubkey = match actor {
            Some(actor) if actor.is_member => PublicKey::from_bytes(
                actor
                    .pubkey_sign
                    .as_slice()
                    .try_into()
                    .map_err(|_| ApiError::internal_error())?,
            ),
            _ => return Err(ApiError::membership_required()),
        };

        let signature = Signature::from_bytes(
            *event
                .signature
                .as_array::<SIGNATURE_LEN>()
                .ok_or_else(ApiError::invalid_signature)?,
        );
        actor_pubkey
            .verify(&message, &signature)
            .map_err(|_| ApiError::invalid_signature())?;

        let member_hash = Sha256Hash::hash(&message);

        Ok(MemberEventRow {
            member_event_id: event.member_event_id,
            vault_id: event.vault_id,
            member_seq,
            prev_hash: event.prev_hash.as_slice().to_vec(),
            actor_device_id: event.actor_device_id.clone(),
            subject_device_id: event.subject_device_id.clone(),
            msg_type: "member_remove".into(),
            subject_pubkey_sign: Vec::new(),
            subject_pubkey_box: Vec::new(),
            subject_bundle_sig: Vec::new(),
            invite_id: None,
            claim_sig: Vec::new(),
            signature: event.signature.as_slice().to_vec(),
            member_hash: member_hash.0.to_vec(),
            created_at: event.created_at.clone().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgor_core::models::Base64Bytes;
    use forgor_store::{InviteRow, MemoryStore};
    use forgor_testkit::{
        genesis_member_add, invite, invite_claim, member_add, member_event_hash, member_remove,
        TestDevice,
    };

    fn setup() -> (MembershipValidator<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (MembershipValidator::new(Arc::clone(&store)), store)
    }

    async fn admit_genesis(
        validator: &MembershipValidator<MemoryStore>,
        store: &Arc<MemoryStore>,
        owner: &TestDevice,
        vault_id: Uuid,
    ) -> [u8; 32] {
        let genesis = genesis_member_add(owner, vault_id);
        let row = validator.validate_member_add(&genesis).await.unwrap();
        store.apply_member_event(&row).await.unwrap();
        member_event_hash(&genesis)
    }

    /// Stage an invite the way the HTTP flow would: nonce + invite row, then
    /// the target's claim.
    async fn stage_invite(
        store: &Arc<MemoryStore>,
        owner: &TestDevice,
        target: &TestDevice,
        vault_id: Uuid,
        nonce: [u8; 24],
    ) -> (Uuid, [u8; 64]) {
        let wire = invite(owner, target, vault_id, nonce, true);
        let row = InviteRow {
            invite_id: wire.invite_id,
            vault_id,
            target_device_id: target.device_id.clone(),
            target_pubkey_sign: target.pubkey_sign().as_bytes().to_vec(),
            target_pubkey_box: target.pubkey_box().to_vec(),
            target_bundle_sig: target.bundle_sig().as_bytes().to_vec(),
            nonce: nonce.to_vec(),
            wrapped_payload: wire.wrapped_payload.as_slice().to_vec(),
            created_by_device_id: owner.device_id.clone(),
            single_use: true,
            used: false,
            signature: wire.signature.as_slice().to_vec(),
            created_at: String::new(),
        };
        store.apply_invite(&row).await.unwrap();

        let claim = invite_claim(target, wire.invite_id, vault_id);
        let claim_sig: [u8; 64] = *claim.signature.as_array::<64>().unwrap();
        store
            .insert_invite_claim(&forgor_store::InviteClaimRow {
                invite_id: wire.invite_id,
                vault_id,
                device_id: target.device_id.clone(),
                claim_sig: claim_sig.to_vec(),
                created_at: String::new(),
            })
            .await
            .unwrap();

        (wire.invite_id, claim_sig)
    }

    #[tokio::test]
    async fn test_genesis_accepted() {
        let (validator, _store) = setup();
        let owner = TestDevice::from_seed(1);
        let vault_id = Uuid::new_v4();

        let genesis = genesis_member_add(&owner, vault_id);
        let row = validator.validate_member_add(&genesis).await.unwrap();

        assert_eq!(row.member_seq, 1);
        assert_eq!(row.member_hash, member_event_hash(&genesis).to_vec());
        assert_eq!(row.actor_device_id, owner.device_id);
    }

    #[tokio::test]
    async fn test_genesis_rejected_when_vault_exists() {
        let (validator, store) = setup();
        let owner = TestDevice::from_seed(1);
        let vault_id = Uuid::new_v4();
        admit_genesis(&validator, &store, &owner, vault_id).await;

        let again = genesis_member_add(&owner, vault_id);
        assert_eq!(
            validator.validate_member_add(&again).await.unwrap_err().code,
            "conflict"
        );
    }

    #[tokio::test]
    async fn test_genesis_actor_subject_mismatch() {
        let (validator, _store) = setup();
        let owner = TestDevice::from_seed(1);
        let other = TestDevice::from_seed(2);
        let mut genesis = genesis_member_add(&owner, Uuid::new_v4());
        genesis.actor_device_id = other.device_id.clone();

        assert_eq!(
            validator
                .validate_member_add(&genesis)
                .await
                .unwrap_err()
                .code,
            "genesis_actor_mismatch"
        );
    }

    #[tokio::test]
    async fn test_genesis_nonzero_prev_hash() {
        let (validator, _store) = setup();
        let owner = TestDevice::from_seed(1);
        let mut genesis = genesis_member_add(&owner, Uuid::new_v4());
        genesis.prev_hash = Base64Bytes(vec![1; 32]);

        assert_eq!(
            validator
                .validate_member_add(&genesis)
                .await
                .unwrap_err()
                .code,
            "genesis_prev_hash"
        );
    }

    #[tokio::test]
    async fn test_invited_join_flow() {
        let (validator, store) = setup();
        let owner = TestDevice::from_seed(1);
        let joiner = TestDevice::from_seed(2);
        let vault_id = Uuid::new_v4();

        let head_hash = admit_genesis(&validator, &store, &owner, vault_id).await;
        let (invite_id, claim_sig) =
            stage_invite(&store, &owner, &joiner, vault_id, [7; 24]).await;

        let add = member_add(&owner, &joiner, vault_id, 2, head_hash, invite_id, claim_sig);
        let row = validator.validate_member_add(&add).await.unwrap();
        store.apply_member_event(&row).await.unwrap();

        assert!(store.is_member(&vault_id, &joiner.device_id).await.unwrap());
        let head = store.get_membership_head(&vault_id).await.unwrap().unwrap();
        assert_eq!(head.member_seq, 2);

        // Consumed single-use invite is marked used.
        let stored = store.get_invite(&invite_id).await.unwrap().unwrap();
        assert!(stored.used);
    }

    #[tokio::test]
    async fn test_non_owner_cannot_add() {
        let (validator, store) = setup();
        let owner = TestDevice::from_seed(1);
        let mallory = TestDevice::from_seed(3);
        let joiner = TestDevice::from_seed(2);
        let vault_id = Uuid::new_v4();

        let head_hash = admit_genesis(&validator, &store, &owner, vault_id).await;
        let (invite_id, claim_sig) =
            stage_invite(&store, &owner, &joiner, vault_id, [8; 24]).await;

        let add = member_add(&mallory, &joiner, vault_id, 2, head_hash, invite_id, claim_sig);
        assert_eq!(
            validator.validate_member_add(&add).await.unwrap_err().code,
            "owner_required"
        );
    }

    #[tokio::test]
    async fn test_chain_break_rejected() {
        let (validator, store) = setup();
        let owner = TestDevice::from_seed(1);
        let joiner = TestDevice::from_seed(2);
        let vault_id = Uuid::new_v4();

        let head_hash = admit_genesis(&validator, &store, &owner, vault_id).await;
        let (invite_id, claim_sig) =
            stage_invite(&store, &owner, &joiner, vault_id, [9; 24]).await;

        // Wrong seq.
        let add = member_add(&owner, &joiner, vault_id, 3, head_hash, invite_id, claim_sig);
        assert_eq!(
            validator.validate_member_add(&add).await.unwrap_err().code,
            "membership_chain_broken"
        );

        // Wrong prev_hash.
        let add = member_add(&owner, &joiner, vault_id, 2, [9; 32], invite_id, claim_sig);
        assert_eq!(
            validator.validate_member_add(&add).await.unwrap_err().code,
            "membership_chain_broken"
        );
    }

    #[tokio::test]
    async fn test_used_single_use_invite_rejected() {
        let (validator, store) = setup();
        let owner = TestDevice::from_seed(1);
        let joiner = TestDevice::from_seed(2);
        let vault_id = Uuid::new_v4();

        let head_hash = admit_genesis(&validator, &store, &owner, vault_id).await;
        let (invite_id, claim_sig) =
            stage_invite(&store, &owner, &joiner, vault_id, [10; 24]).await;

        let add = member_add(&owner, &joiner, vault_id, 2, head_hash, invite_id, claim_sig);
        let row = validator.validate_member_add(&add).await.unwrap();
        store.apply_member_event(&row).await.unwrap();

        // Remove, then try to re-admit via the consumed invite.
        let head2 = store
            .get_membership_head(&vault_id)
            .await
            .unwrap()
            .unwrap()
            .member_head_hash;
        let remove = member_remove(
            &owner,
            &joiner.device_id,
            vault_id,
            3,
            head2.as_slice().try_into().unwrap(),
        );
        let row = validator.validate_member_remove(&remove).await.unwrap();
        store.apply_member_event(&row).await.unwrap();

        let head3: [u8; 32] = store
            .get_membership_head(&vault_id)
            .await
            .unwrap()
            .unwrap()
            .member_head_hash
            .as_slice()
            .try_into()
            .unwrap();
        let readd = member_add(&owner, &joiner, vault_id, 4, head3, invite_id, claim_sig);
        assert_eq!(
            validator.validate_member_add(&readd).await.unwrap_err().code,
            "invite_already_used"
        );
    }

    #[tokio::test]
    async fn test_missing_claim_rejected() {
        let (validator, store) = setup();
        let owner = TestDevice::from_seed(1);
        let joiner = TestDevice::from_seed(2);
        let vault_id = Uuid::new_v4();

        let head_hash = admit_genesis(&validator, &store, &owner, vault_id).await;

        // Invite without a claim.
        let wire = invite(&owner, &joiner, vault_id, [11; 24], true);
        store
            .apply_invite(&InviteRow {
                invite_id: wire.invite_id,
                vault_id,
                target_device_id: joiner.device_id.clone(),
                target_pubkey_sign: joiner.pubkey_sign().as_bytes().to_vec(),
                target_pubkey_box: joiner.pubkey_box().to_vec(),
                target_bundle_sig: joiner.bundle_sig().as_bytes().to_vec(),
                nonce: vec![11; 24],
                wrapped_payload: vec![],
                created_by_device_id: owner.device_id.clone(),
                single_use: true,
                used: false,
                signature: wire.signature.as_slice().to_vec(),
                created_at: String::new(),
            })
            .await
            .unwrap();

        let claim = invite_claim(&joiner, wire.invite_id, vault_id);
        let claim_sig: [u8; 64] = *claim.signature.as_array::<64>().unwrap();
        let add = member_add(
            &owner,
            &joiner,
            vault_id,
            2,
            head_hash,
            wire.invite_id,
            claim_sig,
        );
        assert_eq!(
            validator.validate_member_add(&add).await.unwrap_err().code,
            "missing_invite_claim"
        );
    }

    #[tokio::test]
    async fn test_member_add_signature_must_be_actor() {
        let (validator, store) = setup();
        let owner = TestDevice::from_seed(1);
        let joiner = TestDevice::from_seed(2);
        let vault_id = Uuid::new_v4();

        let head_hash = admit_genesis(&validator, &store, &owner, vault_id).await;
        let (invite_id, claim_sig) =
            stage_invite(&store, &owner, &joiner, vault_id, [12; 24]).await;

        // Signed by the joiner instead of the owner, but naming the owner
        // as actor.
        let mut add = member_add(&joiner, &joiner, vault_id, 2, head_hash, invite_id, claim_sig);
        add.actor_device_id = owner.device_id.clone();
        assert_eq!(
            validator.validate_member_add(&add).await.unwrap_err().code,
            "invalid_signature"
        );
    }

    #[tokio::test]
    async fn test_remove_requires_current_member() {
        let (validator, store) = setup();
        let owner = TestDevice::from_seed(1);
        let stranger = TestDevice::from_seed(5);
        let vault_id = Uuid::new_v4();

        let head_hash = admit_genesis(&validator, &store, &owner, vault_id).await;

        let remove = member_remove(&owner, &stranger.device_id, vault_id, 2, head_hash);
        assert_eq!(
            validator
                .validate_member_remove(&remove)
                .await
                .unwrap_err()
                .code,
            "subject_not_member"
        );
    }
}

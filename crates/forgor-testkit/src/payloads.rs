//! Builders producing correctly signed wire payloads, mirroring what an
//! honest client does: construct the sign-bytes, sign with the device key,
//! base64 the byte fields.

use forgor_core::models::{
    Base64Bytes, Event, Invite, InviteClaim, KeyUpdate, KeyUpdateAck, MemberEvent, Snapshot,
    U64String,
};
use forgor_core::{signbytes, DeviceId, Sha256Hash};
use uuid::Uuid;

use crate::TestDevice;

/// The vault-creating `member_add`: actor == subject, seq 1, zero prev_hash,
/// zero invite_id and claim_sig, signed by the subject itself.
pub fn genesis_member_add(owner: &TestDevice, vault_id: Uuid) -> MemberEvent {
    let member_event_id = Uuid::new_v4();
    let message = signbytes::member_add(
        &member_event_id,
        &vault_id,
        1,
        &[0u8; 32],
        &owner.device_id_bytes(),
        &owner.device_id_bytes(),
        &Uuid::nil(),
        &[0u8; 64],
        owner.bundle_sig().as_bytes(),
        owner.pubkey_sign().as_bytes(),
        &owner.pubkey_box(),
    );
    let signature = owner.sign(&message);

    MemberEvent {
        msg_type: "member_add".into(),
        member_event_id,
        vault_id,
        member_seq: U64String(1),
        prev_hash: Base64Bytes(vec![0; 32]),
        actor_device_id: owner.device_id.clone(),
        subject_device_id: owner.device_id.clone(),
        subject_pubkey_sign: Base64Bytes(owner.pubkey_sign().as_bytes().to_vec()),
        subject_pubkey_box: Base64Bytes(owner.pubkey_box().to_vec()),
        subject_bundle_sig: Base64Bytes(owner.bundle_sig().as_bytes().to_vec()),
        invite_id: Uuid::nil(),
        claim_sig: Base64Bytes(vec![0; 64]),
        signature: Base64Bytes(signature.as_bytes().to_vec()),
        created_at: None,
    }
}

/// An invited `member_add` authored by the owner, admitting `subject` via
/// `invite_id` with the subject's claim signature.
pub fn member_add(
    owner: &TestDevice,
    subject: &TestDevice,
    vault_id: Uuid,
    member_seq: u64,
    prev_hash: [u8; 32],
    invite_id: Uuid,
    claim_sig: [u8; 64],
) -> MemberEvent {
    let member_event_id = Uuid::new_v4();
    let message = signbytes::member_add(
        &member_event_id,
        &vault_id,
        member_seq,
        &prev_hash,
        &owner.device_id_bytes(),
        &subject.device_id_bytes(),
        &invite_id,
        &claim_sig,
        subject.bundle_sig().as_bytes(),
        subject.pubkey_sign().as_bytes(),
        &subject.pubkey_box(),
    );
    let signature = owner.sign(&message);

    MemberEvent {
        msg_type: "member_add".into(),
        member_event_id,
        vault_id,
        member_seq: U64String(member_seq),
        prev_hash: Base64Bytes(prev_hash.to_vec()),
        actor_device_id: owner.device_id.clone(),
        subject_device_id: subject.device_id.clone(),
        subject_pubkey_sign: Base64Bytes(subject.pubkey_sign().as_bytes().to_vec()),
        subject_pubkey_box: Base64Bytes(subject.pubkey_box().to_vec()),
        subject_bundle_sig: Base64Bytes(subject.bundle_sig().as_bytes().to_vec()),
        invite_id,
        claim_sig: Base64Bytes(claim_sig.to_vec()),
        signature: Base64Bytes(signature.as_bytes().to_vec()),
        created_at: None,
    }
}

pub fn member_remove(
    owner: &TestDevice,
    subject_device_id: &DeviceId,
    vault_id: Uuid,
    member_seq: u64,
    prev_hash: [u8; 32],
) -> MemberEvent {
    let member_event_id = Uuid::new_v4();
    let subject_bytes = subject_device_id.to_bytes().expect("valid device id");
    let message = signbytes::member_remove(
        &member_event_id,
        &vault_id,
        member_seq,
        &prev_hash,
        &owner.device_id_bytes(),
        &subject_bytes,
    );
    let signature = owner.sign(&message);

    MemberEvent {
        msg_type: "member_remove".into(),
        member_event_id,
        vault_id,
        member_seq: U64String(member_seq),
        prev_hash: Base64Bytes(prev_hash.to_vec()),
        actor_device_id: owner.device_id.clone(),
        subject_device_id: subject_device_id.clone(),
        subject_pubkey_sign: Base64Bytes::default(),
        subject_pubkey_box: Base64Bytes::default(),
        subject_bundle_sig: Base64Bytes::default(),
        invite_id: Uuid::nil(),
        claim_sig: Base64Bytes::default(),
        signature: Base64Bytes(signature.as_bytes().to_vec()),
        created_at: None,
    }
}

/// The `member_hash` an accepting server derives for this event. Useful for
/// chaining: the next event's `prev_hash` is this value.
pub fn member_event_hash(event: &MemberEvent) -> [u8; 32] {
    let actor = event.actor_device_id.to_bytes().expect("valid device id");
    let subject = event.subject_device_id.to_bytes().expect("valid device id");
    let prev_hash = event.prev_hash.as_array::<32>().expect("32-byte prev_hash");

    let message = if event.msg_type == "member_remove" {
        signbytes::member_remove(
            &event.member_event_id,
            &event.vault_id,
            event.member_seq.get(),
            prev_hash,
            &actor,
            &subject,
        )
    } else {
        let is_genesis = event.member_seq.get() == 1;
        let invite_id = if is_genesis {
            Uuid::nil()
        } else {
            event.invite_id
        };
        let zero_sig = [0u8; 64];
        let claim_sig = if is_genesis {
            &zero_sig
        } else {
            event.claim_sig.as_array::<64>().expect("64-byte claim_sig")
        };
        signbytes::member_add(
            &event.member_event_id,
            &event.vault_id,
            event.member_seq.get(),
            prev_hash,
            &actor,
            &subject,
            &invite_id,
            claim_sig,
            event
                .subject_bundle_sig
                .as_array::<64>()
                .expect("64-byte bundle sig"),
            event
                .subject_pubkey_sign
                .as_array::<32>()
                .expect("32-byte pubkey"),
            event
                .subject_pubkey_box
                .as_array::<32>()
                .expect("32-byte pubkey"),
        )
    };

    Sha256Hash::hash(&message).0
}

/// A correctly chained encrypted event. `lamport` tracks the counter and
/// `key_epoch` is 1; callers adjust the returned struct when they need more.
pub fn event(
    device: &TestDevice,
    vault_id: Uuid,
    counter: u64,
    prev_hash: [u8; 32],
    nonce: [u8; 24],
    ciphertext: &[u8],
) -> Event {
    let event_id = Uuid::new_v4();
    let message = signbytes::event(
        &event_id,
        &vault_id,
        &device.device_id_bytes(),
        counter,
        counter,
        1,
        &prev_hash,
        &nonce,
        ciphertext,
    );
    let signature = device.sign(&message);

    Event {
        msg_type: "event".into(),
        event_id,
        vault_id,
        device_id: device.device_id.clone(),
        counter: U64String(counter),
        lamport: U64String(counter),
        key_epoch: U64String(1),
        prev_hash: Base64Bytes(prev_hash.to_vec()),
        nonce: Base64Bytes(nonce.to_vec()),
        ciphertext: Base64Bytes(ciphertext.to_vec()),
        signature: Base64Bytes(signature.as_bytes().to_vec()),
        seq: None,
        created_at: None,
    }
}

/// The `event_hash` an accepting server derives; the next event's prev_hash.
pub fn event_hash(event: &Event) -> [u8; 32] {
    let device = event.device_id.to_bytes().expect("valid device id");
    let message = signbytes::event(
        &event.event_id,
        &event.vault_id,
        &device,
        event.counter.get(),
        event.lamport.get(),
        event.key_epoch.get(),
        event.prev_hash.as_array::<32>().expect("32-byte prev_hash"),
        event.nonce.as_array::<24>().expect("24-byte nonce"),
        &event.ciphertext,
    );
    Sha256Hash::hash(&message).0
}

pub fn invite(
    creator: &TestDevice,
    target: &TestDevice,
    vault_id: Uuid,
    nonce: [u8; 24],
    single_use: bool,
) -> Invite {
    let invite_id = Uuid::new_v4();
    let wrapped_payload = b"wrapped-vault-key".to_vec();
    let message = signbytes::invite(
        &invite_id,
        &vault_id,
        &target.device_id_bytes(),
        target.pubkey_sign().as_bytes(),
        &target.pubkey_box(),
        target.bundle_sig().as_bytes(),
        &nonce,
        &wrapped_payload,
        &creator.device_id_bytes(),
        single_use,
    );
    let signature = creator.sign(&message);

    Invite {
        msg_type: "invite".into(),
        invite_id,
        vault_id,
        target_device_id: target.device_id.clone(),
        target_device_pubkey_sign: Base64Bytes(target.pubkey_sign().as_bytes().to_vec()),
        target_device_pubkey_box: Base64Bytes(target.pubkey_box().to_vec()),
        target_device_bundle_sig: Base64Bytes(target.bundle_sig().as_bytes().to_vec()),
        nonce: Base64Bytes(nonce.to_vec()),
        wrapped_payload: Base64Bytes(wrapped_payload),
        created_by_device_id: creator.device_id.clone(),
        single_use,
        signature: Base64Bytes(signature.as_bytes().to_vec()),
        created_at: None,
    }
}

pub fn invite_claim(target: &TestDevice, invite_id: Uuid, vault_id: Uuid) -> InviteClaim {
    let message = signbytes::invite_claim(&invite_id, &vault_id, &target.device_id_bytes());
    let signature = target.sign(&message);

    InviteClaim {
        msg_type: "invite_claim".into(),
        invite_id,
        vault_id,
        device_id: target.device_id.clone(),
        signature: Base64Bytes(signature.as_bytes().to_vec()),
        created_at: None,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn key_update(
    owner: &TestDevice,
    vault_id: Uuid,
    member_seq: u64,
    member_head_hash: [u8; 32],
    target_device_id: &DeviceId,
    key_epoch: u64,
    nonce: [u8; 24],
) -> KeyUpdate {
    let key_update_id = Uuid::new_v4();
    let target_bytes = target_device_id.to_bytes().expect("valid device id");
    let wrapped_payload = b"rewrapped-vault-key".to_vec();
    let message = signbytes::key_update(
        &key_update_id,
        &vault_id,
        member_seq,
        &member_head_hash,
        &target_bytes,
        key_epoch,
        &nonce,
        &wrapped_payload,
        &owner.device_id_bytes(),
    );
    let signature = owner.sign(&message);

    KeyUpdate {
        msg_type: "key_update".into(),
        key_update_id,
        vault_id,
        member_seq: U64String(member_seq),
        member_head_hash: Base64Bytes(member_head_hash.to_vec()),
        target_device_id: target_device_id.clone(),
        key_epoch: U64String(key_epoch),
        nonce: Base64Bytes(nonce.to_vec()),
        wrapped_payload: Base64Bytes(wrapped_payload),
        created_by_device_id: owner.device_id.clone(),
        signature: Base64Bytes(signature.as_bytes().to_vec()),
        created_at: None,
    }
}

pub fn key_update_ack(
    device: &TestDevice,
    vault_id: Uuid,
    key_epoch: u64,
    member_seq: u64,
    member_head_hash: [u8; 32],
) -> KeyUpdateAck {
    let message = signbytes::key_update_ack(
        &vault_id,
        &device.device_id_bytes(),
        key_epoch,
        member_seq,
        &member_head_hash,
    );
    let signature = device.sign(&message);

    KeyUpdateAck {
        msg_type: "key_update_ack".into(),
        vault_id,
        device_id: device.device_id.clone(),
        key_epoch: U64String(key_epoch),
        member_seq: U64String(member_seq),
        member_head_hash: Base64Bytes(member_head_hash.to_vec()),
        signature: Base64Bytes(signature.as_bytes().to_vec()),
        created_at: None,
    }
}

pub fn snapshot(
    owner: &TestDevice,
    vault_id: Uuid,
    base_seq: u64,
    member_seq: u64,
    member_head_hash: [u8; 32],
    key_epoch: u64,
    nonce: [u8; 24],
) -> Snapshot {
    let snapshot_id = Uuid::new_v4();
    let base_counter_map = {
        let mut e = forgor_core::Encoder::new();
        e.put_counter_map(vec![(owner.device_id_bytes(), base_seq)]);
        e.into_bytes()
    };
    let head_hash_map = {
        let mut e = forgor_core::Encoder::new();
        e.put_hash_map(vec![(owner.device_id_bytes(), [0u8; 32])]);
        e.into_bytes()
    };
    let ciphertext = b"snapshot-ciphertext".to_vec();
    let message = signbytes::snapshot(
        &snapshot_id,
        &vault_id,
        base_seq,
        member_seq,
        &member_head_hash,
        &base_counter_map,
        &head_hash_map,
        base_seq,
        key_epoch,
        &nonce,
        &ciphertext,
        &owner.device_id_bytes(),
    );
    let signature = owner.sign(&message);

    Snapshot {
        msg_type: "snapshot".into(),
        snapshot_id,
        vault_id,
        base_seq: U64String(base_seq),
        member_seq: U64String(member_seq),
        member_head_hash: Base64Bytes(member_head_hash.to_vec()),
        base_counter_map: Base64Bytes(base_counter_map),
        head_hash_map: Base64Bytes(head_hash_map),
        lamport_at_snapshot: U64String(base_seq),
        key_epoch: U64String(key_epoch),
        nonce: Base64Bytes(nonce.to_vec()),
        ciphertext: Base64Bytes(ciphertext),
        signature: Base64Bytes(signature.as_bytes().to_vec()),
        created_by_device_id: owner.device_id.clone(),
        created_at: None,
    }
}

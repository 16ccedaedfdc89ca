//! Sign-bytes constructors: one per signed record type.
//!
//! Every payload begins with the version prefix followed by a domain tag, so
//! a signature over one record type can never verify as another. Field order
//! and widths here are part of the wire contract; clients build the same
//! bytes to sign, the server rebuilds them to verify and to derive the
//! content hash (`member_hash`, `event_hash`).

use uuid::Uuid;

use crate::cbe::Encoder;

/// Version prefix for every signed payload. Changing any signed layout
/// requires a new prefix.
pub const SIGN_PREFIX: &str = "forgor-sync-v1";

fn tagged(tag: &str) -> Encoder {
    let mut e = Encoder::new();
    e.put_str(SIGN_PREFIX);
    e.put_str(tag);
    e
}

pub fn device_bundle(
    device_id: &[u8; 32],
    pubkey_sign: &[u8; 32],
    pubkey_box: &[u8; 32],
) -> Vec<u8> {
    let mut e = tagged("device_bundle");
    e.put_device_id(device_id);
    e.put_public_key(pubkey_sign);
    e.put_public_key(pubkey_box);
    e.into_bytes()
}

#[allow(clippy::too_many_arguments)]
pub fn event(
    event_id: &Uuid,
    vault_id: &Uuid,
    device_id: &[u8; 32],
    counter: u64,
    lamport: u64,
    key_epoch: u64,
    prev_hash: &[u8; 32],
    nonce: &[u8; 24],
    ciphertext: &[u8],
) -> Vec<u8> {
    let mut e = tagged("event");
    e.put_uuid(event_id);
    e.put_uuid(vault_id);
    e.put_device_id(device_id);
    e.put_u64(counter);
    e.put_u64(lamport);
    e.put_u64(key_epoch);
    e.put_hash(prev_hash);
    e.put_nonce(nonce);
    e.put_bytes(ciphertext);
    e.into_bytes()
}

#[allow(clippy::too_many_arguments)]
pub fn member_add(
    member_event_id: &Uuid,
    vault_id: &Uuid,
    member_seq: u64,
    prev_hash: &[u8; 32],
    actor_device_id: &[u8; 32],
    subject_device_id: &[u8; 32],
    invite_id: &Uuid,
    claim_sig: &[u8; 64],
    subject_bundle_sig: &[u8; 64],
    subject_pubkey_sign: &[u8; 32],
    subject_pubkey_box: &[u8; 32],
) -> Vec<u8> {
    let mut e = tagged("member_add");
    e.put_uuid(member_event_id);
    e.put_uuid(vault_id);
    e.put_u64(member_seq);
    e.put_hash(prev_hash);
    e.put_device_id(actor_device_id);
    e.put_device_id(subject_device_id);
    e.put_uuid(invite_id);
    e.put_signature(claim_sig);
    e.put_signature(subject_bundle_sig);
    e.put_public_key(subject_pubkey_sign);
    e.put_public_key(subject_pubkey_box);
    e.into_bytes()
}

/// `member_remove` shares the `member_add` body layout with zero-filled
/// placeholders for invite_id, claim_sig, subject_bundle_sig, and the subject
/// public keys. The padding is observable by every client and must not be
/// collapsed.
pub fn member_remove(
    member_event_id: &Uuid,
    vault_id: &Uuid,
    member_seq: u64,
    prev_hash: &[u8; 32],
    actor_device_id: &[u8; 32],
    subject_device_id: &[u8; 32],
) -> Vec<u8> {
    let mut e = tagged("member_remove");
    e.put_uuid(member_event_id);
    e.put_uuid(vault_id);
    e.put_u64(member_seq);
    e.put_hash(prev_hash);
    e.put_device_id(actor_device_id);
    e.put_device_id(subject_device_id);
    e.put_uuid(&Uuid::nil());
    e.put_signature(&[0u8; 64]);
    e.put_signature(&[0u8; 64]);
    e.put_public_key(&[0u8; 32]);
    e.put_public_key(&[0u8; 32]);
    e.into_bytes()
}

#[allow(clippy::too_many_arguments)]
pub fn invite(
    invite_id: &Uuid,
    vault_id: &Uuid,
    target_device_id: &[u8; 32],
    target_pubkey_sign: &[u8; 32],
    target_pubkey_box: &[u8; 32],
    target_bundle_sig: &[u8; 64],
    nonce: &[u8; 24],
    wrapped_payload: &[u8],
    created_by_device_id: &[u8; 32],
    single_use: bool,
) -> Vec<u8> {
    let mut e = tagged("invite");
    e.put_uuid(invite_id);
    e.put_uuid(vault_id);
    e.put_device_id(target_device_id);
    e.put_public_key(target_pubkey_sign);
    e.put_public_key(target_pubkey_box);
    e.put_signature(target_bundle_sig);
    e.put_nonce(nonce);
    e.put_bytes(wrapped_payload);
    e.put_device_id(created_by_device_id);
    e.put_bool(single_use);
    e.into_bytes()
}

pub fn invite_claim(invite_id: &Uuid, vault_id: &Uuid, device_id: &[u8; 32]) -> Vec<u8> {
    let mut e = tagged("invite_claim");
    e.put_uuid(invite_id);
    e.put_uuid(vault_id);
    e.put_device_id(device_id);
    e.into_bytes()
}

#[allow(clippy::too_many_arguments)]
pub fn key_update(
    key_update_id: &Uuid,
    vault_id: &Uuid,
    member_seq: u64,
    member_head_hash: &[u8; 32],
    target_device_id: &[u8; 32],
    key_epoch: u64,
    nonce: &[u8; 24],
    wrapped_payload: &[u8],
    created_by_device_id: &[u8; 32],
) -> Vec<u8> {
    let mut e = tagged("key_update");
    e.put_uuid(key_update_id);
    e.put_uuid(vault_id);
    e.put_u64(member_seq);
    e.put_hash(member_head_hash);
    e.put_device_id(target_device_id);
    e.put_u64(key_epoch);
    e.put_nonce(nonce);
    e.put_bytes(wrapped_payload);
    e.put_device_id(created_by_device_id);
    e.into_bytes()
}

pub fn key_update_ack(
    vault_id: &Uuid,
    device_id: &[u8; 32],
    key_epoch: u64,
    member_seq: u64,
    member_head_hash: &[u8; 32],
) -> Vec<u8> {
    let mut e = tagged("key_update_ack");
    e.put_uuid(vault_id);
    e.put_device_id(device_id);
    e.put_u64(key_epoch);
    e.put_u64(member_seq);
    e.put_hash(member_head_hash);
    e.into_bytes()
}

#[allow(clippy::too_many_arguments)]
pub fn snapshot(
    snapshot_id: &Uuid,
    vault_id: &Uuid,
    base_seq: u64,
    member_seq: u64,
    member_head_hash: &[u8; 32],
    base_counter_map: &[u8],
    head_hash_map: &[u8],
    lamport_at_snapshot: u64,
    key_epoch: u64,
    nonce: &[u8; 24],
    ciphertext: &[u8],
    created_by_device_id: &[u8; 32],
) -> Vec<u8> {
    let mut e = tagged("snapshot");
    e.put_uuid(snapshot_id);
    e.put_uuid(vault_id);
    e.put_u64(base_seq);
    e.put_u64(member_seq);
    e.put_hash(member_head_hash);
    // Maps arrive pre-encoded from clients; embedded opaque, never re-sorted.
    e.put_bytes(base_counter_map);
    e.put_bytes(head_hash_map);
    e.put_u64(lamport_at_snapshot);
    e.put_u64(key_epoch);
    e.put_nonce(nonce);
    e.put_bytes(ciphertext);
    e.put_device_id(created_by_device_id);
    e.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_exact_bytes() {
        assert_eq!(SIGN_PREFIX.as_bytes(), b"forgor-sync-v1");
        assert_eq!(SIGN_PREFIX.len(), 14);

        let bytes = invite_claim(&Uuid::nil(), &Uuid::nil(), &[0u8; 32]);
        assert_eq!(&bytes[..4], &[0, 0, 0, 14]);
        assert_eq!(&bytes[4..18], b"forgor-sync-v1");
        assert_eq!(&bytes[18..22], &12u32.to_be_bytes());
        assert_eq!(&bytes[22..34], b"invite_claim");
    }

    #[test]
    fn test_invite_claim_layout() {
        let bytes = invite_claim(&Uuid::from_bytes([1; 16]), &Uuid::from_bytes([2; 16]), &[3; 32]);
        // prefix(4+14) + tag(4+12) + uuid + uuid + device_id
        assert_eq!(bytes.len(), 18 + 16 + 16 + 16 + 32);
        assert_eq!(&bytes[34..50], &[1u8; 16]);
        assert_eq!(&bytes[50..66], &[2u8; 16]);
        assert_eq!(&bytes[66..98], &[3u8; 32]);
    }

    #[test]
    fn test_member_remove_zero_padding_matches_add_layout() {
        let id = Uuid::from_bytes([0x11; 16]);
        let vault = Uuid::from_bytes([0x22; 16]);
        let actor = [0x33u8; 32];
        let subject = [0x44u8; 32];
        let prev = [0x55u8; 32];

        let removed = member_remove(&id, &vault, 2, &prev, &actor, &subject);
        let added = member_add(
            &id,
            &vault,
            2,
            &prev,
            &actor,
            &subject,
            &Uuid::nil(),
            &[0u8; 64],
            &[0u8; 64],
            &[0u8; 32],
            &[0u8; 32],
        );

        // Identical body bytes, differing only in the domain tag.
        let remove_tag_end = 18 + 4 + "member_remove".len();
        let add_tag_end = 18 + 4 + "member_add".len();
        assert_eq!(&removed[remove_tag_end..], &added[add_tag_end..]);
        assert_eq!(removed.len() - remove_tag_end, 16 + 16 + 8 + 32 + 32 + 32 + 16 + 64 + 64 + 32 + 32);
    }

    #[test]
    fn test_event_layout_widths() {
        let bytes = event(
            &Uuid::from_bytes([1; 16]),
            &Uuid::from_bytes([2; 16]),
            &[3; 32],
            7,
            8,
            9,
            &[4; 32],
            &[5; 24],
            b"ct",
        );
        let body = &bytes[18 + 4 + 5..]; // skip prefix + "event" tag
        assert_eq!(body.len(), 16 + 16 + 32 + 8 + 8 + 8 + 32 + 24 + 4 + 2);
        assert_eq!(&body[64..72], &7u64.to_be_bytes());
        assert_eq!(&body[72..80], &8u64.to_be_bytes());
        assert_eq!(&body[80..88], &9u64.to_be_bytes());
        assert_eq!(&body[144..148], &2u32.to_be_bytes());
        assert_eq!(&body[148..], b"ct");
    }

    #[test]
    fn test_snapshot_embeds_maps_opaque() {
        // Unsorted map bytes must pass through untouched.
        let raw_map = [0xde, 0xad, 0xbe, 0xef];
        let bytes = snapshot(
            &Uuid::nil(),
            &Uuid::nil(),
            1,
            1,
            &[0; 32],
            &raw_map,
            &[],
            0,
            1,
            &[0; 24],
            &[],
            &[0; 32],
        );
        let needle: Vec<u8> = [&4u32.to_be_bytes()[..], &raw_map[..]].concat();
        assert!(bytes.windows(needle.len()).any(|w| w == needle.as_slice()));
    }

    #[test]
    fn test_domain_tags_distinct() {
        // The same field content under different tags must never collide.
        let a = invite_claim(&Uuid::nil(), &Uuid::nil(), &[0; 32]);
        let b = device_bundle(&[0; 32], &[0; 32], &[0; 32]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_deterministic() {
        let build = || {
            key_update_ack(&Uuid::from_bytes([9; 16]), &[1; 32], 3, 5, &[7; 32])
        };
        assert_eq!(build(), build());
    }
}

//! Normalized row types: the shapes validators produce and the store
//! persists. Byte fields are raw (never base64) at this layer.

use forgor_core::DeviceId;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRow {
    pub device_id: DeviceId,
    pub pubkey_sign: Vec<u8>,
    pub pubkey_box: Vec<u8>,
    pub bundle_sig: Vec<u8>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultRow {
    pub vault_id: Uuid,
    pub owner_device_id: DeviceId,
    pub created_at: String,
    pub updated_at: String,
}

/// Tip of a vault's membership chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipHead {
    pub vault_id: Uuid,
    pub member_seq: u64,
    pub member_head_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultMemberRow {
    pub vault_id: Uuid,
    pub device_id: DeviceId,
    pub pubkey_sign: Vec<u8>,
    pub pubkey_box: Vec<u8>,
    pub bundle_sig: Vec<u8>,
    pub is_member: bool,
    pub key_epoch: u64,
}

/// One membership-chain record. The subject bundle, invite, and claim fields
/// are populated for `member_add` and empty for `member_remove`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEventRow {
    pub member_event_id: Uuid,
    pub vault_id: Uuid,
    pub member_seq: u64,
    pub prev_hash: Vec<u8>,
    pub actor_device_id: DeviceId,
    pub subject_device_id: DeviceId,
    pub msg_type: String,
    pub subject_pubkey_sign: Vec<u8>,
    pub subject_pubkey_box: Vec<u8>,
    pub subject_bundle_sig: Vec<u8>,
    pub invite_id: Option<Uuid>,
    pub claim_sig: Vec<u8>,
    pub signature: Vec<u8>,
    pub member_hash: Vec<u8>,
    pub created_at: String,
}

/// One encrypted per-device event. `seq` is 0 until the store assigns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub seq: u64,
    pub event_id: Uuid,
    pub event_hash: Vec<u8>,
    pub vault_id: Uuid,
    pub device_id: DeviceId,
    pub counter: u64,
    pub lamport: u64,
    pub key_epoch: u64,
    pub prev_hash: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub signature: Vec<u8>,
    pub created_at: String,
}

/// Tip of one `(vault, device)` event chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHead {
    pub vault_id: Uuid,
    pub device_id: DeviceId,
    pub last_counter: u64,
    pub last_hash: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteRow {
    pub invite_id: Uuid,
    pub vault_id: Uuid,
    pub target_device_id: DeviceId,
    pub target_pubkey_sign: Vec<u8>,
    pub target_pubkey_box: Vec<u8>,
    pub target_bundle_sig: Vec<u8>,
    pub nonce: Vec<u8>,
    pub wrapped_payload: Vec<u8>,
    pub created_by_device_id: DeviceId,
    pub single_use: bool,
    pub used: bool,
    pub signature: Vec<u8>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteClaimRow {
    pub invite_id: Uuid,
    pub vault_id: Uuid,
    pub device_id: DeviceId,
    pub claim_sig: Vec<u8>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUpdateRow {
    pub key_update_id: Uuid,
    pub vault_id: Uuid,
    pub member_seq: u64,
    pub member_head_hash: Vec<u8>,
    pub target_device_id: DeviceId,
    pub key_epoch: u64,
    pub nonce: Vec<u8>,
    pub wrapped_payload: Vec<u8>,
    pub created_by_device_id: DeviceId,
    pub signature: Vec<u8>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUpdateAckRow {
    pub vault_id: Uuid,
    pub key_epoch: u64,
    pub device_id: DeviceId,
    pub member_seq: u64,
    pub member_head_hash: Vec<u8>,
    pub signature: Vec<u8>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub snapshot_id: Uuid,
    pub vault_id: Uuid,
    pub base_seq: u64,
    pub member_seq: u64,
    pub member_head_hash: Vec<u8>,
    pub base_counter_map: Vec<u8>,
    pub head_hash_map: Vec<u8>,
    pub lamport_at_snapshot: u64,
    pub key_epoch: u64,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub signature: Vec<u8>,
    pub created_by_device_id: DeviceId,
    pub created_at: String,
}

/// Scope discriminator for the used-nonce set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NonceKind {
    Invite,
    KeyUpdate,
    Snapshot,
}

impl NonceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NonceKind::Invite => "invite",
            NonceKind::KeyUpdate => "key_update",
            NonceKind::Snapshot => "snapshot",
        }
    }
}

//! JSON wire models.
//!
//! Byte fields travel as standard base64, UUIDs as strings, device ids as
//! 64 lowercase hex characters, and uint64 fields as decimal strings so that
//! JSON number parsing can never lose precision. Unknown fields are rejected
//! at the parse layer.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Deref;
use uuid::Uuid;

use crate::crypto::DeviceId;

pub const MAX_EVENT_CIPHERTEXT: usize = 65536;
pub const MAX_SNAPSHOT_CIPHERTEXT: usize = 8 * 1024 * 1024;
pub const MAX_WRAPPED_PAYLOAD: usize = 1024;
pub const MAX_MAP_ENTRIES: usize = 1024;
pub const MAX_BASE_COUNTER_MAP: usize = MAX_MAP_ENTRIES * 40;
pub const MAX_HEAD_HASH_MAP: usize = MAX_MAP_ENTRIES * 64;

pub const NONCE_LEN: usize = 24;
pub const HASH_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
pub const PUBLIC_KEY_LEN: usize = 32;

/// A u64 carried as a decimal string in JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct U64String(pub u64);

impl U64String {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for U64String {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Serialize for U64String {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for U64String {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>()
            .map(U64String)
            .map_err(|_| D::Error::custom("expected a decimal uint64 string"))
    }
}

impl fmt::Display for U64String {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Raw bytes carried as standard base64 in JSON.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Base64Bytes(pub Vec<u8>);

impl Base64Bytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow as a fixed-width array; `None` if the length differs.
    pub fn as_array<const N: usize>(&self) -> Option<&[u8; N]> {
        <&[u8; N]>::try_from(self.0.as_slice()).ok()
    }
}

impl Deref for Base64Bytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Base64Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl From<&[u8]> for Base64Bytes {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

impl fmt::Debug for Base64Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Base64Bytes({} bytes)", self.0.len())
    }
}

impl Serialize for Base64Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64
            .decode(s.as_bytes())
            .map(Base64Bytes)
            .map_err(|_| D::Error::custom("expected standard base64"))
    }
}

/// A self-signed device bundle: the registration payload and the stored form
/// of a device's long-term public keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceBundle {
    pub device_id: DeviceId,
    pub device_pubkey_sign: Base64Bytes,
    pub device_pubkey_box: Base64Bytes,
    pub device_bundle_sig: Base64Bytes,
}

/// An encrypted per-device event on a `(vault, device)` hash chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Event {
    pub msg_type: String,
    pub event_id: Uuid,
    pub vault_id: Uuid,
    pub device_id: DeviceId,
    pub counter: U64String,
    pub lamport: U64String,
    pub key_epoch: U64String,
    pub prev_hash: Base64Bytes,
    pub nonce: Base64Bytes,
    pub ciphertext: Base64Bytes,
    pub signature: Base64Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<U64String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// A membership-chain record: `member_add` or `member_remove`, discriminated
/// by `msg_type`. The subject bundle, invite, and claim fields are only
/// meaningful for `member_add` and default to empty otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberEvent {
    pub msg_type: String,
    pub member_event_id: Uuid,
    pub vault_id: Uuid,
    pub member_seq: U64String,
    pub prev_hash: Base64Bytes,
    pub actor_device_id: DeviceId,
    pub subject_device_id: DeviceId,
    #[serde(default, skip_serializing_if = "Base64Bytes::is_empty")]
    pub subject_pubkey_sign: Base64Bytes,
    #[serde(default, skip_serializing_if = "Base64Bytes::is_empty")]
    pub subject_pubkey_box: Base64Bytes,
    #[serde(default, skip_serializing_if = "Base64Bytes::is_empty")]
    pub subject_bundle_sig: Base64Bytes,
    #[serde(default, skip_serializing_if = "Uuid::is_nil")]
    pub invite_id: Uuid,
    #[serde(default, skip_serializing_if = "Base64Bytes::is_empty")]
    pub claim_sig: Base64Bytes,
    pub signature: Base64Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Invite {
    pub msg_type: String,
    pub invite_id: Uuid,
    pub vault_id: Uuid,
    pub target_device_id: DeviceId,
    pub target_device_pubkey_sign: Base64Bytes,
    pub target_device_pubkey_box: Base64Bytes,
    pub target_device_bundle_sig: Base64Bytes,
    pub nonce: Base64Bytes,
    pub wrapped_payload: Base64Bytes,
    pub created_by_device_id: DeviceId,
    pub single_use: bool,
    pub signature: Base64Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InviteClaim {
    pub msg_type: String,
    pub invite_id: Uuid,
    pub vault_id: Uuid,
    pub device_id: DeviceId,
    pub signature: Base64Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyUpdate {
    pub msg_type: String,
    pub key_update_id: Uuid,
    pub vault_id: Uuid,
    pub member_seq: U64String,
    pub member_head_hash: Base64Bytes,
    pub target_device_id: DeviceId,
    pub key_epoch: U64String,
    pub nonce: Base64Bytes,
    pub wrapped_payload: Base64Bytes,
    pub created_by_device_id: DeviceId,
    pub signature: Base64Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyUpdateAck {
    pub msg_type: String,
    pub vault_id: Uuid,
    pub device_id: DeviceId,
    pub key_epoch: U64String,
    pub member_seq: U64String,
    pub member_head_hash: Base64Bytes,
    pub signature: Base64Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    pub msg_type: String,
    pub snapshot_id: Uuid,
    pub vault_id: Uuid,
    pub base_seq: U64String,
    pub member_seq: U64String,
    pub member_head_hash: Base64Bytes,
    pub base_counter_map: Base64Bytes,
    pub head_hash_map: Base64Bytes,
    pub lamport_at_snapshot: U64String,
    pub key_epoch: U64String,
    pub nonce: Base64Bytes,
    pub ciphertext: Base64Bytes,
    pub signature: Base64Bytes,
    pub created_by_device_id: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// One current member in the members listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMember {
    pub device_id: DeviceId,
    pub device_pubkey_sign: Base64Bytes,
    pub device_pubkey_box: Base64Bytes,
    pub key_epoch: U64String,
}

/// Response for the members listing: the membership head plus the current
/// member set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMembershipResponse {
    pub member_seq: U64String,
    pub head_hash: Base64Bytes,
    pub members: Vec<VaultMember>,
}

/// Response for an accepted event: the server-assigned delivery cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAccepted {
    pub seq: U64String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64string_roundtrip() {
        let v = U64String(u64::MAX);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"18446744073709551615\"");
        let back: U64String = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_u64string_rejects_numbers_and_garbage() {
        assert!(serde_json::from_str::<U64String>("42").is_err());
        assert!(serde_json::from_str::<U64String>("\"-1\"").is_err());
        assert!(serde_json::from_str::<U64String>("\"abc\"").is_err());
    }

    #[test]
    fn test_base64_roundtrip() {
        let b = Base64Bytes(vec![0, 1, 2, 255]);
        let json = serde_json::to_string(&b).unwrap();
        let back: Base64Bytes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn test_base64_as_array() {
        let b = Base64Bytes(vec![7u8; 32]);
        assert_eq!(b.as_array::<32>(), Some(&[7u8; 32]));
        assert_eq!(b.as_array::<24>(), None);
    }

    #[test]
    fn test_event_rejects_unknown_fields() {
        let json = r#"{
            "msg_type": "event",
            "event_id": "00000000-0000-0000-0000-000000000001",
            "vault_id": "00000000-0000-0000-0000-000000000002",
            "device_id": "aa",
            "counter": "1",
            "lamport": "1",
            "key_epoch": "1",
            "prev_hash": "",
            "nonce": "",
            "ciphertext": "",
            "signature": "",
            "surprise": true
        }"#;
        let err = serde_json::from_str::<Event>(json).unwrap_err();
        assert!(err.to_string().contains("surprise"));
    }

    #[test]
    fn test_member_event_optional_fields_default_empty() {
        let json = r#"{
            "msg_type": "member_remove",
            "member_event_id": "00000000-0000-0000-0000-000000000001",
            "vault_id": "00000000-0000-0000-0000-000000000002",
            "member_seq": "2",
            "prev_hash": "",
            "actor_device_id": "aa",
            "subject_device_id": "bb",
            "signature": ""
        }"#;
        let event: MemberEvent = serde_json::from_str(json).unwrap();
        assert!(event.subject_pubkey_sign.is_empty());
        assert!(event.claim_sig.is_empty());
        assert!(event.invite_id.is_nil());
    }

    #[test]
    fn test_uuid_wire_form_is_string() {
        let bundle = DeviceBundle {
            device_id: DeviceId::new("ab".repeat(32)),
            device_pubkey_sign: Base64Bytes(vec![1; 32]),
            device_pubkey_box: Base64Bytes(vec![2; 32]),
            device_bundle_sig: Base64Bytes(vec![3; 64]),
        };
        let json = serde_json::to_value(&bundle).unwrap();
        assert!(json["device_id"].is_string());
        assert!(json["device_pubkey_sign"].is_string());
    }
}

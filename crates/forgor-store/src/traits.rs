//! The Store trait: the abstract persistence interface the validators and
//! HTTP handlers consume.
//!
//! Point lookups never mutate. The `apply_*` methods bundle each write with
//! the constraints that keep it safe under races: head re-checks and the
//! nonce/uniqueness inserts run in the same transaction as the record insert.

use async_trait::async_trait;
use forgor_core::DeviceId;
use uuid::Uuid;

use crate::error::Result;
use crate::rows::{
    DeviceRow, EventHead, EventRow, InviteClaimRow, InviteRow, KeyUpdateAckRow, KeyUpdateRow,
    MemberEventRow, MembershipHead, NonceKind, SnapshotRow, VaultMemberRow, VaultRow,
};

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ─────────────────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────────────────

    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<DeviceRow>>;

    async fn insert_device(&self, row: &DeviceRow) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────
    // Vaults and membership
    // ─────────────────────────────────────────────────────────────────────

    async fn get_vault(&self, vault_id: &Uuid) -> Result<Option<VaultRow>>;

    async fn get_membership_head(&self, vault_id: &Uuid) -> Result<Option<MembershipHead>>;

    async fn get_member(
        &self,
        vault_id: &Uuid,
        device_id: &DeviceId,
    ) -> Result<Option<VaultMemberRow>>;

    async fn is_member(&self, vault_id: &Uuid, device_id: &DeviceId) -> Result<bool>;

    /// Current members only (`is_member = true`).
    async fn list_members(&self, vault_id: &Uuid) -> Result<Vec<VaultMemberRow>>;

    /// Apply a validated membership event in one transaction: create the
    /// vault at genesis, insert the event, advance the membership head,
    /// upsert the member (add, key_epoch reset to 1) or flip `is_member`
    /// off (remove), and best-effort mark the consumed invite used.
    ///
    /// Fails with `MembershipChainConflict` when the head moved since
    /// validation, `Duplicate` when the vault already exists at genesis.
    async fn apply_member_event(&self, row: &MemberEventRow) -> Result<()>;

    async fn list_member_events_since(
        &self,
        vault_id: &Uuid,
        since_seq: u64,
    ) -> Result<Vec<MemberEventRow>>;

    // ─────────────────────────────────────────────────────────────────────
    // Per-device event chains
    // ─────────────────────────────────────────────────────────────────────

    async fn get_event_head(
        &self,
        vault_id: &Uuid,
        device_id: &DeviceId,
    ) -> Result<Option<EventHead>>;

    async fn event_id_exists(
        &self,
        vault_id: &Uuid,
        device_id: &DeviceId,
        event_id: &Uuid,
    ) -> Result<bool>;

    /// Insert an event and advance its `(vault, device)` head in one
    /// transaction; returns the server-assigned monotonic `seq`.
    ///
    /// Fails with `EventChainConflict` when the head moved since validation,
    /// `Duplicate` on an `event_id` replay.
    async fn apply_event(&self, row: &EventRow) -> Result<u64>;

    async fn list_events_since(&self, vault_id: &Uuid, since_seq: u64) -> Result<Vec<EventRow>>;

    // ─────────────────────────────────────────────────────────────────────
    // Invites and claims
    // ─────────────────────────────────────────────────────────────────────

    async fn get_invite(&self, invite_id: &Uuid) -> Result<Option<InviteRow>>;

    /// Record the creator's nonce and insert the invite in one transaction.
    /// Fails with `NonceReused` when the nonce row already exists.
    async fn apply_invite(&self, row: &InviteRow) -> Result<()>;

    async fn list_invites_for_target(&self, target: &DeviceId) -> Result<Vec<InviteRow>>;

    async fn get_invite_claim(
        &self,
        invite_id: &Uuid,
        device_id: &DeviceId,
    ) -> Result<Option<InviteClaimRow>>;

    /// Idempotent: re-submitting an existing claim is a no-op.
    async fn insert_invite_claim(&self, row: &InviteClaimRow) -> Result<()>;

    async fn list_claims_by_creator(&self, creator: &DeviceId) -> Result<Vec<InviteClaimRow>>;

    // ─────────────────────────────────────────────────────────────────────
    // Key updates
    // ─────────────────────────────────────────────────────────────────────

    async fn key_update_exists(
        &self,
        vault_id: &Uuid,
        key_epoch: u64,
        target: &DeviceId,
    ) -> Result<bool>;

    /// Record the creator's nonce and insert the key update in one
    /// transaction. `NonceReused` / `Duplicate` on the respective races.
    async fn apply_key_update(&self, row: &KeyUpdateRow) -> Result<()>;

    async fn list_key_updates_for_target(&self, target: &DeviceId) -> Result<Vec<KeyUpdateRow>>;

    /// Idempotently insert the ack and set the member's `key_epoch`, in one
    /// transaction.
    async fn apply_key_update_ack(&self, row: &KeyUpdateAckRow) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────
    // Snapshots
    // ─────────────────────────────────────────────────────────────────────

    /// Record the creator's nonce and insert the snapshot in one transaction.
    async fn apply_snapshot(&self, row: &SnapshotRow) -> Result<()>;

    async fn latest_snapshot(&self, vault_id: &Uuid) -> Result<Option<SnapshotRow>>;

    /// Keep the latest `keep` snapshots (by `base_seq`) and delete the rest.
    async fn prune_snapshots(&self, vault_id: &Uuid, keep: usize) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────
    // Used nonces
    // ─────────────────────────────────────────────────────────────────────

    async fn nonce_used(
        &self,
        kind: NonceKind,
        vault_id: &Uuid,
        device_id: &DeviceId,
        nonce: &[u8],
    ) -> Result<bool>;
}

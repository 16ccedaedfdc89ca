//! In-memory implementation of the Store trait.
//!
//! Primarily for tests. Mirrors the SQLite semantics, including the in-apply
//! head re-checks and nonce uniqueness, with everything behind one RwLock so
//! each apply is atomic.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use forgor_core::DeviceId;

use crate::error::{Result, StoreError};
use crate::now_rfc3339;
use crate::rows::{
    DeviceRow, EventHead, EventRow, InviteClaimRow, InviteRow, KeyUpdateAckRow, KeyUpdateRow,
    MemberEventRow, MembershipHead, NonceKind, SnapshotRow, VaultMemberRow, VaultRow,
};
use crate::traits::Store;

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    devices: HashMap<String, DeviceRow>,
    vaults: HashMap<Uuid, VaultRow>,
    heads: HashMap<Uuid, MembershipHead>,
    members: HashMap<(Uuid, String), VaultMemberRow>,
    member_events: Vec<MemberEventRow>,
    events: Vec<EventRow>,
    next_seq: u64,
    event_heads: HashMap<(Uuid, String), EventHead>,
    invites: HashMap<Uuid, InviteRow>,
    claims: HashMap<(Uuid, String), InviteClaimRow>,
    key_updates: HashMap<(Uuid, u64, String), KeyUpdateRow>,
    acks: HashMap<(Uuid, u64, String), KeyUpdateAckRow>,
    snapshots: Vec<SnapshotRow>,
    nonces: HashSet<(&'static str, Uuid, String, Vec<u8>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn or_now(created_at: &str) -> String {
    if created_at.is_empty() {
        now_rfc3339()
    } else {
        created_at.to_string()
    }
}

fn check_membership_head(
    heads: &HashMap<Uuid, MembershipHead>,
    vault_id: &Uuid,
    member_seq: u64,
    prev_hash: &[u8],
) -> Result<()> {
    match heads.get(vault_id) {
        None if member_seq == 1 => Ok(()),
        None => Err(StoreError::MembershipChainConflict),
        Some(head) => {
            if member_seq == head.member_seq + 1 && prev_hash == head.member_head_hash.as_slice() {
                Ok(())
            } else {
                Err(StoreError::MembershipChainConflict)
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<DeviceRow>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.devices.get(device_id.as_str()).cloned())
    }

    async fn insert_device(&self, row: &DeviceRow) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.devices.contains_key(row.device_id.as_str()) {
            return Err(StoreError::Duplicate("device already registered".into()));
        }
        let mut row = row.clone();
        row.created_at = or_now(&row.created_at);
        inner.devices.insert(row.device_id.as_str().to_string(), row);
        Ok(())
    }

    async fn get_vault(&self, vault_id: &Uuid) -> Result<Option<VaultRow>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.vaults.get(vault_id).cloned())
    }

    async fn get_membership_head(&self, vault_id: &Uuid) -> Result<Option<MembershipHead>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.heads.get(vault_id).cloned())
    }

    async fn get_member(
        &self,
        vault_id: &Uuid,
        device_id: &DeviceId,
    ) -> Result<Option<VaultMemberRow>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .members
            .get(&(*vault_id, device_id.as_str().to_string()))
            .cloned())
    }

    async fn is_member(&self, vault_id: &Uuid, device_id: &DeviceId) -> Result<bool> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .members
            .get(&(*vault_id, device_id.as_str().to_string()))
            .map(|m| m.is_member)
            .unwrap_or(false))
    }

    async fn list_members(&self, vault_id: &Uuid) -> Result<Vec<VaultMemberRow>> {
        let inner = self.inner.read().unwrap();
        let mut members: Vec<VaultMemberRow> = inner
            .members
            .values()
            .filter(|m| m.vault_id == *vault_id && m.is_member)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.device_id.as_str().cmp(b.device_id.as_str()));
        Ok(members)
    }

    async fn apply_member_event(&self, row: &MemberEventRow) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        check_membership_head(&inner.heads, &row.vault_id, row.member_seq, &row.prev_hash)?;

        let is_genesis = row.member_seq == 1;
        if is_genesis {
            if inner.vaults.contains_key(&row.vault_id) {
                return Err(StoreError::Duplicate("vault already exists".into()));
            }
            let now = now_rfc3339();
            inner.vaults.insert(
                row.vault_id,
                VaultRow {
                    vault_id: row.vault_id,
                    owner_device_id: row.actor_device_id.clone(),
                    created_at: now.clone(),
                    updated_at: now,
                },
            );
        }

        let mut stored = row.clone();
        stored.created_at = or_now(&row.created_at);
        inner.member_events.push(stored);

        inner.heads.insert(
            row.vault_id,
            MembershipHead {
                vault_id: row.vault_id,
                member_seq: row.member_seq,
                member_head_hash: row.member_hash.clone(),
            },
        );

        if row.msg_type == "member_add" {
            inner.members.insert(
                (row.vault_id, row.subject_device_id.as_str().to_string()),
                VaultMemberRow {
                    vault_id: row.vault_id,
                    device_id: row.subject_device_id.clone(),
                    pubkey_sign: row.subject_pubkey_sign.clone(),
                    pubkey_box: row.subject_pubkey_box.clone(),
                    bundle_sig: row.subject_bundle_sig.clone(),
                    is_member: true,
                    key_epoch: 1,
                },
            );
            if !is_genesis {
                if let Some(invite_id) = row.invite_id {
                    if let Some(invite) = inner.invites.get_mut(&invite_id) {
                        invite.used = true;
                    }
                }
            }
        } else if let Some(member) = inner
            .members
            .get_mut(&(row.vault_id, row.subject_device_id.as_str().to_string()))
        {
            member.is_member = false;
        }

        Ok(())
    }

    async fn list_member_events_since(
        &self,
        vault_id: &Uuid,
        since_seq: u64,
    ) -> Result<Vec<MemberEventRow>> {
        let inner = self.inner.read().unwrap();
        let mut events: Vec<MemberEventRow> = inner
            .member_events
            .iter()
            .filter(|e| e.vault_id == *vault_id && e.member_seq > since_seq)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.member_seq);
        Ok(events)
    }

    async fn get_event_head(
        &self,
        vault_id: &Uuid,
        device_id: &DeviceId,
    ) -> Result<Option<EventHead>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .event_heads
            .get(&(*vault_id, device_id.as_str().to_string()))
            .cloned())
    }

    async fn event_id_exists(
        &self,
        vault_id: &Uuid,
        device_id: &DeviceId,
        event_id: &Uuid,
    ) -> Result<bool> {
        let inner = self.inner.read().unwrap();
        Ok(inner.events.iter().any(|e| {
            e.vault_id == *vault_id
                && e.device_id.as_str() == device_id.as_str()
                && e.event_id == *event_id
        }))
    }

    async fn apply_event(&self, row: &EventRow) -> Result<u64> {
        let mut inner = self.inner.write().unwrap();

        match inner
            .event_heads
            .get(&(row.vault_id, row.device_id.as_str().to_string()))
        {
            None if row.counter == 1 => {}
            None => return Err(StoreError::EventChainConflict),
            Some(head) => {
                if row.counter != head.last_counter + 1 || row.prev_hash != head.last_hash {
                    return Err(StoreError::EventChainConflict);
                }
            }
        }

        if inner.events.iter().any(|e| {
            e.vault_id == row.vault_id
                && e.device_id.as_str() == row.device_id.as_str()
                && e.event_id == row.event_id
        }) {
            return Err(StoreError::Duplicate("event_id already exists".into()));
        }

        inner.next_seq += 1;
        let seq = inner.next_seq;

        let mut stored = row.clone();
        stored.seq = seq;
        stored.created_at = or_now(&row.created_at);
        inner.events.push(stored);

        inner.event_heads.insert(
            (row.vault_id, row.device_id.as_str().to_string()),
            EventHead {
                vault_id: row.vault_id,
                device_id: row.device_id.clone(),
                last_counter: row.counter,
                last_hash: row.event_hash.clone(),
            },
        );

        Ok(seq)
    }

    async fn list_events_since(&self, vault_id: &Uuid, since_seq: u64) -> Result<Vec<EventRow>> {
        let inner = self.inner.read().unwrap();
        let mut events: Vec<EventRow> = inner
            .events
            .iter()
            .filter(|e| e.vault_id == *vault_id && e.seq > since_seq)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    async fn get_invite(&self, invite_id: &Uuid) -> Result<Option<InviteRow>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.invites.get(invite_id).cloned())
    }

    async fn apply_invite(&self, row: &InviteRow) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        let nonce_key = (
            NonceKind::Invite.as_str(),
            row.vault_id,
            row.created_by_device_id.as_str().to_string(),
            row.nonce.clone(),
        );
        if inner.nonces.contains(&nonce_key) {
            return Err(StoreError::NonceReused);
        }
        if inner.invites.contains_key(&row.invite_id) {
            return Err(StoreError::Duplicate("invite_id already exists".into()));
        }

        inner.nonces.insert(nonce_key);
        let mut stored = row.clone();
        stored.created_at = or_now(&row.created_at);
        inner.invites.insert(row.invite_id, stored);
        Ok(())
    }

    async fn list_invites_for_target(&self, target: &DeviceId) -> Result<Vec<InviteRow>> {
        let inner = self.inner.read().unwrap();
        let mut invites: Vec<InviteRow> = inner
            .invites
            .values()
            .filter(|i| i.target_device_id.as_str() == target.as_str())
            .cloned()
            .collect();
        invites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(invites)
    }

    async fn get_invite_claim(
        &self,
        invite_id: &Uuid,
        device_id: &DeviceId,
    ) -> Result<Option<InviteClaimRow>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .claims
            .get(&(*invite_id, device_id.as_str().to_string()))
            .cloned())
    }

    async fn insert_invite_claim(&self, row: &InviteClaimRow) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let key = (row.invite_id, row.device_id.as_str().to_string());
        if !inner.claims.contains_key(&key) {
            let mut stored = row.clone();
            stored.created_at = or_now(&row.created_at);
            inner.claims.insert(key, stored);
        }
        Ok(())
    }

    async fn list_claims_by_creator(&self, creator: &DeviceId) -> Result<Vec<InviteClaimRow>> {
        let inner = self.inner.read().unwrap();
        let mut claims: Vec<InviteClaimRow> = inner
            .claims
            .values()
            .filter(|c| {
                inner
                    .invites
                    .get(&c.invite_id)
                    .is_some_and(|i| i.created_by_device_id.as_str() == creator.as_str())
            })
            .cloned()
            .collect();
        claims.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(claims)
    }

    async fn key_update_exists(
        &self,
        vault_id: &Uuid,
        key_epoch: u64,
        target: &DeviceId,
    ) -> Result<bool> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .key_updates
            .contains_key(&(*vault_id, key_epoch, target.as_str().to_string())))
    }

    async fn apply_key_update(&self, row: &KeyUpdateRow) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        let nonce_key = (
            NonceKind::KeyUpdate.as_str(),
            row.vault_id,
            row.created_by_device_id.as_str().to_string(),
            row.nonce.clone(),
        );
        if inner.nonces.contains(&nonce_key) {
            return Err(StoreError::NonceReused);
        }

        let key = (
            row.vault_id,
            row.key_epoch,
            row.target_device_id.as_str().to_string(),
        );
        if inner.key_updates.contains_key(&key) {
            return Err(StoreError::Duplicate(
                "key update for this epoch and target already exists".into(),
            ));
        }

        inner.nonces.insert(nonce_key);
        let mut stored = row.clone();
        stored.created_at = or_now(&row.created_at);
        inner.key_updates.insert(key, stored);
        Ok(())
    }

    async fn list_key_updates_for_target(&self, target: &DeviceId) -> Result<Vec<KeyUpdateRow>> {
        let inner = self.inner.read().unwrap();
        let mut updates: Vec<KeyUpdateRow> = inner
            .key_updates
            .values()
            .filter(|k| k.target_device_id.as_str() == target.as_str())
            .cloned()
            .collect();
        updates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(updates)
    }

    async fn apply_key_update_ack(&self, row: &KeyUpdateAckRow) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        let key = (
            row.vault_id,
            row.key_epoch,
            row.device_id.as_str().to_string(),
        );
        if !inner.acks.contains_key(&key) {
            let mut stored = row.clone();
            stored.created_at = or_now(&row.created_at);
            inner.acks.insert(key, stored);
        }

        if let Some(member) = inner
            .members
            .get_mut(&(row.vault_id, row.device_id.as_str().to_string()))
        {
            member.key_epoch = row.key_epoch;
        }

        Ok(())
    }

    async fn apply_snapshot(&self, row: &SnapshotRow) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        let nonce_key = (
            NonceKind::Snapshot.as_str(),
            row.vault_id,
            row.created_by_device_id.as_str().to_string(),
            row.nonce.clone(),
        );
        if inner.nonces.contains(&nonce_key) {
            return Err(StoreError::NonceReused);
        }
        if inner
            .snapshots
            .iter()
            .any(|s| s.snapshot_id == row.snapshot_id)
        {
            return Err(StoreError::Duplicate("snapshot_id already exists".into()));
        }

        inner.nonces.insert(nonce_key);
        let mut stored = row.clone();
        stored.created_at = or_now(&row.created_at);
        inner.snapshots.push(stored);
        Ok(())
    }

    async fn latest_snapshot(&self, vault_id: &Uuid) -> Result<Option<SnapshotRow>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .snapshots
            .iter()
            .filter(|s| s.vault_id == *vault_id)
            .max_by_key(|s| s.base_seq)
            .cloned())
    }

    async fn prune_snapshots(&self, vault_id: &Uuid, keep: usize) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        let mut for_vault: Vec<(u64, Uuid)> = inner
            .snapshots
            .iter()
            .filter(|s| s.vault_id == *vault_id)
            .map(|s| (s.base_seq, s.snapshot_id))
            .collect();
        for_vault.sort_by(|a, b| b.0.cmp(&a.0));
        let kept: HashSet<Uuid> = for_vault.into_iter().take(keep).map(|(_, id)| id).collect();

        inner
            .snapshots
            .retain(|s| s.vault_id != *vault_id || kept.contains(&s.snapshot_id));
        Ok(())
    }

    async fn nonce_used(
        &self,
        kind: NonceKind,
        vault_id: &Uuid,
        device_id: &DeviceId,
        nonce: &[u8],
    ) -> Result<bool> {
        let inner = self.inner.read().unwrap();
        Ok(inner.nonces.contains(&(
            kind.as_str(),
            *vault_id,
            device_id.as_str().to_string(),
            nonce.to_vec(),
        )))
    }
}

//! SQLite implementation of the Store trait.
//!
//! The primary backend. Uses rusqlite with bundled SQLite behind an
//! `Arc<Mutex<Connection>>`; every operation crosses into
//! `tokio::task::spawn_blocking` so statements never block the async runtime.
//! Multi-statement writes run in `BEGIN IMMEDIATE` transactions scoped to the
//! (head-read, insert, head-upsert) triple.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use forgor_core::DeviceId;

use crate::error::{is_constraint_violation, Result, StoreError};
use crate::migration;
use crate::now_rfc3339;
use crate::rows::{
    DeviceRow, EventHead, EventRow, InviteClaimRow, InviteRow, KeyUpdateAckRow, KeyUpdateRow,
    MemberEventRow, MembershipHead, NonceKind, SnapshotRow, VaultMemberRow, VaultRow,
};
use crate::traits::Store;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and migrate) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database, for tests.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a statement batch on the blocking pool.
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Task(format!("connection mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn uuid_blob(id: &Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn blob_to_uuid(idx: usize, b: Vec<u8>) -> rusqlite::Result<Uuid> {
    Uuid::from_slice(&b).map_err(|_| {
        rusqlite::Error::InvalidColumnType(idx, "uuid".into(), rusqlite::types::Type::Blob)
    })
}

fn or_now(created_at: &str) -> String {
    if created_at.is_empty() {
        now_rfc3339()
    } else {
        created_at.to_string()
    }
}

fn row_to_member_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemberEventRow> {
    let invite_id: Option<Vec<u8>> = row.get("invite_id")?;
    Ok(MemberEventRow {
        member_event_id: blob_to_uuid(0, row.get("member_event_id")?)?,
        vault_id: blob_to_uuid(1, row.get("vault_id")?)?,
        member_seq: row.get::<_, i64>("member_seq")? as u64,
        prev_hash: row.get("prev_hash")?,
        actor_device_id: DeviceId::new(row.get::<_, String>("actor_device_id")?),
        subject_device_id: DeviceId::new(row.get::<_, String>("subject_device_id")?),
        msg_type: row.get("msg_type")?,
        subject_pubkey_sign: row.get("subject_pubkey_sign")?,
        subject_pubkey_box: row.get("subject_pubkey_box")?,
        subject_bundle_sig: row.get("subject_bundle_sig")?,
        invite_id: invite_id.map(|b| blob_to_uuid(10, b)).transpose()?,
        claim_sig: row.get("claim_sig")?,
        signature: row.get("signature")?,
        member_hash: row.get("member_hash")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        seq: row.get::<_, i64>("seq")? as u64,
        event_id: blob_to_uuid(1, row.get("event_id")?)?,
        event_hash: row.get("event_hash")?,
        vault_id: blob_to_uuid(3, row.get("vault_id")?)?,
        device_id: DeviceId::new(row.get::<_, String>("device_id")?),
        counter: row.get::<_, i64>("counter")? as u64,
        lamport: row.get::<_, i64>("lamport")? as u64,
        key_epoch: row.get::<_, i64>("key_epoch")? as u64,
        prev_hash: row.get("prev_hash")?,
        nonce: row.get("nonce")?,
        ciphertext: row.get("ciphertext")?,
        signature: row.get("signature")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_invite(row: &rusqlite::Row<'_>) -> rusqlite::Result<InviteRow> {
    Ok(InviteRow {
        invite_id: blob_to_uuid(0, row.get("invite_id")?)?,
        vault_id: blob_to_uuid(1, row.get("vault_id")?)?,
        target_device_id: DeviceId::new(row.get::<_, String>("target_device_id")?),
        target_pubkey_sign: row.get("target_device_pubkey_sign")?,
        target_pubkey_box: row.get("target_device_pubkey_box")?,
        target_bundle_sig: row.get("target_device_bundle_sig")?,
        nonce: row.get("nonce")?,
        wrapped_payload: row.get("wrapped_payload")?,
        created_by_device_id: DeviceId::new(row.get::<_, String>("created_by_device_id")?),
        single_use: row.get("single_use")?,
        used: row.get("used")?,
        signature: row.get("signature")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_claim(row: &rusqlite::Row<'_>) -> rusqlite::Result<InviteClaimRow> {
    Ok(InviteClaimRow {
        invite_id: blob_to_uuid(0, row.get("invite_id")?)?,
        vault_id: blob_to_uuid(1, row.get("vault_id")?)?,
        device_id: DeviceId::new(row.get::<_, String>("device_id")?),
        claim_sig: row.get("claim_sig")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_key_update(row: &rusqlite::Row<'_>) -> rusqlite::Result<KeyUpdateRow> {
    Ok(KeyUpdateRow {
        key_update_id: blob_to_uuid(0, row.get("key_update_id")?)?,
        vault_id: blob_to_uuid(1, row.get("vault_id")?)?,
        member_seq: row.get::<_, i64>("member_seq")? as u64,
        member_head_hash: row.get("member_head_hash")?,
        target_device_id: DeviceId::new(row.get::<_, String>("target_device_id")?),
        key_epoch: row.get::<_, i64>("key_epoch")? as u64,
        nonce: row.get("nonce")?,
        wrapped_payload: row.get("wrapped_payload")?,
        created_by_device_id: DeviceId::new(row.get::<_, String>("created_by_device_id")?),
        signature: row.get("signature")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        snapshot_id: blob_to_uuid(0, row.get("snapshot_id")?)?,
        vault_id: blob_to_uuid(1, row.get("vault_id")?)?,
        base_seq: row.get::<_, i64>("base_seq")? as u64,
        member_seq: row.get::<_, i64>("member_seq")? as u64,
        member_head_hash: row.get("member_head_hash")?,
        base_counter_map: row.get("base_counter_map")?,
        head_hash_map: row.get("head_hash_map")?,
        lamport_at_snapshot: row.get::<_, i64>("lamport_at_snapshot")? as u64,
        key_epoch: row.get::<_, i64>("key_epoch")? as u64,
        nonce: row.get("nonce")?,
        ciphertext: row.get("ciphertext")?,
        signature: row.get("signature")?,
        created_by_device_id: DeviceId::new(row.get::<_, String>("created_by_device_id")?),
        created_at: row.get("created_at")?,
    })
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<VaultMemberRow> {
    Ok(VaultMemberRow {
        vault_id: blob_to_uuid(0, row.get("vault_id")?)?,
        device_id: DeviceId::new(row.get::<_, String>("device_id")?),
        pubkey_sign: row.get("device_pubkey_sign")?,
        pubkey_box: row.get("device_pubkey_box")?,
        bundle_sig: row.get("subject_bundle_sig")?,
        is_member: row.get("is_member")?,
        key_epoch: row.get::<_, i64>("key_epoch")? as u64,
    })
}

/// Re-check the membership head inside the transaction that advances it.
fn check_membership_head(
    tx: &rusqlite::Transaction<'_>,
    vault_id: &[u8],
    member_seq: u64,
    prev_hash: &[u8],
) -> Result<()> {
    let head: Option<(i64, Vec<u8>)> = tx
        .query_row(
            "SELECT member_seq, member_head_hash FROM vault_membership_heads WHERE vault_id = ?1",
            params![vault_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    match head {
        None if member_seq == 1 => Ok(()),
        None => Err(StoreError::MembershipChainConflict),
        Some((seq, hash)) => {
            if member_seq == seq as u64 + 1 && prev_hash == hash.as_slice() {
                Ok(())
            } else {
                Err(StoreError::MembershipChainConflict)
            }
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_device(&self, device_id: &DeviceId) -> Result<Option<DeviceRow>> {
        let device_id = device_id.clone();
        self.call(move |conn| {
            conn.query_row(
                "SELECT device_id, device_pubkey_sign, device_pubkey_box, device_bundle_sig, created_at
                 FROM devices WHERE device_id = ?1",
                params![device_id.as_str()],
                |row| {
                    Ok(DeviceRow {
                        device_id: DeviceId::new(row.get::<_, String>(0)?),
                        pubkey_sign: row.get(1)?,
                        pubkey_box: row.get(2)?,
                        bundle_sig: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn insert_device(&self, row: &DeviceRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO devices (device_id, device_pubkey_sign, device_pubkey_box, device_bundle_sig, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.device_id.as_str(),
                    row.pubkey_sign,
                    row.pubkey_box,
                    row.bundle_sig,
                    or_now(&row.created_at),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Duplicate("device already registered".into())
                } else {
                    e.into()
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn get_vault(&self, vault_id: &Uuid) -> Result<Option<VaultRow>> {
        let vid = uuid_blob(vault_id);
        self.call(move |conn| {
            conn.query_row(
                "SELECT vault_id, owner_device_id, created_at, updated_at FROM vaults WHERE vault_id = ?1",
                params![vid],
                |row| {
                    Ok(VaultRow {
                        vault_id: blob_to_uuid(0, row.get(0)?)?,
                        owner_device_id: DeviceId::new(row.get::<_, String>(1)?),
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_membership_head(&self, vault_id: &Uuid) -> Result<Option<MembershipHead>> {
        let vid = uuid_blob(vault_id);
        self.call(move |conn| {
            conn.query_row(
                "SELECT vault_id, member_seq, member_head_hash FROM vault_membership_heads WHERE vault_id = ?1",
                params![vid],
                |row| {
                    Ok(MembershipHead {
                        vault_id: blob_to_uuid(0, row.get(0)?)?,
                        member_seq: row.get::<_, i64>(1)? as u64,
                        member_head_hash: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn get_member(
        &self,
        vault_id: &Uuid,
        device_id: &DeviceId,
    ) -> Result<Option<VaultMemberRow>> {
        let vid = uuid_blob(vault_id);
        let device_id = device_id.clone();
        self.call(move |conn| {
            conn.query_row(
                "SELECT vault_id, device_id, device_pubkey_sign, device_pubkey_box, subject_bundle_sig, is_member, key_epoch
                 FROM vault_members WHERE vault_id = ?1 AND device_id = ?2",
                params![vid, device_id.as_str()],
                row_to_member,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn is_member(&self, vault_id: &Uuid, device_id: &DeviceId) -> Result<bool> {
        let vid = uuid_blob(vault_id);
        let device_id = device_id.clone();
        self.call(move |conn| {
            let is_member: Option<bool> = conn
                .query_row(
                    "SELECT is_member FROM vault_members WHERE vault_id = ?1 AND device_id = ?2",
                    params![vid, device_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(is_member.unwrap_or(false))
        })
        .await
    }

    async fn list_members(&self, vault_id: &Uuid) -> Result<Vec<VaultMemberRow>> {
        let vid = uuid_blob(vault_id);
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT vault_id, device_id, device_pubkey_sign, device_pubkey_box, subject_bundle_sig, is_member, key_epoch
                 FROM vault_members WHERE vault_id = ?1 AND is_member = 1
                 ORDER BY device_id",
            )?;
            let members = stmt
                .query_map(params![vid], row_to_member)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(members)
        })
        .await
    }

    async fn apply_member_event(&self, row: &MemberEventRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let vid = uuid_blob(&row.vault_id);

            check_membership_head(&tx, &vid, row.member_seq, &row.prev_hash)?;

            let is_genesis = row.member_seq == 1;
            if is_genesis {
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM vaults WHERE vault_id = ?1)",
                    params![vid],
                    |r| r.get(0),
                )?;
                if exists {
                    return Err(StoreError::Duplicate("vault already exists".into()));
                }
                let now = now_rfc3339();
                tx.execute(
                    "INSERT INTO vaults (vault_id, owner_device_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![vid, row.actor_device_id.as_str(), now, now],
                )?;
            }

            tx.execute(
                "INSERT INTO member_events (
                    member_event_id, vault_id, member_seq, prev_hash, actor_device_id,
                    subject_device_id, msg_type, subject_pubkey_sign, subject_pubkey_box,
                    subject_bundle_sig, invite_id, claim_sig, signature, member_hash, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    uuid_blob(&row.member_event_id),
                    vid,
                    row.member_seq as i64,
                    row.prev_hash,
                    row.actor_device_id.as_str(),
                    row.subject_device_id.as_str(),
                    row.msg_type,
                    row.subject_pubkey_sign,
                    row.subject_pubkey_box,
                    row.subject_bundle_sig,
                    row.invite_id.map(|u| uuid_blob(&u)),
                    row.claim_sig,
                    row.signature,
                    row.member_hash,
                    or_now(&row.created_at),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::MembershipChainConflict
                } else {
                    e.into()
                }
            })?;

            tx.execute(
                "INSERT INTO vault_membership_heads (vault_id, member_seq, member_head_hash)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(vault_id) DO UPDATE SET
                    member_seq = excluded.member_seq,
                    member_head_hash = excluded.member_head_hash",
                params![vid, row.member_seq as i64, row.member_hash],
            )?;

            if row.msg_type == "member_add" {
                tx.execute(
                    "INSERT INTO vault_members (
                        vault_id, device_id, device_pubkey_sign, device_pubkey_box,
                        subject_bundle_sig, is_member, key_epoch
                    ) VALUES (?1, ?2, ?3, ?4, ?5, 1, 1)
                     ON CONFLICT(vault_id, device_id) DO UPDATE SET
                        device_pubkey_sign = excluded.device_pubkey_sign,
                        device_pubkey_box = excluded.device_pubkey_box,
                        subject_bundle_sig = excluded.subject_bundle_sig,
                        is_member = 1,
                        key_epoch = 1",
                    params![
                        vid,
                        row.subject_device_id.as_str(),
                        row.subject_pubkey_sign,
                        row.subject_pubkey_box,
                        row.subject_bundle_sig,
                    ],
                )?;

                // The chain's dense member_seq already blocks double-admission;
                // a failure here is tolerable.
                if !is_genesis {
                    if let Some(invite_id) = row.invite_id {
                        let _ = tx.execute(
                            "UPDATE invites SET used = 1 WHERE invite_id = ?1",
                            params![uuid_blob(&invite_id)],
                        );
                    }
                }
            } else {
                tx.execute(
                    "UPDATE vault_members SET is_member = 0 WHERE vault_id = ?1 AND device_id = ?2",
                    params![vid, row.subject_device_id.as_str()],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_member_events_since(
        &self,
        vault_id: &Uuid,
        since_seq: u64,
    ) -> Result<Vec<MemberEventRow>> {
        let vid = uuid_blob(vault_id);
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT member_event_id, vault_id, member_seq, prev_hash, actor_device_id,
                        subject_device_id, msg_type, subject_pubkey_sign, subject_pubkey_box,
                        subject_bundle_sig, invite_id, claim_sig, signature, member_hash, created_at
                 FROM member_events
                 WHERE vault_id = ?1 AND member_seq > ?2
                 ORDER BY member_seq ASC",
            )?;
            let events = stmt
                .query_map(params![vid, since_seq as i64], row_to_member_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
        .await
    }

    async fn get_event_head(
        &self,
        vault_id: &Uuid,
        device_id: &DeviceId,
    ) -> Result<Option<EventHead>> {
        let vid = uuid_blob(vault_id);
        let device_id = device_id.clone();
        self.call(move |conn| {
            conn.query_row(
                "SELECT vault_id, device_id, last_counter, last_hash
                 FROM event_heads WHERE vault_id = ?1 AND device_id = ?2",
                params![vid, device_id.as_str()],
                |row| {
                    Ok(EventHead {
                        vault_id: blob_to_uuid(0, row.get(0)?)?,
                        device_id: DeviceId::new(row.get::<_, String>(1)?),
                        last_counter: row.get::<_, i64>(2)? as u64,
                        last_hash: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn event_id_exists(
        &self,
        vault_id: &Uuid,
        device_id: &DeviceId,
        event_id: &Uuid,
    ) -> Result<bool> {
        let vid = uuid_blob(vault_id);
        let eid = uuid_blob(event_id);
        let device_id = device_id.clone();
        self.call(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM events WHERE vault_id = ?1 AND device_id = ?2 AND event_id = ?3)",
                params![vid, device_id.as_str(), eid],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn apply_event(&self, row: &EventRow) -> Result<u64> {
        let row = row.clone();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let vid = uuid_blob(&row.vault_id);

            let head: Option<(i64, Vec<u8>)> = tx
                .query_row(
                    "SELECT last_counter, last_hash FROM event_heads WHERE vault_id = ?1 AND device_id = ?2",
                    params![vid, row.device_id.as_str()],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            match head {
                None if row.counter == 1 => {}
                None => return Err(StoreError::EventChainConflict),
                Some((last_counter, last_hash)) => {
                    if row.counter != last_counter as u64 + 1 || row.prev_hash != last_hash {
                        return Err(StoreError::EventChainConflict);
                    }
                }
            }

            tx.execute(
                "INSERT INTO events (
                    event_id, event_hash, vault_id, device_id, counter, lamport, key_epoch,
                    prev_hash, nonce, ciphertext, signature, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    uuid_blob(&row.event_id),
                    row.event_hash,
                    vid,
                    row.device_id.as_str(),
                    row.counter as i64,
                    row.lamport as i64,
                    row.key_epoch as i64,
                    row.prev_hash,
                    row.nonce,
                    row.ciphertext,
                    row.signature,
                    or_now(&row.created_at),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Duplicate("event_id already exists".into())
                } else {
                    e.into()
                }
            })?;

            let seq = tx.last_insert_rowid() as u64;

            tx.execute(
                "INSERT INTO event_heads (vault_id, device_id, last_counter, last_hash)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(vault_id, device_id) DO UPDATE SET
                    last_counter = excluded.last_counter,
                    last_hash = excluded.last_hash",
                params![vid, row.device_id.as_str(), row.counter as i64, row.event_hash],
            )?;

            tx.commit()?;
            Ok(seq)
        })
        .await
    }

    async fn list_events_since(&self, vault_id: &Uuid, since_seq: u64) -> Result<Vec<EventRow>> {
        let vid = uuid_blob(vault_id);
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, event_id, event_hash, vault_id, device_id, counter, lamport,
                        key_epoch, prev_hash, nonce, ciphertext, signature, created_at
                 FROM events
                 WHERE vault_id = ?1 AND seq > ?2
                 ORDER BY seq ASC",
            )?;
            let events = stmt
                .query_map(params![vid, since_seq as i64], row_to_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
        .await
    }

    async fn get_invite(&self, invite_id: &Uuid) -> Result<Option<InviteRow>> {
        let iid = uuid_blob(invite_id);
        self.call(move |conn| {
            conn.query_row(
                "SELECT invite_id, vault_id, target_device_id, target_device_pubkey_sign,
                        target_device_pubkey_box, target_device_bundle_sig, nonce, wrapped_payload,
                        created_by_device_id, single_use, used, signature, created_at
                 FROM invites WHERE invite_id = ?1",
                params![iid],
                row_to_invite,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn apply_invite(&self, row: &InviteRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let vid = uuid_blob(&row.vault_id);

            insert_nonce(
                &tx,
                NonceKind::Invite,
                &vid,
                row.created_by_device_id.as_str(),
                &row.nonce,
            )?;

            tx.execute(
                "INSERT INTO invites (
                    invite_id, vault_id, target_device_id, target_device_pubkey_sign,
                    target_device_pubkey_box, target_device_bundle_sig, nonce, wrapped_payload,
                    created_by_device_id, single_use, used, signature, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    uuid_blob(&row.invite_id),
                    vid,
                    row.target_device_id.as_str(),
                    row.target_pubkey_sign,
                    row.target_pubkey_box,
                    row.target_bundle_sig,
                    row.nonce,
                    row.wrapped_payload,
                    row.created_by_device_id.as_str(),
                    row.single_use,
                    row.used,
                    row.signature,
                    or_now(&row.created_at),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Duplicate("invite_id already exists".into())
                } else {
                    e.into()
                }
            })?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_invites_for_target(&self, target: &DeviceId) -> Result<Vec<InviteRow>> {
        let target = target.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT invite_id, vault_id, target_device_id, target_device_pubkey_sign,
                        target_device_pubkey_box, target_device_bundle_sig, nonce, wrapped_payload,
                        created_by_device_id, single_use, used, signature, created_at
                 FROM invites WHERE target_device_id = ?1
                 ORDER BY created_at DESC",
            )?;
            let invites = stmt
                .query_map(params![target.as_str()], row_to_invite)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(invites)
        })
        .await
    }

    async fn get_invite_claim(
        &self,
        invite_id: &Uuid,
        device_id: &DeviceId,
    ) -> Result<Option<InviteClaimRow>> {
        let iid = uuid_blob(invite_id);
        let device_id = device_id.clone();
        self.call(move |conn| {
            conn.query_row(
                "SELECT invite_id, vault_id, device_id, claim_sig, created_at
                 FROM invite_claims WHERE invite_id = ?1 AND device_id = ?2",
                params![iid, device_id.as_str()],
                row_to_claim,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn insert_invite_claim(&self, row: &InviteClaimRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO invite_claims (invite_id, vault_id, device_id, claim_sig, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(invite_id, device_id) DO NOTHING",
                params![
                    uuid_blob(&row.invite_id),
                    uuid_blob(&row.vault_id),
                    row.device_id.as_str(),
                    row.claim_sig,
                    or_now(&row.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_claims_by_creator(&self, creator: &DeviceId) -> Result<Vec<InviteClaimRow>> {
        let creator = creator.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT ic.invite_id, ic.vault_id, ic.device_id, ic.claim_sig, ic.created_at
                 FROM invite_claims ic
                 INNER JOIN invites i ON ic.invite_id = i.invite_id
                 WHERE i.created_by_device_id = ?1
                 ORDER BY ic.created_at DESC",
            )?;
            let claims = stmt
                .query_map(params![creator.as_str()], row_to_claim)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(claims)
        })
        .await
    }

    async fn key_update_exists(
        &self,
        vault_id: &Uuid,
        key_epoch: u64,
        target: &DeviceId,
    ) -> Result<bool> {
        let vid = uuid_blob(vault_id);
        let target = target.clone();
        self.call(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM key_updates WHERE vault_id = ?1 AND key_epoch = ?2 AND target_device_id = ?3)",
                params![vid, key_epoch as i64, target.as_str()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn apply_key_update(&self, row: &KeyUpdateRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let vid = uuid_blob(&row.vault_id);

            insert_nonce(
                &tx,
                NonceKind::KeyUpdate,
                &vid,
                row.created_by_device_id.as_str(),
                &row.nonce,
            )?;

            tx.execute(
                "INSERT INTO key_updates (
                    key_update_id, vault_id, member_seq, member_head_hash, target_device_id,
                    key_epoch, nonce, wrapped_payload, created_by_device_id, signature, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    uuid_blob(&row.key_update_id),
                    vid,
                    row.member_seq as i64,
                    row.member_head_hash,
                    row.target_device_id.as_str(),
                    row.key_epoch as i64,
                    row.nonce,
                    row.wrapped_payload,
                    row.created_by_device_id.as_str(),
                    row.signature,
                    or_now(&row.created_at),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Duplicate(
                        "key update for this epoch and target already exists".into(),
                    )
                } else {
                    e.into()
                }
            })?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_key_updates_for_target(&self, target: &DeviceId) -> Result<Vec<KeyUpdateRow>> {
        let target = target.clone();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key_update_id, vault_id, member_seq, member_head_hash, target_device_id,
                        key_epoch, nonce, wrapped_payload, created_by_device_id, signature, created_at
                 FROM key_updates WHERE target_device_id = ?1
                 ORDER BY created_at DESC",
            )?;
            let updates = stmt
                .query_map(params![target.as_str()], row_to_key_update)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(updates)
        })
        .await
    }

    async fn apply_key_update_ack(&self, row: &KeyUpdateAckRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let vid = uuid_blob(&row.vault_id);

            tx.execute(
                "INSERT INTO key_update_acks (
                    vault_id, key_epoch, device_id, member_seq, member_head_hash, signature, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(vault_id, key_epoch, device_id) DO NOTHING",
                params![
                    vid,
                    row.key_epoch as i64,
                    row.device_id.as_str(),
                    row.member_seq as i64,
                    row.member_head_hash,
                    row.signature,
                    or_now(&row.created_at),
                ],
            )?;

            tx.execute(
                "UPDATE vault_members SET key_epoch = ?1 WHERE vault_id = ?2 AND device_id = ?3",
                params![row.key_epoch as i64, vid, row.device_id.as_str()],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn apply_snapshot(&self, row: &SnapshotRow) -> Result<()> {
        let row = row.clone();
        self.call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let vid = uuid_blob(&row.vault_id);

            insert_nonce(
                &tx,
                NonceKind::Snapshot,
                &vid,
                row.created_by_device_id.as_str(),
                &row.nonce,
            )?;

            tx.execute(
                "INSERT INTO snapshots (
                    snapshot_id, vault_id, base_seq, member_seq, member_head_hash,
                    base_counter_map, head_hash_map, lamport_at_snapshot, key_epoch, nonce,
                    ciphertext, signature, created_by_device_id, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    uuid_blob(&row.snapshot_id),
                    vid,
                    row.base_seq as i64,
                    row.member_seq as i64,
                    row.member_head_hash,
                    row.base_counter_map,
                    row.head_hash_map,
                    row.lamport_at_snapshot as i64,
                    row.key_epoch as i64,
                    row.nonce,
                    row.ciphertext,
                    row.signature,
                    row.created_by_device_id.as_str(),
                    or_now(&row.created_at),
                ],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StoreError::Duplicate("snapshot_id already exists".into())
                } else {
                    e.into()
                }
            })?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn latest_snapshot(&self, vault_id: &Uuid) -> Result<Option<SnapshotRow>> {
        let vid = uuid_blob(vault_id);
        self.call(move |conn| {
            conn.query_row(
                "SELECT snapshot_id, vault_id, base_seq, member_seq, member_head_hash,
                        base_counter_map, head_hash_map, lamport_at_snapshot, key_epoch, nonce,
                        ciphertext, signature, created_by_device_id, created_at
                 FROM snapshots WHERE vault_id = ?1
                 ORDER BY base_seq DESC LIMIT 1",
                params![vid],
                row_to_snapshot,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn prune_snapshots(&self, vault_id: &Uuid, keep: usize) -> Result<()> {
        let vid = uuid_blob(vault_id);
        self.call(move |conn| {
            conn.execute(
                "DELETE FROM snapshots
                 WHERE vault_id = ?1 AND snapshot_id NOT IN (
                    SELECT snapshot_id FROM snapshots WHERE vault_id = ?2
                    ORDER BY base_seq DESC LIMIT ?3
                 )",
                params![vid, vid, keep as i64],
            )?;
            Ok(())
        })
        .await
    }

    async fn nonce_used(
        &self,
        kind: NonceKind,
        vault_id: &Uuid,
        device_id: &DeviceId,
        nonce: &[u8],
    ) -> Result<bool> {
        let vid = uuid_blob(vault_id);
        let device_id = device_id.clone();
        let nonce = nonce.to_vec();
        self.call(move |conn| {
            let used: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM used_nonces WHERE nonce_type = ?1 AND vault_id = ?2 AND device_id = ?3 AND nonce = ?4)",
                params![kind.as_str(), vid, device_id.as_str(), nonce],
                |row| row.get(0),
            )?;
            Ok(used)
        })
        .await
    }
}

/// Record a nonce inside a transaction; a constraint hit means reuse.
fn insert_nonce(
    tx: &rusqlite::Transaction<'_>,
    kind: NonceKind,
    vault_id: &[u8],
    device_id: &str,
    nonce: &[u8],
) -> Result<()> {
    tx.execute(
        "INSERT INTO used_nonces (nonce_type, vault_id, device_id, nonce, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![kind.as_str(), vault_id, device_id, nonce, now_rfc3339()],
    )
    .map_err(|e| {
        if is_constraint_violation(&e) {
            StoreError::NonceReused
        } else {
            e.into()
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(n: u8) -> DeviceId {
        DeviceId::new(hex::encode([n; 32]))
    }

    fn genesis_row(vault_id: Uuid, dev: &DeviceId) -> MemberEventRow {
        MemberEventRow {
            member_event_id: Uuid::new_v4(),
            vault_id,
            member_seq: 1,
            prev_hash: vec![0; 32],
            actor_device_id: dev.clone(),
            subject_device_id: dev.clone(),
            msg_type: "member_add".into(),
            subject_pubkey_sign: vec![1; 32],
            subject_pubkey_box: vec![2; 32],
            subject_bundle_sig: vec![3; 64],
            invite_id: Some(Uuid::nil()),
            claim_sig: vec![0; 64],
            signature: vec![4; 64],
            member_hash: vec![0xaa; 32],
            created_at: String::new(),
        }
    }

    fn event_row(vault_id: Uuid, dev: &DeviceId, counter: u64, prev_hash: Vec<u8>) -> EventRow {
        EventRow {
            seq: 0,
            event_id: Uuid::new_v4(),
            event_hash: vec![counter as u8; 32],
            vault_id,
            device_id: dev.clone(),
            counter,
            lamport: counter,
            key_epoch: 1,
            prev_hash,
            nonce: vec![counter as u8; 24],
            ciphertext: b"ct".to_vec(),
            signature: vec![5; 64],
            created_at: String::new(),
        }
    }

    #[tokio::test]
    async fn test_genesis_creates_vault_and_head() {
        let store = SqliteStore::open_memory().unwrap();
        let vault_id = Uuid::new_v4();
        let dev = device(1);

        store
            .apply_member_event(&genesis_row(vault_id, &dev))
            .await
            .unwrap();

        let vault = store.get_vault(&vault_id).await.unwrap().unwrap();
        assert_eq!(vault.owner_device_id, dev);

        let head = store.get_membership_head(&vault_id).await.unwrap().unwrap();
        assert_eq!(head.member_seq, 1);
        assert_eq!(head.member_head_hash, vec![0xaa; 32]);

        let member = store.get_member(&vault_id, &dev).await.unwrap().unwrap();
        assert!(member.is_member);
        assert_eq!(member.key_epoch, 1);
    }

    #[tokio::test]
    async fn test_membership_head_recheck_rejects_stale_writer() {
        let store = SqliteStore::open_memory().unwrap();
        let vault_id = Uuid::new_v4();
        let dev = device(1);

        store
            .apply_member_event(&genesis_row(vault_id, &dev))
            .await
            .unwrap();

        // A second genesis for the same vault lost the race.
        let result = store.apply_member_event(&genesis_row(vault_id, &dev)).await;
        assert!(matches!(result, Err(StoreError::MembershipChainConflict)));
    }

    #[tokio::test]
    async fn test_apply_event_assigns_seq_and_advances_head() {
        let store = SqliteStore::open_memory().unwrap();
        let vault_id = Uuid::new_v4();
        let dev = device(2);

        let e1 = event_row(vault_id, &dev, 1, vec![0; 32]);
        let seq1 = store.apply_event(&e1).await.unwrap();

        let e2 = event_row(vault_id, &dev, 2, e1.event_hash.clone());
        let seq2 = store.apply_event(&e2).await.unwrap();
        assert!(seq2 > seq1);

        let head = store
            .get_event_head(&vault_id, &dev)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.last_counter, 2);
        assert_eq!(head.last_hash, e2.event_hash);

        let listed = store.list_events_since(&vault_id, 0).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].counter, 1);
        assert_eq!(listed[1].counter, 2);
    }

    #[tokio::test]
    async fn test_apply_event_chain_conflict() {
        let store = SqliteStore::open_memory().unwrap();
        let vault_id = Uuid::new_v4();
        let dev = device(3);

        let e1 = event_row(vault_id, &dev, 1, vec![0; 32]);
        store.apply_event(&e1).await.unwrap();

        // Counter gap.
        let bad = event_row(vault_id, &dev, 3, e1.event_hash.clone());
        assert!(matches!(
            store.apply_event(&bad).await,
            Err(StoreError::EventChainConflict)
        ));

        // Wrong prev_hash.
        let bad = event_row(vault_id, &dev, 2, vec![9; 32]);
        assert!(matches!(
            store.apply_event(&bad).await,
            Err(StoreError::EventChainConflict)
        ));
    }

    #[tokio::test]
    async fn test_nonce_reuse_rejected_in_apply_invite() {
        let store = SqliteStore::open_memory().unwrap();
        let vault_id = Uuid::new_v4();
        let creator = device(4);

        let invite = InviteRow {
            invite_id: Uuid::new_v4(),
            vault_id,
            target_device_id: device(5),
            target_pubkey_sign: vec![1; 32],
            target_pubkey_box: vec![2; 32],
            target_bundle_sig: vec![3; 64],
            nonce: vec![7; 24],
            wrapped_payload: vec![8; 16],
            created_by_device_id: creator.clone(),
            single_use: true,
            used: false,
            signature: vec![9; 64],
            created_at: String::new(),
        };
        store.apply_invite(&invite).await.unwrap();

        assert!(store
            .nonce_used(NonceKind::Invite, &vault_id, &creator, &[7; 24])
            .await
            .unwrap());

        let mut replay = invite.clone();
        replay.invite_id = Uuid::new_v4();
        assert!(matches!(
            store.apply_invite(&replay).await,
            Err(StoreError::NonceReused)
        ));
    }

    #[tokio::test]
    async fn test_invite_claim_idempotent() {
        let store = SqliteStore::open_memory().unwrap();
        let claim = InviteClaimRow {
            invite_id: Uuid::new_v4(),
            vault_id: Uuid::new_v4(),
            device_id: device(6),
            claim_sig: vec![1; 64],
            created_at: String::new(),
        };

        store.insert_invite_claim(&claim).await.unwrap();
        store.insert_invite_claim(&claim).await.unwrap();

        let stored = store
            .get_invite_claim(&claim.invite_id, &claim.device_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.claim_sig, claim.claim_sig);
    }

    #[tokio::test]
    async fn test_key_update_ack_sets_member_epoch() {
        let store = SqliteStore::open_memory().unwrap();
        let vault_id = Uuid::new_v4();
        let dev = device(7);

        store
            .apply_member_event(&genesis_row(vault_id, &dev))
            .await
            .unwrap();

        let ack = KeyUpdateAckRow {
            vault_id,
            key_epoch: 4,
            device_id: dev.clone(),
            member_seq: 1,
            member_head_hash: vec![0xaa; 32],
            signature: vec![2; 64],
            created_at: String::new(),
        };
        store.apply_key_update_ack(&ack).await.unwrap();

        let member = store.get_member(&vault_id, &dev).await.unwrap().unwrap();
        assert_eq!(member.key_epoch, 4);
    }

    #[tokio::test]
    async fn test_prune_snapshots_keeps_latest_three() {
        let store = SqliteStore::open_memory().unwrap();
        let vault_id = Uuid::new_v4();
        let owner = device(8);

        for base_seq in 1..=5u64 {
            let snapshot = SnapshotRow {
                snapshot_id: Uuid::new_v4(),
                vault_id,
                base_seq,
                member_seq: 1,
                member_head_hash: vec![0; 32],
                base_counter_map: vec![],
                head_hash_map: vec![],
                lamport_at_snapshot: base_seq,
                key_epoch: 1,
                nonce: vec![base_seq as u8; 24],
                ciphertext: vec![1; 8],
                signature: vec![2; 64],
                created_by_device_id: owner.clone(),
                created_at: String::new(),
            };
            store.apply_snapshot(&snapshot).await.unwrap();
        }

        store.prune_snapshots(&vault_id, 3).await.unwrap();

        let latest = store.latest_snapshot(&vault_id).await.unwrap().unwrap();
        assert_eq!(latest.base_seq, 5);

        let count: i64 = {
            let store_vid = uuid_blob(&vault_id);
            store
                .call(move |conn| {
                    Ok(conn.query_row(
                        "SELECT COUNT(*) FROM snapshots WHERE vault_id = ?1",
                        params![store_vid],
                        |r| r.get(0),
                    )?)
                })
                .await
                .unwrap()
        };
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_member_remove_flips_is_member() {
        let store = SqliteStore::open_memory().unwrap();
        let vault_id = Uuid::new_v4();
        let owner = device(9);

        store
            .apply_member_event(&genesis_row(vault_id, &owner))
            .await
            .unwrap();

        let remove = MemberEventRow {
            member_event_id: Uuid::new_v4(),
            vault_id,
            member_seq: 2,
            prev_hash: vec![0xaa; 32],
            actor_device_id: owner.clone(),
            subject_device_id: owner.clone(),
            msg_type: "member_remove".into(),
            subject_pubkey_sign: vec![],
            subject_pubkey_box: vec![],
            subject_bundle_sig: vec![],
            invite_id: None,
            claim_sig: vec![],
            signature: vec![4; 64],
            member_hash: vec![0xbb; 32],
            created_at: String::new(),
        };
        store.apply_member_event(&remove).await.unwrap();

        assert!(!store.is_member(&vault_id, &owner).await.unwrap());
        let head = store.get_membership_head(&vault_id).await.unwrap().unwrap();
        assert_eq!(head.member_seq, 2);
    }
}

//! Versioned SQLite schema migrations.
//!
//! Each migration transforms the schema from version N to N+1 and is recorded
//! in `schema_migrations`; `migrate` is idempotent.

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::now_rfc3339;

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_rfc3339()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Registered devices. The triple is immutable once written.
        CREATE TABLE devices (
            device_id TEXT PRIMARY KEY,              -- 64 lowercase hex
            device_pubkey_sign BLOB NOT NULL,        -- 32 bytes ed25519
            device_pubkey_box BLOB NOT NULL,         -- 32 bytes X25519
            device_bundle_sig BLOB NOT NULL,         -- 64 bytes
            created_at TEXT NOT NULL
        );

        CREATE TABLE vaults (
            vault_id BLOB PRIMARY KEY,               -- 16 bytes UUID
            owner_device_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE vault_membership_heads (
            vault_id BLOB PRIMARY KEY,
            member_seq INTEGER NOT NULL,
            member_head_hash BLOB NOT NULL           -- 32 bytes
        );

        CREATE TABLE vault_members (
            vault_id BLOB NOT NULL,
            device_id TEXT NOT NULL,
            device_pubkey_sign BLOB NOT NULL,
            device_pubkey_box BLOB NOT NULL,
            subject_bundle_sig BLOB NOT NULL,
            is_member INTEGER NOT NULL,
            key_epoch INTEGER NOT NULL,
            PRIMARY KEY (vault_id, device_id)
        );

        -- Membership chain: member_seq is dense per vault.
        CREATE TABLE member_events (
            member_event_id BLOB PRIMARY KEY,
            vault_id BLOB NOT NULL,
            member_seq INTEGER NOT NULL,
            prev_hash BLOB NOT NULL,
            actor_device_id TEXT NOT NULL,
            subject_device_id TEXT NOT NULL,
            msg_type TEXT NOT NULL,
            subject_pubkey_sign BLOB NOT NULL,
            subject_pubkey_box BLOB NOT NULL,
            subject_bundle_sig BLOB NOT NULL,
            invite_id BLOB,
            claim_sig BLOB NOT NULL,
            signature BLOB NOT NULL,
            member_hash BLOB NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (vault_id, member_seq)
        );

        -- Per-device event chains. seq doubles as the delivery cursor.
        CREATE TABLE events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id BLOB NOT NULL,
            event_hash BLOB NOT NULL,
            vault_id BLOB NOT NULL,
            device_id TEXT NOT NULL,
            counter INTEGER NOT NULL,
            lamport INTEGER NOT NULL,
            key_epoch INTEGER NOT NULL,
            prev_hash BLOB NOT NULL,
            nonce BLOB NOT NULL,
            ciphertext BLOB NOT NULL,
            signature BLOB NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (vault_id, device_id, event_id),
            UNIQUE (vault_id, device_id, counter)
        );

        CREATE TABLE event_heads (
            vault_id BLOB NOT NULL,
            device_id TEXT NOT NULL,
            last_counter INTEGER NOT NULL,
            last_hash BLOB NOT NULL,
            PRIMARY KEY (vault_id, device_id)
        );

        CREATE TABLE invites (
            invite_id BLOB PRIMARY KEY,
            vault_id BLOB NOT NULL,
            target_device_id TEXT NOT NULL,
            target_device_pubkey_sign BLOB NOT NULL,
            target_device_pubkey_box BLOB NOT NULL,
            target_device_bundle_sig BLOB NOT NULL,
            nonce BLOB NOT NULL,
            wrapped_payload BLOB NOT NULL,
            created_by_device_id TEXT NOT NULL,
            single_use INTEGER NOT NULL,
            used INTEGER NOT NULL DEFAULT 0,
            signature BLOB NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE invite_claims (
            invite_id BLOB NOT NULL,
            vault_id BLOB NOT NULL,
            device_id TEXT NOT NULL,
            claim_sig BLOB NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (invite_id, device_id)
        );

        CREATE TABLE key_updates (
            key_update_id BLOB PRIMARY KEY,
            vault_id BLOB NOT NULL,
            member_seq INTEGER NOT NULL,
            member_head_hash BLOB NOT NULL,
            target_device_id TEXT NOT NULL,
            key_epoch INTEGER NOT NULL,
            nonce BLOB NOT NULL,
            wrapped_payload BLOB NOT NULL,
            created_by_device_id TEXT NOT NULL,
            signature BLOB NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (vault_id, key_epoch, target_device_id)
        );

        CREATE TABLE key_update_acks (
            vault_id BLOB NOT NULL,
            key_epoch INTEGER NOT NULL,
            device_id TEXT NOT NULL,
            member_seq INTEGER NOT NULL,
            member_head_hash BLOB NOT NULL,
            signature BLOB NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (vault_id, key_epoch, device_id)
        );

        CREATE TABLE snapshots (
            snapshot_id BLOB PRIMARY KEY,
            vault_id BLOB NOT NULL,
            base_seq INTEGER NOT NULL,
            member_seq INTEGER NOT NULL,
            member_head_hash BLOB NOT NULL,
            base_counter_map BLOB NOT NULL,
            head_hash_map BLOB NOT NULL,
            lamport_at_snapshot INTEGER NOT NULL,
            key_epoch INTEGER NOT NULL,
            nonce BLOB NOT NULL,
            ciphertext BLOB NOT NULL,
            signature BLOB NOT NULL,
            created_by_device_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        -- Replay protection: insertion here is the serialization point.
        CREATE TABLE used_nonces (
            nonce_type TEXT NOT NULL,
            vault_id BLOB NOT NULL,
            device_id TEXT NOT NULL,
            nonce BLOB NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (nonce_type, vault_id, device_id, nonce)
        );

        CREATE INDEX idx_events_vault_seq ON events(vault_id, seq);
        CREATE INDEX idx_member_events_vault_seq ON member_events(vault_id, member_seq);
        CREATE INDEX idx_invites_target ON invites(target_device_id);
        CREATE INDEX idx_key_updates_target ON key_updates(target_device_id);
        CREATE INDEX idx_snapshots_vault_base ON snapshots(vault_id, base_seq);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "devices",
            "vaults",
            "vault_membership_heads",
            "vault_members",
            "member_events",
            "events",
            "event_heads",
            "invites",
            "invite_claims",
            "key_updates",
            "key_update_acks",
            "snapshots",
            "used_nonces",
            "schema_migrations",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }
}

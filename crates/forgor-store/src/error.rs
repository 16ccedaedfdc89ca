//! Error types for the store.

use thiserror::Error;

/// Errors from storage operations.
///
/// The chain-conflict and nonce variants exist so callers can map the losing
/// side of a write race onto the wire codes (`membership_chain_broken`,
/// `event_chain_broken`, `nonce_reused`, `conflict`) instead of a 500.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The membership head moved between validation and apply.
    #[error("membership head does not match the event chain")]
    MembershipChainConflict,

    /// The event head moved between validation and apply.
    #[error("event head does not match the event chain")]
    EventChainConflict,

    /// The nonce row already exists under its (type, vault, device) scope.
    #[error("nonce has already been used")]
    NonceReused,

    /// A unique constraint rejected the write.
    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid data in storage: {0}")]
    InvalidData(String),

    #[error("migration error: {0}")]
    Migration(String),

    /// The blocking task running the statement was cancelled or panicked.
    #[error("storage task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// True when the underlying SQLite error is a unique/primary-key violation.
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

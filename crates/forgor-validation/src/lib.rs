//! # forgor-validation
//!
//! The validation and chain-integrity engine. For every incoming write a
//! validator performs a fixed sequence of structural, semantic, and
//! cryptographic checks, rebuilds the canonical sign-bytes, verifies the
//! ed25519 signature, and returns a normalized row plus derived hash for the
//! caller to persist transactionally. Validators read through the [`Store`]
//! trait and never mutate state themselves.
//!
//! [`Store`]: forgor_store::Store

pub mod device;
pub mod events;
pub mod invites;
pub mod key_updates;
pub mod membership;
pub mod snapshots;

pub use device::DeviceValidator;
pub use events::EventsValidator;
pub use invites::InvitesValidator;
pub use key_updates::KeyUpdatesValidator;
pub use membership::MembershipValidator;
pub use snapshots::SnapshotsValidator;

use forgor_core::ApiError;

/// Storage failures collapse to `internal_error`; the HTTP layer logs the
/// request id and status, no detail leaks to the client.
pub(crate) fn internal<E>(_: E) -> ApiError {
    ApiError::internal_error()
}

//! # forgor-core
//!
//! Pure primitives for the forgor-sync coordination server: the canonical
//! byte encoding that clients and server must match bit-for-bit, the
//! sign-bytes constructors for every signed record, the crypto layer
//! (ed25519 verification, SHA-256 content addressing, X25519 point
//! validation, device-id derivation), and the JSON wire models.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over cryptographic data structures.
//!
//! ## Canonicalization
//!
//! Every signed payload begins with the version prefix `"forgor-sync-v1"`.
//! Any change to any signed layout requires a new prefix. See [`cbe`] and
//! [`signbytes`].

pub mod cbe;
pub mod crypto;
pub mod error;
pub mod models;
pub mod signbytes;

pub use cbe::Encoder;
pub use crypto::{
    validate_x25519_public_key, CryptoError, DeviceId, Keypair, PublicKey, Sha256Hash, Signature,
};
pub use error::ApiError;
pub use signbytes::SIGN_PREFIX;

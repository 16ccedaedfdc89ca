//! Cryptographic primitives: ed25519 verification, SHA-256 content
//! addressing, X25519 public-key validation, and device-id derivation.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Errors from the crypto layer. Validators map these onto wire error codes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("device_id must be 64 lowercase hex characters")]
    InvalidDeviceId,

    #[error("device_id does not match sha256(pubkey_sign)")]
    DeviceIdMismatch,

    #[error("X25519 public key is a small-order point")]
    SmallOrderPoint,

    #[error("X25519 public key produces an all-zero shared secret")]
    DegenerateSharedSecret,
}

/// A 32-byte SHA-256 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha256Hash(pub [u8; 32]);

impl Sha256Hash {
    /// Compute the SHA-256 hash of data.
    pub fn hash(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The zero hash: genesis `prev_hash` sentinel.
    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256({}...)", &self.to_hex()[..8])
    }
}

impl AsRef<[u8]> for Sha256Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 32-byte ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Verify an ed25519 signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = DalekSignature::from_bytes(&signature.0);
        key.verify(message, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &hex::encode(self.0)[..8])
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 64-byte ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}...)", &hex::encode(self.0)[..8])
    }
}

/// An ed25519 keypair. The server never holds one; this exists for clients
/// embedded in tests and for the testkit.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair({:?})", self.public_key())
    }
}

/// A device identifier: lowercase hex of SHA-256 over the device's ed25519
/// public signing key. Hex in transport, raw 32 bytes internally.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Derive the device id from a signing public key.
    pub fn from_pubkey(pubkey_sign: &PublicKey) -> Self {
        Self(hex::encode(Sha256Hash::hash(pubkey_sign.as_bytes()).0))
    }

    /// Wrap an untrusted wire string; call [`DeviceId::validate`] before use.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Structural check: exactly 64 lowercase hex characters.
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.0.len() != 64 {
            return Err(CryptoError::InvalidDeviceId);
        }
        if !self
            .0
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(CryptoError::InvalidDeviceId);
        }
        Ok(())
    }

    /// Decode to the raw 32-byte form.
    pub fn to_bytes(&self) -> Result<[u8; 32], CryptoError> {
        self.validate()?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(&self.0, &mut out).map_err(|_| CryptoError::InvalidDeviceId)?;
        Ok(out)
    }

    /// Check that this id equals sha256(pubkey_sign), in constant time.
    pub fn verify_pubkey(&self, pubkey_sign: &PublicKey) -> Result<(), CryptoError> {
        let expected = Self::from_pubkey(pubkey_sign);
        if bool::from(self.0.as_bytes().ct_eq(expected.0.as_bytes())) {
            Ok(())
        } else {
            Err(CryptoError::DeviceIdMismatch)
        }
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() >= 16 {
            write!(f, "DeviceId({}...)", &self.0[..16])
        } else {
            write!(f, "DeviceId({})", self.0)
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The seven published small-order points on Curve25519. An X25519 key equal
/// to any of these would force a predictable shared secret.
const SMALL_ORDER_POINTS: [[u8; 32]; 7] = [
    [0; 32],
    [
        1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0,
    ],
    [
        0xe0, 0xeb, 0x7a, 0x7c, 0x3b, 0x41, 0xb8, 0xae, 0x16, 0x56, 0xe3, 0xfa, 0xf1, 0x9f, 0xc4,
        0x6a, 0xda, 0x09, 0x8d, 0xeb, 0x9c, 0x32, 0xb1, 0xfd, 0x86, 0x62, 0x05, 0x16, 0x5f, 0x49,
        0xb8, 0x00,
    ],
    [
        0x5f, 0x9c, 0x95, 0xbc, 0xa3, 0x50, 0x8c, 0x24, 0xb1, 0xd0, 0xb1, 0x55, 0x9c, 0x83, 0xef,
        0x5b, 0x04, 0x44, 0x5c, 0xc4, 0x58, 0x1c, 0x8e, 0x86, 0xd8, 0x22, 0x4e, 0xdd, 0xd0, 0x9f,
        0x11, 0x57,
    ],
    [
        0xec, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
    [
        0xed, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
    [
        0xee, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
];

/// Validate an X25519 public key.
///
/// Rejects the known small-order points, then performs X25519 with the scalar
/// `{1, 0, ..., 0}` and rejects an all-zero result. Together these ensure the
/// point has large order and yields a non-degenerate shared secret.
pub fn validate_x25519_public_key(pubkey: &[u8; 32]) -> Result<(), CryptoError> {
    for point in &SMALL_ORDER_POINTS {
        if bool::from(pubkey.ct_eq(point)) {
            return Err(CryptoError::SmallOrderPoint);
        }
    }

    let mut scalar = [0u8; 32];
    scalar[0] = 1;
    let shared = x25519_dalek::x25519(scalar, *pubkey);
    if shared.iter().all(|&b| b == 0) {
        return Err(CryptoError::DegenerateSharedSecret);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let keypair = Keypair::from_seed(&[0x42; 32]);
        let message = b"forgor test message";
        let sig = keypair.sign(message);

        keypair
            .public_key()
            .verify(message, &sig)
            .expect("valid signature must verify");

        assert_eq!(
            keypair.public_key().verify(b"tampered", &sig),
            Err(CryptoError::InvalidSignature)
        );
    }

    #[test]
    fn test_keypair_deterministic_from_seed() {
        let a = Keypair::from_seed(&[7; 32]);
        let b = Keypair::from_seed(&[7; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_device_id_derivation() {
        let keypair = Keypair::from_seed(&[1; 32]);
        let id = DeviceId::from_pubkey(&keypair.public_key());

        assert_eq!(id.as_str().len(), 64);
        id.validate().unwrap();
        id.verify_pubkey(&keypair.public_key()).unwrap();

        let expected = Sha256Hash::hash(keypair.public_key().as_bytes());
        assert_eq!(id.to_bytes().unwrap(), expected.0);
    }

    #[test]
    fn test_device_id_mismatch() {
        let a = Keypair::from_seed(&[1; 32]);
        let b = Keypair::from_seed(&[2; 32]);
        let id = DeviceId::from_pubkey(&a.public_key());
        assert_eq!(
            id.verify_pubkey(&b.public_key()),
            Err(CryptoError::DeviceIdMismatch)
        );
    }

    #[test]
    fn test_device_id_rejects_uppercase_and_bad_lengths() {
        assert!(DeviceId::new("ab".repeat(32)).validate().is_ok());
        assert!(DeviceId::new("AB".repeat(32)).validate().is_err());
        assert!(DeviceId::new("ab".repeat(31)).validate().is_err());
        assert!(DeviceId::new(format!("{}zz", "ab".repeat(31))).validate().is_err());
        assert!(DeviceId::new("").validate().is_err());
    }

    #[test]
    fn test_x25519_rejects_small_order_points() {
        for point in &SMALL_ORDER_POINTS {
            assert_eq!(
                validate_x25519_public_key(point),
                Err(CryptoError::SmallOrderPoint),
                "point {:02x?} must be rejected",
                &point[..4]
            );
        }
    }

    #[test]
    fn test_x25519_accepts_honest_key() {
        let secret = x25519_dalek::StaticSecret::from([0x5a; 32]);
        let public = x25519_dalek::PublicKey::from(&secret);
        validate_x25519_public_key(public.as_bytes()).unwrap();
    }

    #[test]
    fn test_zero_hash_sentinel() {
        assert_eq!(Sha256Hash::ZERO.as_bytes(), &[0u8; 32]);
        assert_ne!(Sha256Hash::hash(b"").0, [0u8; 32]);
    }
}

//! Test devices: real ed25519 + X25519 keypairs with derived device ids.

use forgor_core::models::{Base64Bytes, DeviceBundle};
use forgor_core::{signbytes, DeviceId, Keypair, PublicKey, Signature};
use forgor_store::DeviceRow;

pub struct TestDevice {
    pub keypair: Keypair,
    box_secret: x25519_dalek::StaticSecret,
    pub device_id: DeviceId,
}

impl TestDevice {
    /// Deterministic device; the same seed always yields the same keys.
    pub fn from_seed(seed: u8) -> Self {
        let keypair = Keypair::from_seed(&[seed; 32]);
        let box_secret = x25519_dalek::StaticSecret::from([seed.wrapping_add(0x40); 32]);
        let device_id = DeviceId::from_pubkey(&keypair.public_key());
        Self {
            keypair,
            box_secret,
            device_id,
        }
    }

    pub fn generate() -> Self {
        let keypair = Keypair::generate();
        let box_secret = x25519_dalek::StaticSecret::random_from_rng(rand::thread_rng());
        let device_id = DeviceId::from_pubkey(&keypair.public_key());
        Self {
            keypair,
            box_secret,
            device_id,
        }
    }

    pub fn pubkey_sign(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn pubkey_box(&self) -> [u8; 32] {
        x25519_dalek::PublicKey::from(&self.box_secret).to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }

    /// Self-signature over the device's bundle sign-bytes.
    pub fn bundle_sig(&self) -> Signature {
        let device_id_bytes = self.device_id.to_bytes().expect("derived id is valid hex");
        let message = signbytes::device_bundle(
            &device_id_bytes,
            self.pubkey_sign().as_bytes(),
            &self.pubkey_box(),
        );
        self.sign(&message)
    }

    pub fn device_id_bytes(&self) -> [u8; 32] {
        self.device_id.to_bytes().expect("derived id is valid hex")
    }

    /// The registration payload an honest client would send.
    pub fn bundle(&self) -> DeviceBundle {
        DeviceBundle {
            device_id: self.device_id.clone(),
            device_pubkey_sign: Base64Bytes(self.pubkey_sign().as_bytes().to_vec()),
            device_pubkey_box: Base64Bytes(self.pubkey_box().to_vec()),
            device_bundle_sig: Base64Bytes(self.bundle_sig().as_bytes().to_vec()),
        }
    }

    /// The stored form of this device, for seeding a store directly.
    pub fn device_row(&self) -> DeviceRow {
        DeviceRow {
            device_id: self.device_id.clone(),
            pubkey_sign: self.pubkey_sign().as_bytes().to_vec(),
            pubkey_box: self.pubkey_box().to_vec(),
            bundle_sig: self.bundle_sig().as_bytes().to_vec(),
            created_at: String::new(),
        }
    }
}

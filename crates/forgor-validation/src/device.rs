//! Device bundle validation and registration immutability.

use std::sync::Arc;

use forgor_core::models::{DeviceBundle, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use forgor_core::{signbytes, validate_x25519_public_key, ApiError, PublicKey, Signature};
use forgor_store::Store;

use crate::internal;

pub struct DeviceValidator<S> {
    store: Arc<S>,
}

impl<S: Store> DeviceValidator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Structural and cryptographic checks on a self-signed device bundle:
    /// field widths, id-from-key derivation, X25519 point validation, and
    /// the bundle self-signature.
    pub fn validate_bundle(&self, bundle: &DeviceBundle) -> Result<(), ApiError> {
        bundle
            .device_id
            .validate()
            .map_err(|_| ApiError::invalid_device_id())?;

        if bundle.device_pubkey_sign.len() != PUBLIC_KEY_LEN {
            return Err(ApiError::invalid_public_key());
        }
        if bundle.device_pubkey_box.len() != PUBLIC_KEY_LEN {
            return Err(ApiError::invalid_public_key());
        }
        if bundle.device_bundle_sig.len() != SIGNATURE_LEN {
            return Err(ApiError::invalid_signature());
        }

        let pubkey_sign = PublicKey::from_bytes(
            *bundle
                .device_pubkey_sign
                .as_array::<PUBLIC_KEY_LEN>()
                .ok_or_else(ApiError::invalid_public_key)?,
        );
        let pubkey_box = bundle
            .device_pubkey_box
            .as_array::<PUBLIC_KEY_LEN>()
            .ok_or_else(ApiError::invalid_public_key)?;

        bundle.device_id.verify_pubkey(&pubkey_sign).map_err(|_| {
            ApiError::bad_request(
                "device_id_mismatch",
                "device_id does not match sha256(device_pubkey_sign)",
            )
        })?;

        validate_x25519_public_key(pubkey_box)
            .map_err(|e| ApiError::bad_request("invalid_x25519_key", e.to_string()))?;

        let device_id_bytes = bundle
            .device_id
            .to_bytes()
            .map_err(|_| ApiError::invalid_device_id())?;
        let message =
            signbytes::device_bundle(&device_id_bytes, pubkey_sign.as_bytes(), pubkey_box);
        let signature = Signature::from_bytes(
            *bundle
                .device_bundle_sig
                .as_array::<SIGNATURE_LEN>()
                .ok_or_else(ApiError::invalid_signature)?,
        );
        pubkey_sign
            .verify(&message, &signature)
            .map_err(|_| ApiError::invalid_signature())?;

        Ok(())
    }

    /// Once registered, the triple is immutable: any differing field is a
    /// `duplicate_device`; identical re-registration is idempotent.
    pub async fn check_immutability(&self, bundle: &DeviceBundle) -> Result<(), ApiError> {
        let existing = self
            .store
            .get_device(&bundle.device_id)
            .await
            .map_err(internal)?;

        if let Some(existing) = existing {
            if existing.pubkey_sign.as_slice() != bundle.device_pubkey_sign.as_slice()
                || existing.pubkey_box.as_slice() != bundle.device_pubkey_box.as_slice()
                || existing.bundle_sig.as_slice() != bundle.device_bundle_sig.as_slice()
            {
                return Err(ApiError::duplicate_device());
            }
        }

        Ok(())
    }
}

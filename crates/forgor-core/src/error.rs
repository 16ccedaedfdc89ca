//! Typed API errors with stable machine-readable codes.
//!
//! Every rejection a validator can produce maps onto one of these. The HTTP
//! layer renders them as `{"code": ..., "message": ...}` with the carried
//! status. Storage failures collapse to `internal_error` and leak no detail.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: u16,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: 400,
            code,
            message: message.into(),
        }
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: 403,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(resource: &str) -> Self {
        Self {
            status: 404,
            code: "not_found",
            message: format!("{resource} not found"),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: 409,
            code: "conflict",
            message: message.into(),
        }
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self {
            status: 413,
            code: "payload_too_large",
            message: message.into(),
        }
    }

    pub fn too_many_requests() -> Self {
        Self {
            status: 429,
            code: "rate_limit_exceeded",
            message: "rate limit exceeded".into(),
        }
    }

    pub fn internal_error() -> Self {
        Self {
            status: 500,
            code: "internal_error",
            message: "an internal error occurred".into(),
        }
    }

    pub fn invalid_device_id() -> Self {
        Self::bad_request(
            "invalid_device_id",
            "device_id must be 64 lowercase hex characters",
        )
    }

    pub fn invalid_signature() -> Self {
        Self::bad_request("invalid_signature", "signature verification failed")
    }

    pub fn invalid_nonce() -> Self {
        Self::bad_request("invalid_nonce", "nonce must be 24 bytes")
    }

    pub fn invalid_hash() -> Self {
        Self::bad_request("invalid_hash", "hash must be 32 bytes")
    }

    pub fn invalid_public_key() -> Self {
        Self::bad_request("invalid_public_key", "public key must be 32 bytes")
    }

    pub fn invalid_uuid(field: &str) -> Self {
        Self::bad_request("invalid_uuid", format!("invalid UUID for field: {field}"))
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::bad_request("invalid_json", message)
    }

    pub fn membership_required() -> Self {
        Self::forbidden(
            "membership_required",
            "device is not a member of this vault",
        )
    }

    pub fn owner_required() -> Self {
        Self::forbidden(
            "owner_required",
            "only the vault owner can perform this action",
        )
    }

    pub fn duplicate_device() -> Self {
        Self {
            status: 409,
            code: "duplicate_device",
            message: "device already registered with different keys".into(),
        }
    }

    pub fn invite_already_used() -> Self {
        Self {
            status: 409,
            code: "invite_already_used",
            message: "invite has already been used".into(),
        }
    }

    pub fn event_chain_broken() -> Self {
        Self::bad_request(
            "event_chain_broken",
            "event counter or prev_hash does not match expected chain",
        )
    }

    pub fn membership_chain_broken() -> Self {
        Self::bad_request(
            "membership_chain_broken",
            "member_seq or prev_hash does not match expected chain",
        )
    }

    pub fn nonce_reused() -> Self {
        Self::bad_request("nonce_reused", "nonce has already been used")
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

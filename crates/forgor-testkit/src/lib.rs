//! # forgor-testkit
//!
//! Fixtures for exercising the validation engine: deterministic test devices
//! holding real keypairs, and builders that produce correctly signed wire
//! payloads the way an honest client would. Tests mutate the outputs to
//! produce the dishonest variants.

pub mod device;
pub mod payloads;

pub use device::TestDevice;
pub use payloads::{
    event, event_hash, genesis_member_add, invite, invite_claim, key_update, key_update_ack,
    member_add, member_event_hash, member_remove, snapshot,
};

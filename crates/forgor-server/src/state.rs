//! Shared application state: the store and one validator per write path.

use std::sync::Arc;

use forgor_store::SqliteStore;
use forgor_validation::{
    DeviceValidator, EventsValidator, InvitesValidator, KeyUpdatesValidator, MembershipValidator,
    SnapshotsValidator,
};

use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub devices: Arc<DeviceValidator<SqliteStore>>,
    pub membership: Arc<MembershipValidator<SqliteStore>>,
    pub events: Arc<EventsValidator<SqliteStore>>,
    pub invites: Arc<InvitesValidator<SqliteStore>>,
    pub key_updates: Arc<KeyUpdatesValidator<SqliteStore>>,
    pub snapshots: Arc<SnapshotsValidator<SqliteStore>>,
    pub rate_limiter: RateLimiter,
    pub snapshot_keep: usize,
}

impl AppState {
    pub fn new(store: SqliteStore, config: &ServerConfig) -> Self {
        let store = Arc::new(store);
        Self {
            devices: Arc::new(DeviceValidator::new(Arc::clone(&store))),
            membership: Arc::new(MembershipValidator::new(Arc::clone(&store))),
            events: Arc::new(EventsValidator::new(Arc::clone(&store))),
            invites: Arc::new(InvitesValidator::new(Arc::clone(&store))),
            key_updates: Arc::new(KeyUpdatesValidator::new(Arc::clone(&store))),
            snapshots: Arc::new(SnapshotsValidator::new(Arc::clone(&store))),
            rate_limiter: RateLimiter::new(config.rate_limit_per_second, config.rate_limit_burst),
            snapshot_keep: config.snapshot_keep,
            store,
        }
    }
}

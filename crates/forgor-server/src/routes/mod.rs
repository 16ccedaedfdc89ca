//! HTTP routing.

pub mod devices;
pub mod events;
pub mod invites;
pub mod key_updates;
pub mod member_events;
pub mod snapshots;

use std::time::Duration;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::ServerConfig;
use crate::middleware;
use crate::state::AppState;

pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/devices/register", post(devices::register))
        .route("/v1/devices/{device_id}", get(devices::get_device))
        .route(
            "/v1/vaults/{vault_id}/member_events",
            post(member_events::create).get(member_events::list),
        )
        .route("/v1/vaults/{vault_id}/members", get(member_events::members))
        .route(
            "/v1/vaults/{vault_id}/events",
            post(events::create).get(events::list),
        )
        .route("/v1/vaults/{vault_id}/invites", post(invites::create))
        .route("/v1/invites", get(invites::list))
        .route("/v1/invites/{invite_id}/claim", post(invites::claim))
        .route("/v1/invite_claims", get(invites::claims_list))
        .route("/v1/vaults/{vault_id}/key_updates", post(key_updates::create))
        .route("/v1/key_updates", get(key_updates::list))
        .route(
            "/v1/vaults/{vault_id}/key_update_acks",
            post(key_updates::ack),
        )
        .route("/v1/vaults/{vault_id}/snapshots", post(snapshots::create))
        .route(
            "/v1/vaults/{vault_id}/snapshots/latest",
            get(snapshots::latest),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(axum_middleware::from_fn(middleware::observe))
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .with_state(state)
}

async fn health() -> &'static str {
    "{\"status\":\"ok\"}"
}

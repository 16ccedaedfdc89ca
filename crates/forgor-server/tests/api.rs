//! End-to-end API tests: the spec's concrete scenarios driven through the
//! router against an in-memory SQLite store.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde::Serialize;
use serde_json::Value;
use tower::ServiceExt;

use forgor_server::{build_router, AppState, ServerConfig};
use forgor_store::SqliteStore;
use forgor_testkit::{
    event, event_hash, genesis_member_add, invite, invite_claim, key_update, key_update_ack,
    member_event_hash, snapshot, TestDevice,
};
use uuid::Uuid;

fn test_app() -> Router {
    let config = ServerConfig {
        rate_limit_per_second: 10_000.0,
        rate_limit_burst: 100_000,
        ..ServerConfig::default()
    };
    let store = SqliteStore::open_memory().unwrap();
    let state = AppState::new(store, &config);
    build_router(state, &config)
}

async fn post_json(app: &Router, path: &str, body: &impl Serialize) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();
    send(app, request).await
}

async fn get(app: &Router, path: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn register(app: &Router, device: &TestDevice) {
    let (status, _) = post_json(app, "/v1/devices/register", &device.bundle()).await;
    assert_eq!(status, StatusCode::CREATED);
}

/// Register the owner and post the genesis member_add; returns the head hash.
async fn create_vault(app: &Router, owner: &TestDevice, vault_id: Uuid) -> [u8; 32] {
    register(app, owner).await;
    let genesis = genesis_member_add(owner, vault_id);
    let (status, _) = post_json(
        app,
        &format!("/v1/vaults/{vault_id}/member_events"),
        &genesis,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    member_event_hash(&genesis)
}

#[tokio::test]
async fn test_device_registration_idempotence_and_conflict() {
    let app = test_app();
    let device = TestDevice::from_seed(1);

    let (status, _) = post_json(&app, "/v1/devices/register", &device.bundle()).await;
    assert_eq!(status, StatusCode::CREATED);

    // Identical triple: 200, no duplicate row.
    let (status, _) = post_json(&app, "/v1/devices/register", &device.bundle()).await;
    assert_eq!(status, StatusCode::OK);

    // Differing field: 409 duplicate_device.
    let other = TestDevice::from_seed(2);
    let mut changed = device.bundle();
    changed.device_pubkey_box = forgor_core::models::Base64Bytes(other.pubkey_box().to_vec());
    let (status, body) = post_json(&app, "/v1/devices/register", &changed).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "duplicate_device");

    // Lookup round-trips the bundle.
    let (status, body) = get(&app, &format!("/v1/devices/{}", device.device_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["device_id"], device.device_id.as_str());
}

#[tokio::test]
async fn test_small_order_x25519_rejected() {
    let app = test_app();
    let device = TestDevice::from_seed(1);

    let mut bundle = device.bundle();
    bundle.device_pubkey_box = forgor_core::models::Base64Bytes(vec![0; 32]);
    let (status, body) = post_json(&app, "/v1/devices/register", &bundle).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_x25519_key");
}

#[tokio::test]
async fn test_genesis_creates_vault() {
    let app = test_app();
    let owner = TestDevice::from_seed(1);
    let vault_id = Uuid::new_v4();

    create_vault(&app, &owner, vault_id).await;

    let (status, body) = get(&app, &format!("/v1/vaults/{vault_id}/members")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["member_seq"], "1");
    assert_eq!(body["members"].as_array().unwrap().len(), 1);
    assert_eq!(body["members"][0]["device_id"], owner.device_id.as_str());
    assert_eq!(body["members"][0]["key_epoch"], "1");
}

#[tokio::test]
async fn test_invited_join_flow() {
    let app = test_app();
    let owner = TestDevice::from_seed(1);
    let joiner = TestDevice::from_seed(2);
    let vault_id = Uuid::new_v4();

    let head1 = create_vault(&app, &owner, vault_id).await;
    register(&app, &joiner).await;

    // Owner creates the invite.
    let wire = invite(&owner, &joiner, vault_id, [7; 24], true);
    let (status, _) = post_json(&app, &format!("/v1/vaults/{vault_id}/invites"), &wire).await;
    assert_eq!(status, StatusCode::CREATED);

    // Joiner claims it.
    let claim = invite_claim(&joiner, wire.invite_id, vault_id);
    let (status, _) = post_json(
        &app,
        &format!("/v1/invites/{}/claim", wire.invite_id),
        &claim,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Claim replay is a no-op success.
    let (status, _) = post_json(
        &app,
        &format!("/v1/invites/{}/claim", wire.invite_id),
        &claim,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Owner admits the joiner.
    let add = forgor_testkit::member_add(
        &owner,
        &joiner,
        vault_id,
        2,
        head1,
        wire.invite_id,
        *claim.signature.as_array::<64>().unwrap(),
    );
    let (status, _) = post_json(&app, &format!("/v1/vaults/{vault_id}/member_events"), &add).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = get(&app, &format!("/v1/vaults/{vault_id}/members")).await;
    assert_eq!(body["member_seq"], "2");
    assert_eq!(body["members"].as_array().unwrap().len(), 2);

    // Invite shows up as used for its target.
    let (_, body) = get(
        &app,
        &format!("/v1/invites?device_id={}", joiner.device_id),
    )
    .await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_event_chain_and_replay() {
    let app = test_app();
    let owner = TestDevice::from_seed(1);
    let vault_id = Uuid::new_v4();
    create_vault(&app, &owner, vault_id).await;

    // Chain break: counter=2 on an empty head.
    let bad = event(&owner, vault_id, 2, [0; 32], [1; 24], b"ct");
    let (status, body) = post_json(&app, &format!("/v1/vaults/{vault_id}/events"), &bad).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "event_chain_broken");

    // Honest chain.
    let e1 = event(&owner, vault_id, 1, [0; 32], [1; 24], b"one");
    let (status, body) = post_json(&app, &format!("/v1/vaults/{vault_id}/events"), &e1).await;
    assert_eq!(status, StatusCode::CREATED);
    let seq1: u64 = body["seq"].as_str().unwrap().parse().unwrap();

    let e2 = event(&owner, vault_id, 2, event_hash(&e1), [2; 24], b"two");
    let (status, body) = post_json(&app, &format!("/v1/vaults/{vault_id}/events"), &e2).await;
    assert_eq!(status, StatusCode::CREATED);
    let seq2: u64 = body["seq"].as_str().unwrap().parse().unwrap();
    assert!(seq2 > seq1);

    // Polling since the first seq returns only the second event.
    let (status, body) = get(
        &app,
        &format!("/v1/vaults/{vault_id}/events?since_seq={seq1}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["counter"], "2");

    // Forged continuation reusing an event_id conflicts.
    let mut forged = event(&owner, vault_id, 3, event_hash(&e2), [3; 24], b"three");
    forged.event_id = e1.event_id;
    let (status, body) = post_json(&app, &format!("/v1/vaults/{vault_id}/events"), &forged).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn test_invite_nonce_replay() {
    let app = test_app();
    let owner = TestDevice::from_seed(1);
    let target = TestDevice::from_seed(2);
    let vault_id = Uuid::new_v4();
    create_vault(&app, &owner, vault_id).await;

    let first = invite(&owner, &target, vault_id, [9; 24], true);
    let (status, _) = post_json(&app, &format!("/v1/vaults/{vault_id}/invites"), &first).await;
    assert_eq!(status, StatusCode::CREATED);

    let second = invite(&owner, &target, vault_id, [9; 24], true);
    let (status, body) = post_json(&app, &format!("/v1/vaults/{vault_id}/invites"), &second).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "nonce_reused");
}

#[tokio::test]
async fn test_non_owner_key_update_forbidden() {
    let app = test_app();
    let owner = TestDevice::from_seed(1);
    let joiner = TestDevice::from_seed(2);
    let vault_id = Uuid::new_v4();

    let head1 = create_vault(&app, &owner, vault_id).await;
    register(&app, &joiner).await;

    let wire = invite(&owner, &joiner, vault_id, [4; 24], true);
    post_json(&app, &format!("/v1/vaults/{vault_id}/invites"), &wire).await;
    let claim = invite_claim(&joiner, wire.invite_id, vault_id);
    post_json(
        &app,
        &format!("/v1/invites/{}/claim", wire.invite_id),
        &claim,
    )
    .await;
    let add = forgor_testkit::member_add(
        &owner,
        &joiner,
        vault_id,
        2,
        head1,
        wire.invite_id,
        *claim.signature.as_array::<64>().unwrap(),
    );
    post_json(&app, &format!("/v1/vaults/{vault_id}/member_events"), &add).await;
    let head2 = member_event_hash(&add);

    let ku = key_update(&joiner, vault_id, 2, head2, &joiner.device_id, 2, [5; 24]);
    let (status, body) = post_json(&app, &format!("/v1/vaults/{vault_id}/key_updates"), &ku).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "owner_required");
}

#[tokio::test]
async fn test_key_update_and_ack_flow() {
    let app = test_app();
    let owner = TestDevice::from_seed(1);
    let vault_id = Uuid::new_v4();
    let head1 = create_vault(&app, &owner, vault_id).await;

    let ku = key_update(&owner, vault_id, 1, head1, &owner.device_id, 2, [6; 24]);
    let (status, _) = post_json(&app, &format!("/v1/vaults/{vault_id}/key_updates"), &ku).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = get(
        &app,
        &format!("/v1/key_updates?device_id={}", owner.device_id),
    )
    .await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["key_epoch"], "2");

    let ack = key_update_ack(&owner, vault_id, 2, 1, head1);
    let (status, _) = post_json(
        &app,
        &format!("/v1/vaults/{vault_id}/key_update_acks"),
        &ack,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = get(&app, &format!("/v1/vaults/{vault_id}/members")).await;
    assert_eq!(body["members"][0]["key_epoch"], "2");
}

#[tokio::test]
async fn test_snapshot_flow() {
    let app = test_app();
    let owner = TestDevice::from_seed(1);
    let vault_id = Uuid::new_v4();
    let head1 = create_vault(&app, &owner, vault_id).await;

    let (status, body) = get(&app, &format!("/v1/vaults/{vault_id}/snapshots/latest")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let snap = snapshot(&owner, vault_id, 5, 1, head1, 1, [8; 24]);
    let (status, _) = post_json(&app, &format!("/v1/vaults/{vault_id}/snapshots"), &snap).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = get(&app, &format!("/v1/vaults/{vault_id}/snapshots/latest")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["base_seq"], "5");
}

#[tokio::test]
async fn test_vault_id_path_body_mismatch() {
    let app = test_app();
    let owner = TestDevice::from_seed(1);
    let vault_id = Uuid::new_v4();
    create_vault(&app, &owner, vault_id).await;

    let e1 = event(&owner, vault_id, 1, [0; 32], [1; 24], b"ct");
    let other_vault = Uuid::new_v4();
    let (status, body) = post_json(&app, &format!("/v1/vaults/{other_vault}/events"), &e1).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "vault_id_mismatch");
}

#[tokio::test]
async fn test_unknown_json_field_rejected() {
    let app = test_app();
    let device = TestDevice::from_seed(1);

    let mut body = serde_json::to_value(device.bundle()).unwrap();
    body["extra_field"] = Value::Bool(true);
    let (status, response) = post_json(&app, "/v1/devices/register", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], "invalid_json");
}

#[tokio::test]
async fn test_member_events_listing() {
    let app = test_app();
    let owner = TestDevice::from_seed(1);
    let vault_id = Uuid::new_v4();
    create_vault(&app, &owner, vault_id).await;

    let (status, body) = get(&app, &format!("/v1/vaults/{vault_id}/member_events")).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["msg_type"], "member_add");
    assert_eq!(listed[0]["member_seq"], "1");

    let (_, body) = get(
        &app,
        &format!("/v1/vaults/{vault_id}/member_events?since_seq=1"),
    )
    .await;
    assert_eq!(body.as_array().unwrap().len(), 0);
}

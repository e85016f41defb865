use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use dockyard_engine::fake::FakeEngine;
use dockyard_orchestrator::{HostSpec, Orchestrator};
use dockyard_store::{NewAddress, NewImage, NewUser, Store};

use crate::auth::USER_HEADER;
use crate::{create_app, AppState};

struct TestCtx {
    app: Router,
    engine: Arc<FakeEngine>,
    store: Store,
    address_id: i64,
    image_id: i64,
}

const ADMIN: &str = "root@example.com";
const ALICE: &str = "alice@example.com";
const BOB: &str = "bob@example.com";

async fn test_ctx() -> TestCtx {
    let store = Store::in_memory().await.unwrap();
    let engine = Arc::new(FakeEngine::new());

    store
        .create_user(&NewUser {
            email: ADMIN.to_string(),
            name: "Root".to_string(),
            is_admin: true,
            ssh_pub_key: None,
        })
        .await
        .unwrap();
    store
        .create_user(&NewUser {
            email: ALICE.to_string(),
            name: "Alice".to_string(),
            is_admin: false,
            ssh_pub_key: Some("ssh-ed25519 AAAA alice".to_string()),
        })
        .await
        .unwrap();
    store
        .create_user(&NewUser {
            email: BOB.to_string(),
            name: "Bob".to_string(),
            is_admin: false,
            ssh_pub_key: None,
        })
        .await
        .unwrap();

    let image = store
        .create_image(&NewImage {
            name: "debian".to_string(),
            tag: "12".to_string(),
            user_id: None,
            source_container_id: None,
            is_snapshot: false,
        })
        .await
        .unwrap();
    let address = store
        .create_address(&NewAddress {
            ip_addr: "10.0.0.30".to_string(),
            mac_addr: None,
            is_routed: true,
        })
        .await
        .unwrap();

    let orchestrator = Orchestrator::new(
        engine.clone(),
        store.clone(),
        HostSpec {
            cores: 4,
            memory_mb: 8192,
        },
    );
    let state = AppState::new(engine.clone(), store.clone(), orchestrator);
    TestCtx {
        app: create_app(state),
        engine,
        store,
        address_id: address.id,
        image_id: image.id,
    }
}

fn get(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(USER_HEADER, user)
        .body(Body::empty())
        .unwrap()
}

fn send(method: &str, uri: &str, user: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(USER_HEADER, user)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_body(ctx: &TestCtx, hostname: &str) -> Value {
    json!({
        "image_id": ctx.image_id,
        "address_id": ctx.address_id,
        "hostname": hostname,
        "memory_mb": 512,
        "cores": 2,
    })
}

async fn create_container(ctx: &TestCtx, hostname: &str) -> i64 {
    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "POST",
            "/api/v1/containers",
            ALICE,
            create_body(ctx, hostname),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["record"]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn health_reports_healthy() {
    let ctx = test_ctx().await;
    let response = ctx
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}

#[tokio::test]
async fn missing_user_header_is_denied() {
    let ctx = test_ctx().await;
    let response = ctx
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/containers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn inactive_user_is_denied() {
    let ctx = test_ctx().await;
    let bob = ctx.store.user_by_email(BOB).await.unwrap().unwrap();
    ctx.store
        .update_user(bob.id, "Bob", false, false)
        .await
        .unwrap();
    let response = ctx
        .app
        .clone()
        .oneshot(get("/api/v1/containers", BOB))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn container_creation_and_address_conflict() {
    let ctx = test_ctx().await;
    create_container(&ctx, "web-1").await;

    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "POST",
            "/api/v1/containers",
            ALICE,
            create_body(&ctx, "web-2"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"], "conflict");
    assert_eq!(ctx.engine.container_count(), 1);
}

#[tokio::test]
async fn omitted_memory_falls_back_to_host_total() {
    let ctx = test_ctx().await;
    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "POST",
            "/api/v1/containers",
            ALICE,
            json!({
                "image_id": ctx.image_id,
                "address_id": ctx.address_id,
                "hostname": "web-max",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["record"]["id"].as_i64().unwrap();

    let response = ctx
        .app
        .clone()
        .oneshot(get(&format!("/api/v1/containers/{id}"), ALICE))
        .await
        .unwrap();
    let view = body_json(response).await;
    assert_eq!(view["details"]["memory_mb"], 8192);
}

#[tokio::test]
async fn bad_hostname_is_a_validation_error() {
    let ctx = test_ctx().await;
    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "POST",
            "/api/v1/containers",
            ALICE,
            create_body(&ctx, "bad host!"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["error"], "validation");
}

#[tokio::test]
async fn lifecycle_flow_with_named_outcomes() {
    let ctx = test_ctx().await;
    let id = create_container(&ctx, "web-3").await;

    // Removal refuses while running.
    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "DELETE",
            &format!("/api/v1/containers/{id}"),
            ALICE,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["outcome"], "stop_before_removing");

    // Stop succeeds, and stopping again still reads as stopped.
    for _ in 0..2 {
        let response = ctx
            .app
            .clone()
            .oneshot(send(
                "POST",
                &format!("/api/v1/containers/{id}/stop"),
                ALICE,
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["outcome"], "stopped");
    }

    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "DELETE",
            &format!("/api/v1/containers/{id}"),
            ALICE,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["outcome"], "removed");

    // The address is back in the free pool.
    let response = ctx
        .app
        .clone()
        .oneshot(get("/api/v1/addresses?available=true", ALICE))
        .await
        .unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn non_owner_cannot_see_or_drive_a_container() {
    let ctx = test_ctx().await;
    let id = create_container(&ctx, "web-4").await;

    let response = ctx
        .app
        .clone()
        .oneshot(get(&format!("/api/v1/containers/{id}"), BOB))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "POST",
            &format!("/api/v1/containers/{id}/stop"),
            BOB,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The admin can.
    let response = ctx
        .app
        .clone()
        .oneshot(get(&format!("/api/v1/containers/{id}"), ADMIN))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn user_management_is_admin_only() {
    let ctx = test_ctx().await;
    let response = ctx
        .app
        .clone()
        .oneshot(get("/api/v1/users", ALICE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "POST",
            "/api/v1/users",
            ADMIN,
            json!({ "email": "carol@example.com", "name": "Carol" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Duplicate email is a conflict.
    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "POST",
            "/api/v1/users",
            ADMIN,
            json!({ "email": "carol@example.com", "name": "Carol" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn address_edit_is_refused_while_assigned() {
    let ctx = test_ctx().await;
    let uri = format!("/api/v1/addresses/{}", ctx.address_id);
    let body = json!({ "ip_addr": "10.0.0.31", "mac_addr": null, "is_routed": false });

    let response = ctx
        .app
        .clone()
        .oneshot(send("PUT", &uri, ALICE, body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = ctx
        .app
        .clone()
        .oneshot(send("PUT", &uri, ADMIN, body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ip_addr"], "10.0.0.31");

    create_container(&ctx, "pinning").await;
    let response = ctx
        .app
        .clone()
        .oneshot(send("PUT", &uri, ADMIN, body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn snapshot_name_conflict_is_reported() {
    let ctx = test_ctx().await;
    let id = create_container(&ctx, "web-5").await;

    let body = json!({ "name": "web-5-snap", "tag": "v1" });
    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "POST",
            &format!("/api/v1/containers/{id}/snapshot"),
            ALICE,
            body.clone(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "POST",
            &format!("/api/v1/containers/{id}/snapshot"),
            ALICE,
            body,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn passphrase_reset_returns_fresh_secret() {
    let ctx = test_ctx().await;
    let id = create_container(&ctx, "web-6").await;
    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "POST",
            &format!("/api/v1/containers/{id}/passphrase"),
            ALICE,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["passphrase"].as_str().unwrap().len(), 15);
}

#[tokio::test]
async fn pull_runs_under_the_clients_token() {
    let ctx = test_ctx().await;
    let response = ctx
        .app
        .clone()
        .oneshot(send(
            "POST",
            "/api/v1/images/pull/alpine-pull-1",
            ALICE,
            json!({ "name": "alpine" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["token"], "alpine-pull-1");

    // Give the background pull a chance to run.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let response = ctx
        .app
        .clone()
        .oneshot(get("/api/v1/images/pull/alpine-pull-1", ALICE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let progress = body_json(response).await;
    assert_eq!(progress["done"], true);

    // The pulled image landed in the image table.
    let response = ctx
        .app
        .clone()
        .oneshot(get("/api/v1/images", ALICE))
        .await
        .unwrap();
    let images = body_json(response).await;
    assert!(images
        .as_array()
        .unwrap()
        .iter()
        .any(|i| i["name"] == "alpine"));
}

#[tokio::test]
async fn unknown_pull_token_reads_as_pending() {
    let ctx = test_ctx().await;
    let response = ctx
        .app
        .clone()
        .oneshot(get("/api/v1/images/pull/not-started-yet", ALICE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let progress = body_json(response).await;
    assert_eq!(progress["done"], false);
    assert!(progress["error"].is_null());
}

#[tokio::test]
async fn diff_summary_truncates_per_category() {
    let ctx = test_ctx().await;
    let id = create_container(&ctx, "web-7").await;
    let response = ctx
        .app
        .clone()
        .oneshot(get(
            &format!("/api/v1/containers/{id}/diff?summary=true"),
            ALICE,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let diff = body_json(response).await;
    assert!(diff["modified"].as_array().unwrap().len() <= 10);
}

#[tokio::test]
async fn host_summary_reports_capacity() {
    let ctx = test_ctx().await;
    let response = ctx
        .app
        .clone()
        .oneshot(get("/api/v1/host", ALICE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["host"]["cores"].as_u64().unwrap() >= 1);
}

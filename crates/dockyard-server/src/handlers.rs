use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info};

use dockyard_common::{authorize_admin, DockyardError, LifecycleOp};
use dockyard_engine::PullProgress;
use dockyard_orchestrator::CreateContainerRequest;
use dockyard_store::{NewAddress, NewUser};
use dockyard_telemetry::host_overview;

use crate::auth::CurrentUser;
use crate::error::{outcome_response, ApiResult};
use crate::AppState;

// --- Health and host ---

pub async fn health(State(state): State<AppState>) -> Response {
    match state.store.health_check().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "message": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn host_summary(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
) -> ApiResult<Json<serde_json::Value>> {
    let containers = state.orchestrator.list_containers(&actor).await?;
    let images = state.orchestrator.list_images(&actor).await?;
    let available = state
        .store
        .list_available_addresses()
        .await
        .map_err(DockyardError::from)?;
    Ok(Json(json!({
        "host": host_overview(),
        "containers": containers.len(),
        "images": images.len(),
        "available_addresses": available.len(),
    })))
}

// --- Users ---

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub is_admin: bool,
    pub ssh_pub_key: Option<String>,
}

pub async fn create_user(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&actor)?;
    if req.email.is_empty() || !req.email.contains('@') {
        return Err(DockyardError::validation("email", "not a valid address").into());
    }
    let user = state
        .store
        .create_user(&NewUser {
            email: req.email,
            name: req.name,
            is_admin: req.is_admin,
            ssh_pub_key: req.ssh_pub_key,
        })
        .await
        .map_err(DockyardError::from)?;
    info!(user = user.id, email = %user.email, "user created");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&actor)?;
    let users = state.store.list_users().await.map_err(DockyardError::from)?;
    Ok(Json(users))
}

pub async fn get_user(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    if !actor.is_admin && actor.user_id != id {
        return Err(DockyardError::AccessDenied.into());
    }
    let user = state.store.user_by_id(id).await.map_err(DockyardError::from)?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: String,
    pub is_active: bool,
    pub is_admin: bool,
}

pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&actor)?;
    let user = state
        .store
        .update_user(id, &req.name, req.is_active, req.is_admin)
        .await
        .map_err(DockyardError::from)?;
    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&actor)?;
    state.store.delete_user(id).await.map_err(DockyardError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SshKeyRequest {
    pub ssh_pub_key: Option<String>,
}

pub async fn set_ssh_key(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<SshKeyRequest>,
) -> ApiResult<impl IntoResponse> {
    if !actor.is_admin && actor.user_id != id {
        return Err(DockyardError::AccessDenied.into());
    }
    state
        .store
        .set_ssh_key(id, req.ssh_pub_key.as_deref())
        .await
        .map_err(DockyardError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Addresses ---

pub async fn create_address(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(req): Json<NewAddress>,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&actor)?;
    if req.ip_addr.parse::<std::net::IpAddr>().is_err() {
        return Err(DockyardError::validation("ip_addr", "not a valid IP address").into());
    }
    let address = state
        .store
        .create_address(&req)
        .await
        .map_err(DockyardError::from)?;
    Ok((StatusCode::CREATED, Json(address)))
}

#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    #[serde(default)]
    pub available: bool,
}

pub async fn list_addresses(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Query(q): Query<AddressQuery>,
) -> ApiResult<impl IntoResponse> {
    // Every user may see the free pool (they pick an address when creating
    // a container); the full table is admin-only.
    let addresses = if q.available {
        state
            .store
            .list_available_addresses()
            .await
            .map_err(DockyardError::from)?
    } else {
        authorize_admin(&actor)?;
        state.store.list_addresses().await.map_err(DockyardError::from)?
    };
    Ok(Json(addresses))
}

pub async fn update_address(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<NewAddress>,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&actor)?;
    if req.ip_addr.parse::<std::net::IpAddr>().is_err() {
        return Err(DockyardError::validation("ip_addr", "not a valid IP address").into());
    }
    let address = state
        .store
        .update_address(id, &req)
        .await
        .map_err(DockyardError::from)?;
    Ok(Json(address))
}

pub async fn delete_address(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    authorize_admin(&actor)?;
    state
        .store
        .delete_address(id)
        .await
        .map_err(DockyardError::from)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Images ---

pub async fn list_images(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.list_images(&actor).await?))
}

pub async fn remove_image(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.orchestrator.remove_image(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub term: String,
}

pub async fn search_images(
    State(state): State<AppState>,
    CurrentUser(_actor): CurrentUser,
    Query(q): Query<SearchQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.search_images(&q.term).await?))
}

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub name: String,
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    "latest".to_string()
}

/// Kick off an image pull in the background under the client's own opaque
/// token; the client polls the same token for progress.
pub async fn start_pull(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(token): Path<String>,
    Json(req): Json<PullRequest>,
) -> ApiResult<impl IntoResponse> {
    state.pulls.insert(token.clone(), PullProgress::pending());

    let (tx, mut rx) = mpsc::channel::<PullProgress>(32);
    let pulls = state.pulls.clone();
    let progress_token = token.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            pulls.insert(progress_token.clone(), event);
        }
    });

    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.pull_image(&actor, &req.name, &req.tag, tx).await {
            error!(image = %req.name, tag = %req.tag, error = %e, "image pull failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "token": token }))))
}

pub async fn pull_progress(
    State(state): State<AppState>,
    CurrentUser(_actor): CurrentUser,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    // A token with no recorded events yet reads as a pending pull, so a
    // client may poll before its POST is processed.
    let progress = state
        .pulls
        .get(&token)
        .map(|p| p.clone())
        .unwrap_or_else(PullProgress::pending);
    Ok(Json(progress))
}

// --- Containers ---

pub async fn create_container(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(req): Json<CreateContainerRequest>,
) -> ApiResult<impl IntoResponse> {
    let view = state.orchestrator.create_container(&actor, &req).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn list_containers(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.list_containers(&actor).await?))
}

pub async fn get_container(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.container_view(&actor, id).await?))
}

async fn lifecycle(
    state: AppState,
    actor: dockyard_common::Actor,
    id: i64,
    op: LifecycleOp,
) -> ApiResult<Response> {
    let outcome = state.orchestrator.lifecycle(&actor, id, op).await?;
    Ok(outcome_response(outcome))
}

pub async fn start_container(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    lifecycle(state, actor, id, LifecycleOp::Start).await
}

pub async fn stop_container(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    lifecycle(state, actor, id, LifecycleOp::Stop).await
}

pub async fn restart_container(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    lifecycle(state, actor, id, LifecycleOp::Restart).await
}

pub async fn remove_container(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    lifecycle(state, actor, id, LifecycleOp::Remove).await
}

pub async fn container_top(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.processes(&actor, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct DiffQuery {
    #[serde(default)]
    pub summary: bool,
}

/// At most ten paths per category in summary mode.
const DIFF_SUMMARY_LIMIT: usize = 10;

pub async fn container_diff(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
    Query(q): Query<DiffQuery>,
) -> ApiResult<impl IntoResponse> {
    let diff = state.orchestrator.fs_diff(&actor, id).await?;
    let diff = if q.summary {
        diff.truncated(DIFF_SUMMARY_LIMIT)
    } else {
        diff
    };
    Ok(Json(diff))
}

pub async fn container_stats(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.stats_sample(&actor, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SnapshotRequest {
    pub name: String,
    #[serde(default = "default_tag")]
    pub tag: String,
}

pub async fn snapshot_container(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<SnapshotRequest>,
) -> ApiResult<impl IntoResponse> {
    let image = state
        .orchestrator
        .snapshot(&actor, id, &req.name, &req.tag)
        .await?;
    Ok((StatusCode::CREATED, Json(image)))
}

pub async fn reset_passphrase(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let passphrase = state.orchestrator.reset_passphrase(&actor, id).await?;
    Ok(Json(json!({ "passphrase": passphrase })))
}

#[derive(Debug, Deserialize)]
pub struct SshAccessRequest {
    pub user_ids: Vec<i64>,
}

pub async fn grant_ssh_access(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<SshAccessRequest>,
) -> ApiResult<impl IntoResponse> {
    state
        .orchestrator
        .grant_ssh_access(&actor, id, &req.user_ids)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

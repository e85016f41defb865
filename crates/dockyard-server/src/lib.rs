//! HTTP surface of the panel: REST endpoints for users, addresses, images
//! and containers, plus SSE telemetry streams and pull progress polling.

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use dashmap::DashMap;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use dockyard_engine::{ContainerEngine, PullProgress};
use dockyard_orchestrator::Orchestrator;
use dockyard_store::Store;

pub mod auth;
pub mod error;
pub mod handlers;
pub mod streaming;

#[cfg(test)]
mod tests;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub engine: Arc<dyn ContainerEngine>,
    pub store: Store,
    /// Latest progress event per pull token, kept for the process lifetime.
    pub pulls: Arc<DashMap<String, PullProgress>>,
}

impl AppState {
    pub fn new(engine: Arc<dyn ContainerEngine>, store: Store, orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            engine,
            store,
            pulls: Arc::new(DashMap::new()),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        // Users (admin managed)
        .route("/api/v1/users", post(handlers::create_user).get(handlers::list_users))
        .route(
            "/api/v1/users/:id",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
        .route("/api/v1/users/:id/ssh-key", put(handlers::set_ssh_key))
        // Network addresses
        .route(
            "/api/v1/addresses",
            post(handlers::create_address).get(handlers::list_addresses),
        )
        .route(
            "/api/v1/addresses/:id",
            put(handlers::update_address).delete(handlers::delete_address),
        )
        // Images
        .route("/api/v1/images", get(handlers::list_images))
        .route("/api/v1/images/:id", delete(handlers::remove_image))
        .route("/api/v1/images/search", get(handlers::search_images))
        .route(
            "/api/v1/images/pull/:token",
            post(handlers::start_pull).get(handlers::pull_progress),
        )
        // Containers
        .route(
            "/api/v1/containers",
            post(handlers::create_container).get(handlers::list_containers),
        )
        .route("/api/v1/containers/:id", get(handlers::get_container))
        .route("/api/v1/containers/:id", delete(handlers::remove_container))
        .route("/api/v1/containers/:id/start", post(handlers::start_container))
        .route("/api/v1/containers/:id/stop", post(handlers::stop_container))
        .route(
            "/api/v1/containers/:id/restart",
            post(handlers::restart_container),
        )
        .route("/api/v1/containers/:id/top", get(handlers::container_top))
        .route("/api/v1/containers/:id/diff", get(handlers::container_diff))
        .route("/api/v1/containers/:id/stats", get(handlers::container_stats))
        .route(
            "/api/v1/containers/:id/stats/stream",
            get(streaming::container_stats_stream),
        )
        .route(
            "/api/v1/containers/:id/snapshot",
            post(handlers::snapshot_container),
        )
        .route(
            "/api/v1/containers/:id/passphrase",
            post(handlers::reset_passphrase),
        )
        .route(
            "/api/v1/containers/:id/ssh-access",
            post(handlers::grant_ssh_access),
        )
        // Host telemetry
        .route("/api/v1/host", get(handlers::host_summary))
        .route("/api/v1/host/stream", get(streaming::host_stats_stream))
        // Health
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

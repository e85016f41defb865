use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use dockyard_engine::docker::{DockerEngine, EngineSettings};
use dockyard_orchestrator::{HostSpec, Orchestrator};
use dockyard_server::{create_app, AppState};
use dockyard_store::{NewUser, Store};
use dockyard_telemetry::probe_host;

struct ServerConfig {
    listen: SocketAddr,
    db_path: String,
    engine: EngineSettings,
    bootstrap_admin: String,
}

impl ServerConfig {
    fn from_env() -> anyhow::Result<Self> {
        let listen = std::env::var("DOCKYARD_LISTEN")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()?;
        let db_path =
            std::env::var("DOCKYARD_DB").unwrap_or_else(|_| "data/dockyard.db".to_string());

        let mut engine = EngineSettings::default();
        if let Ok(name) = std::env::var("DOCKYARD_BRIDGE_NETWORK") {
            engine.bridge_network = name;
        }
        if let Ok(name) = std::env::var("DOCKYARD_ISOLATED_NETWORK") {
            engine.isolated_network = name;
        }
        if let Ok(secs) = std::env::var("DOCKYARD_ENGINE_TIMEOUT_SECS") {
            engine.call_timeout = Duration::from_secs(secs.parse()?);
        }

        let bootstrap_admin = std::env::var("DOCKYARD_ADMIN_EMAIL")
            .unwrap_or_else(|_| "admin@localhost".to_string());

        Ok(Self {
            listen,
            db_path,
            engine,
            bootstrap_admin,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dockyard_server=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let store = Store::open(&config.db_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open store at {}: {e}", config.db_path))?;

    // First run: create an admin account so the panel is reachable at all.
    if store.list_users().await?.is_empty() {
        store
            .create_user(&NewUser {
                email: config.bootstrap_admin.clone(),
                name: "Administrator".to_string(),
                is_admin: true,
                ssh_pub_key: None,
            })
            .await?;
        warn!(email = %config.bootstrap_admin, "bootstrapped initial admin account");
    }

    let engine = Arc::new(
        DockerEngine::connect(config.engine.clone())
            .map_err(|e| anyhow::anyhow!("cannot reach the container engine: {e}"))?,
    );

    let probe = probe_host();
    info!(
        cores = probe.cores,
        memory_mb = probe.memory_mb,
        "host capacity probed"
    );
    let host = HostSpec {
        cores: probe.cores,
        memory_mb: probe.memory_mb,
    };

    let orchestrator = Orchestrator::new(engine.clone(), store.clone(), host);
    let state = AppState::new(engine, store, orchestrator);
    let app = create_app(state);

    info!("dockyard listening on {}", config.listen);
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

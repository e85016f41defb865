//! Client of the local container engine daemon.
//!
//! Everything the panel asks of the engine goes through the [`ContainerEngine`]
//! trait: lifecycle calls, commit/snapshot, telemetry reads, exec, image
//! search and pull. The bollard-backed implementation lives in [`docker`];
//! [`fake`] provides a scripted in-memory engine for development and tests.
//!
//! Two boundary rules are enforced here and nowhere else: raw engine status
//! codes are mapped into the [`LifecycleOutcome`] vocabulary, and engine
//! container identifiers are normalized to a short textual form the moment a
//! response is received.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use dockyard_common::{DockyardError, LifecycleOp, LifecycleOutcome};

pub mod docker;
pub mod fake;

pub use docker::DockerEngine;

/// Engine identifiers are carried as a short opaque token.
pub const ENGINE_ID_LEN: usize = 12;

/// Normalize a raw engine identifier to its short textual form.
///
/// Applied exactly once, where the engine response is first received; nothing
/// downstream branches on the representation.
pub fn normalize_engine_id(raw: &str) -> String {
    raw.trim().chars().take(ENGINE_ID_LEN).collect()
}

// --- Error type ---

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("engine call timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine transport error: {0}")]
    Transport(#[from] bollard::errors::Error),
    #[error("engine response missing {0}")]
    MalformedResponse(&'static str),
}

impl EngineError {
    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<EngineError> for DockyardError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Timeout(d) => DockyardError::EngineTimeout(d.as_millis() as u64),
            other => DockyardError::Engine(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

// --- Request/response types ---

/// How a new container attaches to the network, selected from the target
/// address's routed flag: routed addresses ride the host bridge, unrouted
/// ones get an isolated macvlan-style endpoint with an explicit MAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkAttachment {
    Bridged { ip_addr: String },
    Isolated { ip_addr: String, mac_addr: Option<String> },
}

impl NetworkAttachment {
    pub fn ip_addr(&self) -> &str {
        match self {
            Self::Bridged { ip_addr } | Self::Isolated { ip_addr, .. } => ip_addr,
        }
    }
}

/// Everything the engine needs to create and start one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub image: String,
    pub tag: String,
    pub hostname: String,
    /// Comma-joined CPU core indices, e.g. "0,2,3".
    pub cpuset: String,
    pub memory_mb: u64,
    pub network: NetworkAttachment,
}

/// Condensed inspect output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub engine_id: String,
    pub memory_mb: u64,
    pub cpuset: String,
    pub ip_addr: Option<String>,
    pub created: Option<String>,
    pub running: bool,
}

/// Output of the engine's process listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessListing {
    pub titles: Vec<String>,
    pub processes: Vec<Vec<String>>,
}

/// Filesystem changes since container start, classified by kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FsDiff {
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
}

impl FsDiff {
    /// A copy keeping at most `n` paths per category, for summary views.
    pub fn truncated(&self, n: usize) -> Self {
        Self {
            modified: self.modified.iter().take(n).cloned().collect(),
            added: self.added.iter().take(n).cloned().collect(),
            deleted: self.deleted.iter().take(n).cloned().collect(),
        }
    }
}

/// One point-in-time resource sample for a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatsSample {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_limit_bytes: u64,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
}

/// Condensed image inspect output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDetails {
    pub id: String,
    pub size_mb: u64,
    pub created: Option<String>,
}

/// One registry search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSearchHit {
    pub name: String,
    pub description: String,
    pub stars: i64,
    pub official: bool,
}

/// Progress of one image pull, published to the token-keyed side channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullProgress {
    pub status: String,
    pub layer_id: Option<String>,
    pub percent: Option<u8>,
    pub done: bool,
    pub error: Option<String>,
}

impl PullProgress {
    pub fn pending() -> Self {
        Self {
            status: "pulling, please wait".to_string(),
            layer_id: None,
            percent: None,
            done: false,
            error: None,
        }
    }
}

// --- The engine trait ---

/// The panel's view of the container engine daemon.
///
/// Lifecycle calls never fail at the type level: every status code and
/// transport failure is folded into the outcome vocabulary. Data-bearing
/// calls return [`EngineError`] so callers can translate into the shared
/// error taxonomy.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create and start a container; returns the normalized engine id.
    async fn run(&self, spec: &RunSpec) -> Result<String>;

    /// Start/stop/restart/remove, mapped into the outcome vocabulary.
    async fn lifecycle(&self, op: LifecycleOp, engine_id: &str) -> LifecycleOutcome;

    async fn inspect(&self, engine_id: &str) -> Result<ContainerDetails>;

    async fn top(&self, engine_id: &str) -> Result<ProcessListing>;

    async fn changes(&self, engine_id: &str) -> Result<FsDiff>;

    async fn stats_once(&self, engine_id: &str) -> Result<ContainerStatsSample>;

    /// Run a command inside the container and collect its output.
    async fn exec(&self, engine_id: &str, cmd: Vec<String>) -> Result<String>;

    /// Commit the container's filesystem to a new image; returns the image id.
    async fn commit(&self, engine_id: &str, repo: &str, tag: &str) -> Result<String>;

    async fn remove_image(&self, name: &str, tag: &str) -> Result<()>;

    async fn inspect_image(&self, name: &str, tag: &str) -> Result<ImageDetails>;

    async fn search_images(&self, term: &str) -> Result<Vec<ImageSearchHit>>;

    /// Pull an image, publishing progress updates until the final `done`
    /// (or error) event. The receiver side owns the progress bookkeeping.
    async fn pull(
        &self,
        image: &str,
        tag: &str,
        progress: mpsc::Sender<PullProgress>,
    ) -> Result<()>;
}

//! Scripted in-memory engine for tests. No daemon is contacted; behaviour is
//! driven by the knobs on [`FakeEngine`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use dockyard_common::{LifecycleOp, LifecycleOutcome};

use crate::{
    ContainerDetails, ContainerEngine, ContainerStatsSample, EngineError, FsDiff, ImageDetails,
    ImageSearchHit, ProcessListing, PullProgress, Result, RunSpec,
};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub spec: RunSpec,
    pub running: bool,
}

#[derive(Default)]
struct Script {
    run_failure: Option<(u16, String)>,
    stats_failures: u32,
    commit_conflict: bool,
    pull_events: Vec<PullProgress>,
}

/// In-memory [`ContainerEngine`]. Containers created through [`run`] are held
/// in a map keyed by a generated id; lifecycle calls mutate the `running`
/// flag and report the outcome the daemon would.
///
/// [`run`]: ContainerEngine::run
#[derive(Default)]
pub struct FakeEngine {
    containers: Mutex<HashMap<String, FakeContainer>>,
    execs: Mutex<Vec<(String, Vec<String>)>>,
    removed_images: Mutex<Vec<String>>,
    script: Mutex<Script>,
    next_id: AtomicU64,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next [`run`](ContainerEngine::run) fail with the given engine
    /// status.
    pub fn fail_next_run(&self, status: u16, message: &str) {
        self.script.lock().unwrap().run_failure = Some((status, message.to_string()));
    }

    /// Make the next `n` stats samples fail.
    pub fn fail_stats(&self, n: u32) {
        self.script.lock().unwrap().stats_failures = n;
    }

    /// Make [`commit`](ContainerEngine::commit) report a name conflict.
    pub fn conflict_on_commit(&self) {
        self.script.lock().unwrap().commit_conflict = true;
    }

    /// Script the events emitted by the next [`pull`](ContainerEngine::pull).
    pub fn script_pull(&self, events: Vec<PullProgress>) {
        self.script.lock().unwrap().pull_events = events;
    }

    /// Commands recorded by [`exec`](ContainerEngine::exec), oldest first.
    pub fn recorded_execs(&self) -> Vec<(String, Vec<String>)> {
        self.execs.lock().unwrap().clone()
    }

    pub fn removed_images(&self) -> Vec<String> {
        self.removed_images.lock().unwrap().clone()
    }

    pub fn is_running(&self, engine_id: &str) -> Option<bool> {
        self.containers
            .lock()
            .unwrap()
            .get(engine_id)
            .map(|c| c.running)
    }

    pub fn container_count(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    /// Insert a container directly, bypassing [`run`](ContainerEngine::run).
    pub fn seed(&self, engine_id: &str, spec: RunSpec, running: bool) {
        self.containers
            .lock()
            .unwrap()
            .insert(engine_id.to_string(), FakeContainer { spec, running });
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn run(&self, spec: &RunSpec) -> Result<String> {
        if let Some((status, message)) = self.script.lock().unwrap().run_failure.take() {
            return Err(EngineError::Status { status, message });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let engine_id = format!("{n:012x}");
        self.containers.lock().unwrap().insert(
            engine_id.clone(),
            FakeContainer {
                spec: spec.clone(),
                running: true,
            },
        );
        Ok(engine_id)
    }

    async fn lifecycle(&self, op: LifecycleOp, engine_id: &str) -> LifecycleOutcome {
        let mut containers = self.containers.lock().unwrap();
        let Some(container) = containers.get_mut(engine_id) else {
            return LifecycleOutcome::NotFound;
        };
        match op {
            LifecycleOp::Start => {
                if container.running {
                    LifecycleOutcome::AlreadyStarted
                } else {
                    container.running = true;
                    LifecycleOutcome::Started
                }
            }
            LifecycleOp::Stop => {
                container.running = false;
                LifecycleOutcome::Stopped
            }
            LifecycleOp::Restart => {
                container.running = true;
                LifecycleOutcome::Restarted
            }
            LifecycleOp::Remove => {
                if container.running {
                    LifecycleOutcome::StopBeforeRemoving
                } else {
                    containers.remove(engine_id);
                    LifecycleOutcome::Removed
                }
            }
        }
    }

    async fn inspect(&self, engine_id: &str) -> Result<ContainerDetails> {
        let containers = self.containers.lock().unwrap();
        let container = containers.get(engine_id).ok_or(EngineError::Status {
            status: 404,
            message: "no such container".to_string(),
        })?;
        Ok(ContainerDetails {
            engine_id: engine_id.to_string(),
            memory_mb: container.spec.memory_mb,
            cpuset: container.spec.cpuset.clone(),
            ip_addr: Some(container.spec.network.ip_addr().to_string()),
            created: Some("2024-01-01 00:00:00".to_string()),
            running: container.running,
        })
    }

    async fn top(&self, engine_id: &str) -> Result<ProcessListing> {
        self.inspect(engine_id).await?;
        Ok(ProcessListing {
            titles: vec!["USER".into(), "PID".into(), "COMMAND".into()],
            processes: vec![vec!["root".into(), "1".into(), "/sbin/init".into()]],
        })
    }

    async fn changes(&self, engine_id: &str) -> Result<FsDiff> {
        self.inspect(engine_id).await?;
        Ok(FsDiff {
            modified: vec!["/etc".into()],
            added: vec!["/etc/motd".into()],
            deleted: vec![],
        })
    }

    async fn stats_once(&self, engine_id: &str) -> Result<ContainerStatsSample> {
        {
            let mut script = self.script.lock().unwrap();
            if script.stats_failures > 0 {
                script.stats_failures -= 1;
                return Err(EngineError::Status {
                    status: 500,
                    message: "stats unavailable".to_string(),
                });
            }
        }
        self.inspect(engine_id).await?;
        Ok(ContainerStatsSample {
            cpu_percent: 1.5,
            memory_used_bytes: 64 * 1024 * 1024,
            memory_limit_bytes: 512 * 1024 * 1024,
            net_rx_bytes: 1024,
            net_tx_bytes: 2048,
        })
    }

    async fn exec(&self, engine_id: &str, cmd: Vec<String>) -> Result<String> {
        self.inspect(engine_id).await?;
        self.execs
            .lock()
            .unwrap()
            .push((engine_id.to_string(), cmd));
        Ok(String::new())
    }

    async fn commit(&self, engine_id: &str, repo: &str, tag: &str) -> Result<String> {
        if self.script.lock().unwrap().commit_conflict {
            return Err(EngineError::Status {
                status: 409,
                message: "image name already in use".to_string(),
            });
        }
        self.inspect(engine_id).await?;
        Ok(format!("sha256:{repo}-{tag}"))
    }

    async fn remove_image(&self, name: &str, tag: &str) -> Result<()> {
        self.removed_images
            .lock()
            .unwrap()
            .push(format!("{name}:{tag}"));
        Ok(())
    }

    async fn inspect_image(&self, name: &str, tag: &str) -> Result<ImageDetails> {
        Ok(ImageDetails {
            id: format!("sha256:{name}-{tag}"),
            size_mb: 120,
            created: Some("2024-01-01 00:00:00".to_string()),
        })
    }

    async fn search_images(&self, term: &str) -> Result<Vec<ImageSearchHit>> {
        Ok(vec![ImageSearchHit {
            name: term.to_string(),
            description: format!("official {term} image"),
            stars: 1000,
            official: true,
        }])
    }

    async fn pull(
        &self,
        _image: &str,
        _tag: &str,
        progress: mpsc::Sender<PullProgress>,
    ) -> Result<()> {
        let events = std::mem::take(&mut self.script.lock().unwrap().pull_events);
        let events = if events.is_empty() {
            vec![
                PullProgress {
                    status: "Downloading".to_string(),
                    layer_id: Some("abc123".to_string()),
                    percent: Some(50),
                    done: false,
                    error: None,
                },
                PullProgress {
                    status: "Download complete".to_string(),
                    layer_id: None,
                    percent: Some(100),
                    done: true,
                    error: None,
                },
            ]
        } else {
            events
        };
        for event in events {
            let failed = event.error.is_some();
            let _ = progress.send(event).await;
            if failed {
                return Err(EngineError::Status {
                    status: 500,
                    message: "pull failed".to_string(),
                });
            }
        }
        Ok(())
    }
}

//! bollard-backed [`ContainerEngine`] implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, NetworkingConfig,
    RemoveContainerOptions, Stats, StatsOptions, StopContainerOptions, TopOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{
    CommitContainerOptions, CreateImageOptions, RemoveImageOptions, SearchImagesOptions,
};
use bollard::models::{ChangeType, EndpointIpamConfig, EndpointSettings, HostConfig};
use bollard::Docker;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use dockyard_common::{LifecycleOp, LifecycleOutcome};

use crate::{
    normalize_engine_id, ContainerDetails, ContainerEngine, ContainerStatsSample, EngineError,
    FsDiff, ImageDetails, ImageSearchHit, NetworkAttachment, ProcessListing, PullProgress, Result,
    RunSpec,
};

/// Names of the engine networks containers are attached to, plus the bound
/// timeout applied to every unary engine call.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub bridge_network: String,
    pub isolated_network: String,
    pub call_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bridge_network: "dockyard_bridge".to_string(),
            isolated_network: "dockyard_macvlan".to_string(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct DockerEngine {
    docker: Arc<Docker>,
    settings: EngineSettings,
}

impl DockerEngine {
    pub fn new(docker: Arc<Docker>, settings: EngineSettings) -> Self {
        Self { docker, settings }
    }

    /// Connect to the local daemon with default settings.
    pub fn connect(settings: EngineSettings) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(Arc::new(docker), settings))
    }

    /// Apply the configured timeout to one engine call.
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = std::result::Result<T, BollardError>>,
    {
        match tokio::time::timeout(self.settings.call_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(EngineError::Timeout(self.settings.call_timeout)),
        }
    }
}

/// Fold a bollard error into [`EngineError`], surfacing the daemon's status
/// code when there is one.
fn classify(err: BollardError) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Status {
            status: status_code,
            message,
        },
        other => EngineError::Transport(other),
    }
}

/// Fold a lifecycle call result into the outcome vocabulary. Transport
/// failures and timeouts read as server errors; the engine's own status
/// codes go through the shared mapping.
fn lifecycle_outcome(op: LifecycleOp, res: Result<()>) -> LifecycleOutcome {
    match res {
        Ok(()) => match op {
            LifecycleOp::Start => LifecycleOutcome::Started,
            LifecycleOp::Stop => LifecycleOutcome::Stopped,
            LifecycleOp::Restart => LifecycleOutcome::Restarted,
            LifecycleOp::Remove => LifecycleOutcome::Removed,
        },
        Err(EngineError::Status { status, .. }) => LifecycleOutcome::from_status(op, status),
        Err(_) => LifecycleOutcome::ServerError,
    }
}

fn cpu_percent(stats: &Stats) -> f64 {
    let cpu_delta = stats.cpu_stats.cpu_usage.total_usage as f64
        - stats.precpu_stats.cpu_usage.total_usage as f64;
    let sys_delta = stats.cpu_stats.system_cpu_usage.unwrap_or(0) as f64
        - stats.precpu_stats.system_cpu_usage.unwrap_or(0) as f64;
    if sys_delta > 0.0 && cpu_delta >= 0.0 {
        let online = stats.cpu_stats.online_cpus.unwrap_or(1).max(1) as f64;
        cpu_delta / sys_delta * online * 100.0
    } else {
        0.0
    }
}

fn sample_from_stats(stats: &Stats) -> ContainerStatsSample {
    let (rx, tx) = stats
        .networks
        .as_ref()
        .map(|nets| {
            nets.values()
                .fold((0u64, 0u64), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes))
        })
        .unwrap_or((0, 0));

    ContainerStatsSample {
        cpu_percent: cpu_percent(stats),
        memory_used_bytes: stats.memory_stats.usage.unwrap_or(0),
        memory_limit_bytes: stats.memory_stats.limit.unwrap_or(0),
        net_rx_bytes: rx,
        net_tx_bytes: tx,
    }
}

/// Trim an engine timestamp to second precision, matching the panel's views.
fn trim_timestamp(raw: &str) -> String {
    raw.split('.').next().unwrap_or(raw).replace('T', " ")
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    #[instrument(skip(self, spec), fields(image = %spec.image, hostname = %spec.hostname))]
    async fn run(&self, spec: &RunSpec) -> Result<String> {
        let (network_name, endpoint) = match &spec.network {
            NetworkAttachment::Bridged { ip_addr } => (
                self.settings.bridge_network.clone(),
                EndpointSettings {
                    ipam_config: Some(EndpointIpamConfig {
                        ipv4_address: Some(ip_addr.clone()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ),
            NetworkAttachment::Isolated { ip_addr, mac_addr } => (
                self.settings.isolated_network.clone(),
                EndpointSettings {
                    ipam_config: Some(EndpointIpamConfig {
                        ipv4_address: Some(ip_addr.clone()),
                        ..Default::default()
                    }),
                    mac_address: mac_addr.clone(),
                    ..Default::default()
                },
            ),
        };

        let mut endpoints = HashMap::new();
        endpoints.insert(network_name.clone(), endpoint);

        let config = Config::<String> {
            image: Some(format!("{}:{}", spec.image, spec.tag)),
            hostname: Some(spec.hostname.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            host_config: Some(HostConfig {
                memory: Some((spec.memory_mb * 1024 * 1024) as i64),
                cpuset_cpus: Some(spec.cpuset.clone()),
                network_mode: Some(network_name),
                ..Default::default()
            }),
            networking_config: Some(NetworkingConfig {
                endpoints_config: endpoints,
            }),
            ..Default::default()
        };

        let created = self
            .bounded(
                self.docker
                    .create_container(None::<CreateContainerOptions<String>>, config),
            )
            .await?;

        if let Err(e) = self
            .bounded(self.docker.start_container::<String>(&created.id, None))
            .await
        {
            // The container exists but never started; clean it up so a failed
            // run leaves nothing behind on the engine.
            if let Err(rm) = self
                .bounded(self.docker.remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                ))
                .await
            {
                warn!(container = %created.id, error = %rm, "failed to clean up unstarted container");
            }
            return Err(e);
        }

        let engine_id = normalize_engine_id(&created.id);
        info!(%engine_id, "container running");
        Ok(engine_id)
    }

    #[instrument(skip(self))]
    async fn lifecycle(&self, op: LifecycleOp, engine_id: &str) -> LifecycleOutcome {
        let res = match op {
            LifecycleOp::Start => {
                self.bounded(self.docker.start_container::<String>(engine_id, None))
                    .await
            }
            LifecycleOp::Stop => {
                self.bounded(
                    self.docker
                        .stop_container(engine_id, Some(StopContainerOptions { t: 10 })),
                )
                .await
            }
            LifecycleOp::Restart => self.bounded(self.docker.restart_container(engine_id, None)).await,
            LifecycleOp::Remove => {
                self.bounded(self.docker.remove_container(
                    engine_id,
                    Some(RemoveContainerOptions {
                        v: true,
                        ..Default::default()
                    }),
                ))
                .await
            }
        };
        lifecycle_outcome(op, res)
    }

    async fn inspect(&self, engine_id: &str) -> Result<ContainerDetails> {
        let body = self
            .bounded(
                self.docker
                    .inspect_container(engine_id, None::<InspectContainerOptions>),
            )
            .await?;

        let host_config = body.host_config.unwrap_or_default();
        let ip_addr = body
            .network_settings
            .and_then(|ns| ns.networks)
            .and_then(|nets| {
                nets.into_values()
                    .filter_map(|ep| ep.ip_address)
                    .find(|ip| !ip.is_empty())
            });

        Ok(ContainerDetails {
            engine_id: engine_id.to_string(),
            memory_mb: host_config.memory.unwrap_or(0).max(0) as u64 / (1024 * 1024),
            cpuset: host_config.cpuset_cpus.unwrap_or_default(),
            ip_addr,
            created: body.created.as_deref().map(trim_timestamp),
            running: body.state.and_then(|s| s.running).unwrap_or(false),
        })
    }

    async fn top(&self, engine_id: &str) -> Result<ProcessListing> {
        let body = self
            .bounded(self.docker.top_processes(
                engine_id,
                Some(TopOptions {
                    ps_args: "aux".to_string(),
                }),
            ))
            .await?;
        Ok(ProcessListing {
            titles: body.titles.unwrap_or_default(),
            processes: body.processes.unwrap_or_default(),
        })
    }

    async fn changes(&self, engine_id: &str) -> Result<FsDiff> {
        let entries = self
            .bounded(self.docker.container_changes(engine_id))
            .await?
            .unwrap_or_default();

        let mut diff = FsDiff::default();
        for entry in entries {
            match entry.kind {
                ChangeType::_0 => diff.modified.push(entry.path),
                ChangeType::_1 => diff.added.push(entry.path),
                ChangeType::_2 => diff.deleted.push(entry.path),
            }
        }
        Ok(diff)
    }

    async fn stats_once(&self, engine_id: &str) -> Result<ContainerStatsSample> {
        let mut stream = self.docker.stats(
            engine_id,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        );
        let stats = tokio::time::timeout(self.settings.call_timeout, stream.next())
            .await
            .map_err(|_| EngineError::Timeout(self.settings.call_timeout))?
            .ok_or(EngineError::MalformedResponse("stats sample"))?
            .map_err(classify)?;
        Ok(sample_from_stats(&stats))
    }

    async fn exec(&self, engine_id: &str, cmd: Vec<String>) -> Result<String> {
        let exec = self
            .bounded(self.docker.create_exec(
                engine_id,
                CreateExecOptions::<String> {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(cmd),
                    ..Default::default()
                },
            ))
            .await?;

        let started = self
            .bounded(
                self.docker
                    .start_exec(&exec.id, None::<StartExecOptions>),
            )
            .await?;

        let mut collected = Vec::new();
        if let StartExecResults::Attached { mut output, .. } = started {
            let drain = async {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(bollard::container::LogOutput::StdOut { message })
                        | Ok(bollard::container::LogOutput::StdErr { message }) => {
                            collected.extend_from_slice(&message);
                        }
                        Ok(_) => {}
                        Err(e) => return Err(classify(e)),
                    }
                }
                Ok(())
            };
            tokio::time::timeout(self.settings.call_timeout, drain)
                .await
                .map_err(|_| EngineError::Timeout(self.settings.call_timeout))??;
        }
        Ok(String::from_utf8_lossy(&collected).into_owned())
    }

    #[instrument(skip(self))]
    async fn commit(&self, engine_id: &str, repo: &str, tag: &str) -> Result<String> {
        let options = CommitContainerOptions {
            container: engine_id.to_string(),
            repo: repo.to_string(),
            tag: tag.to_string(),
            pause: true,
            ..Default::default()
        };
        let commit = self
            .bounded(
                self.docker
                    .commit_container(options, Config::<String>::default()),
            )
            .await?;
        Ok(commit
            .id
            .unwrap_or_else(|| format!("{repo}:{tag}")))
    }

    async fn remove_image(&self, name: &str, tag: &str) -> Result<()> {
        let reference = format!("{name}:{tag}");
        let _ = self
            .bounded(self.docker.remove_image(
                &reference,
                Some(RemoveImageOptions {
                    ..Default::default()
                }),
                None,
            ))
            .await?;
        Ok(())
    }

    async fn inspect_image(&self, name: &str, tag: &str) -> Result<ImageDetails> {
        let reference = format!("{name}:{tag}");
        let body = self.bounded(self.docker.inspect_image(&reference)).await?;
        Ok(ImageDetails {
            id: body.id.unwrap_or_else(|| reference.clone()),
            size_mb: body.size.unwrap_or(0).max(0) as u64 / 1_000_000,
            created: body.created.as_deref().map(trim_timestamp),
        })
    }

    async fn search_images(&self, term: &str) -> Result<Vec<ImageSearchHit>> {
        let hits = self
            .bounded(self.docker.search_images(SearchImagesOptions::<String> {
                term: term.to_string(),
                ..Default::default()
            }))
            .await?;
        Ok(hits
            .into_iter()
            .map(|h| ImageSearchHit {
                name: h.name.unwrap_or_default(),
                description: h.description.unwrap_or_default(),
                stars: h.star_count.unwrap_or(0),
                official: h.is_official.unwrap_or(false),
            })
            .collect())
    }

    #[instrument(skip(self, progress))]
    async fn pull(
        &self,
        image: &str,
        tag: &str,
        progress: mpsc::Sender<PullProgress>,
    ) -> Result<()> {
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions::<String> {
                from_image: image.to_string(),
                tag: tag.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );

        let mut last_status = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(err) = info.error {
                        let _ = progress
                            .send(PullProgress {
                                status: "error".to_string(),
                                layer_id: info.id,
                                percent: None,
                                done: true,
                                error: Some(err.clone()),
                            })
                            .await;
                        return Err(EngineError::Status {
                            status: 500,
                            message: err,
                        });
                    }

                    let percent = info.progress_detail.as_ref().and_then(|d| {
                        match (d.current, d.total) {
                            (Some(current), Some(total)) if total > 0 => {
                                Some((current * 100 / total).clamp(0, 100) as u8)
                            }
                            _ => None,
                        }
                    });
                    last_status = info.status.clone().unwrap_or_default();
                    let _ = progress
                        .send(PullProgress {
                            status: last_status.clone(),
                            layer_id: info.id,
                            percent,
                            done: false,
                            error: None,
                        })
                        .await;
                }
                Err(e) => {
                    let err = classify(e);
                    let _ = progress
                        .send(PullProgress {
                            status: "error".to_string(),
                            layer_id: None,
                            percent: None,
                            done: true,
                            error: Some(err.to_string()),
                        })
                        .await;
                    return Err(err);
                }
            }
        }

        let _ = progress
            .send(PullProgress {
                status: last_status,
                layer_id: None,
                percent: Some(100),
                done: true,
                error: None,
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_outcome_folds_transport_errors() {
        let res: Result<()> = Err(EngineError::Timeout(Duration::from_secs(1)));
        assert_eq!(
            lifecycle_outcome(LifecycleOp::Start, res),
            LifecycleOutcome::ServerError
        );
    }

    #[test]
    fn lifecycle_outcome_uses_status_mapping() {
        let res: Result<()> = Err(EngineError::Status {
            status: 409,
            message: "container is running".into(),
        });
        assert_eq!(
            lifecycle_outcome(LifecycleOp::Remove, res),
            LifecycleOutcome::StopBeforeRemoving
        );

        let res: Result<()> = Err(EngineError::Status {
            status: 304,
            message: "not modified".into(),
        });
        assert_eq!(
            lifecycle_outcome(LifecycleOp::Stop, res),
            LifecycleOutcome::Stopped
        );
    }

    #[test]
    fn timestamp_trimming() {
        assert_eq!(
            trim_timestamp("2024-05-01T12:30:45.123456789Z"),
            "2024-05-01 12:30:45"
        );
        assert_eq!(trim_timestamp("2024-05-01T12:30:45"), "2024-05-01 12:30:45");
    }
}

//! Coordinates the store and the engine for every panel operation.
//!
//! All container work funnels through [`Orchestrator`]: it authorizes the
//! actor against the container's owner set, allocates resources, drives the
//! engine, and keeps the relational records consistent with what the engine
//! confirmed. The ordering contract for creation is claim address, run,
//! persist; the claim is the only step that serializes racing requests.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use dockyard_common::{
    authorize, Actor, DockyardError, LifecycleOp, LifecycleOutcome, Result,
};
use dockyard_engine::{
    ContainerDetails, ContainerEngine, ContainerStatsSample, EngineError, FsDiff, ImageSearchHit,
    NetworkAttachment, ProcessListing, PullProgress, RunSpec,
};
use dockyard_store::{ContainerRow, ImageRow, NewContainer, NewImage, Store};

pub mod allocator;

pub use allocator::{grant_memory, pick_cores, HostSpec};

const PASSPHRASE_LEN: usize = 15;
const PASSPHRASE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#%^&*_-=;:?><,.";

/// A fresh root passphrase: 15 characters of uppercase, digits and symbols.
pub fn generate_passphrase<R: Rng>(rng: &mut R) -> String {
    (0..PASSPHRASE_LEN)
        .map(|_| PASSPHRASE_CHARSET[rng.random_range(0..PASSPHRASE_CHARSET.len())] as char)
        .collect()
}

fn chpasswd_cmd(passphrase: &str) -> Vec<String> {
    vec![
        "bash".to_string(),
        "-c".to_string(),
        format!("echo root:$'{passphrase}' | chpasswd"),
    ]
}

fn append_key_cmd(key: &str) -> Vec<String> {
    vec![
        "bash".to_string(),
        "-c".to_string(),
        format!("ls /root/.ssh || mkdir /root/.ssh && echo '{key}' >> /root/.ssh/authorized_keys"),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContainerRequest {
    pub image_id: i64,
    pub address_id: i64,
    pub hostname: String,
    /// Memory grant in MB; `None` grants the host's total.
    pub memory_mb: Option<u64>,
    /// Number of cores to grant; `None` grants every host core.
    pub cores: Option<usize>,
    /// Additional owners beyond the requesting actor.
    #[serde(default)]
    pub owner_ids: Vec<i64>,
}

/// A container record joined with its owner set and, when the engine could
/// be reached, live inspect data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerView {
    pub record: ContainerRow,
    pub owners: Vec<i64>,
    pub details: Option<ContainerDetails>,
}

#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<dyn ContainerEngine>,
    store: Store,
    host: HostSpec,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ContainerEngine>, store: Store, host: HostSpec) -> Self {
        Self {
            engine,
            store,
            host,
        }
    }

    pub fn host_spec(&self) -> HostSpec {
        self.host
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Resolve a container and authorize the actor against its owner set.
    async fn authorized(&self, actor: &Actor, container_id: i64) -> Result<ContainerRow> {
        let row = self.store.container_by_id(container_id).await?;
        let owners = self.store.owner_ids(container_id).await?;
        authorize(actor, &owners)?;
        Ok(row)
    }

    // --- Creation ---

    /// Create and start a container: validate the request, claim the
    /// address, run on the engine, then persist. A lost claim surfaces as a
    /// conflict before the engine is touched; a failed run releases the
    /// claim.
    #[instrument(skip(self, actor, req), fields(hostname = %req.hostname, user = actor.user_id))]
    pub async fn create_container(
        &self,
        actor: &Actor,
        req: &CreateContainerRequest,
    ) -> Result<ContainerView> {
        if req.hostname.is_empty()
            || !req
                .hostname
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(DockyardError::validation(
                "hostname",
                "must be non-empty, ASCII letters, digits or hyphens",
            ));
        }
        let memory_mb = grant_memory(&self.host, req.memory_mb)?;
        let cpuset = {
            let mut rng = rand::rng();
            pick_cores(&mut rng, &self.host, req.cores)?
        };

        let image = self.store.image_by_id(req.image_id).await?;
        // Images without a recorded owner are shared base images; everything
        // else (snapshots, user pulls) is owner-or-admin.
        if let Some(owner) = image.user_id {
            authorize(actor, &[owner])?;
        }
        if self
            .store
            .container_by_hostname(&req.hostname)
            .await?
            .is_some()
        {
            return Err(DockyardError::Conflict(format!(
                "hostname {} is already in use",
                req.hostname
            )));
        }

        // Serialization point: of two racing creates for the same address,
        // only one claim succeeds.
        let address = self.store.claim_address(req.address_id).await?;
        let network = if address.is_routed {
            NetworkAttachment::Bridged {
                ip_addr: address.ip_addr.clone(),
            }
        } else {
            NetworkAttachment::Isolated {
                ip_addr: address.ip_addr.clone(),
                mac_addr: address.mac_addr.clone(),
            }
        };

        let spec = RunSpec {
            image: image.name.clone(),
            tag: image.tag.clone(),
            hostname: req.hostname.clone(),
            cpuset,
            memory_mb,
            network,
        };

        let engine_id = match self.engine.run(&spec).await {
            Ok(id) => id,
            Err(e) => {
                if let Err(release) = self.store.release_address(address.id).await {
                    warn!(address = %address.ip_addr, error = %release, "failed to release claimed address");
                }
                return Err(e.into());
            }
        };

        let mut owner_ids = req.owner_ids.clone();
        if !owner_ids.contains(&actor.user_id) {
            owner_ids.push(actor.user_id);
        }

        let record = match self
            .store
            .persist_container(&NewContainer {
                hostname: req.hostname.clone(),
                engine_id: engine_id.clone(),
                image_id: Some(image.id),
                address_id: address.id,
                owner_ids: owner_ids.clone(),
            })
            .await
        {
            Ok(record) => record,
            Err(e) => {
                // The engine holds a container the store does not know
                // about. Leave it for operator cleanup rather than tearing
                // down a running workload.
                error!(%engine_id, error = %e, "container running but not persisted");
                return Err(DockyardError::Consistency(format!(
                    "container {engine_id} is running but was not recorded"
                )));
            }
        };

        for owner in &owner_ids {
            if let Ok(user) = self.store.user_by_id(*owner).await {
                if let Some(key) = user.ssh_pub_key.as_deref() {
                    if let Err(e) = self.engine.exec(&engine_id, append_key_cmd(key)).await {
                        warn!(%engine_id, user = user.email, error = %e, "ssh key injection failed");
                    }
                }
            }
        }

        info!(%engine_id, container = record.id, "container created");
        Ok(ContainerView {
            record,
            owners: owner_ids,
            details: None,
        })
    }

    // --- Lifecycle ---

    /// Start, stop, restart or remove. Removal inspects first and refuses a
    /// running container without touching the engine's remove endpoint; a
    /// confirmed removal also deletes the record and frees the address.
    #[instrument(skip(self, actor))]
    pub async fn lifecycle(
        &self,
        actor: &Actor,
        container_id: i64,
        op: LifecycleOp,
    ) -> Result<LifecycleOutcome> {
        let row = self.authorized(actor, container_id).await?;

        if op == LifecycleOp::Remove {
            if let Ok(details) = self.engine.inspect(&row.engine_id).await {
                if details.running {
                    return Ok(LifecycleOutcome::StopBeforeRemoving);
                }
            }
        }

        let outcome = self.engine.lifecycle(op, &row.engine_id).await;
        if op == LifecycleOp::Remove && outcome == LifecycleOutcome::Removed {
            self.store.remove_container(container_id).await?;
            info!(container = container_id, "container removed and address freed");
        }
        Ok(outcome)
    }

    // --- Inspection ---

    pub async fn container_view(&self, actor: &Actor, container_id: i64) -> Result<ContainerView> {
        let row = self.authorized(actor, container_id).await?;
        let owners = self.store.owner_ids(container_id).await?;
        let details = match self.engine.inspect(&row.engine_id).await {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(container = container_id, error = %e, "engine inspect failed");
                None
            }
        };
        Ok(ContainerView {
            record: row,
            owners,
            details,
        })
    }

    pub async fn list_containers(&self, actor: &Actor) -> Result<Vec<ContainerView>> {
        let rows = if actor.is_admin {
            self.store.list_containers().await?
        } else {
            self.store.list_containers_for_user(actor.user_id).await?
        };
        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let owners = self.store.owner_ids(row.id).await?;
            let details = self.engine.inspect(&row.engine_id).await.ok();
            views.push(ContainerView {
                record: row,
                owners,
                details,
            });
        }
        Ok(views)
    }

    pub async fn processes(&self, actor: &Actor, container_id: i64) -> Result<ProcessListing> {
        let row = self.authorized(actor, container_id).await?;
        Ok(self.engine.top(&row.engine_id).await?)
    }

    pub async fn fs_diff(&self, actor: &Actor, container_id: i64) -> Result<FsDiff> {
        let row = self.authorized(actor, container_id).await?;
        Ok(self.engine.changes(&row.engine_id).await?)
    }

    pub async fn stats_sample(
        &self,
        actor: &Actor,
        container_id: i64,
    ) -> Result<ContainerStatsSample> {
        let row = self.authorized(actor, container_id).await?;
        Ok(self.engine.stats_once(&row.engine_id).await?)
    }

    // --- In-container operations ---

    /// Set a fresh root passphrase inside the container and return it. The
    /// passphrase is never stored.
    pub async fn reset_passphrase(&self, actor: &Actor, container_id: i64) -> Result<String> {
        let row = self.authorized(actor, container_id).await?;
        let passphrase = {
            let mut rng = rand::rng();
            generate_passphrase(&mut rng)
        };
        self.engine
            .exec(&row.engine_id, chpasswd_cmd(&passphrase))
            .await?;
        Ok(passphrase)
    }

    /// Copy each user's public key into the container and add them to the
    /// owner set. Refused wholesale if any user has no key on file.
    pub async fn grant_ssh_access(
        &self,
        actor: &Actor,
        container_id: i64,
        user_ids: &[i64],
    ) -> Result<()> {
        let row = self.authorized(actor, container_id).await?;

        let mut keyed = Vec::with_capacity(user_ids.len());
        for id in user_ids {
            let user = self.store.user_by_id(*id).await?;
            let Some(key) = user.ssh_pub_key.clone() else {
                return Err(DockyardError::validation(
                    "user_ids",
                    format!("user {} has no public key on file", user.email),
                ));
            };
            keyed.push((user, key));
        }

        for (user, key) in keyed {
            self.engine.exec(&row.engine_id, append_key_cmd(&key)).await?;
            self.store.add_owner(container_id, user.id).await?;
        }
        Ok(())
    }

    // --- Images ---

    /// Commit the container's filesystem as a snapshot image owned by the
    /// actor. The name is checked against the image table before the engine
    /// is asked to commit.
    #[instrument(skip(self, actor))]
    pub async fn snapshot(
        &self,
        actor: &Actor,
        container_id: i64,
        name: &str,
        tag: &str,
    ) -> Result<ImageRow> {
        let row = self.authorized(actor, container_id).await?;

        if self.store.image_by_name_tag(name, tag).await?.is_some() {
            return Err(DockyardError::Conflict(format!(
                "image {name}:{tag} already exists"
            )));
        }

        match self.engine.commit(&row.engine_id, name, tag).await {
            Ok(_) => {}
            Err(EngineError::Status { status: 409, .. }) => {
                return Err(DockyardError::Conflict(format!(
                    "image {name}:{tag} already exists on the engine"
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let image = self
            .store
            .create_image(&NewImage {
                name: name.to_string(),
                tag: tag.to_string(),
                user_id: Some(actor.user_id),
                source_container_id: Some(container_id),
                is_snapshot: true,
            })
            .await?;
        info!(image = image.id, "snapshot committed");
        Ok(image)
    }

    pub async fn list_images(&self, actor: &Actor) -> Result<Vec<ImageRow>> {
        if actor.is_admin {
            Ok(self.store.list_images().await?)
        } else {
            Ok(self.store.list_images_for_user(actor.user_id).await?)
        }
    }

    /// Delete an image on the engine and in the store. Owned images may be
    /// deleted by their owner; unowned base images are admin-only.
    pub async fn remove_image(&self, actor: &Actor, image_id: i64) -> Result<()> {
        let image = self.store.image_by_id(image_id).await?;
        let owners: Vec<i64> = image.user_id.into_iter().collect();
        authorize(actor, &owners)?;
        match self.engine.remove_image(&image.name, &image.tag).await {
            // Already gone on the engine; the record still has to go.
            Ok(()) | Err(EngineError::Status { status: 404, .. }) => {}
            Err(EngineError::Status { status: 409, message }) => {
                return Err(DockyardError::Conflict(message));
            }
            Err(e) => return Err(e.into()),
        }
        self.store.delete_image(image_id).await?;
        Ok(())
    }

    pub async fn search_images(&self, term: &str) -> Result<Vec<ImageSearchHit>> {
        Ok(self.engine.search_images(term).await?)
    }

    /// Pull an image from the registry, streaming progress into `progress`.
    /// A finished pull is recorded in the image table if not already known.
    pub async fn pull_image(
        &self,
        actor: &Actor,
        name: &str,
        tag: &str,
        progress: mpsc::Sender<PullProgress>,
    ) -> Result<()> {
        self.engine.pull(name, tag, progress).await?;
        if self.store.image_by_name_tag(name, tag).await?.is_none() {
            self.store
                .create_image(&NewImage {
                    name: name.to_string(),
                    tag: tag.to_string(),
                    user_id: Some(actor.user_id),
                    source_container_id: None,
                    is_snapshot: false,
                })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_engine::fake::FakeEngine;
    use dockyard_store::{NewAddress, NewUser};

    struct Fixture {
        orch: Orchestrator,
        engine: Arc<FakeEngine>,
        store: Store,
        alice: Actor,
        admin: Actor,
        image_id: i64,
        address_id: i64,
    }

    async fn fixture() -> Fixture {
        let store = Store::in_memory().await.unwrap();
        let engine = Arc::new(FakeEngine::new());

        let alice_row = store
            .create_user(&NewUser {
                email: "alice@example.com".to_string(),
                name: "Alice".to_string(),
                is_admin: false,
                ssh_pub_key: Some("ssh-ed25519 AAAA alice".to_string()),
            })
            .await
            .unwrap();
        let admin_row = store
            .create_user(&NewUser {
                email: "root@example.com".to_string(),
                name: "Root".to_string(),
                is_admin: true,
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
                ip_addr: "10.0.0.20".to_string(),
                mac_addr: Some("02:42:ac:11:00:14".to_string()),
                is_routed: true,
            })
            .await
            .unwrap();

        let orch = Orchestrator::new(
            engine.clone(),
            store.clone(),
            HostSpec {
                cores: 4,
                memory_mb: 8192,
            },
        );
        Fixture {
            orch,
            engine,
            store,
            alice: Actor {
                user_id: alice_row.id,
                is_admin: false,
            },
            admin: Actor {
                user_id: admin_row.id,
                is_admin: true,
            },
            image_id: image.id,
            address_id: address.id,
        }
    }

    fn request(f: &Fixture, hostname: &str) -> CreateContainerRequest {
        CreateContainerRequest {
            image_id: f.image_id,
            address_id: f.address_id,
            hostname: hostname.to_string(),
            memory_mb: Some(512),
            cores: Some(2),
            owner_ids: vec![],
        }
    }

    #[tokio::test]
    async fn create_claims_address_and_persists() {
        let f = fixture().await;
        let view = f
            .orch
            .create_container(&f.alice, &request(&f, "web-1"))
            .await
            .unwrap();

        assert_eq!(view.owners, vec![f.alice.user_id]);
        assert!(!f
            .store
            .address_by_id(f.address_id)
            .await
            .unwrap()
            .is_available);
        assert_eq!(f.engine.container_count(), 1);

        // Alice has a key on file, so it was copied in.
        let execs = f.engine.recorded_execs();
        assert_eq!(execs.len(), 1);
        assert!(execs[0].1[2].contains("authorized_keys"));
    }

    #[tokio::test]
    async fn omitted_memory_grants_host_total() {
        let f = fixture().await;
        let mut req = request(&f, "big-1");
        req.memory_mb = None;
        let view = f.orch.create_container(&f.alice, &req).await.unwrap();

        let details = f
            .orch
            .container_view(&f.alice, view.record.id)
            .await
            .unwrap()
            .details
            .unwrap();
        assert_eq!(details.memory_mb, 8192);
    }

    #[tokio::test]
    async fn racing_creates_for_one_address_yield_one_container() {
        let f = fixture().await;
        f.orch
            .create_container(&f.alice, &request(&f, "first"))
            .await
            .unwrap();
        let err = f
            .orch
            .create_container(&f.alice, &request(&f, "second"))
            .await
            .unwrap_err();
        assert!(matches!(err, DockyardError::Conflict(_)));
        assert_eq!(f.engine.container_count(), 1);
    }

    #[tokio::test]
    async fn failed_run_releases_the_claim() {
        let f = fixture().await;
        f.engine.fail_next_run(500, "no such image");
        let err = f
            .orch
            .create_container(&f.alice, &request(&f, "doomed"))
            .await
            .unwrap_err();
        assert!(matches!(err, DockyardError::Engine(_)));
        assert!(f
            .store
            .address_by_id(f.address_id)
            .await
            .unwrap()
            .is_available);
        assert_eq!(f.engine.container_count(), 0);
        assert!(f.store.list_containers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_hostname_is_rejected_before_any_claim() {
        let f = fixture().await;
        let mut req = request(&f, "bad host!");
        req.hostname = "bad host!".to_string();
        let err = f.orch.create_container(&f.alice, &req).await.unwrap_err();
        assert!(matches!(err, DockyardError::Validation { .. }));
        assert!(f
            .store
            .address_by_id(f.address_id)
            .await
            .unwrap()
            .is_available);
    }

    #[tokio::test]
    async fn removal_refuses_running_then_succeeds_after_stop() {
        let f = fixture().await;
        let view = f
            .orch
            .create_container(&f.alice, &request(&f, "web-2"))
            .await
            .unwrap();
        let id = view.record.id;

        assert_eq!(
            f.orch
                .lifecycle(&f.alice, id, LifecycleOp::Remove)
                .await
                .unwrap(),
            LifecycleOutcome::StopBeforeRemoving
        );
        assert!(f.store.container_by_id(id).await.is_ok());

        assert_eq!(
            f.orch
                .lifecycle(&f.alice, id, LifecycleOp::Stop)
                .await
                .unwrap(),
            LifecycleOutcome::Stopped
        );
        assert_eq!(
            f.orch
                .lifecycle(&f.alice, id, LifecycleOp::Remove)
                .await
                .unwrap(),
            LifecycleOutcome::Removed
        );
        assert!(f.store.container_by_id(id).await.is_err());
        assert!(f
            .store
            .address_by_id(f.address_id)
            .await
            .unwrap()
            .is_available);
    }

    #[tokio::test]
    async fn non_owner_is_denied_and_admin_allowed() {
        let f = fixture().await;
        let view = f
            .orch
            .create_container(&f.alice, &request(&f, "web-3"))
            .await
            .unwrap();
        let stranger = Actor {
            user_id: 9999,
            is_admin: false,
        };
        assert!(matches!(
            f.orch
                .lifecycle(&stranger, view.record.id, LifecycleOp::Stop)
                .await,
            Err(DockyardError::AccessDenied)
        ));
        assert!(f
            .orch
            .lifecycle(&f.admin, view.record.id, LifecycleOp::Stop)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn snapshot_name_is_checked_before_commit() {
        let f = fixture().await;
        let view = f
            .orch
            .create_container(&f.alice, &request(&f, "web-4"))
            .await
            .unwrap();

        let snap = f
            .orch
            .snapshot(&f.alice, view.record.id, "web-4-snap", "v1")
            .await
            .unwrap();
        assert!(snap.is_snapshot);
        assert_eq!(snap.user_id, Some(f.alice.user_id));

        let err = f
            .orch
            .snapshot(&f.alice, view.record.id, "web-4-snap", "v1")
            .await
            .unwrap_err();
        assert!(matches!(err, DockyardError::Conflict(_)));
    }

    #[tokio::test]
    async fn engine_commit_conflict_maps_to_conflict() {
        let f = fixture().await;
        let view = f
            .orch
            .create_container(&f.alice, &request(&f, "web-5"))
            .await
            .unwrap();
        f.engine.conflict_on_commit();
        let err = f
            .orch
            .snapshot(&f.alice, view.record.id, "fresh-name", "v1")
            .await
            .unwrap_err();
        assert!(matches!(err, DockyardError::Conflict(_)));
    }

    #[tokio::test]
    async fn passphrase_reset_execs_chpasswd() {
        let f = fixture().await;
        let view = f
            .orch
            .create_container(&f.alice, &request(&f, "web-6"))
            .await
            .unwrap();
        let passphrase = f
            .orch
            .reset_passphrase(&f.alice, view.record.id)
            .await
            .unwrap();
        assert_eq!(passphrase.len(), PASSPHRASE_LEN);
        assert!(passphrase
            .bytes()
            .all(|b| PASSPHRASE_CHARSET.contains(&b)));

        let execs = f.engine.recorded_execs();
        assert!(execs.last().unwrap().1[2].contains("chpasswd"));
    }

    #[tokio::test]
    async fn ssh_access_requires_a_key_on_file() {
        let f = fixture().await;
        let view = f
            .orch
            .create_container(&f.alice, &request(&f, "web-7"))
            .await
            .unwrap();
        // The admin fixture has no key.
        let err = f
            .orch
            .grant_ssh_access(&f.alice, view.record.id, &[f.admin.user_id])
            .await
            .unwrap_err();
        assert!(matches!(err, DockyardError::Validation { .. }));
    }

    #[tokio::test]
    async fn owned_image_is_runnable_by_owner_or_admin_only() {
        let f = fixture().await;
        let private = f
            .store
            .create_image(&NewImage {
                name: "admin-tools".to_string(),
                tag: "v1".to_string(),
                user_id: Some(f.admin.user_id),
                source_container_id: None,
                is_snapshot: false,
            })
            .await
            .unwrap();

        let mut req = request(&f, "borrowed");
        req.image_id = private.id;
        assert!(matches!(
            f.orch.create_container(&f.alice, &req).await,
            Err(DockyardError::AccessDenied)
        ));
        // The owner is fine, and nothing was claimed by the refused attempt.
        assert!(f
            .store
            .address_by_id(f.address_id)
            .await
            .unwrap()
            .is_available);
        assert!(f.orch.create_container(&f.admin, &req).await.is_ok());
    }

    #[tokio::test]
    async fn persist_failure_reports_consistency_and_leaves_engine_running() {
        let f = fixture().await;
        // A stale record already holds the engine id the next run will get.
        let spare = f
            .store
            .create_address(&NewAddress {
                ip_addr: "10.0.0.21".to_string(),
                mac_addr: None,
                is_routed: true,
            })
            .await
            .unwrap();
        f.store
            .persist_container(&NewContainer {
                hostname: "stale".to_string(),
                engine_id: "000000000000".to_string(),
                image_id: Some(f.image_id),
                address_id: spare.id,
                owner_ids: vec![f.alice.user_id],
            })
            .await
            .unwrap();

        let err = f
            .orch
            .create_container(&f.alice, &request(&f, "orphan"))
            .await
            .unwrap_err();
        assert!(matches!(err, DockyardError::Consistency(_)));

        // The engine container keeps running on the claimed address; it is
        // the operator's to reconcile, not ours to tear down.
        assert_eq!(f.engine.is_running("000000000000"), Some(true));
        assert!(!f
            .store
            .address_by_id(f.address_id)
            .await
            .unwrap()
            .is_available);
    }

    #[tokio::test]
    async fn snapshot_of_another_user_is_not_runnable() {
        let f = fixture().await;
        let snap = f
            .store
            .create_image(&NewImage {
                name: "admin-snap".to_string(),
                tag: "v1".to_string(),
                user_id: Some(f.admin.user_id),
                source_container_id: None,
                is_snapshot: true,
            })
            .await
            .unwrap();
        let mut req = request(&f, "intruder");
        req.image_id = snap.id;
        assert!(matches!(
            f.orch.create_container(&f.alice, &req).await,
            Err(DockyardError::AccessDenied)
        ));
    }

    #[test]
    fn passphrase_charset_and_length() {
        let mut rng = rand::rng();
        for _ in 0..100 {
            let p = generate_passphrase(&mut rng);
            assert_eq!(p.len(), PASSPHRASE_LEN);
            assert!(p.bytes().all(|b| PASSPHRASE_CHARSET.contains(&b)));
        }
    }
}

//! Sandbox Manager (§4.3): creates, recovers, and tears down per-project sandboxes on top of a
//! [`ContainerEngine`] and a [`PortAllocator`].
//!
//! Grounded on `local_sandbox_manager.py`'s `LocalSandboxManager` class. The Python original kept
//! an in-process `self.containers` dict as the only fast path and fell back to asking Docker by
//! name on a cache miss, serializing nothing; here the same two-tier lookup is kept but a
//! per-project lock (§5) serializes the miss-then-reconstruct sequence so two concurrent `Get`s
//! for the same project can't each allocate and reserve ports for the same live container.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::{SandboxConfig, SandboxDefaults};
use crate::engine::{labels, ContainerEngine, ContainerHandle, ContainerSpec, ContainerState};
use crate::error::ManagerError;
use crate::ports::{PortAllocator, PortSet, Role};
use crate::sandbox::readiness;
use crate::sandbox::{build_labels, container_name, volume_name, SandboxEntry, SandboxStatus, SandboxView};

const WORKSPACE_MOUNT_PATH: &str = "/workspace";
const SHM_SIZE_BYTES: i64 = 2 * 1024 * 1024 * 1024;

/// Per-project keyed lock set, so two concurrent calls for the same `project_id` serialize while
/// calls for distinct projects never block each other (§5).
#[derive(Default)]
struct ProjectLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ProjectLocks {
    async fn lock(&self, project_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().expect("project lock map poisoned");
            locks
                .entry(project_id.to_owned())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}

pub struct SandboxManager {
    engine: Arc<dyn ContainerEngine>,
    ports: PortAllocator,
    network_name: String,
    base_image: String,
    cache: std::sync::Mutex<HashMap<String, SandboxEntry>>,
    project_locks: ProjectLocks,
}

impl SandboxManager {
    /// Ensures the shared bridge network exists and returns a manager with an empty cache. Cache
    /// population happens lazily, on first `Get`/`List`/`CleanupExpired` (§4.3 "Recovery").
    pub async fn new(
        engine: Arc<dyn ContainerEngine>,
        network_name: impl Into<String>,
        base_image: impl Into<String>,
    ) -> Result<Self, ManagerError> {
        let network_name = network_name.into();
        engine
            .ensure_bridge(&network_name)
            .await
            .map_err(|e| ManagerError::engine("<startup>", "ensure_bridge", e))?;
        Ok(SandboxManager {
            engine,
            ports: PortAllocator::new(),
            network_name,
            base_image: base_image.into(),
            cache: std::sync::Mutex::new(HashMap::new()),
            project_locks: ProjectLocks::default(),
        })
    }

    fn cache_get(&self, project_id: &str) -> Option<SandboxEntry> {
        self.cache.lock().expect("sandbox cache poisoned").get(project_id).cloned()
    }

    fn cache_put(&self, entry: SandboxEntry) {
        self.cache
            .lock()
            .expect("sandbox cache poisoned")
            .insert(entry.project_id.clone(), entry);
    }

    fn cache_remove(&self, project_id: &str) {
        self.cache.lock().expect("sandbox cache poisoned").remove(project_id);
    }

    fn build_spec(
        &self,
        project_id: &str,
        config: &SandboxConfig,
        ports: &PortSet,
        created_at: OffsetDateTime,
        auto_stop_at: OffsetDateTime,
    ) -> ContainerSpec {
        let (width, height) = config.resolution_width_height();
        let mut env = HashMap::from([
            ("WORKSPACE_PATH".to_owned(), WORKSPACE_MOUNT_PATH.to_owned()),
            ("DISPLAY".to_owned(), ":99".to_owned()),
            ("CHROME_PERSISTENT_SESSION".to_owned(), "true".to_owned()),
            ("PYTHONUNBUFFERED".to_owned(), "1".to_owned()),
            ("ANONYMIZED_TELEMETRY".to_owned(), "false".to_owned()),
            ("VNC_PASSWORD".to_owned(), config.vnc_password.clone()),
            ("RESOLUTION".to_owned(), config.resolution.clone()),
            ("RESOLUTION_WIDTH".to_owned(), width),
            ("RESOLUTION_HEIGHT".to_owned(), height),
        ]);
        env.entry("CPU_LIMIT".to_owned()).or_insert_with(|| config.cpu_limit.to_string());

        ContainerSpec {
            name: container_name(project_id),
            image: self.base_image.clone(),
            env,
            labels: build_labels(project_id, created_at, auto_stop_at),
            port_bindings: ports.clone(),
            volume_name: volume_name(project_id),
            volume_mount_path: WORKSPACE_MOUNT_PATH.to_owned(),
            network: self.network_name.clone(),
            shm_size_bytes: SHM_SIZE_BYTES,
            cap_add: vec!["SYS_ADMIN".to_owned()],
            security_opt: vec!["seccomp=unconfined".to_owned()],
            restart_policy: "unless-stopped".to_owned(),
            memory_limit: config.memory_limit.clone(),
            cpu_count: config.cpu_limit,
        }
    }

    /// Creates a new sandbox for `project_id` (§4.3 `Create`). Fails with
    /// [`ManagerError::AlreadyExists`] if a cached or live container already claims the project.
    pub async fn create(
        &self,
        project_id: &str,
        defaults: &SandboxDefaults,
        overrides: &HashMap<String, String>,
    ) -> Result<SandboxView, ManagerError> {
        let _guard = self.project_locks.lock(project_id).await;

        if self.cache_get(project_id).is_some() {
            return Err(ManagerError::AlreadyExists {
                project_id: project_id.to_owned(),
            });
        }
        let name = container_name(project_id);
        let existing = self
            .engine
            .get_by_name(&name)
            .await
            .map_err(|e| ManagerError::engine(project_id, "get_by_name", e))?;
        if existing.is_some() {
            return Err(ManagerError::AlreadyExists {
                project_id: project_id.to_owned(),
            });
        }

        let config = SandboxConfig::with_overrides(defaults, overrides)
            .map_err(|e| ManagerError::InvalidConfig(e.0))?;

        let ports = self.ports.allocate().map_err(|_| ManagerError::PortsExhausted {
            project_id: project_id.to_owned(),
        })?;

        let result = self.create_with_ports(project_id, &config, ports.clone()).await;
        if result.is_err() {
            self.ports.release(&ports);
        }
        result
    }

    async fn create_with_ports(
        &self,
        project_id: &str,
        config: &SandboxConfig,
        ports: PortSet,
    ) -> Result<SandboxView, ManagerError> {
        let vol = volume_name(project_id);
        self.engine
            .ensure_volume(&vol)
            .await
            .map_err(|e| ManagerError::engine(project_id, "ensure_volume", e))?;

        let created_at = OffsetDateTime::now_utc();
        let auto_stop_at = created_at + Duration::from_secs(config.auto_stop_hours.max(0) as u64 * 3600);
        let spec = self.build_spec(project_id, config, &ports, created_at, auto_stop_at);

        let handle = self
            .engine
            .run(&spec)
            .await
            .map_err(|e| ManagerError::engine(project_id, "run", e))?;

        readiness::run_readiness_probe(self.engine.as_ref(), &handle, project_id).await;

        self.cache_put(SandboxEntry {
            project_id: project_id.to_owned(),
            container_id: handle.0.clone(),
            ports: ports.clone(),
            config: config.clone(),
            created_at,
            auto_stop_at,
            volume_name: vol,
        });

        Ok(SandboxView::new(project_id, &handle.0, SandboxStatus::Running, &ports, created_at))
    }

    /// Resolves `project_id` to a live entry, reconstructing the cache entry from the engine on
    /// a miss (§4.3 `Get`, §4.3.1 "Recovery"). Serialized per-project so concurrent misses don't
    /// double-reserve ports for the same container.
    async fn resolve(&self, project_id: &str) -> Result<(SandboxEntry, ContainerHandle, ContainerState), ManagerError> {
        let _guard = self.project_locks.lock(project_id).await;

        if let Some(entry) = self.cache_get(project_id) {
            let handle = ContainerHandle(entry.container_id.clone());
            let status = self
                .engine
                .inspect(&handle)
                .await
                .map_err(|e| ManagerError::engine(project_id, "inspect", e))?;
            return Ok((entry, handle, status.state));
        }

        let name = container_name(project_id);
        let handle = self
            .engine
            .get_by_name(&name)
            .await
            .map_err(|e| ManagerError::engine(project_id, "get_by_name", e))?
            .ok_or_else(|| ManagerError::NotFound {
                project_id: project_id.to_owned(),
            })?;

        let status = self
            .engine
            .inspect(&handle)
            .await
            .map_err(|e| ManagerError::engine(project_id, "inspect", e))?;

        if status.labels.get(labels::PROJECT_ID).map(String::as_str) != Some(project_id) {
            return Err(ManagerError::NotFound {
                project_id: project_id.to_owned(),
            });
        }

        for (role, port) in &status.ports {
            self.ports.reserve(*role, *port);
        }

        let created_at = status
            .labels
            .get(labels::CREATED_AT)
            .and_then(|v| OffsetDateTime::parse(v, &time::format_description::well_known::Rfc3339).ok())
            .unwrap_or_else(OffsetDateTime::now_utc);
        let auto_stop_at = status
            .labels
            .get(labels::AUTO_STOP_AT)
            .and_then(|v| OffsetDateTime::parse(v, &time::format_description::well_known::Rfc3339).ok())
            .unwrap_or_else(OffsetDateTime::now_utc);

        let entry = SandboxEntry {
            project_id: project_id.to_owned(),
            container_id: handle.0.clone(),
            ports: status.ports.clone(),
            config: SandboxConfig::from(SandboxDefaults::default()),
            created_at,
            auto_stop_at,
            volume_name: volume_name(project_id),
        };
        self.cache_put(entry.clone());

        Ok((entry, handle, status.state))
    }

    /// Returns the current view of a sandbox, reconstructing from the engine if necessary
    /// (§4.3 `Get`).
    pub async fn get(&self, project_id: &str) -> Result<SandboxView, ManagerError> {
        let (entry, handle, state) = self.resolve(project_id).await?;
        Ok(SandboxView::new(
            project_id,
            &handle.0,
            SandboxStatus::from(state),
            &entry.ports,
            entry.created_at,
        ))
    }

    /// Starts a stopped sandbox, waiting for services to come back up (§4.3 `Start`).
    pub async fn start(&self, project_id: &str) -> Result<SandboxView, ManagerError> {
        let (entry, handle, state) = self.resolve(project_id).await?;
        if state != ContainerState::Running {
            self.engine
                .start(&handle)
                .await
                .map_err(|e| ManagerError::engine(project_id, "start", e))?;
            readiness::run_readiness_probe(self.engine.as_ref(), &handle, project_id).await;
        }
        Ok(SandboxView::new(
            project_id,
            &handle.0,
            SandboxStatus::Running,
            &entry.ports,
            entry.created_at,
        ))
    }

    /// Stops a running sandbox without deleting it (§4.3 `Stop`).
    pub async fn stop(&self, project_id: &str) -> Result<(), ManagerError> {
        let (_entry, handle, _state) = self.resolve(project_id).await?;
        self.engine
            .stop(&handle)
            .await
            .map_err(|e| ManagerError::engine(project_id, "stop", e))
    }

    /// Tears down a sandbox: stop (best-effort), remove the container, remove its volume, and
    /// release its ports. Idempotent — deleting a project with no live or cached sandbox
    /// succeeds as a no-op (§8 "idempotent delete").
    pub async fn delete(&self, project_id: &str) -> Result<(), ManagerError> {
        let _guard = self.project_locks.lock(project_id).await;

        let name = container_name(project_id);
        let handle = match self.cache_get(project_id) {
            Some(entry) => Some(ContainerHandle(entry.container_id.clone())),
            None => self
                .engine
                .get_by_name(&name)
                .await
                .map_err(|e| ManagerError::engine(project_id, "get_by_name", e))?,
        };

        let ports = self.cache_get(project_id).map(|e| e.ports);

        if let Some(handle) = handle {
            if let Err(e) = self.engine.stop(&handle).await {
                log::warn!("project {project_id}: best-effort stop before delete failed: {e}");
            }
            self.engine
                .remove(&handle, true)
                .await
                .map_err(|e| ManagerError::engine(project_id, "remove", e))?;
        }

        if let Err(e) = self.engine.remove_volume(&volume_name(project_id)).await {
            log::warn!("project {project_id}: volume removal failed (treated as already gone): {e}");
        }

        if let Some(ports) = ports {
            self.ports.release(&ports);
        }
        self.cache_remove(project_id);
        Ok(())
    }

    /// Lists every sandbox the engine knows about, regardless of cache state (§4.3 `List`).
    /// Containers that fail to inspect are logged and skipped rather than failing the whole call.
    pub async fn list(&self) -> Result<Vec<SandboxView>, ManagerError> {
        let handles = self
            .engine
            .list_by_label_key(labels::PROJECT_ID)
            .await
            .map_err(|e| ManagerError::engine("<list>", "list_by_label_key", e))?;

        let mut views = Vec::new();
        for handle in handles {
            match self.engine.inspect(&handle).await {
                Ok(status) => {
                    let Some(project_id) = status.labels.get(labels::PROJECT_ID).cloned() else {
                        continue;
                    };
                    match self.get(&project_id).await {
                        Ok(view) => views.push(view),
                        Err(e) => log::warn!("project {project_id}: skipped in list: {e}"),
                    }
                }
                Err(e) => log::warn!("container {handle}: skipped in list, inspect failed: {e}"),
            }
        }
        Ok(views)
    }

    /// Deletes every sandbox whose `auto_stop_at` label is in the past, returning the project ids
    /// removed (§4.3 `CleanupExpired`). Per-project failures are logged and do not stop the sweep.
    pub async fn cleanup_expired(&self) -> Result<Vec<String>, ManagerError> {
        let handles = self
            .engine
            .list_by_label_key(labels::AUTO_STOP_AT)
            .await
            .map_err(|e| ManagerError::engine("<cleanup>", "list_by_label_key", e))?;

        let now = OffsetDateTime::now_utc();
        let mut expired = Vec::new();
        for handle in handles {
            let status = match self.engine.inspect(&handle).await {
                Ok(s) => s,
                Err(e) => {
                    log::warn!("container {handle}: skipped in cleanup, inspect failed: {e}");
                    continue;
                }
            };
            let Some(project_id) = status.labels.get(labels::PROJECT_ID).cloned() else {
                log::warn!("container {handle}: skipped in cleanup, missing {} label", labels::PROJECT_ID);
                continue;
            };
            let Some(auto_stop_at) = status
                .labels
                .get(labels::AUTO_STOP_AT)
                .and_then(|v| OffsetDateTime::parse(v, &time::format_description::well_known::Rfc3339).ok())
            else {
                log::warn!(
                    "project {project_id}: skipped in cleanup, missing or malformed {} label",
                    labels::AUTO_STOP_AT
                );
                continue;
            };
            if auto_stop_at <= now {
                expired.push(project_id);
            }
        }

        let mut removed = Vec::new();
        for project_id in expired {
            match self.delete(&project_id).await {
                Ok(()) => removed.push(project_id),
                Err(e) => log::warn!("project {project_id}: cleanup delete failed: {e}"),
            }
        }
        Ok(removed)
    }

    pub async fn wait_healthy(&self, project_id: &str, timeout: Duration) -> Result<HashMap<Role, bool>, ManagerError> {
        let (_entry, handle, _state) = self.resolve(project_id).await?;
        Ok(readiness::wait_healthy(self.engine.as_ref(), &handle, timeout).await)
    }

    /// Exposes the underlying engine for the adapter's `exec`/archive passthroughs (§4.4), which
    /// need a raw handle + engine call rather than a manager-level operation.
    pub fn engine_ref(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;

    fn manager_with_fake() -> SandboxManager {
        let engine: Arc<dyn ContainerEngine> = Arc::new(FakeEngine::new());
        futures::executor::block_on(SandboxManager::new(engine, "suna-sandbox-network", "local-suna-sandbox:latest")).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn create_then_get_round_trips() {
        let manager = manager_with_fake();
        let defaults = SandboxDefaults::default();
        let view = manager.create("p1", &defaults, &HashMap::new()).await.unwrap();
        assert_eq!(view.project_id, "p1");
        assert_eq!(view.ports.len(), 4);

        let fetched = manager.get("p1").await.unwrap();
        assert_eq!(fetched.container_id, view.container_id);
    }

    #[tokio::test(start_paused = true)]
    async fn create_twice_is_rejected() {
        let manager = manager_with_fake();
        let defaults = SandboxDefaults::default();
        manager.create("p1", &defaults, &HashMap::new()).await.unwrap();
        let err = manager.create("p1", &defaults, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, ManagerError::AlreadyExists { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_releases_ports_for_reuse() {
        let manager = manager_with_fake();
        let defaults = SandboxDefaults::default();
        let first = manager.create("p1", &defaults, &HashMap::new()).await.unwrap();
        manager.delete("p1").await.unwrap();

        let second = manager.create("p2", &defaults, &HashMap::new()).await.unwrap();
        assert_eq!(first.ports, second.ports);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let manager = manager_with_fake();
        manager.delete("never-existed").await.unwrap();
        manager.delete("never-existed").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn list_returns_created_sandboxes() {
        let manager = manager_with_fake();
        let defaults = SandboxDefaults::default();
        manager.create("p1", &defaults, &HashMap::new()).await.unwrap();
        manager.create("p2", &defaults, &HashMap::new()).await.unwrap();

        let mut ids: Vec<String> = manager.list().await.unwrap().into_iter().map(|v| v.project_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["p1".to_owned(), "p2".to_owned()]);
    }

    /// Simulates a process restart: a fresh manager, same live engine, has an empty cache and
    /// must reconstruct the entry (including re-reserving its ports) from the container's own
    /// labels and port bindings on the first `Get` (§4.3.1 "Recovery", §8 "recovery").
    #[tokio::test(start_paused = true)]
    async fn get_recovers_an_entry_with_no_cached_state() {
        let engine: Arc<dyn ContainerEngine> = Arc::new(FakeEngine::new());
        let defaults = SandboxDefaults::default();

        let original = SandboxManager::new(engine.clone(), "suna-sandbox-network", "local-suna-sandbox:latest")
            .await
            .unwrap();
        let created = original.create("p1", &defaults, &HashMap::new()).await.unwrap();

        let restarted = SandboxManager::new(engine, "suna-sandbox-network", "local-suna-sandbox:latest")
            .await
            .unwrap();
        let recovered = restarted.get("p1").await.unwrap();

        assert_eq!(recovered.container_id, created.container_id);
        assert_eq!(recovered.ports, created.ports);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_expired_removes_only_past_deadline_sandboxes() {
        let manager = manager_with_fake();
        let mut short_lived = SandboxDefaults::default();
        short_lived.auto_stop_hours = 0;
        manager.create("expired", &short_lived, &HashMap::new()).await.unwrap();
        manager.create("fresh", &SandboxDefaults::default(), &HashMap::new()).await.unwrap();

        let removed = manager.cleanup_expired().await.unwrap();
        assert_eq!(removed, vec!["expired".to_owned()]);
        assert!(manager.get("fresh").await.is_ok());
        assert!(matches!(manager.get("expired").await, Err(ManagerError::NotFound { .. })));
    }
}

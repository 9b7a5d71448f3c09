//! Container Engine Client abstraction (§4.2).
//!
//! Expressed as a trait so the Sandbox Manager never touches a concrete engine SDK, the same
//! way the old `DockerAsync` trait in `testcontainers/src/core/docker_async.rs` (and the
//! `SandboxEngine` trait in `other_examples/b6480e76_...`) kept their container logic
//! independent of the underlying client. [`docker::DockerEngine`] is the shipped implementation,
//! talking to the Docker Engine API via `bollard`; [`fake::FakeEngine`] is an in-memory stand-in
//! used by the test suite (§8) so Sandbox Manager tests stay hermetic.

pub mod docker;
pub mod fake;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::ports::{PortSet, Role};

/// Everything needed to create a sandbox container (§4.2 "`spec` required fields").
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    /// Host ports this container publishes, keyed by role; the internal port for each role
    /// comes from [`Role::internal_port`].
    pub port_bindings: PortSet,
    pub volume_name: String,
    pub volume_mount_path: String,
    pub network: String,
    pub shm_size_bytes: i64,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    pub restart_policy: String,
    pub memory_limit: String,
    pub cpu_count: i64,
}

/// Opaque engine-assigned container identity (§3 `container_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub String);

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse container state as reported by the engine (§3 `status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Removed,
}

/// The result of [`ContainerEngine::inspect`]: current status, port bindings recovered from the
/// engine, and the labels the container was created with (§4.3.1, §6.4).
#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub state: ContainerState,
    pub ports: PortSet,
    pub labels: HashMap<String, String>,
}

/// Result of an `exec` call (§4.2, §4.4).
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Thin abstraction over a local container engine (§4.2). The shipped implementation talks to
/// the Docker Engine API over a Unix socket; tests substitute [`fake::FakeEngine`].
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Connectivity/health check, performed once at startup (§4.7).
    async fn ping(&self) -> Result<(), EngineError>;

    /// Creates the named bridge network if it does not already exist. Idempotent.
    async fn ensure_bridge(&self, name: &str) -> Result<(), EngineError>;

    /// Creates the named volume if it does not already exist. Idempotent.
    async fn ensure_volume(&self, name: &str) -> Result<(), EngineError>;

    /// Removes the named volume. Must treat "already gone" as success (§4.3 Delete).
    async fn remove_volume(&self, name: &str) -> Result<(), EngineError>;

    /// Creates and starts a container from `spec`, returning its handle.
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError>;

    /// Looks up a container by name, returning `None` rather than an error when absent.
    async fn get_by_name(&self, name: &str) -> Result<Option<ContainerHandle>, EngineError>;

    /// Lists every container (running or not) carrying the given label key, regardless of
    /// value (§4.3 `List`, `CleanupExpired`).
    async fn list_by_label_key(&self, label_key: &str) -> Result<Vec<ContainerHandle>, EngineError>;

    /// Refreshes status, port bindings, and labels for a handle.
    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus, EngineError>;

    async fn start(&self, handle: &ContainerHandle) -> Result<(), EngineError>;

    /// Idempotent: stopping an already-stopped container succeeds.
    async fn stop(&self, handle: &ContainerHandle) -> Result<(), EngineError>;

    /// `force=true` implies stop-if-running.
    async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<(), EngineError>;

    /// Runs `cmd` inside the container, capturing both streams, with a hard per-call timeout.
    async fn exec(
        &self,
        handle: &ContainerHandle,
        cmd: Vec<String>,
        workdir: Option<&str>,
        env: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<ExecOutcome, EngineError>;

    /// Downloads `path` from the container as a tar stream (§4.4 `DownloadFile`).
    async fn get_archive(&self, handle: &ContainerHandle, path: &str) -> Result<Vec<u8>, EngineError>;

    /// Uploads a tar archive into the container at `path` (§4.4 `UploadFile`).
    async fn put_archive(
        &self,
        handle: &ContainerHandle,
        path: &str,
        tar: Vec<u8>,
    ) -> Result<(), EngineError>;
}

/// Builds the label set a sandbox's container is created with (§6.4). Kept here rather than in
/// `sandbox` because both the docker engine and the fake engine need to agree on the key names
/// when parsing labels back during recovery.
pub mod labels {
    pub const PROJECT_ID: &str = "suna.project_id";
    pub const CREATED_AT: &str = "suna.created_at";
    pub const AUTO_STOP_AT: &str = "suna.auto_stop_at";
}

/// `{"KEY": "VALUE"}` map to `["KEY=VALUE", ...]`, the form both Docker's `Env` and `exec` env
/// lists take.
pub(crate) fn env_pairs(env: &HashMap<String, String>) -> Vec<String> {
    env.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

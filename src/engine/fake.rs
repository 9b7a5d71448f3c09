//! In-memory [`ContainerEngine`] used by the test suite (§8) so Sandbox Manager tests exercise
//! the exact production code paths without a live Docker daemon.
//!
//! Grounded on the test-seam idiom in `other_examples/b6480e76_...`'s
//! `DockerSandbox::from_client` (a constructor that swaps in a pre-built client for tests) —
//! here the whole engine is replaced rather than just its transport, since this crate's engine
//! trait is the seam, not a single HTTP client type.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{ContainerEngine, ContainerHandle, ContainerSpec, ContainerState, ContainerStatus, ExecOutcome};
use crate::error::EngineError;
use crate::ports::Role;

#[derive(Debug, Clone)]
struct FakeContainer {
    name: String,
    running: bool,
    spec: ContainerSpec,
    /// path -> file contents, standing in for the container's filesystem under `/workspace` so
    /// `exec`-based file primitives (§4.5) and archive transfer (§4.4) have something to act on.
    files: HashMap<String, Vec<u8>>,
}

/// In-memory stand-in for a container engine. Volumes and networks are tracked just enough to
/// make `ensure_*`/`remove_volume` idempotent; they hold no real resources.
pub struct FakeEngine {
    containers: Mutex<HashMap<String, FakeContainer>>,
    volumes: Mutex<std::collections::HashSet<String>>,
    networks: Mutex<std::collections::HashSet<String>>,
    next_id: AtomicU64,
}

impl FakeEngine {
    pub fn new() -> Self {
        FakeEngine {
            containers: Mutex::new(HashMap::new()),
            volumes: Mutex::new(std::collections::HashSet::new()),
            networks: Mutex::new(std::collections::HashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FakeContainer>> {
        self.containers.lock().expect("fake engine mutex poisoned")
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &str) -> String {
    path.trim_end_matches('/').to_owned()
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn ensure_bridge(&self, name: &str) -> Result<(), EngineError> {
        self.networks
            .lock()
            .expect("fake engine mutex poisoned")
            .insert(name.to_owned());
        Ok(())
    }

    async fn ensure_volume(&self, name: &str) -> Result<(), EngineError> {
        self.volumes
            .lock()
            .expect("fake engine mutex poisoned")
            .insert(name.to_owned());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), EngineError> {
        self.volumes
            .lock()
            .expect("fake engine mutex poisoned")
            .remove(name);
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError> {
        let mut containers = self.lock();
        if containers.values().any(|c| c.name == spec.name) {
            return Err(EngineError::operation_failed(
                "create_container",
                format!("container '{}' already exists", spec.name),
            ));
        }

        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        containers.insert(
            id.clone(),
            FakeContainer {
                name: spec.name.clone(),
                running: true,
                spec: spec.clone(),
                files: HashMap::new(),
            },
        );
        Ok(ContainerHandle(id))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ContainerHandle>, EngineError> {
        Ok(self
            .lock()
            .iter()
            .find(|(_, c)| c.name == name)
            .map(|(id, _)| ContainerHandle(id.clone())))
    }

    async fn list_by_label_key(&self, label_key: &str) -> Result<Vec<ContainerHandle>, EngineError> {
        Ok(self
            .lock()
            .iter()
            .filter(|(_, c)| c.spec.labels.contains_key(label_key))
            .map(|(id, _)| ContainerHandle(id.clone()))
            .collect())
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus, EngineError> {
        let containers = self.lock();
        let container = containers
            .get(&handle.0)
            .ok_or_else(|| EngineError::NotFound(handle.0.clone()))?;

        Ok(ContainerStatus {
            state: if container.running {
                ContainerState::Running
            } else {
                ContainerState::Exited
            },
            ports: container.spec.port_bindings.clone(),
            labels: container.spec.labels.clone(),
        })
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let mut containers = self.lock();
        let container = containers
            .get_mut(&handle.0)
            .ok_or_else(|| EngineError::NotFound(handle.0.clone()))?;
        container.running = true;
        Ok(())
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let mut containers = self.lock();
        if let Some(container) = containers.get_mut(&handle.0) {
            container.running = false;
        }
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle, _force: bool) -> Result<(), EngineError> {
        self.lock().remove(&handle.0);
        Ok(())
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        cmd: Vec<String>,
        workdir: Option<&str>,
        _env: &HashMap<String, String>,
        _timeout: Duration,
    ) -> Result<ExecOutcome, EngineError> {
        let mut containers = self.lock();
        let container = containers
            .get_mut(&handle.0)
            .ok_or_else(|| EngineError::NotFound(handle.0.clone()))?;

        if !container.running {
            return Ok(ExecOutcome {
                exit_code: 126,
                stdout: String::new(),
                stderr: "container is not running".to_owned(),
            });
        }

        Ok(fake_shell(container, &cmd, workdir))
    }

    async fn get_archive(&self, handle: &ContainerHandle, path: &str) -> Result<Vec<u8>, EngineError> {
        let containers = self.lock();
        let container = containers
            .get(&handle.0)
            .ok_or_else(|| EngineError::NotFound(handle.0.clone()))?;
        let data = container
            .files
            .get(&normalize(path))
            .ok_or_else(|| EngineError::NotFound(path.to_owned()))?;

        let member = path.rsplit('/').next().unwrap_or(path);
        crate::archive::pack_single_file(member, data)
            .await
            .map_err(|e| EngineError::operation_failed("download_from_container", e))
    }

    async fn put_archive(
        &self,
        handle: &ContainerHandle,
        path: &str,
        tar: Vec<u8>,
    ) -> Result<(), EngineError> {
        let (member, bytes) = crate::archive::unpack_single_file(&tar)
            .await
            .map_err(|e| EngineError::operation_failed("upload_to_container", e))?;

        let mut containers = self.lock();
        let container = containers
            .get_mut(&handle.0)
            .ok_or_else(|| EngineError::NotFound(handle.0.clone()))?;
        let target = format!("{}/{member}", normalize(path));
        container.files.insert(target, bytes);
        Ok(())
    }
}

/// A small subset of shell behavior, just enough to drive the primitives in §4.5 and the
/// readiness probe (§4.3.2) against the fake engine: `mkdir -p`, `echo ... > path`, `cat path`,
/// `test -f`/`test -d`, `rm`/`rmdir`, `stat`, `pgrep`, and a TCP-probe placeholder that always
/// succeeds once the container is running (the fake engine has no real ports to probe).
fn fake_shell(container: &mut FakeContainer, cmd: &[String], workdir: Option<&str>) -> ExecOutcome {
    let joined = cmd.join(" ");
    let ok = |stdout: String| ExecOutcome {
        exit_code: 0,
        stdout,
        stderr: String::new(),
    };
    let fail = |stderr: String| ExecOutcome {
        exit_code: 1,
        stdout: String::new(),
        stderr,
    };

    if joined.contains("pgrep") {
        return ok(String::new());
    }
    if joined.contains("</dev/tcp/") || joined.contains("nc -z") {
        return ok(String::new());
    }
    if let Some(path) = extract_after(&joined, "mkdir -p ") {
        container.files.entry(format!("{path}/.keep")).or_insert_with(Vec::new);
        return ok(String::new());
    }
    if let Some(rest) = extract_echo_redirect(&joined) {
        let (content, path) = rest;
        container.files.insert(normalize(&path), format!("{content}\n").into_bytes());
        return ok(String::new());
    }
    if let Some(path) = extract_after(&joined, "cat ") {
        return match container.files.get(&normalize(path.trim())) {
            Some(bytes) => ok(String::from_utf8_lossy(bytes).into_owned()),
            None => fail(format!("cat: {path}: No such file or directory")),
        };
    }
    if let Some(path) = extract_after(&joined, "test -f ") {
        return if container.files.contains_key(&normalize(path.trim())) {
            ok(String::new())
        } else {
            fail(String::new())
        };
    }
    if let Some(path) = extract_after(&joined, "test -d ") {
        let p = normalize(path.trim());
        let is_dir = container.files.keys().any(|k| k.starts_with(&format!("{p}/")));
        return if is_dir { ok(String::new()) } else { fail(String::new()) };
    }
    if let Some(path) = extract_after(&joined, "rm -f ") {
        container.files.remove(&normalize(path.trim()));
        return ok(String::new());
    }
    if let Some(path) = extract_after(&joined, "rm -rf ") {
        let p = normalize(path.trim());
        container.files.retain(|k, _| k != &p && !k.starts_with(&format!("{p}/")));
        return ok(String::new());
    }

    let _ = workdir;
    ok(format!("ran: {joined}"))
}

fn extract_after<'a>(haystack: &'a str, prefix: &str) -> Option<&'a str> {
    haystack.find(prefix).map(|idx| &haystack[idx + prefix.len()..])
}

/// Parses `echo '<content>' > <path>` out of a shell command line.
fn extract_echo_redirect(cmd: &str) -> Option<(String, String)> {
    let rest = extract_after(cmd, "echo '")?;
    let close = rest.find("' > ")?;
    let content = rest[..close].to_owned();
    let path = rest[close + 4..].trim().to_owned();
    Some((content, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortSet;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_owned(),
            image: "local-suna-sandbox:latest".to_owned(),
            env: HashMap::new(),
            labels: HashMap::from([("suna.project_id".to_owned(), "p1".to_owned())]),
            port_bindings: PortSet::new(),
            volume_name: "suna-workspace-p1".to_owned(),
            volume_mount_path: "/workspace".to_owned(),
            network: "suna-sandbox-network".to_owned(),
            shm_size_bytes: 2 * 1024 * 1024 * 1024,
            cap_add: vec!["SYS_ADMIN".to_owned()],
            security_opt: vec!["seccomp=unconfined".to_owned()],
            restart_policy: "unless-stopped".to_owned(),
            memory_limit: "4g".to_owned(),
            cpu_count: 2,
        }
    }

    #[tokio::test]
    async fn run_then_get_by_name_round_trips() {
        let engine = FakeEngine::new();
        let handle = engine.run(&spec("suna-sandbox-p1")).await.unwrap();
        let found = engine.get_by_name("suna-sandbox-p1").await.unwrap();
        assert_eq!(found, Some(handle));
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let engine = FakeEngine::new();
        engine.run(&spec("suna-sandbox-p1")).await.unwrap();
        assert!(engine.run(&spec("suna-sandbox-p1")).await.is_err());
    }

    #[tokio::test]
    async fn exec_write_then_read_round_trips() {
        let engine = FakeEngine::new();
        let handle = engine.run(&spec("suna-sandbox-p1")).await.unwrap();
        let out = engine
            .exec(
                &handle,
                vec!["sh".into(), "-c".into(), "echo 'abc' > /workspace/a.txt".into()],
                Some("/workspace"),
                &HashMap::new(),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(out.success());

        let out = engine
            .exec(
                &handle,
                vec!["sh".into(), "-c".into(), "cat /workspace/a.txt".into()],
                Some("/workspace"),
                &HashMap::new(),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout, "abc\n");
    }

    #[tokio::test]
    async fn exec_against_stopped_container_fails_without_dispatch() {
        let engine = FakeEngine::new();
        let handle = engine.run(&spec("suna-sandbox-p1")).await.unwrap();
        engine.stop(&handle).await.unwrap();
        let out = engine
            .exec(&handle, vec!["true".into()], None, &HashMap::new(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success());
    }
}

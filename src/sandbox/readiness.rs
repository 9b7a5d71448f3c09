//! Two-phase readiness protocol and the `wait_healthy` helper (§4.3.2).
//!
//! Grounded on `local_sandbox_manager.py::_wait_for_services`: a 30s supervisor poll (every 2s),
//! followed by a four-port TCP probe loop (every 3s) bounded by a 120s total budget, followed by
//! a fixed 5s settle delay. A timeout in the service phase is logged and returned as a partial
//! readiness map rather than raised — "soft ready" (§9).

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::engine::{ContainerEngine, ContainerHandle};
use crate::ports::Role;

const SUPERVISOR_BUDGET: Duration = Duration::from_secs(30);
const SUPERVISOR_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SERVICE_TOTAL_BUDGET: Duration = Duration::from_secs(120);
const SERVICE_POLL_INTERVAL: Duration = Duration::from_secs(3);
const SETTLE_DELAY: Duration = Duration::from_secs(5);
const EXEC_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-role readiness, as observed at the end of a probe run.
pub type ReadinessMap = HashMap<Role, bool>;

/// Polls `pgrep supervisord` inside the container every [`SUPERVISOR_POLL_INTERVAL`] until it
/// succeeds or [`SUPERVISOR_BUDGET`] elapses. Logged but never fatal: a missing supervisor just
/// means the subsequent service probes are unlikely to succeed either.
async fn wait_for_supervisor(engine: &dyn ContainerEngine, handle: &ContainerHandle, project_id: &str) -> bool {
    let deadline = Instant::now() + SUPERVISOR_BUDGET;
    loop {
        let result = engine
            .exec(
                handle,
                vec!["pgrep".to_owned(), "supervisord".to_owned()],
                Some("/"),
                &HashMap::new(),
                EXEC_TIMEOUT,
            )
            .await;

        if matches!(result, Ok(ref out) if out.success()) {
            log::info!("project {project_id}: supervisor is running");
            return true;
        }

        if Instant::now() >= deadline {
            log::warn!("project {project_id}: supervisor did not report ready within 30s");
            return false;
        }
        sleep(SUPERVISOR_POLL_INTERVAL).await;
    }
}

/// Probes each of the four internal ports in `pending` with a TCP connect from inside the
/// container, removing roles from `pending` as they succeed. Mutates in place so repeated calls
/// (across polling iterations) never re-probe an already-ready role.
async fn probe_once(
    engine: &dyn ContainerEngine,
    handle: &ContainerHandle,
    pending: &mut Vec<Role>,
    ready: &mut ReadinessMap,
) {
    let mut still_pending = Vec::new();
    for role in pending.drain(..) {
        let port = role.internal_port();
        let cmd = vec![
            "sh".to_owned(),
            "-c".to_owned(),
            format!("nc -z localhost {port}"),
        ];
        let result = engine
            .exec(handle, cmd, Some("/"), &HashMap::new(), EXEC_TIMEOUT)
            .await;
        if matches!(result, Ok(ref out) if out.success()) {
            ready.insert(role, true);
        } else {
            still_pending.push(role);
        }
    }
    *pending = still_pending;
}

/// Runs the full two-phase readiness protocol after `Run`/`Start` (§4.3.2). Always returns; a
/// service-phase timeout is logged and reflected as `false` entries in the returned map rather
/// than propagated as an error.
pub async fn run_readiness_probe(
    engine: &dyn ContainerEngine,
    handle: &ContainerHandle,
    project_id: &str,
) -> ReadinessMap {
    wait_for_supervisor(engine, handle, project_id).await;

    let mut ready: ReadinessMap = Role::ALL.into_iter().map(|r| (r, false)).collect();
    let mut pending: Vec<Role> = Role::ALL.to_vec();
    let deadline = Instant::now() + SERVICE_TOTAL_BUDGET;

    while !pending.is_empty() && Instant::now() < deadline {
        probe_once(engine, handle, &mut pending, &mut ready).await;
        if pending.is_empty() {
            break;
        }
        sleep(SERVICE_POLL_INTERVAL).await;
    }

    if !pending.is_empty() {
        log::warn!(
            "project {project_id}: timed out waiting for {pending:?}; returning sandbox soft-ready"
        );
    } else {
        log::info!("project {project_id}: all services are ready");
    }

    sleep(SETTLE_DELAY).await;
    ready
}

/// The blocking `wait_healthy(project_id, timeout)` helper (§4.3.2, §9 Open Question): re-polls
/// the four internal ports, ignoring any prior soft-ready result, until either all are ready or
/// `timeout` elapses.
pub async fn wait_healthy(
    engine: &dyn ContainerEngine,
    handle: &ContainerHandle,
    timeout: Duration,
) -> ReadinessMap {
    let mut ready: ReadinessMap = Role::ALL.into_iter().map(|r| (r, false)).collect();
    let mut pending: Vec<Role> = Role::ALL.to_vec();
    let deadline = Instant::now() + timeout;

    loop {
        probe_once(engine, handle, &mut pending, &mut ready).await;
        if pending.is_empty() || Instant::now() >= deadline {
            break;
        }
        sleep(SERVICE_POLL_INTERVAL).await;
    }

    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::engine::{ContainerEngine, ContainerSpec};
    use crate::ports::PortSet;
    use std::collections::HashMap as StdHashMap;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "suna-sandbox-p1".to_owned(),
            image: "local-suna-sandbox:latest".to_owned(),
            env: StdHashMap::new(),
            labels: StdHashMap::new(),
            port_bindings: PortSet::new(),
            volume_name: "suna-workspace-p1".to_owned(),
            volume_mount_path: "/workspace".to_owned(),
            network: "suna-sandbox-network".to_owned(),
            shm_size_bytes: 0,
            cap_add: vec![],
            security_opt: vec![],
            restart_policy: "unless-stopped".to_owned(),
            memory_limit: "4g".to_owned(),
            cpu_count: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fake_engine_reports_all_roles_ready_quickly() {
        let engine = FakeEngine::new();
        let handle = engine.run(&spec()).await.unwrap();
        let ready = run_readiness_probe(&engine, &handle, "p1").await;
        assert!(ready.values().all(|r| *r));
    }
}

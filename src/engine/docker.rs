//! Bollard-backed [`ContainerEngine`] implementation (§4.2, §6.2).
//!
//! Grounded on `testcontainers/src/core/client.rs` (container/network CRUD, exec, archive
//! upload) and `client/bollard_client.rs` (connecting by `DOCKER_HOST` scheme). Volume
//! management has no teacher counterpart (the teacher never creates named volumes) and follows
//! the same request/response shape as the container and network calls it sits next to.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{
    ContainerCreateBody, HostConfig, NetworkCreateRequest, PortBinding, RestartPolicy,
    RestartPolicyNameEnum, VolumeCreateOptions,
};
use bollard::query_parameters::{
    CreateContainerOptions, DownloadFromContainerOptionsBuilder, InspectContainerOptions,
    ListContainersOptionsBuilder, RemoveContainerOptionsBuilder, RemoveVolumeOptionsBuilder,
    StartContainerOptions, StopContainerOptionsBuilder, UploadToContainerOptionsBuilder,
};
use bollard::{body_full, Docker, API_DEFAULT_VERSION};
use futures::StreamExt;

use super::{env_pairs, ContainerEngine, ContainerHandle, ContainerSpec, ContainerState, ContainerStatus, ExecOutcome};
use crate::error::EngineError;
use crate::ports::{PortSet, Role};

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Talks to a local Docker-compatible engine over the socket named by `docker_host` (§6.2).
pub struct DockerEngine {
    bollard: Docker,
}

impl DockerEngine {
    /// Connects based on the scheme of `docker_host` (`unix://`, `npipe://`, `http(s)://`,
    /// `tcp://`), mirroring `testcontainers`'s `bollard_client::init`.
    pub fn connect(docker_host: &str) -> Result<Self, EngineError> {
        let url = url::Url::from_str(docker_host)
            .map_err(|e| EngineError::Unavailable(format!("invalid docker host: {e}")))?;

        let bollard = match url.scheme() {
            #[cfg(unix)]
            "unix" => Docker::connect_with_unix(
                docker_host,
                CONNECT_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
            #[cfg(windows)]
            "npipe" => Docker::connect_with_named_pipe(
                docker_host,
                CONNECT_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
            "http" | "tcp" => {
                Docker::connect_with_http(docker_host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            "https" => Docker::connect_with_ssl_defaults(),
            other => {
                return Err(EngineError::Unavailable(format!(
                    "unsupported docker host scheme: {other}"
                )))
            }
        }
        .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        Ok(DockerEngine { bollard })
    }
}

fn port_key(internal_port: u16) -> String {
    format!("{internal_port}/tcp")
}

/// Converts Docker's `NetworkSettings.Ports` table into our role-keyed port set, keeping only
/// the four internal ports this crate's image layout cares about (§4.3.1).
fn parse_ports(ports: bollard::models::PortMap) -> PortSet {
    let mut out = PortSet::new();
    for (internal, bindings) in ports {
        let Some(internal_port) = internal
            .split('/')
            .next()
            .and_then(|p| p.parse::<u16>().ok())
        else {
            continue;
        };
        let Some(role) = Role::from_internal_port(internal_port) else {
            continue;
        };
        let Some(host_port) = bindings
            .into_iter()
            .flatten()
            .find_map(|b| b.host_port.and_then(|p| p.parse::<u16>().ok()))
        else {
            continue;
        };
        out.insert(role, host_port);
    }
    out
}

/// Parses `"4g"`/`"512m"`/`"100k"`/plain-byte strings into a byte count for
/// `HostConfig.memory` (§4.3 `memory_limit`).
fn parse_memory_bytes(limit: &str) -> i64 {
    let limit = limit.trim();
    let (digits, multiplier) = match limit.chars().last() {
        Some(c @ ('g' | 'G')) => (&limit[..limit.len() - c.len_utf8()], 1024 * 1024 * 1024),
        Some(c @ ('m' | 'M')) => (&limit[..limit.len() - c.len_utf8()], 1024 * 1024),
        Some(c @ ('k' | 'K')) => (&limit[..limit.len() - c.len_utf8()], 1024),
        _ => (limit, 1),
    };
    digits.trim().parse::<i64>().unwrap_or(0) * multiplier
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code: 404, .. }
    )
}

fn is_not_modified(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code: 304, .. }
    )
}

#[async_trait::async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.bollard
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Unavailable(e.to_string()))
    }

    async fn ensure_bridge(&self, name: &str) -> Result<(), EngineError> {
        let networks = self
            .bollard
            .list_networks(None::<bollard::query_parameters::ListNetworksOptions>)
            .await
            .map_err(|e| EngineError::operation_failed("list_networks", e))?;

        if networks.iter().any(|n| n.name.as_deref() == Some(name)) {
            return Ok(());
        }

        self.bollard
            .create_network(NetworkCreateRequest {
                name: name.to_owned(),
                driver: Some("bridge".to_owned()),
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::operation_failed("create_network", e))?;
        Ok(())
    }

    async fn ensure_volume(&self, name: &str) -> Result<(), EngineError> {
        self.bollard
            .create_volume(VolumeCreateOptions {
                name: Some(name.to_owned()),
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::operation_failed("create_volume", e))?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), EngineError> {
        match self
            .bollard
            .remove_volume(name, Some(RemoveVolumeOptionsBuilder::new().force(true).build()))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(EngineError::operation_failed("remove_volume", e)),
        }
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError> {
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        for role in Role::ALL {
            let Some(host_port) = spec.port_bindings.get(&role) else {
                continue;
            };
            let key = port_key(role.internal_port());
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_owned()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                spec.volume_name, spec.volume_mount_path
            )]),
            shm_size: Some(spec.shm_size_bytes),
            cap_add: Some(spec.cap_add.clone()),
            security_opt: Some(spec.security_opt.clone()),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            memory: Some(parse_memory_bytes(&spec.memory_limit)),
            nano_cpus: Some(spec.cpu_count * 1_000_000_000),
            network_mode: Some(spec.network.clone()),
            port_bindings: Some(port_bindings),
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            env: Some(env_pairs(&spec.env)),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            platform: None,
        };

        let created = self
            .bollard
            .create_container(Some(options), body)
            .await
            .map_err(|e| EngineError::operation_failed("create_container", e))?;

        self.bollard
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
            .map_err(|e| EngineError::operation_failed("start_container", e))?;

        Ok(ContainerHandle(created.id))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ContainerHandle>, EngineError> {
        let filters = HashMap::from([("name".to_owned(), vec![name.to_owned()])]);
        let options = ListContainersOptionsBuilder::new()
            .all(true)
            .filters(&filters)
            .build();

        let containers = self
            .bollard
            .list_containers(Some(options))
            .await
            .map_err(|e| EngineError::operation_failed("list_containers", e))?;

        let wanted = format!("/{name}");
        let found = containers.into_iter().find(|c| {
            c.names
                .as_ref()
                .is_some_and(|names| names.iter().any(|n| n == &wanted || n == name))
        });

        Ok(found.and_then(|c| c.id).map(ContainerHandle))
    }

    async fn list_by_label_key(&self, label_key: &str) -> Result<Vec<ContainerHandle>, EngineError> {
        let filters = HashMap::from([("label".to_owned(), vec![label_key.to_owned()])]);
        let options = ListContainersOptionsBuilder::new()
            .all(true)
            .filters(&filters)
            .build();

        let containers = self
            .bollard
            .list_containers(Some(options))
            .await
            .map_err(|e| EngineError::operation_failed("list_containers", e))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| c.id)
            .map(ContainerHandle)
            .collect())
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerStatus, EngineError> {
        let info = self
            .bollard
            .inspect_container(&handle.0, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    EngineError::NotFound(handle.0.clone())
                } else {
                    EngineError::operation_failed("inspect_container", e)
                }
            })?;

        let running = info
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        let exited = info
            .state
            .as_ref()
            .and_then(|s| s.status)
            .map(|s| matches!(s, bollard::models::ContainerStateStatusEnum::EXITED))
            .unwrap_or(false);
        let state = if running {
            ContainerState::Running
        } else if exited {
            ContainerState::Exited
        } else {
            ContainerState::Created
        };

        let ports = info
            .network_settings
            .and_then(|ns| ns.ports)
            .map(parse_ports)
            .unwrap_or_default();

        let labels = info
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default();

        Ok(ContainerStatus { state, ports, labels })
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        match self
            .bollard
            .start_container(&handle.0, None::<StartContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(EngineError::operation_failed("start_container", e)),
        }
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        match self
            .bollard
            .stop_container(&handle.0, Some(StopContainerOptionsBuilder::new().t(10).build()))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(EngineError::operation_failed("stop_container", e)),
        }
    }

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> Result<(), EngineError> {
        match self
            .bollard
            .remove_container(
                &handle.0,
                Some(RemoveContainerOptionsBuilder::new().force(force).v(true).build()),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(EngineError::operation_failed("remove_container", e)),
        }
    }

    async fn exec(
        &self,
        handle: &ContainerHandle,
        cmd: Vec<String>,
        workdir: Option<&str>,
        env: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<ExecOutcome, EngineError> {
        let create_options = CreateExecOptions {
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: workdir.map(str::to_owned),
            env: Some(env_pairs(env)),
            ..Default::default()
        };

        let exec = self
            .bollard
            .create_exec(&handle.0, create_options)
            .await
            .map_err(|e| EngineError::operation_failed("create_exec", e))?;

        let collect = async {
            let started = self
                .bollard
                .start_exec(
                    &exec.id,
                    Some(StartExecOptions {
                        detach: false,
                        tty: false,
                        output_capacity: None,
                    }),
                )
                .await
                .map_err(|e| EngineError::operation_failed("start_exec", e))?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();

            if let StartExecResults::Attached { mut output, .. } = started {
                while let Some(chunk) = output.next().await {
                    match chunk.map_err(|e| EngineError::operation_failed("exec_stream", e))? {
                        bollard::container::LogOutput::StdOut { message } => {
                            stdout.extend_from_slice(&message)
                        }
                        bollard::container::LogOutput::StdErr { message } => {
                            stderr.extend_from_slice(&message)
                        }
                        _ => {}
                    }
                }
            }

            Ok::<_, EngineError>((stdout, stderr))
        };

        let (stdout, stderr) = tokio::time::timeout(timeout, collect)
            .await
            .map_err(|_| EngineError::ExecTimeout(timeout))??;

        let inspect = self
            .bollard
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| EngineError::operation_failed("inspect_exec", e))?;

        Ok(ExecOutcome {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn get_archive(&self, handle: &ContainerHandle, path: &str) -> Result<Vec<u8>, EngineError> {
        let options = DownloadFromContainerOptionsBuilder::new().path(path).build();
        let mut stream = self.bollard.download_from_container(&handle.0, Some(options));
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                if is_not_found(&e) {
                    EngineError::NotFound(path.to_owned())
                } else {
                    EngineError::operation_failed("download_from_container", e)
                }
            })?;
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    async fn put_archive(
        &self,
        handle: &ContainerHandle,
        path: &str,
        tar: Vec<u8>,
    ) -> Result<(), EngineError> {
        let options = UploadToContainerOptionsBuilder::new()
            .path(path)
            .no_overwrite_dir_non_dir("false")
            .build();

        self.bollard
            .upload_to_container(&handle.0, Some(options), body_full(tar.into()))
            .await
            .map_err(|e| EngineError::operation_failed("upload_to_container", e))
    }
}

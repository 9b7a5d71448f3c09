//! Workspace Adapter (§4.4): the tool-facing surface over [`crate::sandbox::manager::SandboxManager`].
//!
//! Grounded on `local_api_adapter.py`'s `LocalApiAdapter` class. Most of its methods there catch
//! every exception and collapse it to a `bool`/empty-result/log line; that "never propagate"
//! discipline is kept here in the operations whose original returns a plain success flag
//! (`Start`/`Stop`/`Delete`), while operations whose original can meaningfully fail the caller's
//! next step (`Create`, `Get`, `ExecuteCommand`) surface a typed error instead, per §4.4's
//! "Failure discipline" and §7.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::engine::{ContainerEngine, ContainerHandle};
use crate::error::{AdapterError, ManagerError};
use crate::sandbox::manager::SandboxManager;
use crate::sandbox::{SandboxStatus, SandboxView};

const EXEC_TIMEOUT: Duration = Duration::from_secs(30);
const NOT_RUNNING_EXIT_CODE: i64 = -1;

/// Result of [`WorkspaceAdapter::execute_command`] (§4.4 `ExecuteCommand`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct CommandResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// One entry of [`WorkspaceAdapter::list_files`] (§4.4 `ListFiles`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: String,
    pub modified: String,
    pub permissions: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Result of [`WorkspaceAdapter::health_check`] (§4.4 `HealthCheck`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub reason: Option<String>,
    pub services: HashMap<String, bool>,
}

/// Extended workspace info (§4.4 `GetWorkspaceInfo`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkspaceInfo {
    #[serde(flatten)]
    pub view: SandboxView,
    pub system_info: String,
}

pub struct WorkspaceAdapter {
    manager: SandboxManager,
}

impl WorkspaceAdapter {
    pub fn new(manager: SandboxManager) -> Self {
        WorkspaceAdapter { manager }
    }

    /// §4.4 `CreateWorkspace`.
    pub async fn create_workspace(
        &self,
        project_id: &str,
        defaults: &crate::config::SandboxDefaults,
        overrides: &HashMap<String, String>,
    ) -> Result<SandboxView, ManagerError> {
        let view = self.manager.create(project_id, defaults, overrides).await?;
        log::info!("created workspace for project {project_id}");
        Ok(view)
    }

    /// §4.4 `GetWorkspace`. `None` on any failure, matching the original's catch-and-return-None.
    pub async fn get_workspace(&self, project_id: &str) -> Option<SandboxView> {
        match self.manager.get(project_id).await {
            Ok(view) => Some(view),
            Err(e) => {
                log::warn!("failed to get workspace for project {project_id}: {e}");
                None
            }
        }
    }

    /// §4.4 `GetOrCreate`: fetches, creating on a miss, then ensures the result is running.
    pub async fn get_or_create_workspace(
        &self,
        project_id: &str,
        defaults: &crate::config::SandboxDefaults,
        overrides: &HashMap<String, String>,
    ) -> Result<SandboxView, ManagerError> {
        let mut view = match self.get_workspace(project_id).await {
            Some(view) => view,
            None => self.manager.create(project_id, defaults, overrides).await?,
        };

        if view.status != SandboxStatus::Running {
            view = self.manager.start(project_id).await?;
        }
        Ok(view)
    }

    /// §4.4 `StartWorkspace`. Logs and returns `false` on failure rather than propagating.
    pub async fn start_workspace(&self, project_id: &str) -> bool {
        match self.manager.start(project_id).await {
            Ok(_) => {
                log::info!("started workspace for project {project_id}");
                true
            }
            Err(e) => {
                log::error!("failed to start workspace for project {project_id}: {e}");
                false
            }
        }
    }

    /// §4.4 `StopWorkspace`.
    pub async fn stop_workspace(&self, project_id: &str) -> bool {
        match self.manager.stop(project_id).await {
            Ok(()) => {
                log::info!("stopped workspace for project {project_id}");
                true
            }
            Err(e) => {
                log::error!("failed to stop workspace for project {project_id}: {e}");
                false
            }
        }
    }

    /// §4.4 `DeleteWorkspace`.
    pub async fn delete_workspace(&self, project_id: &str) -> bool {
        match self.manager.delete(project_id).await {
            Ok(()) => {
                log::info!("deleted workspace for project {project_id}");
                true
            }
            Err(e) => {
                log::error!("failed to delete workspace for project {project_id}: {e}");
                false
            }
        }
    }

    /// §4.4 `ListWorkspaces`. Never fails outright; an engine error becomes an empty list.
    pub async fn list_workspaces(&self) -> Vec<SandboxView> {
        match self.manager.list().await {
            Ok(views) => views,
            Err(e) => {
                log::error!("failed to list workspaces: {e}");
                Vec::new()
            }
        }
    }

    async fn handle_for(&self, project_id: &str) -> Result<(ContainerHandle, SandboxStatus), ManagerError> {
        let view = self.manager.get(project_id).await?;
        Ok((ContainerHandle(view.container_id.clone()), view.status))
    }

    /// §4.4 `ExecuteCommand`. Not-running is a structured result, not an error, per the original's
    /// `container.status != 'running'` short-circuit.
    pub async fn execute_command(
        &self,
        project_id: &str,
        command: &str,
        workdir: &str,
    ) -> Result<CommandResult, ManagerError> {
        let (handle, status) = self.handle_for(project_id).await?;
        if status != SandboxStatus::Running {
            log::warn!("container for project {project_id} is not running, status: {status:?}");
            return Ok(CommandResult {
                exit_code: NOT_RUNNING_EXIT_CODE,
                stdout: String::new(),
                stderr: format!("Container is not running (status: {status:?})"),
                success: false,
            });
        }

        let env = HashMap::from([
            ("DISPLAY".to_owned(), ":99".to_owned()),
            ("PYTHONUNBUFFERED".to_owned(), "1".to_owned()),
        ]);
        let cmd = shell_words(command);
        let outcome = self
            .engine()
            .exec(&handle, cmd, Some(workdir), &env, EXEC_TIMEOUT)
            .await
            .map_err(|e| ManagerError::engine(project_id, "exec", e))?;

        Ok(CommandResult {
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            success: outcome.success(),
        })
    }

    fn engine(&self) -> &dyn ContainerEngine {
        self.manager.engine_ref()
    }

    /// §4.4 `UploadFile`: packs `data` as the single member of a tar named after `remote_path`'s
    /// basename and `PutArchive`s it into `remote_path`'s parent directory.
    pub async fn upload_file(&self, project_id: &str, remote_path: &str, data: &[u8]) -> Result<(), AdapterError> {
        let (handle, _status) = self.handle_for(project_id).await?;
        let member_name = Path::new(remote_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| remote_path.to_owned());
        let remote_dir = Path::new(remote_path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_owned());

        let tar = crate::archive::pack_single_file(&member_name, data)
            .await
            .map_err(|e| AdapterError::Archive(e.to_string()))?;

        self.engine()
            .put_archive(&handle, &remote_dir, tar)
            .await
            .map_err(|e| ManagerError::engine(project_id, "put_archive", e))?;

        log::info!("uploaded {remote_path} to workspace {project_id}");
        Ok(())
    }

    /// §4.4 `DownloadFile`: reads back the single member of the tar `GetArchive` returns.
    pub async fn download_file(&self, project_id: &str, remote_path: &str) -> Result<Vec<u8>, AdapterError> {
        let (handle, _status) = self.handle_for(project_id).await?;
        let tar = self
            .engine()
            .get_archive(&handle, remote_path)
            .await
            .map_err(|e| ManagerError::engine(project_id, "get_archive", e))?;

        let (_name, data) = crate::archive::unpack_single_file(&tar)
            .await
            .map_err(|e| AdapterError::Archive(e.to_string()))?;
        Ok(data)
    }

    /// §4.4 `ListFiles`: `mkdir -p` then a long listing, parsed the way the original parses
    /// `ls -la` output (fixed column positions, skip `.`/`..` and the leading `total` line).
    pub async fn list_files(&self, project_id: &str, path: &str) -> Result<Vec<FileEntry>, ManagerError> {
        let _ = self.execute_command(project_id, &format!("mkdir -p {path}"), "/").await?;
        let result = self.execute_command(project_id, &format!("ls -la {path}"), "/").await?;
        if !result.success {
            log::warn!("failed to list files in {path} for project {project_id}: {}", result.stderr);
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for line in result.stdout.trim().lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("total") {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 9 {
                continue;
            }
            let permissions = parts[0].to_owned();
            let size = parts[4].to_owned();
            let modified = parts[5..8].join(" ");
            let filename = parts[8..].join(" ");
            if filename == "." || filename == ".." {
                continue;
            }
            let kind = if permissions.starts_with('d') { "directory" } else { "file" };
            let full_path = if path == "/" {
                format!("/{filename}")
            } else {
                format!("{}/{}", path.trim_end_matches('/'), filename)
            };
            files.push(FileEntry {
                name: filename,
                path: full_path,
                size,
                modified,
                permissions,
                kind: kind.to_owned(),
            });
        }
        Ok(files)
    }

    /// §4.4 `CreateDirectory`.
    pub async fn create_directory(&self, project_id: &str, path: &str) -> Result<bool, ManagerError> {
        let result = self.execute_command(project_id, &format!("mkdir -p {path}"), "/").await?;
        Ok(result.success)
    }

    /// §4.4 `HealthCheck`: container running plus all four internal ports answering.
    pub async fn health_check(&self, project_id: &str) -> HealthStatus {
        let view = match self.get_workspace(project_id).await {
            Some(v) => v,
            None => {
                return HealthStatus {
                    healthy: false,
                    reason: Some("Workspace not found".to_owned()),
                    services: HashMap::new(),
                }
            }
        };
        if view.status != SandboxStatus::Running {
            return HealthStatus {
                healthy: false,
                reason: Some(format!("Workspace status: {:?}", view.status)),
                services: HashMap::new(),
            };
        }

        let mut services = HashMap::new();
        for (role, port) in [
            ("vnc", 5901),
            ("novnc", 6080),
            ("file_server", 8080),
            ("browser_api", 7788),
        ] {
            let ok = self
                .execute_command(project_id, &format!("nc -z localhost {port}"), "/")
                .await
                .map(|r| r.success)
                .unwrap_or(false);
            services.insert(role.to_owned(), ok);
        }

        let healthy = services.values().all(|v| *v);
        HealthStatus {
            healthy,
            reason: None,
            services,
        }
    }

    /// §4.4 `GetWorkspaceInfo`: the current view plus `uname -a && df -h /workspace` output.
    pub async fn get_workspace_info(&self, project_id: &str) -> Result<WorkspaceInfo, ManagerError> {
        let view = self.manager.get(project_id).await?;
        let system_info = self
            .execute_command(project_id, "uname -a && df -h /workspace", "/workspace")
            .await
            .map(|r| if r.success { r.stdout } else { String::new() })
            .unwrap_or_default();
        Ok(WorkspaceInfo { view, system_info })
    }

    pub fn sandbox_manager(&self) -> &SandboxManager {
        &self.manager
    }
}

/// Minimal POSIX-ish shell tokenizer for commands built from fixed format strings
/// (`"mkdir -p {path}"`, `"ls -la {path}"`, ...) where arguments never need quoting themselves.
fn shell_words(command: &str) -> Vec<String> {
    vec!["sh".to_owned(), "-c".to_owned(), command.to_owned()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxDefaults;
    use crate::engine::fake::FakeEngine;
    use std::sync::Arc;

    async fn adapter() -> WorkspaceAdapter {
        let engine: Arc<dyn ContainerEngine> = Arc::new(FakeEngine::new());
        let manager = SandboxManager::new(engine, "suna-sandbox-network", "local-suna-sandbox:latest")
            .await
            .unwrap();
        WorkspaceAdapter::new(manager)
    }

    #[tokio::test]
    async fn execute_command_against_missing_workspace_is_an_error() {
        let adapter = adapter().await;
        let err = adapter.execute_command("nope", "ls", "/workspace").await.unwrap_err();
        assert!(matches!(err, ManagerError::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn upload_then_download_round_trips() {
        let adapter = adapter().await;
        let defaults = SandboxDefaults::default();
        adapter.create_workspace("p1", &defaults, &HashMap::new()).await.unwrap();

        adapter.upload_file("p1", "/workspace/hello.txt", b"hi there").await.unwrap();
        let data = adapter.download_file("p1", "/workspace/hello.txt").await.unwrap();
        assert_eq!(data, b"hi there");
    }

    #[tokio::test]
    async fn health_check_on_missing_workspace_is_unhealthy() {
        let adapter = adapter().await;
        let health = adapter.health_check("nope").await;
        assert!(!health.healthy);
        assert_eq!(health.reason.as_deref(), Some("Workspace not found"));
    }
}

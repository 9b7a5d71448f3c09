//! Tool Base (§4.5): path-safety primitives shared by every tool built on top of a workspace.
//!
//! Grounded on `local_tool_base.py`'s `LocalSandboxToolsBase`: `clean_path`/`validate_path`
//! before every operation, then a thin shell command per primitive (`test -f`, `cat`,
//! `echo '...' > path`, `stat -c '%n|%s|%Y|%A|%U|%G'`, ...). Every failure here collapses to
//! `None`/`false`/an empty `Vec` exactly as the original does — a tool author should never have
//! to match on an error type to ask "does this file exist".

use std::sync::Arc;

use crate::adapter::{FileEntry, WorkspaceAdapter};
use crate::config::SandboxDefaults;

const WORKSPACE_ROOT: &str = "/workspace";

/// Strips characters Docker exec can't safely round-trip, normalizes `.`/`..` segments, and
/// reparents the result under [`WORKSPACE_ROOT`] if it isn't already there (§4.5 "Path safety").
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return WORKSPACE_ROOT.to_owned();
    }

    let stripped: String = path.chars().filter(|c| !"<>:\"|?*".contains(*c)).collect();
    let normalized = normalize_components(&stripped);

    let rooted = if normalized.starts_with(WORKSPACE_ROOT) {
        normalized
    } else if let Some(rest) = normalized.strip_prefix('/') {
        format!("{WORKSPACE_ROOT}/{rest}")
    } else {
        format!("{WORKSPACE_ROOT}/{normalized}")
    };

    collapse_slashes(&rooted)
}

/// `os.path.normpath`-style `.`/`..` collapsing, without touching the filesystem.
fn normalize_components(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if !matches!(stack.last(), None | Some(&"..")) {
                    stack.pop();
                } else if !absolute {
                    stack.push("..");
                }
            }
            other => stack.push(other),
        }
    }
    let joined = stack.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_owned()
    } else {
        joined
    }
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        out.push(c);
    }
    out
}

/// Rejects traversal attempts and anything that, after [`clean_path`]-style normalization,
/// doesn't resolve under [`WORKSPACE_ROOT`] (§4.5 "Path safety").
pub fn validate_path(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    if path.contains("..") || path.starts_with('~') {
        return false;
    }
    normalize_components(path).starts_with(WORKSPACE_ROOT)
}

/// `stat`-derived file metadata (§4.5 `GetFileInfo`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub size: i64,
    pub modified_time: i64,
    pub permissions: String,
    pub owner: String,
    pub group: String,
}

fn shell_quote(path: &str) -> String {
    format!("'{path}'")
}

/// Escapes single quotes for interpolation inside a single-quoted shell string, the
/// `'"'"'`-splice idiom the original uses for `echo '<content>' > path` (§9 "Echo-redirect
/// newline semantics" — the trailing newline `echo` adds is kept intentionally).
fn shell_escape_single_quoted(content: &str) -> String {
    content.replace('\'', "'\"'\"'")
}

/// Builds a [`ToolBase`] per project, sharing one [`WorkspaceAdapter`] and the runtime's
/// configured [`SandboxDefaults`] across every tool call (§4.7 "constructs the Sandbox Manager,
/// Workspace Adapter, and Tool Base factory").
#[derive(Clone)]
pub struct ToolBaseFactory {
    adapter: Arc<WorkspaceAdapter>,
    defaults: SandboxDefaults,
}

impl ToolBaseFactory {
    pub fn new(adapter: Arc<WorkspaceAdapter>, defaults: SandboxDefaults) -> Self {
        ToolBaseFactory { adapter, defaults }
    }

    /// A [`ToolBase`] bound to `project_id`, using this factory's defaults for every
    /// `ensure_running` call it makes.
    pub fn for_project(&self, project_id: impl Into<String>) -> ToolBase {
        ToolBase::new(self.adapter.clone(), project_id, self.defaults.clone())
    }
}

/// Per-project path-safe file primitives over a [`WorkspaceAdapter`], ensuring the sandbox is
/// running before every operation (§4.5).
pub struct ToolBase {
    adapter: Arc<WorkspaceAdapter>,
    project_id: String,
    defaults: SandboxDefaults,
}

impl ToolBase {
    pub fn new(adapter: Arc<WorkspaceAdapter>, project_id: impl Into<String>, defaults: SandboxDefaults) -> Self {
        ToolBase {
            adapter,
            project_id: project_id.into(),
            defaults,
        }
    }

    async fn ensure_running(&self) {
        if let Err(e) = self
            .adapter
            .get_or_create_workspace(&self.project_id, &self.defaults, &std::collections::HashMap::new())
            .await
        {
            log::error!("failed to ensure sandbox running for project {}: {e}", self.project_id);
        }
    }

    /// §4.5 primitive: `exec`, used directly by tools that need arbitrary commands.
    pub async fn execute_command(&self, command: &str, workdir: &str) -> crate::adapter::CommandResult {
        self.ensure_running().await;
        let workdir = clean_path(workdir);
        match self.adapter.execute_command(&self.project_id, command, &workdir).await {
            Ok(result) => result,
            Err(e) => crate::adapter::CommandResult {
                exit_code: -1,
                stdout: String::new(),
                stderr: e.to_string(),
                success: false,
            },
        }
    }

    /// §4.5 `read_file` (`cat`, after confirming existence with `test -f`).
    pub async fn read_file(&self, file_path: &str) -> Option<String> {
        let file_path = clean_path(file_path);
        if !validate_path(&file_path) {
            log::error!("invalid file path: {file_path}");
            return None;
        }

        let exists = self.execute_command(&format!("test -f {}", shell_quote(&file_path)), WORKSPACE_ROOT).await;
        if !exists.success {
            log::warn!("file does not exist: {file_path}");
            return None;
        }

        let result = self.execute_command(&format!("cat {}", shell_quote(&file_path)), WORKSPACE_ROOT).await;
        if result.success {
            Some(result.stdout)
        } else {
            log::error!("failed to read file {file_path}: {}", result.stderr);
            None
        }
    }

    /// §4.5 `write_file` (`mkdir -p` the parent, then a single-quote-escaped `echo` redirect).
    pub async fn write_file(&self, file_path: &str, content: &str) -> bool {
        let file_path = clean_path(file_path);
        if !validate_path(&file_path) {
            log::error!("invalid file path: {file_path}");
            return false;
        }

        let dir_path = std::path::Path::new(&file_path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| WORKSPACE_ROOT.to_owned());
        self.execute_command(&format!("mkdir -p {}", shell_quote(&dir_path)), WORKSPACE_ROOT).await;

        let escaped = shell_escape_single_quoted(content);
        let result = self
            .execute_command(&format!("echo '{escaped}' > {}", shell_quote(&file_path)), WORKSPACE_ROOT)
            .await;
        result.success
    }

    /// §4.5 `list_files`.
    pub async fn list_files(&self, directory: &str) -> Vec<FileEntry> {
        let directory = clean_path(directory);
        if !validate_path(&directory) {
            log::error!("invalid directory path: {directory}");
            return Vec::new();
        }
        self.ensure_running().await;
        self.adapter.list_files(&self.project_id, &directory).await.unwrap_or_default()
    }

    /// §4.5 `create_directory`.
    pub async fn create_directory(&self, directory: &str) -> bool {
        let directory = clean_path(directory);
        if !validate_path(&directory) {
            log::error!("invalid directory path: {directory}");
            return false;
        }
        self.ensure_running().await;
        self.adapter.create_directory(&self.project_id, &directory).await.unwrap_or(false)
    }

    /// §4.5 `file_exists`.
    pub async fn file_exists(&self, file_path: &str) -> bool {
        let file_path = clean_path(file_path);
        if !validate_path(&file_path) {
            return false;
        }
        self.execute_command(&format!("test -f {}", shell_quote(&file_path)), WORKSPACE_ROOT)
            .await
            .exit_code
            == 0
    }

    /// §4.5 `directory_exists`.
    pub async fn directory_exists(&self, directory: &str) -> bool {
        let directory = clean_path(directory);
        if !validate_path(&directory) {
            return false;
        }
        self.execute_command(&format!("test -d {}", shell_quote(&directory)), WORKSPACE_ROOT)
            .await
            .exit_code
            == 0
    }

    /// §4.5 `delete_file`.
    pub async fn delete_file(&self, file_path: &str) -> bool {
        let file_path = clean_path(file_path);
        if !validate_path(&file_path) {
            log::error!("invalid file path: {file_path}");
            return false;
        }
        self.execute_command(&format!("rm -f {}", shell_quote(&file_path)), WORKSPACE_ROOT).await.success
    }

    /// §4.5 `delete_directory`. Refuses to remove the workspace root itself.
    pub async fn delete_directory(&self, directory: &str) -> bool {
        let directory = clean_path(directory);
        if !validate_path(&directory) {
            log::error!("invalid directory path: {directory}");
            return false;
        }
        if directory == WORKSPACE_ROOT {
            log::error!("cannot delete workspace root directory");
            return false;
        }
        self.execute_command(&format!("rm -rf {}", shell_quote(&directory)), WORKSPACE_ROOT).await.success
    }

    /// §4.5 `get_file_info` (`stat -c '%n|%s|%Y|%A|%U|%G'`).
    pub async fn get_file_info(&self, file_path: &str) -> Option<FileInfo> {
        let file_path = clean_path(file_path);
        if !validate_path(&file_path) {
            return None;
        }

        let quoted = shell_quote(&file_path);
        let result = self
            .execute_command(
                &format!("stat -c '%n|%s|%Y|%A|%U|%G' {quoted} 2>/dev/null || echo 'NOT_FOUND'"),
                WORKSPACE_ROOT,
            )
            .await;

        let stdout = result.stdout.trim();
        if !result.success || stdout == "NOT_FOUND" {
            return None;
        }

        let parts: Vec<&str> = stdout.split('|').collect();
        if parts.len() < 6 {
            return None;
        }

        Some(FileInfo {
            name: std::path::Path::new(parts[0])
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| parts[0].to_owned()),
            path: parts[0].to_owned(),
            size: parts[1].parse().unwrap_or(0),
            modified_time: parts[2].parse().unwrap_or(0),
            permissions: parts[3].to_owned(),
            owner: parts[4].to_owned(),
            group: parts[5].to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_reparents_relative_paths_under_workspace() {
        assert_eq!(clean_path("foo/bar.txt"), "/workspace/foo/bar.txt");
        assert_eq!(clean_path(""), "/workspace");
        assert_eq!(clean_path("/etc/passwd"), "/workspace/etc/passwd");
    }

    #[test]
    fn clean_path_strips_dangerous_characters() {
        assert_eq!(clean_path("foo<>:\"|?*bar.txt"), "/workspace/foobar.txt");
    }

    #[test]
    fn clean_path_collapses_duplicate_slashes() {
        assert_eq!(clean_path("foo//bar///baz.txt"), "/workspace/foo/bar/baz.txt");
    }

    #[test]
    fn validate_path_rejects_traversal_and_home_escape() {
        assert!(!validate_path("/workspace/../etc/passwd"));
        assert!(!validate_path("~/secrets"));
        assert!(!validate_path(""));
    }

    #[test]
    fn validate_path_accepts_workspace_paths() {
        assert!(validate_path("/workspace/foo/bar.txt"));
    }

    #[test]
    fn shell_escape_handles_embedded_single_quotes() {
        assert_eq!(shell_escape_single_quoted("it's here"), "it'\"'\"'s here");
    }

    use crate::engine::fake::FakeEngine;
    use crate::engine::ContainerEngine;
    use crate::sandbox::manager::SandboxManager;

    async fn factory() -> ToolBaseFactory {
        let engine: Arc<dyn ContainerEngine> = Arc::new(FakeEngine::new());
        let manager = SandboxManager::new(engine, "suna-sandbox-network", "local-suna-sandbox:latest")
            .await
            .unwrap();
        ToolBaseFactory::new(Arc::new(WorkspaceAdapter::new(manager)), SandboxDefaults::default())
    }

    #[tokio::test(start_paused = true)]
    async fn write_then_read_file_round_trips_through_a_tool_base() {
        let tool_base = factory().await.for_project("p1");
        assert!(tool_base.write_file("notes.txt", "hello").await);
        assert_eq!(tool_base.read_file("notes.txt").await.unwrap(), "hello\n");
    }

    #[tokio::test(start_paused = true)]
    async fn file_exists_reflects_writes_and_deletes() {
        let tool_base = factory().await.for_project("p1");
        assert!(!tool_base.file_exists("notes.txt").await);
        tool_base.write_file("notes.txt", "hi").await;
        assert!(tool_base.file_exists("notes.txt").await);
        assert!(tool_base.delete_file("notes.txt").await);
        assert!(!tool_base.file_exists("notes.txt").await);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_directory_refuses_the_workspace_root() {
        let tool_base = factory().await.for_project("p1");
        assert!(!tool_base.delete_directory("/workspace").await);
    }
}

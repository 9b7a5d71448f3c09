//! Wire types for the HTTP façade (§4.6, §6.1).
//!
//! Grounded on `local_api.py`'s pydantic models (`CreateSandboxRequest`, `CommandRequest`,
//! `FileCreateRequest`, `FileUpdateRequest`), translated to plain serde structs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_workspace_path() -> String {
    "/workspace".to_owned()
}

#[derive(Debug, Deserialize)]
pub struct CreateSandboxRequest {
    pub project_id: String,
    pub vnc_password: Option<String>,
    pub resolution: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
    pub auto_stop_hours: Option<String>,
}

impl CreateSandboxRequest {
    /// Folds the optional per-request fields into the override map
    /// [`crate::config::SandboxConfig::with_overrides`] expects.
    pub fn overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let Some(v) = &self.vnc_password {
            overrides.insert("vnc_password".to_owned(), v.clone());
        }
        if let Some(v) = &self.resolution {
            overrides.insert("resolution".to_owned(), v.clone());
        }
        if let Some(v) = &self.cpu_limit {
            overrides.insert("cpu_limit".to_owned(), v.clone());
        }
        if let Some(v) = &self.memory_limit {
            overrides.insert("memory_limit".to_owned(), v.clone());
        }
        if let Some(v) = &self.auto_stop_hours {
            overrides.insert("auto_stop_hours".to_owned(), v.clone());
        }
        overrides
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default = "default_workspace_path")]
    pub workdir: String,
}

#[derive(Debug, Deserialize)]
pub struct FileCreateRequest {
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_directory: bool,
}

#[derive(Debug, Deserialize)]
pub struct FileUpdateRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default = "default_workspace_path")]
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FileContentResponse {
    pub content: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub filename: String,
    pub content: String,
    pub size: usize,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub path: String,
    pub filename: String,
    pub size: usize,
}

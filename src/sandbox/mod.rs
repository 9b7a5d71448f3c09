//! Sandbox data model, label encoding, and URL derivation (§3, §4.3.3, §6.4).
//!
//! Grounded on `local_sandbox_manager.py`'s `SandboxConfig` dataclass and its
//! `_generate_service_urls`/`_format_ports` helpers.

pub mod manager;
pub mod readiness;

use std::collections::HashMap;

use time::OffsetDateTime;

use crate::config::SandboxConfig;
use crate::engine::{labels, ContainerState};
use crate::ports::{PortSet, Role};

pub fn container_name(project_id: &str) -> String {
    format!("suna-sandbox-{project_id}")
}

pub fn volume_name(project_id: &str) -> String {
    format!("suna-workspace-{project_id}")
}

/// One sandbox's full cache entry (§4.3 "State").
#[derive(Debug, Clone)]
pub struct SandboxEntry {
    pub project_id: String,
    pub container_id: String,
    pub ports: PortSet,
    pub config: SandboxConfig,
    pub created_at: OffsetDateTime,
    pub auto_stop_at: OffsetDateTime,
    pub volume_name: String,
}

/// Public lifecycle status (§3 "status").
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Created,
    Running,
    Exited,
    Removed,
}

impl From<ContainerState> for SandboxStatus {
    fn from(state: ContainerState) -> Self {
        match state {
            ContainerState::Created => SandboxStatus::Created,
            ContainerState::Running => SandboxStatus::Running,
            ContainerState::Exited => SandboxStatus::Exited,
            ContainerState::Removed => SandboxStatus::Removed,
        }
    }
}

/// Per-role access URLs derived from an allocated port set (§4.3.3). The `vnc://` scheme is
/// documentational only; it is not an HTTP endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceUrls {
    pub vnc: String,
    pub novnc: String,
    pub browser_api: String,
    pub file_server: String,
}

pub fn service_urls(ports: &PortSet) -> ServiceUrls {
    ServiceUrls {
        vnc: format!("vnc://localhost:{}", ports.get(&Role::Vnc).unwrap_or(&0)),
        novnc: format!("http://localhost:{}", ports.get(&Role::Novnc).unwrap_or(&0)),
        browser_api: format!(
            "http://localhost:{}",
            ports.get(&Role::BrowserApi).unwrap_or(&0)
        ),
        file_server: format!(
            "http://localhost:{}",
            ports.get(&Role::FileServer).unwrap_or(&0)
        ),
    }
}

/// A fully composed view of a sandbox returned by `Get`/`List`/`Create` (§4.4 `CreateWorkspace`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct SandboxView {
    pub project_id: String,
    pub container_id: String,
    pub container_name: String,
    pub volume_name: String,
    pub status: SandboxStatus,
    pub ports: HashMap<String, u16>,
    pub urls: ServiceUrls,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl SandboxView {
    pub fn new(
        project_id: &str,
        container_id: &str,
        status: SandboxStatus,
        ports: &PortSet,
        created_at: OffsetDateTime,
    ) -> Self {
        SandboxView {
            project_id: project_id.to_owned(),
            container_id: container_id.to_owned(),
            container_name: container_name(project_id),
            volume_name: volume_name(project_id),
            status,
            ports: ports.iter().map(|(r, p)| (r.as_str().to_owned(), *p)).collect(),
            urls: service_urls(ports),
            created_at,
        }
    }
}

/// Builds the label map a sandbox's container is created with (§6.4).
pub fn build_labels(project_id: &str, created_at: OffsetDateTime, auto_stop_at: OffsetDateTime) -> HashMap<String, String> {
    HashMap::from([
        (labels::PROJECT_ID.to_owned(), project_id.to_owned()),
        (
            labels::CREATED_AT.to_owned(),
            created_at
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
        ),
        (
            labels::AUTO_STOP_AT.to_owned(),
            auto_stop_at
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_the_documented_schemes() {
        let ports = PortSet::from([
            (Role::Vnc, 15901),
            (Role::Novnc, 16080),
            (Role::BrowserApi, 17788),
            (Role::FileServer, 18080),
        ]);
        let urls = service_urls(&ports);
        assert_eq!(urls.vnc, "vnc://localhost:15901");
        assert_eq!(urls.novnc, "http://localhost:16080");
        assert_eq!(urls.browser_api, "http://localhost:17788");
        assert_eq!(urls.file_server, "http://localhost:18080");
    }

    #[test]
    fn names_follow_the_suna_prefix_convention() {
        assert_eq!(container_name("p1"), "suna-sandbox-p1");
        assert_eq!(volume_name("p1"), "suna-workspace-p1");
    }
}

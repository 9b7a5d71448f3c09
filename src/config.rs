//! Process-wide and per-sandbox configuration (§4.3, §6.3).
//!
//! Loaded from the environment at process start by the [`crate::runtime::Orchestrator`]. Unlike
//! the dynamic-kwargs configuration of the system this crate was adapted from, every field is
//! enumerated here; an unknown key supplied to [`SandboxConfig::with_overrides`] is a validation
//! error rather than being silently accepted (§9 "Dynamic kwargs").

use std::collections::HashMap;
use std::env;

use crate::error::ValidationError;

/// Engine-wide settings, loaded once at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Path to the container engine's Unix domain socket (§6.2).
    pub docker_host: String,
    /// Base image used for every sandbox container.
    pub base_image: String,
    /// Name of the shared bridge network (ensured present at startup).
    pub network_name: String,
    /// Address the HTTP façade listens on.
    pub listen_addr: String,
    /// Port the HTTP façade listens on.
    pub listen_port: u16,
    /// Default per-sandbox configuration, overridable per `Create` request.
    pub sandbox_defaults: SandboxDefaults,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            docker_host: "unix:///var/run/docker.sock".to_owned(),
            base_image: "local-suna-sandbox:latest".to_owned(),
            network_name: "suna-sandbox-network".to_owned(),
            listen_addr: "0.0.0.0".to_owned(),
            listen_port: 8000,
            sandbox_defaults: SandboxDefaults::default(),
        }
    }
}

impl RuntimeConfig {
    /// Reads configuration from the environment, falling back to the documented defaults
    /// (§6.3) for anything unset. Never panics; callers decide whether to fail startup.
    pub fn from_env() -> Self {
        let defaults = RuntimeConfig::default();
        RuntimeConfig {
            docker_host: env_or("SUNA_DOCKER_HOST", defaults.docker_host),
            base_image: env_or("SUNA_BASE_IMAGE", defaults.base_image),
            network_name: env_or("SUNA_NETWORK_NAME", defaults.network_name),
            listen_addr: env_or("SUNA_LISTEN_ADDR", defaults.listen_addr),
            listen_port: env::var("SUNA_LISTEN_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.listen_port),
            sandbox_defaults: SandboxDefaults::from_env(defaults.sandbox_defaults),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

/// Process-wide defaults for per-sandbox configuration (§4.3 config table), overridable per
/// `Create` request by [`SandboxConfig::with_overrides`].
#[derive(Debug, Clone)]
pub struct SandboxDefaults {
    pub vnc_password: String,
    pub resolution: String,
    pub cpu_limit: i64,
    pub memory_limit: String,
    pub auto_stop_hours: i64,
}

impl Default for SandboxDefaults {
    fn default() -> Self {
        SandboxDefaults {
            vnc_password: "vncpassword".to_owned(),
            resolution: "1024x768x24".to_owned(),
            cpu_limit: 2,
            memory_limit: "4g".to_owned(),
            auto_stop_hours: 24,
        }
    }
}

impl SandboxDefaults {
    fn from_env(defaults: SandboxDefaults) -> Self {
        SandboxDefaults {
            vnc_password: env_or("SUNA_VNC_PASSWORD", defaults.vnc_password),
            resolution: env_or("SUNA_RESOLUTION", defaults.resolution),
            cpu_limit: env::var("SUNA_CPU_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cpu_limit),
            memory_limit: env_or("SUNA_MEMORY_LIMIT", defaults.memory_limit),
            auto_stop_hours: env::var("SUNA_AUTO_STOP_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.auto_stop_hours),
        }
    }
}

/// The closed set of keys a caller may override on `Create` (§4.3, §9). Anything outside this
/// set fails validation instead of being ignored.
const OVERRIDABLE_KEYS: &[&str] = &[
    "vnc_password",
    "resolution",
    "cpu_limit",
    "memory_limit",
    "auto_stop_hours",
];

/// Per-sandbox configuration actually applied at create time: the process-wide defaults with
/// any caller overrides folded in.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub vnc_password: String,
    pub resolution: String,
    pub cpu_limit: i64,
    pub memory_limit: String,
    pub auto_stop_hours: i64,
}

impl From<SandboxDefaults> for SandboxConfig {
    fn from(d: SandboxDefaults) -> Self {
        SandboxConfig {
            vnc_password: d.vnc_password,
            resolution: d.resolution,
            cpu_limit: d.cpu_limit,
            memory_limit: d.memory_limit,
            auto_stop_hours: d.auto_stop_hours,
        }
    }
}

impl SandboxConfig {
    /// Applies caller-supplied overrides on top of the process-wide defaults. Rejects unknown
    /// keys with [`ValidationError`] rather than ignoring them (§9 "Dynamic kwargs").
    pub fn with_overrides(
        defaults: &SandboxDefaults,
        overrides: &HashMap<String, String>,
    ) -> Result<Self, ValidationError> {
        for key in overrides.keys() {
            if !OVERRIDABLE_KEYS.contains(&key.as_str()) {
                return Err(ValidationError(format!(
                    "unknown sandbox configuration key '{key}'"
                )));
            }
        }

        let mut config = SandboxConfig::from(defaults.clone());
        if let Some(v) = overrides.get("vnc_password") {
            config.vnc_password = v.clone();
        }
        if let Some(v) = overrides.get("resolution") {
            config.resolution = v.clone();
        }
        if let Some(v) = overrides.get("cpu_limit") {
            config.cpu_limit = v
                .parse()
                .map_err(|_| ValidationError(format!("invalid cpu_limit '{v}'")))?;
        }
        if let Some(v) = overrides.get("memory_limit") {
            config.memory_limit = v.clone();
        }
        if let Some(v) = overrides.get("auto_stop_hours") {
            config.auto_stop_hours = v
                .parse()
                .map_err(|_| ValidationError(format!("invalid auto_stop_hours '{v}'")))?;
        }
        Ok(config)
    }

    /// Splits `resolution` (`"WIDTHxHEIGHTxDEPTH"`) into width/height for the container's
    /// `RESOLUTION_WIDTH`/`RESOLUTION_HEIGHT` environment variables (§4.3).
    pub fn resolution_width_height(&self) -> (String, String) {
        let mut parts = self.resolution.split('x');
        let width = parts.next().unwrap_or("1024").to_owned();
        let height = parts.next().unwrap_or("768").to_owned();
        (width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let defaults = SandboxDefaults::default();
        let config = SandboxConfig::from(defaults.clone());
        assert_eq!(config.vnc_password, "vncpassword");
        assert_eq!(config.resolution, "1024x768x24");
        assert_eq!(config.cpu_limit, 2);
    }

    #[test]
    fn unknown_override_key_is_rejected() {
        let defaults = SandboxDefaults::default();
        let mut overrides = HashMap::new();
        overrides.insert("privileged".to_owned(), "true".to_owned());
        let err = SandboxConfig::with_overrides(&defaults, &overrides).unwrap_err();
        assert!(err.0.contains("privileged"));
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let defaults = SandboxDefaults::default();
        let mut overrides = HashMap::new();
        overrides.insert("resolution".to_owned(), "1280x720x24".to_owned());
        overrides.insert("vnc_password".to_owned(), "x".to_owned());
        let config = SandboxConfig::with_overrides(&defaults, &overrides).unwrap();
        assert_eq!(config.resolution, "1280x720x24");
        assert_eq!(config.vnc_password, "x");
        assert_eq!(config.cpu_limit, defaults.cpu_limit);
    }

    #[test]
    fn resolution_splits_width_height() {
        let config = SandboxConfig::from(SandboxDefaults::default());
        let (w, h) = config.resolution_width_height();
        assert_eq!(w, "1024");
        assert_eq!(h, "768");
    }
}

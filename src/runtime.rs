//! Orchestrator composition root (§4.7): wires config, engine, manager, adapter, the Tool Base
//! factory, the HTTP façade, and the supervised reclamation task, then serves until a shutdown
//! signal arrives.
//!
//! Grounded on `other_examples/e69c5006_davidrudduck-vk-swarm__crates-server-src-main.rs.rs`'s
//! `main`/`shutdown_signal` shape (background `tokio::spawn` task at startup, `axum::serve`
//! with graceful shutdown over ctrl_c + SIGTERM) and on the teacher's explicit, non-singleton
//! `Docker`/`Client::new()` construction style (no module-level `OnceLock`, §9 "Singleton
//! module-level state").

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::adapter::WorkspaceAdapter;
use crate::api::{self, AppState};
use crate::config::RuntimeConfig;
use crate::engine::docker::DockerEngine;
use crate::engine::ContainerEngine;
use crate::error::EngineError;
use crate::sandbox::manager::SandboxManager;
use crate::toolbase::ToolBaseFactory;

const RECLAMATION_INTERVAL: Duration = Duration::from_secs(60 * 60);
const RECLAMATION_ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// A running orchestrator: the bound HTTP façade plus a handle to the background reclamation
/// loop, so callers can wait for either to finish (or abort the latter on shutdown).
pub struct Orchestrator {
    pub adapter: Arc<WorkspaceAdapter>,
    /// Builds a [`crate::toolbase::ToolBase`] per project for anything embedding this crate as a
    /// library rather than driving it through the HTTP façade (§4.5, §4.7).
    pub tool_base_factory: ToolBaseFactory,
    reclamation_task: JoinHandle<()>,
}

impl Orchestrator {
    /// Loads configuration from the environment, connects to the container engine, ensures the
    /// shared bridge network, and spawns the reclamation loop. Does not start serving HTTP.
    pub async fn bootstrap(config: &RuntimeConfig) -> Result<Self, EngineError> {
        let engine = DockerEngine::connect(&config.docker_host)?;
        engine.ping().await?;
        log::info!("connected to container engine at {}", config.docker_host);

        let engine: Arc<dyn ContainerEngine> = Arc::new(engine);
        let manager = SandboxManager::new(engine, config.network_name.clone(), config.base_image.clone())
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        let adapter = Arc::new(WorkspaceAdapter::new(manager));
        let tool_base_factory = ToolBaseFactory::new(adapter.clone(), config.sandbox_defaults.clone());

        let reclamation_task = spawn_reclamation_loop(adapter.clone());

        Ok(Orchestrator {
            adapter,
            tool_base_factory,
            reclamation_task,
        })
    }

    /// Builds the router and serves it on `listen_addr:listen_port` until a shutdown signal
    /// arrives, then stops the reclamation loop before returning.
    pub async fn serve(self, config: &RuntimeConfig) -> std::io::Result<()> {
        let state = AppState {
            adapter: self.adapter.clone(),
            defaults: config.sandbox_defaults.clone(),
        };
        let router = api::router(state);

        let addr = format!("{}:{}", config.listen_addr, config.listen_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        log::info!("sandbox orchestrator listening on {addr}");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        log::info!("shutting down reclamation loop");
        self.reclamation_task.abort();
        Ok(())
    }
}

/// Runs [`SandboxManager::cleanup_expired`] on a fixed interval, never overlapping itself and
/// backing off on error rather than retrying immediately (§5 "Reclamation").
fn spawn_reclamation_loop(adapter: Arc<WorkspaceAdapter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match adapter.sandbox_manager().cleanup_expired().await {
                Ok(removed) if !removed.is_empty() => {
                    log::info!("reclamation swept {} expired sandbox(es): {removed:?}", removed.len());
                    tokio::time::sleep(RECLAMATION_INTERVAL).await;
                }
                Ok(_) => {
                    tokio::time::sleep(RECLAMATION_INTERVAL).await;
                }
                Err(e) => {
                    log::error!("reclamation sweep failed, backing off: {e}");
                    tokio::time::sleep(RECLAMATION_ERROR_BACKOFF).await;
                }
            }
        }
    })
}

/// Waits for ctrl_c or, on unix, SIGTERM, so a container orchestrator started under a process
/// supervisor shuts down cleanly either way.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("received ctrl_c, shutting down"),
        _ = terminate => log::info!("received SIGTERM, shutting down"),
    }
}

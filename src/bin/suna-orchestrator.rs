//! Process entry point. Initializes logging, loads configuration from the environment, and runs
//! the orchestrator until a shutdown signal arrives.
//!
//! Grounded on `other_examples/e69c5006_davidrudduck-vk-swarm__crates-server-src-main.rs.rs`'s
//! `#[tokio::main] async fn main()` shape.

use suna_orchestrator::config::RuntimeConfig;
use suna_orchestrator::runtime::Orchestrator;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    pretty_env_logger::init();

    let config = RuntimeConfig::from_env();
    let orchestrator = match Orchestrator::bootstrap(&config).await {
        Ok(o) => o,
        Err(e) => {
            log::error!("failed to start sandbox orchestrator: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    if let Err(e) = orchestrator.serve(&config).await {
        log::error!("sandbox orchestrator exited with error: {e}");
        return std::process::ExitCode::FAILURE;
    }

    std::process::ExitCode::SUCCESS
}

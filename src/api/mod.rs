//! HTTP façade (§4.6): the 14 routes of §6.1, mounted under `/sandbox`.
//!
//! Grounded on `local_api.py`'s FastAPI route table for the route set, and on
//! `testimages/simple_web_server/src/main.rs`'s `Router::new().route(...)` /
//! `axum::serve(listener, app.into_make_service())` for the router construction idiom itself.
//! `runtime.rs`'s `shutdown_signal` is grounded separately (see its own doc comment).

pub mod dto;
pub mod handlers;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use handlers::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sandbox/create", post(handlers::create_sandbox))
        .route("/sandbox/list", get(handlers::list_sandboxes))
        .route("/sandbox/:project_id", get(handlers::get_sandbox))
        .route("/sandbox/:project_id/start", post(handlers::start_sandbox))
        .route("/sandbox/:project_id/stop", post(handlers::stop_sandbox))
        .route("/sandbox/:project_id", delete(handlers::delete_sandbox))
        .route("/sandbox/:project_id/execute", post(handlers::execute_command))
        .route("/sandbox/:project_id/files", get(handlers::list_files))
        .route("/sandbox/:project_id/files", post(handlers::create_file_or_directory))
        .route("/sandbox/:project_id/files/content", get(handlers::read_file_content))
        .route("/sandbox/:project_id/files/content", put(handlers::write_file_content))
        .route("/sandbox/:project_id/files", delete(handlers::delete_file_or_directory))
        .route("/sandbox/:project_id/upload", post(handlers::upload_file))
        .route("/sandbox/:project_id/download", get(handlers::download_file))
        .route("/sandbox/:project_id/health", get(handlers::health_check))
        .route("/sandbox/:project_id/info", get(handlers::workspace_info))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::WorkspaceAdapter;
    use crate::config::SandboxDefaults;
    use crate::engine::fake::FakeEngine;
    use crate::engine::ContainerEngine;
    use crate::sandbox::manager::SandboxManager;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_state() -> AppState {
        let engine: Arc<dyn ContainerEngine> = Arc::new(FakeEngine::new());
        let manager = SandboxManager::new(engine, "suna-sandbox-network", "local-suna-sandbox:latest")
            .await
            .unwrap();
        AppState {
            adapter: Arc::new(WorkspaceAdapter::new(manager)),
            defaults: SandboxDefaults::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn create_then_get_round_trips_through_the_router() {
        let app = router(test_state().await);

        let create_req = Request::builder()
            .method("POST")
            .uri("/sandbox/create")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"project_id":"p1"}"#))
            .unwrap();
        let resp = app.clone().oneshot(create_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let get_req = Request::builder().uri("/sandbox/p1").body(Body::empty()).unwrap();
        let resp = app.oneshot(get_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn getting_an_unknown_project_is_404() {
        let app = router(test_state().await);
        let req = Request::builder().uri("/sandbox/nope").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

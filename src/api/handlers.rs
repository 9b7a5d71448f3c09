//! One handler per route of §6.1, translating HTTP requests into
//! [`crate::adapter::WorkspaceAdapter`] calls and shaping the JSON response.
//!
//! Grounded on `local_api.py`'s FastAPI route bodies, translated into axum extractors. Query-
//! string `path` parameters are sanitized with [`crate::toolbase::clean_path`]/`validate_path`
//! after axum's `Query` extractor has already URL-decoded them, matching §4.6's explicit
//! "decode before sanitize" ordering.

use std::sync::Arc;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::adapter::{CommandResult, FileEntry, HealthStatus, WorkspaceAdapter};
use crate::config::SandboxDefaults;
use crate::error::ApiError;
use crate::sandbox::SandboxView;
use crate::toolbase::{clean_path, validate_path};

use super::dto::{
    CommandRequest, CreateSandboxRequest, DownloadResponse, FileContentResponse, FileCreateRequest,
    FileUpdateRequest, MessageResponse, PathQuery, UploadResponse,
};

#[derive(Clone)]
pub struct AppState {
    pub adapter: Arc<WorkspaceAdapter>,
    pub defaults: SandboxDefaults,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(MessageResponse { message: self.to_string(), path: None })).into_response()
    }
}

/// Sanitizes a query-string path and rejects anything that doesn't resolve under `/workspace`.
fn sanitize_path(raw: &str) -> Result<String, ApiError> {
    let cleaned = clean_path(raw);
    if !validate_path(&cleaned) {
        return Err(ApiError::BadRequest(format!("unsafe path: {raw}")));
    }
    Ok(cleaned)
}

pub async fn create_sandbox(
    State(state): State<AppState>,
    Json(req): Json<CreateSandboxRequest>,
) -> Result<Json<SandboxView>, ApiError> {
    let overrides = req.overrides();
    let view = state
        .adapter
        .create_workspace(&req.project_id, &state.defaults, &overrides)
        .await?;
    Ok(Json(view))
}

pub async fn list_sandboxes(State(state): State<AppState>) -> Json<Vec<SandboxView>> {
    Json(state.adapter.list_workspaces().await)
}

pub async fn get_sandbox(State(state): State<AppState>, Path(project_id): Path<String>) -> Result<Json<SandboxView>, ApiError> {
    state
        .adapter
        .get_workspace(&project_id)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn start_sandbox(State(state): State<AppState>, Path(project_id): Path<String>) -> Result<Json<MessageResponse>, ApiError> {
    if state.adapter.start_workspace(&project_id).await {
        Ok(Json(MessageResponse { message: "started".to_owned(), path: None }))
    } else {
        Err(ApiError::Internal(format!("failed to start workspace for project {project_id}")))
    }
}

pub async fn stop_sandbox(State(state): State<AppState>, Path(project_id): Path<String>) -> Result<Json<MessageResponse>, ApiError> {
    if state.adapter.stop_workspace(&project_id).await {
        Ok(Json(MessageResponse { message: "stopped".to_owned(), path: None }))
    } else {
        Err(ApiError::Internal(format!("failed to stop workspace for project {project_id}")))
    }
}

pub async fn delete_sandbox(State(state): State<AppState>, Path(project_id): Path<String>) -> Result<Json<MessageResponse>, ApiError> {
    if state.adapter.delete_workspace(&project_id).await {
        Ok(Json(MessageResponse { message: "deleted".to_owned(), path: None }))
    } else {
        Err(ApiError::Internal(format!("failed to delete workspace for project {project_id}")))
    }
}

pub async fn execute_command(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<CommandResult>, ApiError> {
    let workdir = sanitize_path(&req.workdir)?;
    let result = state.adapter.execute_command(&project_id, &req.command, &workdir).await?;
    Ok(Json(result))
}

pub async fn list_files(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let path = sanitize_path(&query.path)?;
    let files = state.adapter.list_files(&project_id, &path).await?;
    Ok(Json(files))
}

pub async fn create_file_or_directory(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Json(req): Json<FileCreateRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let path = sanitize_path(&req.path)?;
    if req.is_directory {
        state.adapter.create_directory(&project_id, &path).await?;
    } else {
        state
            .adapter
            .upload_file(&project_id, &path, req.content.as_bytes())
            .await
            .map_err(ApiError::from)?;
    }
    Ok(Json(MessageResponse { message: "created".to_owned(), path: Some(path) }))
}

pub async fn read_file_content(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<FileContentResponse>, ApiError> {
    let path = sanitize_path(&query.path)?;
    let data = state.adapter.download_file(&project_id, &path).await.map_err(ApiError::from)?;
    let content = String::from_utf8_lossy(&data).into_owned();
    Ok(Json(FileContentResponse { content, path }))
}

pub async fn write_file_content(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PathQuery>,
    Json(req): Json<FileUpdateRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let path = sanitize_path(&query.path)?;
    state
        .adapter
        .upload_file(&project_id, &path, req.content.as_bytes())
        .await
        .map_err(ApiError::from)?;
    Ok(Json(MessageResponse { message: "written".to_owned(), path: Some(path) }))
}

pub async fn delete_file_or_directory(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    let path = sanitize_path(&query.path)?;
    if path == "/workspace" {
        return Err(ApiError::BadRequest("cannot delete the workspace root".to_owned()));
    }
    let result = state
        .adapter
        .execute_command(&project_id, &format!("rm -rf '{path}'"), "/workspace")
        .await?;
    if result.success {
        Ok(Json(MessageResponse { message: "deleted".to_owned(), path: Some(path) }))
    } else {
        Err(ApiError::Internal(result.stderr))
    }
}

pub async fn upload_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PathQuery>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let dir = sanitize_path(&query.path)?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
        .ok_or_else(|| ApiError::BadRequest("missing file field".to_owned()))?;
    let filename = field.file_name().map(str::to_owned).unwrap_or_else(|| "upload.bin".to_owned());
    let data = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let remote_path = format!("{}/{}", dir.trim_end_matches('/'), filename);
    state
        .adapter
        .upload_file(&project_id, &remote_path, &data)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(UploadResponse {
        message: "uploaded".to_owned(),
        path: remote_path,
        filename,
        size: data.len(),
    }))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let path = sanitize_path(&query.path)?;
    let data = state.adapter.download_file(&project_id, &path).await.map_err(ApiError::from)?;
    let filename = std::path::Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.clone());

    Ok(Json(DownloadResponse {
        filename,
        size: data.len(),
        content: BASE64.encode(&data),
    }))
}

pub async fn health_check(State(state): State<AppState>, Path(project_id): Path<String>) -> Json<HealthStatus> {
    Json(state.adapter.health_check(&project_id).await)
}

pub async fn workspace_info(State(state): State<AppState>, Path(project_id): Path<String>) -> Result<Response, ApiError> {
    let info = state.adapter.get_workspace_info(&project_id).await?;
    Ok(Json(info).into_response())
}

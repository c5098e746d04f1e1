use crate::api::rest::{ApiResult, AppState};
use crate::db::models::{Camera, CameraInput};
use crate::db::repositories::CamerasRepository;
use crate::error::Error;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use log::{error, info};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Response for delete operations
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub message: String,
}

/// Create camera controller router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_cameras).post(create_camera))
        .route(
            "/:id",
            get(get_camera).put(update_camera).delete(delete_camera),
        )
}

fn repository(state: &AppState) -> CamerasRepository {
    CamerasRepository::new(Arc::clone(&state.db_pool))
}

fn parse_id(id: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(id).map_err(|_| Error::Validation(format!("Invalid camera id: {}", id)))
}

/// List every camera, newest first
pub async fn list_cameras(State(state): State<AppState>) -> ApiResult<Json<Vec<Camera>>> {
    let cameras = repository(&state).get_all().await.map_err(|e| {
        error!("Failed to list cameras: {}", e);
        e
    })?;
    Ok(Json(cameras))
}

pub async fn create_camera(
    State(state): State<AppState>,
    Json(input): Json<CameraInput>,
) -> ApiResult<(StatusCode, Json<Camera>)> {
    // Reject bad forms before touching the pool
    input.validate()?;

    let camera = repository(&state).create(&input).await.map_err(|e| {
        error!("Failed to create camera {}: {}", input.name, e);
        e
    })?;
    info!("Camera {} added ({})", camera.name, camera.id);
    Ok((StatusCode::CREATED, Json(camera)))
}

pub async fn get_camera(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Camera>> {
    let id = parse_id(&id)?;
    repository(&state)
        .get_by_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("Camera {} not found", id)).into())
}

pub async fn update_camera(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(input): Json<CameraInput>,
) -> ApiResult<Json<Camera>> {
    let id = parse_id(&id)?;
    input.validate()?;

    repository(&state)
        .update(&id, &input)
        .await
        .map_err(|e| {
            error!("Failed to update camera {}: {}", id, e);
            e
        })?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("Camera {} not found", id)).into())
}

pub async fn delete_camera(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<DeleteResponse>> {
    let id = parse_id(&id)?;

    if !repository(&state).delete(&id).await? {
        return Err(Error::NotFound(format!("Camera {} not found", id)).into());
    }
    info!("Camera {} deleted", id);
    Ok(Json(DeleteResponse {
        message: "Deleted successfully".to_string(),
    }))
}

use crate::api::rest::{ApiResult, AppState};
use crate::db::models::Camera;
use crate::detection::{eligible_camera, eligible_cameras, SessionSnapshot};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use log::{error, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectCameraRequest {
    pub camera_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SelectCameraResponse {
    pub message: String,
    pub camera: Camera,
}

/// Create detection controller router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/cameras", get(list_eligible_cameras))
        .route("/select", post(select_camera))
        .route("/session", get(get_session))
        .route("/frame", get(get_frame))
}

/// Cameras with a sample video. A failed lookup also raises a toast.
pub async fn list_eligible_cameras(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<Camera>>> {
    let cameras = eligible_cameras(state.catalog.as_ref(), &state.notifier).await?;
    Ok(Json(cameras))
}

pub async fn select_camera(
    State(state): State<AppState>,
    Json(request): Json<SelectCameraRequest>,
) -> ApiResult<(StatusCode, Json<SelectCameraResponse>)> {
    let camera = eligible_camera(state.catalog.as_ref(), &request.camera_id).await?;

    state.detection.select_camera(camera.clone()).map_err(|e| {
        error!("Failed to start detection for {}: {}", camera.name, e);
        e
    })?;
    info!("Detection requested for camera {}", camera.name);

    Ok((
        StatusCode::ACCEPTED,
        Json(SelectCameraResponse {
            message: format!("Starting detection for {}", camera.name),
            camera,
        }),
    ))
}

pub async fn get_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.detection.snapshot())
}

/// Latest painted frame, 204 while the canvas is empty
pub async fn get_frame(State(state): State<AppState>) -> ApiResult<Response> {
    let frame = state.detection.frame_jpeg().map_err(|e| {
        error!("Failed to encode frame: {}", e);
        e
    })?;

    Ok(match frame {
        Some(jpeg) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::rest::tests::test_state;
    use crate::detection::catalog::tests::camera;
    use crate::messaging::EventType;
    use std::time::Duration;

    #[tokio::test]
    async fn lists_only_cameras_with_sample_video() {
        let state = test_state(Some(vec![
            camera("Gate", Some("/accident_videos/gate.mp4")),
            camera("Lobby", None),
        ]));

        let Json(cameras) = list_eligible_cameras(State(state)).await.unwrap();
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].name, "Gate");
    }

    #[tokio::test]
    async fn camera_list_failure_is_toasted_and_returned() {
        let state = test_state(None);
        let mut toasts = state.notifier.subscribe();

        let err = list_eligible_cameras(State(state)).await.unwrap_err();
        assert_eq!(err.status, 502);

        let toast = toasts.recv().await.unwrap();
        assert_eq!(toast.event_type, EventType::CameraListUnavailable);
    }

    #[tokio::test]
    async fn selecting_starts_a_session() {
        let gate = camera("Gate", Some("/accident_videos/gate.mp4"));
        let state = test_state(Some(vec![gate.clone()]));
        let mut updates = state.detection.subscribe();

        let (status, Json(body)) = select_camera(
            State(state.clone()),
            Json(SelectCameraRequest { camera_id: gate.id }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body.camera.id, gate.id);

        let selected = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if updates.borrow_and_update().camera.is_some() {
                    return true;
                }
                if updates.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false);
        assert!(selected);

        let Json(snapshot) = get_session(State(state)).await;
        assert_eq!(snapshot.camera.map(|c| c.id), Some(gate.id));
    }

    #[tokio::test]
    async fn unknown_camera_cannot_be_selected() {
        let state = test_state(Some(vec![camera("Gate", Some("/v.mp4"))]));

        let err = select_camera(
            State(state),
            Json(SelectCameraRequest {
                camera_id: Uuid::new_v4(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, 404);
    }

    #[tokio::test]
    async fn empty_canvas_has_no_frame() {
        let state = test_state(Some(vec![]));

        let response = get_frame(State(state)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}

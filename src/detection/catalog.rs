use crate::db::models::Camera;
use crate::db::repositories::CamerasRepository;
use crate::error::Error;
use crate::messaging::{EventType, Notification, Notifier};
use anyhow::Result;
use async_trait::async_trait;
use log::error;
use uuid::Uuid;

/// Where the detection session looks cameras up
#[async_trait]
pub trait CameraCatalog: Send + Sync {
    async fn list(&self) -> Result<Vec<Camera>>;

    async fn get(&self, id: &Uuid) -> Result<Option<Camera>>;
}

#[async_trait]
impl CameraCatalog for CamerasRepository {
    async fn list(&self) -> Result<Vec<Camera>> {
        self.get_all().await
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Camera>> {
        self.get_by_id(id).await
    }
}

/// Cameras that can back a detection session. A failed lookup is surfaced to
/// the user as a notification and no selection is offered.
pub async fn eligible_cameras(
    catalog: &dyn CameraCatalog,
    notifier: &dyn Notifier,
) -> Result<Vec<Camera>, Error> {
    match catalog.list().await {
        Ok(cameras) => Ok(cameras
            .into_iter()
            .filter(Camera::is_detection_eligible)
            .collect()),
        Err(e) => {
            error!("Failed to load cameras: {}", e);
            notifier.notify(
                Notification::new(EventType::CameraListUnavailable, "Error loading cameras", e.to_string())
                    .destructive(),
            );
            Err(Error::Camera(format!("Failed to load camera data: {}", e)))
        }
    }
}

/// Look up one camera for selection, rejecting ones without a sample video
pub async fn eligible_camera(catalog: &dyn CameraCatalog, id: &Uuid) -> Result<Camera, Error> {
    let camera = catalog
        .get(id)
        .await
        .map_err(|e| Error::Camera(format!("Failed to load camera {}: {}", id, e)))?
        .ok_or_else(|| Error::NotFound(format!("Camera {} not found", id)))?;

    if !camera.is_detection_eligible() {
        return Err(Error::Validation(format!(
            "Camera {} has no accident video to analyse",
            camera.name
        )));
    }
    Ok(camera)
}

use crate::{
    db::models::{Camera, CameraDb, CameraInput},
    error::Error,
};
use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const CAMERA_COLUMNS: &str = "id, name, rtsp_url, latitude, longitude, status, created_at, \
                              accident_video_url, has_accident_video";

/// Cameras repository for handling camera operations
#[derive(Clone)]
pub struct CamerasRepository {
    pool: Arc<PgPool>,
}

impl CamerasRepository {
    /// Create a new cameras repository
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create a new camera
    pub async fn create(&self, input: &CameraInput) -> Result<Camera> {
        input.validate()?;
        info!("Creating new camera: {}", input.name);

        let video_url = input.video_url();
        let result = sqlx::query_as::<_, CameraDb>(&format!(
            r#"
            INSERT INTO cctvs (
                id, name, rtsp_url, latitude, longitude, status, created_at,
                accident_video_url, has_accident_video
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            CAMERA_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(input.name.trim())
        .bind(&input.rtsp_url)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(input.status_or_default().to_string())
        .bind(Utc::now())
        .bind(&video_url)
        .bind(video_url.is_some())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create camera: {}", e)))?;

        Ok(Camera::from(result))
    }

    /// Get camera by ID
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, CameraDb>(&format!(
            "SELECT {} FROM cctvs WHERE id = $1",
            CAMERA_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera by ID: {}", e)))?;

        Ok(result.map(Camera::from))
    }

    /// Get all cameras
    pub async fn get_all(&self) -> Result<Vec<Camera>> {
        let result = sqlx::query_as::<_, CameraDb>(&format!(
            "SELECT {} FROM cctvs ORDER BY created_at DESC",
            CAMERA_COLUMNS
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get all cameras: {}", e)))?;

        Ok(result.into_iter().map(Camera::from).collect())
    }

    /// Update camera from the edit form
    pub async fn update(&self, id: &Uuid, input: &CameraInput) -> Result<Option<Camera>> {
        input.validate()?;

        let video_url = input.video_url();
        let result = sqlx::query_as::<_, CameraDb>(&format!(
            r#"
            UPDATE cctvs
            SET name = $1, rtsp_url = $2, latitude = $3, longitude = $4, status = $5,
                accident_video_url = $6, has_accident_video = $7
            WHERE id = $8
            RETURNING {}
            "#,
            CAMERA_COLUMNS
        ))
        .bind(input.name.trim())
        .bind(&input.rtsp_url)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(input.status_or_default().to_string())
        .bind(&video_url)
        .bind(video_url.is_some())
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update camera: {}", e)))?;

        if result.is_some() {
            info!("Updated camera {}", id);
        }
        Ok(result.map(Camera::from))
    }

    /// Delete camera
    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cctvs WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete camera: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }
}

use crate::error::Error;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

static RTSP_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^rtsp://.+").expect("valid regex"));

/// Operational status of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Active,
    Inactive,
}

impl Display for CameraStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

impl FromStr for CameraStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(Error::Validation(format!("Unknown camera status: {}", other))),
        }
    }
}

/// Camera model as exposed to the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Camera {
    pub id: Uuid,
    pub name: String,
    pub rtsp_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: CameraStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accident_video_url: Option<String>,
    #[serde(default)]
    pub has_accident_video: bool,
}

impl Camera {
    /// Only cameras carrying a sample video can back a detection session
    pub fn is_detection_eligible(&self) -> bool {
        self.has_accident_video
            && self
                .accident_video_url
                .as_deref()
                .map_or(false, |url| !url.trim().is_empty())
    }
}

/// Row layout of the `cctvs` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CameraDb {
    pub id: Uuid,
    pub name: String,
    pub rtsp_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub accident_video_url: Option<String>,
    pub has_accident_video: bool,
}

impl From<CameraDb> for Camera {
    fn from(row: CameraDb) -> Self {
        Self {
            id: row.id,
            name: row.name,
            rtsp_url: row.rtsp_url,
            latitude: row.latitude,
            longitude: row.longitude,
            // Rows written outside this service may carry free-form status text
            status: row.status.parse().unwrap_or(CameraStatus::Inactive),
            created_at: row.created_at,
            accident_video_url: row.accident_video_url,
            has_accident_video: row.has_accident_video,
        }
    }
}

/// Payload of the add and edit forms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInput {
    pub name: String,
    pub rtsp_url: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub status: Option<CameraStatus>,
    #[serde(default)]
    pub accident_video_url: Option<String>,
}

impl CameraInput {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("Camera name is required".to_string()));
        }
        if !RTSP_URL.is_match(&self.rtsp_url) {
            return Err(Error::Validation(
                "RTSP URL must start with rtsp:// followed by an address".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(Error::Validation(format!(
                "Latitude out of range: {}",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Error::Validation(format!(
                "Longitude out of range: {}",
                self.longitude
            )));
        }
        Ok(())
    }

    /// Normalized sample video URL, empty strings count as absent
    pub fn video_url(&self) -> Option<String> {
        self.accident_video_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    }

    pub fn status_or_default(&self) -> CameraStatus {
        self.status.unwrap_or(CameraStatus::Active)
    }
}

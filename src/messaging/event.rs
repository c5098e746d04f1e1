use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Event types surfaced to the dashboard as notifications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    // Detection events
    AccidentDetected,
    DetectionError,

    // Media events
    MediaError,

    // Camera directory events
    CameraListUnavailable,

    // Custom event
    Custom(String),
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccidentDetected => write!(f, "detection.accident"),
            Self::DetectionError => write!(f, "detection.error"),
            Self::MediaError => write!(f, "media.error"),
            Self::CameraListUnavailable => write!(f, "camera.list_unavailable"),
            Self::Custom(name) => write!(f, "custom.{}", name),
        }
    }
}

/// Visual weight of a toast
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationVariant {
    Default,
    Destructive,
}

/// Transient user-facing notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique notification ID
    pub id: Uuid,
    pub event_type: EventType,
    /// Camera the notification refers to, if any
    pub camera_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub variant: NotificationVariant,
    /// How long the toast stays visible; `None` leaves it to the client
    pub duration_ms: Option<u64>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Notification {
    pub fn new(
        event_type: EventType,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            camera_id: None,
            title: title.into(),
            description: description.into(),
            variant: NotificationVariant::Default,
            duration_ms: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn destructive(mut self) -> Self {
        self.variant = NotificationVariant::Destructive;
        self
    }

    pub fn for_camera(mut self, camera_id: Uuid) -> Self {
        self.camera_id = Some(camera_id);
        self
    }

    pub fn lasting(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Get the routing key for the notification
    pub fn routing_key(&self) -> String {
        match &self.camera_id {
            Some(id) => format!("{}.{}", self.event_type, id),
            None => self.event_type.to_string(),
        }
    }
}

//! Message contract spoken with the detection backend over `/ws/detect`.
//!
//! Inbound messages are deliberately loose: every field is optional and the
//! state machine treats them as independent flags, so one payload can carry a
//! `type`, an accident report and a log line at the same time.

use crate::db::models::Camera;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

pub const DETECT_PATH: &str = "/ws/detect";

/// Close code browsers report when a connection drops without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Build `{ws|wss}://<host>/ws/detect`
pub fn detection_endpoint(host: &str, secure: bool) -> Result<String, Error> {
    let scheme = if secure { "wss" } else { "ws" };
    let url = Url::parse(&format!("{}://{}{}", scheme, host.trim_end_matches('/'), DETECT_PATH))
        .map_err(|e| Error::Config(format!("Invalid detection backend host {:?}: {}", host, e)))?;
    Ok(url.to_string())
}

/// Control messages we send to the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Ping,
    ProcessVideo {
        video_url: String,
        camera_id: Uuid,
        camera_name: String,
        latitude: f64,
        longitude: f64,
    },
    StartDetection,
    VideoEnded,
}

impl ControlMessage {
    pub fn process_video(camera: &Camera, video_url: &str) -> Self {
        Self::ProcessVideo {
            video_url: video_url.to_string(),
            camera_id: camera.id,
            camera_name: camera.name.clone(),
            latitude: camera.latitude,
            longitude: camera.longitude,
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Severity of a session log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn parse_lenient(value: &str) -> Self {
        match value {
            "warning" | "warn" => Self::Warning,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

pub mod kind {
    pub const READY: &str = "ready";
    pub const FRAME: &str = "frame";
    pub const PROCESSING_COMPLETE: &str = "processing_complete";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
    pub const VIDEO_INFO: &str = "video_info";
}

/// Any message the backend may send
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Base64 JPEG for `frame` messages
    pub frame: Option<String>,
    pub accident_found: Option<bool>,
    #[serde(default)]
    pub accident_detected: bool,
    pub timestamp: Option<f64>,
    pub confidence: Option<f64>,
    pub message: Option<String>,
    severity: Option<String>,
    pub accident_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Protocol(e.to_string()))
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind.as_deref() == Some(kind)
    }

    /// Severity for the `message` log line, `info` when absent or unknown
    pub fn severity(&self) -> Severity {
        self.severity
            .as_deref()
            .map(Severity::parse_lenient)
            .unwrap_or(Severity::Info)
    }

    /// Non-empty log text carried by the message
    pub fn log_text(&self) -> Option<&str> {
        self.message.as_deref().filter(|text| !text.is_empty())
    }

    /// Accident timestamp, `now_ms` when missing or zero
    pub fn accident_timestamp(&self, now_ms: f64) -> f64 {
        match self.timestamp {
            Some(ts) if ts != 0.0 && ts.is_finite() => ts,
            _ => now_ms,
        }
    }
}

/// Payload delivered by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Decode a payload; binary frames are accepted only if they hold JSON text
    pub fn decode(&self) -> Result<InboundMessage, Error> {
        match self {
            Payload::Text(text) => InboundMessage::parse(text),
            Payload::Binary(bytes) => {
                let text = std::str::from_utf8(bytes).map_err(|_| {
                    Error::Protocol("unexpected binary payload".to_string())
                })?;
                InboundMessage::parse(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_mirrors_scheme() {
        assert_eq!(
            detection_endpoint("localhost:8000", false).unwrap(),
            "ws://localhost:8000/ws/detect"
        );
        assert_eq!(
            detection_endpoint("acciwatch.example.com", true).unwrap(),
            "wss://acciwatch.example.com/ws/detect"
        );
        assert!(detection_endpoint("bad host", false).is_err());
    }

    #[test]
    fn control_messages_are_type_tagged() {
        assert_eq!(ControlMessage::Ping.to_json().unwrap(), r#"{"type":"ping"}"#);
        assert_eq!(
            ControlMessage::StartDetection.to_json().unwrap(),
            r#"{"type":"start_detection"}"#
        );
        assert_eq!(
            ControlMessage::VideoEnded.to_json().unwrap(),
            r#"{"type":"video_ended"}"#
        );

        let value: serde_json::Value = serde_json::from_str(
            &ControlMessage::ProcessVideo {
                video_url: "v.mp4".to_string(),
                camera_id: Uuid::nil(),
                camera_name: "Gate".to_string(),
                latitude: 1.0,
                longitude: 2.0,
            }
            .to_json()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(value["type"], "process_video");
        assert_eq!(value["video_url"], "v.mp4");
        assert_eq!(value["camera_name"], "Gate");
    }

    #[test]
    fn inbound_fields_are_independent() {
        let msg = InboundMessage::parse(
            &json!({
                "type": "accident",
                "accident_detected": true,
                "confidence": 0.8,
                "message": "car_car_accident detected at frame 12",
                "severity": "error",
                "timestamp": 1717000000.5
            })
            .to_string(),
        )
        .unwrap();

        assert!(msg.is("accident"));
        assert!(msg.accident_detected);
        assert_eq!(msg.severity(), Severity::Error);
        assert_eq!(msg.log_text(), Some("car_car_accident detected at frame 12"));
        assert_eq!(msg.accident_timestamp(5.0), 1717000000.5);
    }

    #[test]
    fn unknown_severity_falls_back_to_info() {
        let msg = InboundMessage::parse(r#"{"message":"hi","severity":"loud"}"#).unwrap();
        assert_eq!(msg.severity(), Severity::Info);
        let msg = InboundMessage::parse(r#"{"message":""}"#).unwrap();
        assert_eq!(msg.log_text(), None);
    }

    #[test]
    fn zero_timestamp_means_now() {
        let msg = InboundMessage::parse(r#"{"accident_detected":true,"timestamp":0}"#).unwrap();
        assert_eq!(msg.accident_timestamp(42.0), 42.0);
    }

    #[test]
    fn malformed_and_binary_payloads_are_protocol_errors() {
        assert!(matches!(
            Payload::Text("{not json".to_string()).decode(),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            Payload::Binary(vec![0xff, 0xd8, 0xff]).decode(),
            Err(Error::Protocol(_))
        ));
        assert!(Payload::Binary(br#"{"type":"pong"}"#.to_vec())
            .decode()
            .unwrap()
            .is(kind::PONG));
    }
}

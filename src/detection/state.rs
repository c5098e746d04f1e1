//! Detection state machine.
//!
//! `DetectionSession` reduces inbound protocol messages and session events into
//! the observable session state. It never performs I/O: anything that has to
//! leave the reducer (painting a frame, raising an alert) is returned as an
//! [`Effect`] for the controller to carry out.

use crate::config::PipelineMode;
use crate::db::models::Camera;
use crate::detection::protocol::{kind, InboundMessage, Severity, ABNORMAL_CLOSURE};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Where a detection session currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No camera selected
    Idle,
    /// Socket is being opened
    Connecting,
    /// Socket is open, waiting for the backend's `ready`
    AwaitingReady,
    /// Backend is ready and frames are flowing
    Streaming,
    /// Backend finished processing the video; terminal
    Completed,
    /// Transport, backend or media failure; recoverable by reconnect or reselect
    Errored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub message: String,
    pub severity: Severity,
}

/// Work the reducer hands back to the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// The message belongs to the frame pipeline
    ForwardToPipeline,
    /// The backend signalled readiness
    BackendReady,
    /// A new accident was accepted
    Alert { confidence: f64, timestamp: f64 },
    /// The backend reported a processing failure
    BackendError(String),
}

#[derive(Debug, Clone)]
pub struct DetectionSession {
    phase: SessionPhase,
    connection: ConnectionStatus,
    backend_ready: bool,
    accident_detected: bool,
    video_loaded: bool,
    last_processed_timestamp: f64,
    log: Vec<LogEntry>,
}

impl Default for DetectionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionSession {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            connection: ConnectionStatus::Disconnected,
            backend_ready: false,
            accident_detected: false,
            video_loaded: false,
            last_processed_timestamp: 0.0,
            log: Vec::new(),
        }
    }

    /// Drop everything, including the log
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection
    }

    /// Set by `ready`, cleared only when the connection goes away
    pub fn backend_ready(&self) -> bool {
        self.backend_ready
    }

    pub fn detection_active(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::AwaitingReady | SessionPhase::Streaming
        )
    }

    pub fn processing_complete(&self) -> bool {
        self.phase == SessionPhase::Completed
    }

    pub fn accident_detected(&self) -> bool {
        self.accident_detected
    }

    pub fn video_loaded(&self) -> bool {
        self.video_loaded
    }

    pub fn last_processed_timestamp(&self) -> f64 {
        self.last_processed_timestamp
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn push_log(&mut self, message: impl Into<String>, severity: Severity) {
        self.log.push(LogEntry {
            time: Utc::now(),
            message: message.into(),
            severity,
        });
    }

    pub fn mark_video_loaded(&mut self) {
        self.video_loaded = true;
    }

    /// Mark detection inactive unless the session already finished.
    /// Connection and readiness flags are left alone.
    fn fail(&mut self) {
        if !matches!(self.phase, SessionPhase::Completed | SessionPhase::Idle) {
            self.phase = SessionPhase::Errored;
        }
    }

    pub fn on_connecting(&mut self) {
        self.connection = ConnectionStatus::Connecting;
        self.backend_ready = false;
        self.phase = SessionPhase::Connecting;
        self.push_log("Connecting to detection service...", Severity::Info);
    }

    /// Opening the socket failed before the transport produced any event
    pub fn on_connect_failed(&mut self, reason: &str) {
        self.connection = ConnectionStatus::Disconnected;
        self.backend_ready = false;
        self.fail();
        self.push_log(format!("Connection error: {}", reason), Severity::Error);
    }

    pub fn on_open(&mut self) {
        self.connection = ConnectionStatus::Connected;
        self.phase = SessionPhase::AwaitingReady;
        self.push_log("Connected to detection service", Severity::Info);
    }

    pub fn on_close(&mut self, code: u16, reason: &str) {
        self.connection = ConnectionStatus::Disconnected;
        self.backend_ready = false;
        self.fail();

        let reason = if !reason.is_empty() {
            reason
        } else if code == ABNORMAL_CLOSURE {
            "Connection closed abnormally"
        } else {
            "Connection closed"
        };
        self.push_log(format!("Disconnected: {}", reason), Severity::Warning);
    }

    pub fn on_error(&mut self) {
        self.connection = ConnectionStatus::Disconnected;
        self.backend_ready = false;
        self.fail();
        self.push_log("WebSocket connection error", Severity::Error);
    }

    pub fn on_unparseable(&mut self, reason: &str) {
        self.push_log(format!("Error parsing message: {}", reason), Severity::Warning);
    }

    /// Video decode, playback or capture failure
    pub fn on_media_error(&mut self, reason: &str) {
        self.fail();
        self.push_log(format!("Media error: {}", reason), Severity::Error);
    }

    /// Reduce one inbound message. Fields are independent, so several effects
    /// may come out of a single message.
    pub fn apply(&mut self, msg: &InboundMessage, now_ms: f64) -> Vec<Effect> {
        let mut effects = Vec::new();

        if msg.is(kind::READY) {
            self.backend_ready = true;
            if matches!(
                self.phase,
                SessionPhase::Connecting | SessionPhase::AwaitingReady | SessionPhase::Streaming
            ) {
                self.phase = SessionPhase::Streaming;
            }
            self.push_log("Backend is ready to process video", Severity::Info);
            effects.push(Effect::BackendReady);
        }

        if msg.is(kind::FRAME) || msg.is(kind::VIDEO_INFO) {
            effects.push(Effect::ForwardToPipeline);
        }

        if msg.is(kind::PROCESSING_COMPLETE) {
            self.phase = SessionPhase::Completed;
            self.push_log("Video processing completed", Severity::Info);

            match msg.accident_found {
                Some(true) => {
                    self.push_log("Accident was detected in this video", Severity::Warning)
                }
                Some(false) => self.push_log("No accidents detected in this video", Severity::Info),
                None => {}
            }
        }

        if msg.is(kind::ERROR) {
            self.fail();
            effects.push(Effect::BackendError(
                msg.log_text()
                    .unwrap_or("Detection backend reported an error")
                    .to_string(),
            ));
        }

        if msg.accident_detected {
            let timestamp = msg.accident_timestamp(now_ms);

            if timestamp > self.last_processed_timestamp {
                self.last_processed_timestamp = timestamp;
                self.accident_detected = true;

                let confidence = msg.confidence.unwrap_or(0.0);
                self.push_log(
                    format!(
                        "⚠️ ACCIDENT DETECTED! (confidence: {:.1}%)",
                        confidence * 100.0
                    ),
                    Severity::Error,
                );
                effects.push(Effect::Alert {
                    confidence,
                    timestamp,
                });
            }
        }

        if let Some(text) = msg.log_text() {
            self.push_log(text, msg.severity());
        }

        if msg.is(kind::PONG) {
            debug!("Received pong from server");
        }

        effects
    }

    pub fn snapshot(&self, camera: Option<&Camera>, mode: PipelineMode) -> SessionSnapshot {
        SessionSnapshot {
            camera: camera.cloned(),
            mode,
            phase: self.phase,
            connection_status: self.connection,
            backend_ready: self.backend_ready(),
            detection_active: self.detection_active(),
            accident_detected: self.accident_detected,
            video_loaded: self.video_loaded,
            processing_complete: self.processing_complete(),
            last_processed_timestamp: self.last_processed_timestamp,
            log: self.log.clone(),
        }
    }
}

/// What the dashboard renders
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub camera: Option<Camera>,
    pub mode: PipelineMode,
    pub phase: SessionPhase,
    pub connection_status: ConnectionStatus,
    pub backend_ready: bool,
    pub detection_active: bool,
    pub accident_detected: bool,
    pub video_loaded: bool,
    pub processing_complete: bool,
    pub last_processed_timestamp: f64,
    pub log: Vec<LogEntry>,
}

impl SessionSnapshot {
    pub fn idle(mode: PipelineMode) -> Self {
        DetectionSession::new().snapshot(None, mode)
    }
}

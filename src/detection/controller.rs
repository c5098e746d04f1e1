//! Session lifecycle controller.
//!
//! Owns the one live socket, pipeline and timer set of the selected camera.
//! Everything that happens to a session arrives as an [`Event`] and is handled
//! to completion before the next one, so no locking is needed inside.

use crate::config::DetectionConfig;
use crate::db::models::Camera;
use crate::detection::pipeline::{FramePipeline, PipelineContext};
use crate::detection::protocol::{detection_endpoint, ControlMessage, Payload, Severity};
use crate::detection::socket::{reconnect_backoff, Connector, SocketEvent, SocketHandle};
use crate::detection::state::{DetectionSession, Effect, SessionSnapshot};
use crate::detection::timers::{Scheduler, TimerKind, TimerSlots, TimerTick};
use crate::detection::video::VideoEvent;
use crate::error::Error;
use crate::messaging::{EventType, Notification, Notifier};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Input of the controller
#[derive(Debug, Clone)]
pub enum Event {
    Socket { connection: u64, event: SocketEvent },
    Timer(TimerTick),
    Video { session: u64, event: VideoEvent },
    FrameSent {
        connection: u64,
        result: Result<(), Error>,
    },
}

pub type EventSink = mpsc::UnboundedSender<Event>;

fn now_ms() -> f64 {
    Utc::now().timestamp_millis() as f64
}

pub struct SessionController {
    config: DetectionConfig,
    endpoint: String,
    connector: Box<dyn Connector>,
    scheduler: Box<dyn Scheduler>,
    pipeline: Box<dyn FramePipeline>,
    notifier: Arc<dyn Notifier>,
    camera: Option<Camera>,
    state: DetectionSession,
    socket: Option<Box<dyn SocketHandle>>,
    timers: TimerSlots,
    session_id: u64,
    connection_id: u64,
}

impl SessionController {
    pub fn new(
        config: DetectionConfig,
        connector: Box<dyn Connector>,
        scheduler: Box<dyn Scheduler>,
        pipeline: Box<dyn FramePipeline>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let endpoint = detection_endpoint(&config.backend_host, config.secure)?;
        Ok(Self {
            config,
            endpoint,
            connector,
            scheduler,
            pipeline,
            notifier,
            camera: None,
            state: DetectionSession::new(),
            socket: None,
            timers: TimerSlots::default(),
            session_id: 0,
            connection_id: 0,
        })
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    pub fn state(&self) -> &DetectionSession {
        &self.state
    }

    pub fn timers(&self) -> &TimerSlots {
        &self.timers
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot(self.camera.as_ref(), self.pipeline.mode())
    }

    fn with_pipeline<R>(
        &mut self,
        f: impl FnOnce(&mut dyn FramePipeline, &mut PipelineContext<'_>) -> R,
    ) -> R {
        let mut ctx = PipelineContext {
            session_id: self.session_id,
            state: &mut self.state,
            socket: self.socket.as_deref(),
            timers: &mut self.timers,
            scheduler: self.scheduler.as_ref(),
        };
        f(self.pipeline.as_mut(), &mut ctx)
    }

    /// Replace whatever session is running with a fresh one for `camera`
    pub fn select_camera(&mut self, camera: Camera) {
        self.teardown();

        self.session_id += 1;
        info!(
            "Starting detection session {} for camera {} ({})",
            self.session_id, camera.name, camera.id
        );
        self.camera = Some(camera.clone());
        self.state
            .push_log("Initializing accident detection system...", Severity::Info);

        if let Err(e) = self.with_pipeline(|pipeline, ctx| pipeline.start(ctx, &camera)) {
            self.media_error(e);
        }

        self.connect();
    }

    /// Cancel every timer, close the socket, release media and forget the
    /// session. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.timers.cancel_all();
        if let Some(mut socket) = self.socket.take() {
            debug!("Closing detection socket {}", self.connection_id);
            socket.close();
        }
        self.pipeline.teardown();
        self.state.reset();
        if let Some(camera) = self.camera.take() {
            info!("Detection session for camera {} torn down", camera.name);
        }
    }

    fn connect(&mut self) {
        self.state.on_connecting();
        self.connection_id += 1;

        match self.connector.open(&self.endpoint, self.connection_id) {
            Ok(socket) => self.socket = Some(socket),
            Err(e) => {
                error!("Failed to connect to detection service: {}", e);
                self.state.on_connect_failed(&e.to_string());
            }
        }
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Socket { connection, event } => {
                if self.socket.is_none() || connection != self.connection_id {
                    debug!("Dropping event from stale connection {}", connection);
                    return;
                }
                match event {
                    SocketEvent::Open => self.on_open(),
                    SocketEvent::Message(payload) => self.on_message(&payload),
                    SocketEvent::Close { code, reason } => self.on_close(code, &reason),
                    SocketEvent::Error(reason) => {
                        warn!("Detection socket error: {}", reason);
                        self.state.on_error();
                    }
                }
            }
            Event::Timer(tick) => {
                if tick.session != self.session_id || self.camera.is_none() {
                    debug!("Dropping {:?} tick from stale session {}", tick.kind, tick.session);
                    return;
                }
                match tick.kind {
                    TimerKind::Heartbeat => self.on_heartbeat(),
                    TimerKind::Sampling => self.on_sample_tick(),
                    TimerKind::Reconnect => {
                        self.timers.release(TimerKind::Reconnect);
                        self.on_reconnect_due();
                    }
                }
            }
            Event::Video { session, event } => {
                if session != self.session_id || self.camera.is_none() {
                    return;
                }
                if let Err(e) = self.with_pipeline(|pipeline, ctx| pipeline.on_video_event(ctx, event)) {
                    self.media_error(e);
                }
            }
            Event::FrameSent { connection, result } => {
                // The busy flag was already cleared when that socket closed
                if connection == self.connection_id && self.socket.is_some() {
                    self.pipeline.frame_sent(result);
                }
            }
        }
    }

    fn on_open(&mut self) {
        self.state.on_open();

        let handle = self.scheduler.every(
            self.config.heartbeat_interval(),
            TimerTick {
                session: self.session_id,
                kind: TimerKind::Heartbeat,
            },
        );
        self.timers.install(TimerKind::Heartbeat, handle);

        let Some(camera) = self.camera.clone() else {
            return;
        };
        if let Err(e) = self.with_pipeline(|pipeline, ctx| pipeline.on_open(ctx, &camera)) {
            warn!("Failed to send session setup message: {}", e);
        }
        self.poll_pipeline();
    }

    fn on_message(&mut self, payload: &Payload) {
        let msg = match payload.decode() {
            Ok(msg) => msg,
            Err(e) => {
                let reason = match e {
                    Error::Protocol(reason) => reason,
                    other => other.to_string(),
                };
                warn!("Error parsing WebSocket message: {}", reason);
                self.state.on_unparseable(&reason);
                return;
            }
        };
        debug!("Received WebSocket message type: {:?}", msg.kind);

        for effect in self.state.apply(&msg, now_ms()) {
            match effect {
                Effect::ForwardToPipeline => {
                    self.with_pipeline(|pipeline, ctx| pipeline.consume(ctx, &msg))
                }
                Effect::BackendReady => debug!("Detection backend ready"),
                Effect::Alert { confidence, .. } => self.raise_accident_alert(confidence),
                Effect::BackendError(reason) => {
                    error!("Detection backend error: {}", reason);
                    self.notify(
                        Notification::new(EventType::DetectionError, "Detection error", reason)
                            .destructive(),
                    );
                }
            }
        }

        self.poll_pipeline();
    }

    fn on_close(&mut self, code: u16, reason: &str) {
        info!("Detection socket closed with code {}", code);
        self.socket = None;
        self.timers.cancel(TimerKind::Heartbeat);
        self.state.on_close(code, reason);
        self.pipeline.on_close();

        if self.camera.is_some() && self.pipeline.should_reconnect(&self.state) {
            let backoff = reconnect_backoff(code, &self.config);
            self.state.push_log(
                format!(
                    "Attempting to reconnect in {} seconds...",
                    backoff.as_secs_f64()
                ),
                Severity::Info,
            );
            let handle = self.scheduler.once(
                backoff,
                TimerTick {
                    session: self.session_id,
                    kind: TimerKind::Reconnect,
                },
            );
            self.timers.install(TimerKind::Reconnect, handle);
        }
    }

    fn on_reconnect_due(&mut self) {
        if self.camera.is_none() || !self.pipeline.should_reconnect(&self.state) {
            debug!("Reconnect no longer wanted");
            return;
        }
        self.state
            .push_log("Reconnecting to detection service...", Severity::Info);
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
        self.connect();
    }

    fn on_heartbeat(&mut self) {
        let Some(socket) = self.socket.as_ref().filter(|socket| socket.is_open()) else {
            return;
        };
        let sent = ControlMessage::Ping
            .to_json()
            .and_then(|ping| socket.send_text(ping));
        if let Err(e) = sent {
            warn!("Failed to send heartbeat ping: {}", e);
        }
    }

    fn on_sample_tick(&mut self) {
        let Some(frame) = self.with_pipeline(|pipeline, ctx| pipeline.produce(ctx)) else {
            return;
        };
        let sent = match self.socket.as_ref() {
            Some(socket) => socket.send_binary(frame),
            None => Err(Error::Transport("No detection socket".to_string())),
        };
        if let Err(e) = sent {
            self.pipeline.frame_sent(Err(e));
        }
    }

    fn poll_pipeline(&mut self) {
        if let Err(e) = self.with_pipeline(|pipeline, ctx| pipeline.poll(ctx)) {
            self.media_error(e);
        }
    }

    fn raise_accident_alert(&mut self, confidence: f64) {
        let Some(camera) = self.camera.as_ref() else {
            return;
        };
        warn!(
            "Accident detected on camera {} (confidence {:.2})",
            camera.name, confidence
        );
        let notification = Notification::new(
            EventType::AccidentDetected,
            "Accident Detected!",
            format!("Possible accident detected on camera: {}", camera.name),
        )
        .destructive()
        .for_camera(camera.id)
        .lasting(self.config.alert_duration_ms);
        self.notifier.notify(notification);
    }

    fn media_error(&mut self, e: Error) {
        let reason = match e {
            Error::Media(reason) => reason,
            other => other.to_string(),
        };
        error!("Media error: {}", reason);
        self.state.on_media_error(&reason);
        self.notify(Notification::new(EventType::MediaError, "Video error", reason).destructive());
    }

    fn notify(&self, notification: Notification) {
        let notification = match &self.camera {
            Some(camera) => notification.for_camera(camera.id),
            None => notification,
        };
        self.notifier.notify(notification);
    }
}

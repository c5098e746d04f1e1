//! Frame pipelines.
//!
//! Server-push sessions hand the video URL to the backend and paint the
//! annotated frames it streams back. Client-capture sessions play the video
//! locally and upload sampled JPEG frames instead. Both sit behind
//! [`FramePipeline`] so the controller's socket, reconnect and state handling is
//! shared.

use crate::config::{DetectionConfig, PipelineMode};
use crate::db::models::Camera;
use crate::detection::canvas::{encode_jpeg, SharedCanvas};
use crate::detection::protocol::{kind, ControlMessage, InboundMessage, Severity};
use crate::detection::socket::SocketHandle;
use crate::detection::state::DetectionSession;
use crate::detection::timers::{Scheduler, TimerKind, TimerSlots, TimerTick};
use crate::detection::video::{resolve_video_uri, VideoEvent, VideoSource, VideoSourceFactory};
use crate::error::Error;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::time::Duration;

/// Controller resources a pipeline may touch while handling one event
pub struct PipelineContext<'a> {
    pub session_id: u64,
    pub state: &'a mut DetectionSession,
    pub socket: Option<&'a dyn SocketHandle>,
    pub timers: &'a mut TimerSlots,
    pub scheduler: &'a dyn Scheduler,
}

impl PipelineContext<'_> {
    pub fn socket_open(&self) -> bool {
        self.socket.map_or(false, |socket| socket.is_open())
    }

    pub fn send(&self, message: &ControlMessage) -> Result<(), Error> {
        let socket = self
            .socket
            .ok_or_else(|| Error::Transport("No detection socket".to_string()))?;
        socket.send_text(message.to_json()?)
    }
}

pub trait FramePipeline: Send {
    fn mode(&self) -> PipelineMode;

    /// Prepare for a freshly selected camera, before the socket opens
    fn start(&mut self, ctx: &mut PipelineContext<'_>, camera: &Camera) -> Result<(), Error>;

    /// The socket (re)opened
    fn on_open(&mut self, ctx: &mut PipelineContext<'_>, camera: &Camera) -> Result<(), Error>;

    /// Frame-related inbound message
    fn consume(&mut self, ctx: &mut PipelineContext<'_>, msg: &InboundMessage);

    /// Re-evaluate after the session state changed
    fn poll(&mut self, ctx: &mut PipelineContext<'_>) -> Result<(), Error>;

    fn on_video_event(
        &mut self,
        ctx: &mut PipelineContext<'_>,
        event: VideoEvent,
    ) -> Result<(), Error>;

    /// Sampling tick: an encoded frame ready to send, if one should go out now
    fn produce(&mut self, ctx: &mut PipelineContext<'_>) -> Option<Vec<u8>>;

    /// Completion of the last frame returned by [`FramePipeline::produce`]
    fn frame_sent(&mut self, result: Result<(), Error>);

    fn on_close(&mut self);

    /// Whether a dropped connection should be re-established
    fn should_reconnect(&self, state: &DetectionSession) -> bool;

    /// Release media and clear the canvas. Idempotent.
    fn teardown(&mut self);
}

/// Pipeline for the configured mode
pub fn build_pipeline(
    config: &DetectionConfig,
    video: Box<dyn VideoSourceFactory>,
    canvas: SharedCanvas,
) -> Box<dyn FramePipeline> {
    match config.mode {
        PipelineMode::ServerPush => Box::new(ServerPushPipeline::new(canvas)),
        PipelineMode::ClientCapture => Box::new(ClientCapturePipeline::new(video, canvas, config)),
    }
}

pub struct ServerPushPipeline {
    canvas: SharedCanvas,
}

impl ServerPushPipeline {
    pub fn new(canvas: SharedCanvas) -> Self {
        Self { canvas }
    }
}

impl FramePipeline for ServerPushPipeline {
    fn mode(&self) -> PipelineMode {
        PipelineMode::ServerPush
    }

    fn start(&mut self, _ctx: &mut PipelineContext<'_>, _camera: &Camera) -> Result<(), Error> {
        Ok(())
    }

    fn on_open(&mut self, ctx: &mut PipelineContext<'_>, camera: &Camera) -> Result<(), Error> {
        let video_url = camera.accident_video_url.as_deref().unwrap_or_default();
        ctx.send(&ControlMessage::process_video(camera, video_url))?;
        ctx.state
            .push_log("Sent video URL to backend for processing", Severity::Info);
        Ok(())
    }

    fn consume(&mut self, ctx: &mut PipelineContext<'_>, msg: &InboundMessage) {
        if msg.is(kind::VIDEO_INFO) {
            if let (Some(width), Some(height)) = (msg.width, msg.height) {
                self.canvas.lock().ensure_size(width, height);
            }
            return;
        }

        let Some(frame) = msg.frame.as_deref() else {
            debug!("Frame message without image data");
            return;
        };

        match self.canvas.lock().paint_base64(frame) {
            Ok(_) => {
                if !ctx.state.video_loaded() {
                    ctx.state.mark_video_loaded();
                }
            }
            Err(e) => warn!("Failed to display frame: {}", e),
        }
    }

    fn poll(&mut self, _ctx: &mut PipelineContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    fn on_video_event(
        &mut self,
        _ctx: &mut PipelineContext<'_>,
        _event: VideoEvent,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn produce(&mut self, _ctx: &mut PipelineContext<'_>) -> Option<Vec<u8>> {
        None
    }

    fn frame_sent(&mut self, _result: Result<(), Error>) {}

    fn on_close(&mut self) {}

    fn should_reconnect(&self, state: &DetectionSession) -> bool {
        !state.processing_complete()
    }

    fn teardown(&mut self) {
        self.canvas.lock().clear();
    }
}

pub struct ClientCapturePipeline {
    factory: Box<dyn VideoSourceFactory>,
    canvas: SharedCanvas,
    public_dir: PathBuf,
    jpeg_quality: u8,
    sample_interval: Duration,
    video: Option<Box<dyn VideoSource>>,
    playback_started: bool,
    in_flight: bool,
}

impl ClientCapturePipeline {
    pub fn new(
        factory: Box<dyn VideoSourceFactory>,
        canvas: SharedCanvas,
        config: &DetectionConfig,
    ) -> Self {
        Self {
            factory,
            canvas,
            public_dir: config.public_dir.clone(),
            jpeg_quality: config.jpeg_quality,
            sample_interval: config.sample_interval(),
            video: None,
            playback_started: false,
            in_flight: false,
        }
    }

    pub fn playback_started(&self) -> bool {
        self.playback_started
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    fn capture(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let Some(video) = self.video.as_mut() else {
            return Ok(None);
        };
        let Some(frame) = video.capture()? else {
            return Ok(None);
        };

        let encoded = encode_jpeg(&frame, self.jpeg_quality)?;
        self.canvas.lock().paint(&frame);
        Ok(Some(encoded))
    }
}

impl FramePipeline for ClientCapturePipeline {
    fn mode(&self) -> PipelineMode {
        PipelineMode::ClientCapture
    }

    fn start(&mut self, ctx: &mut PipelineContext<'_>, camera: &Camera) -> Result<(), Error> {
        let video_url = camera
            .accident_video_url
            .as_deref()
            .ok_or_else(|| Error::Media(format!("Camera {} has no video", camera.name)))?;
        let uri = resolve_video_uri(video_url, &self.public_dir)?;
        self.video = Some(self.factory.load(&uri, ctx.session_id)?);
        Ok(())
    }

    fn on_open(&mut self, ctx: &mut PipelineContext<'_>, _camera: &Camera) -> Result<(), Error> {
        // A reconnect mid-playback needs a fresh backend session
        if self.playback_started {
            ctx.send(&ControlMessage::StartDetection)?;
            ctx.state
                .push_log("Resumed detection after reconnect", Severity::Info);
        }
        Ok(())
    }

    fn consume(&mut self, _ctx: &mut PipelineContext<'_>, _msg: &InboundMessage) {}

    fn poll(&mut self, ctx: &mut PipelineContext<'_>) -> Result<(), Error> {
        if !(ctx.state.video_loaded() && ctx.state.backend_ready()) || self.playback_started {
            return Ok(());
        }
        let Some(video) = self.video.as_mut() else {
            return Ok(());
        };

        self.playback_started = true;
        if let Err(e) = video.play() {
            warn!("Video playback was rejected: {}", e);
            ctx.state
                .push_log(format!("Autoplay prevented: {}", e), Severity::Warning);
            self.playback_started = false;
        }
        Ok(())
    }

    fn on_video_event(
        &mut self,
        ctx: &mut PipelineContext<'_>,
        event: VideoEvent,
    ) -> Result<(), Error> {
        match event {
            VideoEvent::Loaded { width, height } => {
                info!("Sample video loaded ({}x{})", width, height);
                self.canvas.lock().ensure_size(width, height);
                ctx.state.mark_video_loaded();
                ctx.state.push_log("Video loaded", Severity::Info);
                self.poll(ctx)
            }
            VideoEvent::PlaybackStarted => {
                ctx.state.push_log("Video playback started", Severity::Info);
                if let Err(e) = ctx.send(&ControlMessage::StartDetection) {
                    warn!("Failed to send start_detection: {}", e);
                }
                let handle = ctx.scheduler.every(
                    self.sample_interval,
                    TimerTick {
                        session: ctx.session_id,
                        kind: TimerKind::Sampling,
                    },
                );
                ctx.timers.install(TimerKind::Sampling, handle);
                Ok(())
            }
            VideoEvent::Ended => {
                ctx.timers.cancel(TimerKind::Sampling);
                ctx.state.push_log("Video playback ended", Severity::Info);
                if let Err(e) = ctx.send(&ControlMessage::VideoEnded) {
                    warn!("Failed to send video_ended: {}", e);
                }
                Ok(())
            }
            VideoEvent::Failed(reason) => {
                ctx.timers.cancel(TimerKind::Sampling);
                Err(Error::Media(reason))
            }
        }
    }

    fn produce(&mut self, ctx: &mut PipelineContext<'_>) -> Option<Vec<u8>> {
        if self.in_flight || !ctx.socket_open() {
            return None;
        }

        match self.capture() {
            Ok(Some(frame)) => {
                self.in_flight = true;
                Some(frame)
            }
            Ok(None) => None,
            Err(e) => {
                error!("Error capturing frame: {}", e);
                None
            }
        }
    }

    fn frame_sent(&mut self, result: Result<(), Error>) {
        if let Err(e) = result {
            error!("Error sending frame: {}", e);
        }
        self.in_flight = false;
    }

    fn on_close(&mut self) {
        self.in_flight = false;
    }

    fn should_reconnect(&self, _state: &DetectionSession) -> bool {
        true
    }

    fn teardown(&mut self) {
        if let Some(mut video) = self.video.take() {
            video.stop();
        }
        self.playback_started = false;
        self.in_flight = false;
        self.canvas.lock().clear();
    }
}

//! In-memory connector, scheduler and video source for driving a
//! `SessionController` event by event.

use crate::config::{DetectionConfig, PipelineMode};
use crate::db::models::Camera;
use crate::detection::canvas::{encode_jpeg, SharedCanvas};
use crate::detection::controller::{Event, SessionController};
use crate::detection::pipeline::build_pipeline;
use crate::detection::protocol::Payload;
use crate::detection::socket::{Connector, SocketEvent, SocketHandle};
use crate::detection::timers::{Scheduler, TimerHandle, TimerKind, TimerTick};
use crate::detection::video::{VideoEvent, VideoSource, VideoSourceFactory};
use crate::error::Error;
use crate::messaging::{Notification, Notifier};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbImage;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub struct FakeTimer {
    pub tick: TimerTick,
    pub delay: Duration,
    pub repeating: bool,
    pub cancelled: bool,
    pub fired: bool,
}

impl FakeTimer {
    fn live(&self) -> bool {
        !self.cancelled && (self.repeating || !self.fired)
    }
}

/// Everything the fakes observed, plus knobs to make them fail
#[derive(Default)]
pub struct Wire {
    pub opened: Vec<u64>,
    /// Closed by the controller
    pub closed: Vec<u64>,
    /// Closed by the transport
    pub dropped: Vec<u64>,
    pub transport_open: Vec<u64>,
    pub texts: Vec<(u64, String)>,
    pub binaries: Vec<(u64, usize)>,
    pub timers: Vec<FakeTimer>,
    pub video_loads: Vec<String>,
    pub plays: usize,
    pub video_stops: usize,
    pub fail_open: bool,
    pub fail_sends: bool,
    pub play_fails: bool,
    pub capture_fails: bool,
}

type SharedWire = Arc<Mutex<Wire>>;

fn lock(wire: &SharedWire) -> MutexGuard<'_, Wire> {
    wire.lock().unwrap()
}

struct FakeSocket {
    connection: u64,
    wire: SharedWire,
}

impl FakeSocket {
    fn check(&self) -> Result<MutexGuard<'_, Wire>, Error> {
        if !self.is_open() {
            return Err(Error::Transport("Socket is not open".to_string()));
        }
        let wire = lock(&self.wire);
        if wire.fail_sends {
            return Err(Error::Transport("send failed".to_string()));
        }
        Ok(wire)
    }
}

impl SocketHandle for FakeSocket {
    fn is_open(&self) -> bool {
        let wire = lock(&self.wire);
        wire.transport_open.contains(&self.connection)
            && !wire.closed.contains(&self.connection)
            && !wire.dropped.contains(&self.connection)
    }

    fn send_text(&self, text: String) -> Result<(), Error> {
        self.check()?.texts.push((self.connection, text));
        Ok(())
    }

    fn send_binary(&self, data: Vec<u8>) -> Result<(), Error> {
        self.check()?.binaries.push((self.connection, data.len()));
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.wire).closed.push(self.connection);
    }
}

struct FakeConnector(SharedWire);

impl Connector for FakeConnector {
    fn open(&self, _endpoint: &str, connection: u64) -> Result<Box<dyn SocketHandle>, Error> {
        let mut wire = lock(&self.0);
        if wire.fail_open {
            return Err(Error::Transport("connection refused".to_string()));
        }
        wire.opened.push(connection);
        Ok(Box::new(FakeSocket {
            connection,
            wire: self.0.clone(),
        }))
    }
}

struct FakeTimerHandle {
    index: usize,
    wire: SharedWire,
}

impl TimerHandle for FakeTimerHandle {
    fn cancel(&mut self) {
        lock(&self.wire).timers[self.index].cancelled = true;
    }
}

struct FakeScheduler(SharedWire);

impl FakeScheduler {
    fn add(&self, delay: Duration, tick: TimerTick, repeating: bool) -> Box<dyn TimerHandle> {
        let mut wire = lock(&self.0);
        wire.timers.push(FakeTimer {
            tick,
            delay,
            repeating,
            cancelled: false,
            fired: false,
        });
        Box::new(FakeTimerHandle {
            index: wire.timers.len() - 1,
            wire: self.0.clone(),
        })
    }
}

impl Scheduler for FakeScheduler {
    fn once(&self, delay: Duration, tick: TimerTick) -> Box<dyn TimerHandle> {
        self.add(delay, tick, false)
    }

    fn every(&self, period: Duration, tick: TimerTick) -> Box<dyn TimerHandle> {
        self.add(period, tick, true)
    }
}

struct FakeVideo(SharedWire);

impl VideoSource for FakeVideo {
    fn play(&mut self) -> Result<(), Error> {
        let mut wire = lock(&self.0);
        wire.plays += 1;
        if wire.play_fails {
            return Err(Error::Media("play() request was denied".to_string()));
        }
        Ok(())
    }

    fn capture(&mut self) -> Result<Option<RgbImage>, Error> {
        if lock(&self.0).capture_fails {
            return Err(Error::Media("frame not ready".to_string()));
        }
        Ok(Some(RgbImage::from_pixel(16, 16, image::Rgb([30, 60, 90]))))
    }

    fn stop(&mut self) {
        lock(&self.0).video_stops += 1;
    }
}

struct FakeVideoFactory(SharedWire);

impl VideoSourceFactory for FakeVideoFactory {
    fn load(&self, uri: &str, _session: u64) -> Result<Box<dyn VideoSource>, Error> {
        lock(&self.0).video_loads.push(uri.to_string());
        Ok(Box::new(FakeVideo(self.0.clone())))
    }
}

#[derive(Default)]
pub struct RecordingNotifier(Mutex<Vec<Notification>>);

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.0.lock().unwrap().push(notification);
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub canvas: SharedCanvas,
    wire: SharedWire,
    notifier: Arc<RecordingNotifier>,
    session: u64,
}

impl Harness {
    pub fn new(mode: PipelineMode) -> Self {
        let config = DetectionConfig {
            mode,
            public_dir: "/srv/public".into(),
            ..DetectionConfig::default()
        };
        let wire = SharedWire::default();
        let canvas = SharedCanvas::new();
        let notifier = Arc::new(RecordingNotifier::default());

        let pipeline = build_pipeline(
            &config,
            Box::new(FakeVideoFactory(wire.clone())),
            canvas.clone(),
        );
        let controller = SessionController::new(
            config,
            Box::new(FakeConnector(wire.clone())),
            Box::new(FakeScheduler(wire.clone())),
            pipeline,
            notifier.clone(),
        )
        .unwrap();

        Self {
            controller,
            canvas,
            wire,
            notifier,
            session: 0,
        }
    }

    pub fn jpeg_frame(width: u32, height: u32) -> String {
        let image = RgbImage::from_pixel(width, height, image::Rgb([120, 120, 120]));
        STANDARD.encode(encode_jpeg(&image, 80).unwrap())
    }

    pub fn wire(&self) -> MutexGuard<'_, Wire> {
        lock(&self.wire)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifier.0.lock().unwrap().clone()
    }

    fn current(&self) -> u64 {
        self.wire().opened.last().copied().unwrap_or(0)
    }

    pub fn select(&mut self, camera: Camera) {
        self.session += 1;
        self.controller.select_camera(camera);
    }

    pub fn open(&mut self) {
        let connection = self.current();
        self.wire().transport_open.push(connection);
        self.socket(connection, SocketEvent::Open);
    }

    pub fn message(&mut self, text: &str) {
        let connection = self.current();
        self.message_on(connection, text);
    }

    pub fn message_on(&mut self, connection: u64, text: &str) {
        self.socket(
            connection,
            SocketEvent::Message(Payload::Text(text.to_string())),
        );
    }

    pub fn close(&mut self, code: u16, reason: &str) {
        let connection = self.current();
        self.wire().dropped.push(connection);
        self.socket(
            connection,
            SocketEvent::Close {
                code,
                reason: reason.to_string(),
            },
        );
    }

    pub fn close_stale(&mut self, connection: u64, code: u16) {
        self.wire().dropped.push(connection);
        self.socket(
            connection,
            SocketEvent::Close {
                code,
                reason: String::new(),
            },
        );
    }

    pub fn error(&mut self, reason: &str) {
        let connection = self.current();
        self.socket(connection, SocketEvent::Error(reason.to_string()));
    }

    fn socket(&mut self, connection: u64, event: SocketEvent) {
        self.controller
            .handle_event(Event::Socket { connection, event });
    }

    pub fn video(&mut self, event: VideoEvent) {
        self.controller.handle_event(Event::Video {
            session: self.session,
            event,
        });
    }

    pub fn ack_frame(&mut self, connection: u64, result: Result<(), Error>) {
        self.controller
            .handle_event(Event::FrameSent { connection, result });
    }

    /// Fire the newest live timer of `kind`; `false` when none is live
    pub fn fire(&mut self, kind: TimerKind) -> bool {
        let tick = {
            let mut wire = self.wire();
            let Some(timer) = wire
                .timers
                .iter_mut()
                .rev()
                .find(|t| t.tick.kind == kind && t.live())
            else {
                return false;
            };
            if !timer.repeating {
                timer.fired = true;
            }
            timer.tick
        };
        self.controller.handle_event(Event::Timer(tick));
        true
    }

    pub fn live_timers(&self, kind: TimerKind) -> usize {
        self.wire()
            .timers
            .iter()
            .filter(|t| t.tick.kind == kind && t.live())
            .count()
    }

    pub fn delays(&self, kind: TimerKind) -> Vec<Duration> {
        self.wire()
            .timers
            .iter()
            .filter(|t| t.tick.kind == kind && t.live())
            .map(|t| t.delay)
            .collect()
    }

    /// Connections neither side has closed
    pub fn live_sockets(&self) -> Vec<u64> {
        let wire = self.wire();
        wire.opened
            .iter()
            .copied()
            .filter(|c| !wire.closed.contains(c) && !wire.dropped.contains(c))
            .collect()
    }

    pub fn texts(&self, connection: u64) -> Vec<String> {
        self.wire()
            .texts
            .iter()
            .filter(|(c, _)| *c == connection)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

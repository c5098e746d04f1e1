use crate::config::DetectionConfig;
use crate::db::models::Camera;
use crate::detection::canvas::SharedCanvas;
use crate::detection::controller::{Event, EventSink, SessionController};
use crate::detection::pipeline::build_pipeline;
use crate::detection::socket::{Connector, WsConnector};
use crate::detection::state::SessionSnapshot;
use crate::detection::timers::{Scheduler, TokioScheduler};
use crate::detection::video::{GstVideoSourceFactory, VideoSourceFactory};
use crate::error::Error;
use crate::messaging::Notifier;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

enum Command {
    Select(Camera),
    Shutdown,
}

/// Transport, timer and media backends of a controller
pub struct Components {
    pub connector: Box<dyn Connector>,
    pub scheduler: Box<dyn Scheduler>,
    pub video: Box<dyn VideoSourceFactory>,
}

impl Components {
    /// WebSocket, tokio timers and GStreamer playback
    pub fn live(sink: &EventSink) -> Self {
        Self {
            connector: Box::new(WsConnector::new(sink.clone())),
            scheduler: Box::new(TokioScheduler::new(sink.clone())),
            video: Box::new(GstVideoSourceFactory::new(sink.clone())),
        }
    }
}

/// Cheap, cloneable access to the running detection session
#[derive(Clone)]
pub struct DetectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    canvas: SharedCanvas,
    jpeg_quality: u8,
}

impl DetectionHandle {
    pub fn select_camera(&self, camera: Camera) -> Result<(), Error> {
        self.commands
            .send(Command::Select(camera))
            .map_err(|_| Error::Internal("Detection service is not running".to_string()))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Latest painted frame as JPEG
    pub fn frame_jpeg(&self) -> Result<Option<Vec<u8>>, Error> {
        self.canvas.lock().to_jpeg(self.jpeg_quality)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

pub struct DetectionService;

impl DetectionService {
    pub fn spawn(
        config: DetectionConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<(DetectionHandle, JoinHandle<()>), Error> {
        Self::spawn_with(config, notifier, Components::live)
    }

    pub fn spawn_with(
        config: DetectionConfig,
        notifier: Arc<dyn Notifier>,
        build: impl FnOnce(&EventSink) -> Components,
    ) -> Result<(DetectionHandle, JoinHandle<()>), Error> {
        let (event_tx, events) = mpsc::unbounded_channel::<Event>();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let components = build(&event_tx);

        let canvas = SharedCanvas::new();
        let jpeg_quality = config.jpeg_quality;
        let pipeline = build_pipeline(&config, components.video, canvas.clone());
        let controller = SessionController::new(
            config,
            components.connector,
            components.scheduler,
            pipeline,
            notifier,
        )?;

        let (snapshot_tx, snapshot) = watch::channel(controller.snapshot());
        info!(
            "Detection service started ({:?} mode, backend {})",
            controller.snapshot().mode,
            controller.endpoint()
        );

        let task = tokio::spawn(run(controller, commands, events, snapshot_tx));

        Ok((
            DetectionHandle {
                commands: commands_tx,
                snapshot,
                canvas,
                jpeg_quality,
            },
            task,
        ))
    }
}

async fn run(
    mut controller: SessionController,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<Event>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Select(camera)) => controller.select_camera(camera),
                Some(Command::Shutdown) | None => break,
            },
            Some(event) = events.recv() => controller.handle_event(event),
        }

        let next = controller.snapshot();
        snapshot_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    controller.teardown();
    snapshot_tx.send_replace(controller.snapshot());
    debug!("Detection service stopped");
}

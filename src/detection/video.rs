//! Local video playback for client-capture sessions.

use crate::detection::controller::{Event, EventSink};
use crate::error::Error;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use log::{debug, error, info};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum VideoEvent {
    /// Metadata is known and the first frame is prerolled
    Loaded { width: u32, height: u32 },
    PlaybackStarted,
    Ended,
    Failed(String),
}

pub trait VideoSource: Send {
    /// Request playback; `PlaybackStarted` follows asynchronously
    fn play(&mut self) -> Result<(), Error>;

    /// Copy of the frame currently on screen at native resolution
    fn capture(&mut self) -> Result<Option<RgbImage>, Error>;

    fn stop(&mut self);
}

pub trait VideoSourceFactory: Send {
    fn load(&self, uri: &str, session: u64) -> Result<Box<dyn VideoSource>, Error>;
}

/// Turn a camera's sample video URL into something a media pipeline can open.
/// Absolute URLs pass through, anything else is a path under `public_dir`.
pub fn resolve_video_uri(video_url: &str, public_dir: &Path) -> Result<String, Error> {
    if let Ok(url) = Url::parse(video_url) {
        return Ok(url.to_string());
    }

    let mut path = public_dir.join(video_url.trim_start_matches('/'));
    if path.is_relative() {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Media(format!("Cannot resolve working directory: {}", e)))?;
        path = cwd.join(path);
    }

    Url::from_file_path(&path)
        .map(|url| url.to_string())
        .map_err(|_| Error::Media(format!("Invalid video path: {}", path.display())))
}

/// Builds playbin pipelines whose video ends in an RGB appsink
pub struct GstVideoSourceFactory {
    sink: EventSink,
}

impl GstVideoSourceFactory {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

impl VideoSourceFactory for GstVideoSourceFactory {
    fn load(&self, uri: &str, session: u64) -> Result<Box<dyn VideoSource>, Error> {
        let source = GstVideoSource::new(uri, session, self.sink.clone())?;
        Ok(Box::new(source))
    }
}

pub struct GstVideoSource {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    stopped: Arc<AtomicBool>,
}

fn media_error(context: &str) -> impl Fn(gst::glib::BoolError) -> Error + '_ {
    move |e| Error::Media(format!("{}: {}", context, e))
}

impl GstVideoSource {
    pub fn new(uri: &str, session: u64, sink: EventSink) -> Result<Self, Error> {
        let pipeline = gst::Pipeline::builder()
            .name(format!("detection-video-{}", session))
            .build();

        let playbin = gst::ElementFactory::make("playbin")
            .name(format!("playbin-{}", session))
            .property("uri", uri)
            .build()
            .map_err(media_error("Failed to create playbin"))?;

        let appsink = gst_app::AppSink::builder()
            .name(format!("videosink-{}", session))
            .max_buffers(1)
            .drop(true)
            .sync(true)
            .enable_last_sample(true)
            .caps(
                &gst::Caps::builder("video/x-raw")
                    .field("format", "RGB")
                    .build(),
            )
            .build();

        let audio_sink = gst::ElementFactory::make("fakesink")
            .name(format!("audiosink-{}", session))
            .property("sync", true)
            .build()
            .map_err(media_error("Failed to create audio sink"))?;

        playbin.set_property("video-sink", &appsink);
        playbin.set_property("audio-sink", &audio_sink);
        pipeline
            .add(&playbin)
            .map_err(media_error("Failed to assemble pipeline"))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| Error::Media("Failed to get pipeline bus".to_string()))?;
        let stopped = Arc::new(AtomicBool::new(false));

        watch_bus(
            bus,
            pipeline.name().to_string(),
            appsink.clone(),
            session,
            sink,
            stopped.clone(),
        );

        // Preroll so the first frame and the video size are known before playback
        pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| Error::Media(format!("Failed to load video {}: {}", uri, e)))?;

        info!("Loading sample video {}", uri);

        Ok(Self {
            pipeline,
            appsink,
            stopped,
        })
    }
}

fn negotiated_size(appsink: &gst_app::AppSink) -> Option<(u32, u32)> {
    let caps = appsink.static_pad("sink")?.current_caps()?;
    let info = gst_video::VideoInfo::from_caps(&caps).ok()?;
    Some((info.width(), info.height()))
}

fn watch_bus(
    bus: gst::Bus,
    pipeline_name: String,
    appsink: gst_app::AppSink,
    session: u64,
    sink: EventSink,
    stopped: Arc<AtomicBool>,
) {
    std::thread::spawn(move || {
        let emit = |event: VideoEvent| sink.send(Event::Video { session, event }).is_ok();
        let mut loaded = false;

        while !stopped.load(Ordering::SeqCst) {
            let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(100)) else {
                continue;
            };

            let delivered = match msg.view() {
                gst::MessageView::AsyncDone(_) if !loaded => match negotiated_size(&appsink) {
                    Some((width, height)) => {
                        loaded = true;
                        emit(VideoEvent::Loaded { width, height })
                    }
                    None => true,
                },
                gst::MessageView::StateChanged(changed)
                    if changed.current() == gst::State::Playing
                        && msg.src().map_or(false, |s| s.name().as_str() == pipeline_name) =>
                {
                    debug!("Sample video playing");
                    emit(VideoEvent::PlaybackStarted)
                }
                gst::MessageView::Eos(_) => emit(VideoEvent::Ended),
                gst::MessageView::Error(err) => {
                    error!(
                        "Error from {}: {} ({})",
                        err.src()
                            .map(|s| s.name())
                            .unwrap_or_else(|| "unknown".into()),
                        err.error(),
                        err.debug().unwrap_or_else(|| "no debug info".into())
                    );
                    emit(VideoEvent::Failed(err.error().to_string()))
                }
                _ => true,
            };

            // Controller is gone
            if !delivered {
                break;
            }
        }
    });
}

impl VideoSource for GstVideoSource {
    fn play(&mut self) -> Result<(), Error> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map(|_| ())
            .map_err(|e| Error::Media(format!("Playback rejected: {}", e)))
    }

    fn capture(&mut self) -> Result<Option<RgbImage>, Error> {
        let Some(sample) = self.appsink.property::<Option<gst::Sample>>("last-sample") else {
            return Ok(None);
        };

        let caps = sample
            .caps()
            .ok_or_else(|| Error::Media("Sample without caps".to_string()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(media_error("Unreadable sample caps"))?;
        let buffer = sample
            .buffer()
            .ok_or_else(|| Error::Media("Sample without buffer".to_string()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| Error::Media(format!("Failed to map buffer: {}", e)))?;

        let (width, height) = (info.width(), info.height());
        let stride = info.stride()[0] as usize;
        let row_bytes = width as usize * 3;
        let data = map.as_slice();

        if height == 0 || data.len() < stride * (height as usize - 1) + row_bytes {
            return Err(Error::Media("Truncated video frame".to_string()));
        }

        let mut frame = RgbImage::new(width, height);
        for (row, chunk) in frame.chunks_exact_mut(row_bytes).enumerate() {
            let start = row * stride;
            chunk.copy_from_slice(&data[start..start + row_bytes]);
        }

        Ok(Some(frame))
    }

    fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

impl Drop for GstVideoSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_urls_pass_through() {
        assert_eq!(
            resolve_video_uri("https://cdn.example.com/v.mp4", Path::new("public")).unwrap(),
            "https://cdn.example.com/v.mp4"
        );
        assert_eq!(
            resolve_video_uri("file:///srv/v.mp4", Path::new("public")).unwrap(),
            "file:///srv/v.mp4"
        );
    }

    #[test]
    fn root_relative_urls_resolve_under_public_dir() {
        assert_eq!(
            resolve_video_uri("/uploads/crash 1.mp4", Path::new("/srv/acciwatch/public")).unwrap(),
            "file:///srv/acciwatch/public/uploads/crash%201.mp4"
        );
        assert_eq!(
            resolve_video_uri("v.mp4", Path::new("/srv/public")).unwrap(),
            "file:///srv/public/v.mp4"
        );
    }
}

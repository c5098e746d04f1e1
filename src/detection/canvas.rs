use crate::error::Error;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::sync::{Arc, Mutex, MutexGuard};

/// Persistent paint surface of the current session
#[derive(Debug, Default)]
pub struct Canvas {
    image: Option<RgbImage>,
    resize_count: u64,
    frames_painted: u64,
}

impl Canvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.image.as_ref().map(|image| image.dimensions())
    }

    pub fn is_empty(&self) -> bool {
        self.frames_painted == 0
    }

    /// Number of times the backing buffer was reallocated
    pub fn resize_count(&self) -> u64 {
        self.resize_count
    }

    pub fn frames_painted(&self) -> u64 {
        self.frames_painted
    }

    /// Size the surface, keeping the buffer when the dimensions already match.
    /// Returns `true` when a resize happened.
    pub fn ensure_size(&mut self, width: u32, height: u32) -> bool {
        if self.dimensions() == Some((width, height)) {
            return false;
        }
        self.image = Some(RgbImage::new(width, height));
        self.resize_count += 1;
        true
    }

    pub fn paint(&mut self, frame: &RgbImage) {
        let (width, height) = frame.dimensions();
        self.ensure_size(width, height);
        if let Some(image) = self.image.as_mut() {
            image.copy_from_slice(frame.as_raw());
        }
        self.frames_painted += 1;
    }

    /// Decode a base64 JPEG (optionally a `data:` URL) and paint it
    pub fn paint_base64(&mut self, payload: &str) -> Result<(u32, u32), Error> {
        let frame = decode_base64_image(payload)?;
        let dimensions = frame.dimensions();
        self.paint(&frame);
        Ok(dimensions)
    }

    pub fn clear(&mut self) {
        self.image = None;
        self.frames_painted = 0;
    }

    /// Latest painted frame as JPEG, `None` before the first paint
    pub fn to_jpeg(&self, quality: u8) -> Result<Option<Vec<u8>>, Error> {
        if self.is_empty() {
            return Ok(None);
        }
        match &self.image {
            Some(image) => encode_jpeg(image, quality).map(Some),
            None => Ok(None),
        }
    }
}

/// Canvas shared between the controller and the HTTP surface
#[derive(Debug, Clone, Default)]
pub struct SharedCanvas(Arc<Mutex<Canvas>>);

impl SharedCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Canvas> {
        // A panic while painting leaves pixels half-copied at worst
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn decode_base64_image(payload: &str) -> Result<RgbImage, Error> {
    let data = match payload.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| Error::Media(format!("Invalid base64 frame: {}", e)))?;
    Ok(image::load_from_memory(&bytes)?.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(image)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg_base64(width: u32, height: u32) -> String {
        let image = RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]));
        STANDARD.encode(encode_jpeg(&image, 80).unwrap())
    }

    #[test]
    fn resizes_only_when_dimensions_change() {
        let mut canvas = Canvas::new();
        canvas.paint_base64(&jpeg_base64(16, 8)).unwrap();
        canvas.paint_base64(&jpeg_base64(16, 8)).unwrap();
        assert_eq!(canvas.resize_count(), 1);
        assert_eq!(canvas.frames_painted(), 2);

        canvas.paint_base64(&jpeg_base64(32, 8)).unwrap();
        assert_eq!(canvas.resize_count(), 2);
        assert_eq!(canvas.dimensions(), Some((32, 8)));
    }

    #[test]
    fn presize_avoids_resize_on_first_paint() {
        let mut canvas = Canvas::new();
        assert!(canvas.ensure_size(16, 16));
        assert!(canvas.is_empty());
        canvas.paint_base64(&jpeg_base64(16, 16)).unwrap();
        assert_eq!(canvas.resize_count(), 1);
    }

    #[test]
    fn accepts_data_url_prefix() {
        let mut canvas = Canvas::new();
        let payload = format!("data:image/jpeg;base64,{}", jpeg_base64(8, 8));
        assert_eq!(canvas.paint_base64(&payload).unwrap(), (8, 8));
    }

    #[test]
    fn garbage_is_a_media_error() {
        let mut canvas = Canvas::new();
        assert!(matches!(canvas.paint_base64("%%%"), Err(Error::Media(_))));
        assert!(matches!(
            canvas.paint_base64(&STANDARD.encode(b"not an image")),
            Err(Error::Media(_))
        ));
        assert!(canvas.is_empty());
    }

    #[test]
    fn clear_empties_snapshot() {
        let mut canvas = Canvas::new();
        canvas.paint_base64(&jpeg_base64(8, 8)).unwrap();
        assert!(canvas.to_jpeg(80).unwrap().is_some());
        canvas.clear();
        assert!(canvas.to_jpeg(80).unwrap().is_none());
        assert_eq!(canvas.dimensions(), None);
    }
}

//! Depth stream interfaces for frame ingestion

use glam::Affine3A;
use image::RgbImage;
use kinfu_data::DepthMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A single frame from a depth stream
#[derive(Debug, Clone)]
pub struct RgbdFrame {
    /// Depth in meters, `0` where the sensor returned nothing
    pub depth: DepthMap,
    /// Optional color image (same resolution as depth)
    pub color: Option<RgbImage>,
    /// Timestamp in seconds (relative to stream start)
    pub timestamp: f64,
    /// Camera-to-world pose, when the source knows it
    pub ground_truth: Option<Affine3A>,
}

impl RgbdFrame {
    pub fn new(depth: DepthMap, timestamp: f64) -> Self {
        Self {
            depth,
            color: None,
            timestamp,
            ground_truth: None,
        }
    }

    pub fn with_color(mut self, color: RgbImage) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_ground_truth(mut self, pose: Affine3A) -> Self {
        self.ground_truth = Some(pose);
        self
    }

    /// Depth dimensions (width, height)
    pub fn dimensions(&self) -> (usize, usize) {
        self.depth.dimensions()
    }
}

/// Trait for depth frame sources
pub trait DepthStream {
    /// Get the next frame from the stream.
    /// Returns None when the stream ends
    fn next_frame(&mut self) -> Result<Option<RgbdFrame>, StreamError>;

    /// Frame rate (frames per second), if known
    fn frame_rate(&self) -> Option<f32>;

    /// Check if the stream still has frames
    fn is_active(&self) -> bool;
}

/// Errors that can occur while producing frames
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image decoding error: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("Invalid frame data: {0}")]
    InvalidData(String),
}

/// Decode a 16-bit depth image in millimeters.
pub fn load_depth_png(path: impl AsRef<Path>) -> Result<DepthMap, StreamError> {
    let path = path.as_ref();
    let image = image::open(path)?.into_luma16();
    let (width, height) = image.dimensions();
    DepthMap::from_millimeters(width as usize, height as usize, image.as_raw()).ok_or_else(|| {
        StreamError::InvalidData(format!("{}: unexpected buffer size", path.display()))
    })
}

/// Plays back an explicit list of depth images (and optional color images).
pub struct ImageSequenceStream {
    frames: Vec<(PathBuf, Option<PathBuf>)>,
    index: usize,
    frame_rate: f32,
}

impl ImageSequenceStream {
    pub fn new(frames: Vec<(PathBuf, Option<PathBuf>)>, frame_rate: f32) -> Self {
        Self {
            frames,
            index: 0,
            frame_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl DepthStream for ImageSequenceStream {
    fn next_frame(&mut self) -> Result<Option<RgbdFrame>, StreamError> {
        let Some((depth_path, color_path)) = self.frames.get(self.index) else {
            return Ok(None);
        };
        let depth = load_depth_png(depth_path)?;
        let timestamp = self.index as f64 / self.frame_rate as f64;
        let mut frame = RgbdFrame::new(depth, timestamp);
        if let Some(color_path) = color_path {
            frame = frame.with_color(image::open(color_path)?.into_rgb8());
        }
        debug!("Loaded frame {} from {}", self.index, depth_path.display());
        self.index += 1;
        Ok(Some(frame))
    }

    fn frame_rate(&self) -> Option<f32> {
        Some(self.frame_rate)
    }

    fn is_active(&self) -> bool {
        self.index < self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_depth_png_converts_millimeters() {
        let dir = std::env::temp_dir().join(format!("kinfu-depth-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("depth.png");
        let image = image::ImageBuffer::<image::Luma<u16>, Vec<u16>>::from_fn(4, 2, |x, _| {
            image::Luma([x as u16 * 500])
        });
        image.save(&path).unwrap();

        let depth = load_depth_png(&path).unwrap();
        assert_eq!(depth.dimensions(), (4, 2));
        assert_eq!(depth.at(0, 0), 0.0);
        assert!((depth.at(3, 1) - 1.5).abs() < 1e-6);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_sequence_stream_reports_missing_file() {
        let mut stream =
            ImageSequenceStream::new(vec![(PathBuf::from("/nonexistent/depth.png"), None)], 30.0);
        assert!(stream.is_active());
        assert!(stream.next_frame().is_err());
    }

    #[test]
    fn test_empty_sequence_ends_immediately() {
        let mut stream = ImageSequenceStream::new(Vec::new(), 30.0);
        assert!(!stream.is_active());
        assert!(stream.next_frame().unwrap().is_none());
    }
}

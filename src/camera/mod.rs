//! Camera frame sources for the live feed.
//!
//! - `stub://<name>` devices produce synthetic frames (tests, demos).
//! - Local V4L2 device nodes such as `/dev/video0` (feature: ingest-v4l2).
//!
//! Frames are captured in memory, normalized to RGB and handed straight to the
//! live stream; nothing here writes frames to disk.

pub mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::Result;
use image::RgbImage;
use serde::Deserialize;

use synthetic::SyntheticCamera;
#[cfg(feature = "ingest-v4l2")]
use v4l2::DeviceCamera;

/// Anything the live stream can pull RGB frames from.
pub trait FrameSource: Send {
    /// Capture the next frame. An error ends the stream.
    fn next_frame(&mut self) -> Result<RgbImage>;
}

/// Configuration for a capture device.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device path (e.g. "/dev/video0") or `stub://<name>`.
    pub device: String,
    /// Upper bound on frames per second delivered to a live stream.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Statistics for a camera.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub device: String,
}

pub struct Camera {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceCamera),
}

impl Camera {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            });
        }
        Self::device(config)
    }

    #[cfg(feature = "ingest-v4l2")]
    fn device(config: CameraConfig) -> Result<Self> {
        Ok(Self {
            backend: CameraBackend::Device(DeviceCamera::new(config)),
        })
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    fn device(config: CameraConfig) -> Result<Self> {
        Err(anyhow::anyhow!(
            "camera device {} requires the ingest-v4l2 feature",
            config.device
        ))
    }

    /// Create and connect in one step.
    pub fn open(config: CameraConfig) -> Result<Self> {
        let mut camera = Self::new(config)?;
        camera.connect()?;
        Ok(camera)
    }

    /// Connect to the device.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.stats(),
        }
    }
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<RgbImage> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame(),
        }
    }
}

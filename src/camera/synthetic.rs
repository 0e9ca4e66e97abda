use anyhow::Result;
use image::{Rgb, RgbImage};

use super::{CameraConfig, CameraStats};

/// Synthetic camera for `stub://` devices.
///
/// Produces a dim gradient with a bright orange square drifting across it, so
/// consecutive frames differ and overlays have something to sit on.
pub(super) struct SyntheticCamera {
    config: CameraConfig,
    frame_count: u64,
}

impl SyntheticCamera {
    pub(super) fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    /// Synthetic sources are always "connected".
    pub(super) fn connect(&mut self) -> Result<()> {
        log::info!("camera: connected to {} (synthetic)", self.config.device);
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<RgbImage> {
        self.frame_count += 1;
        let width = self.config.width.max(1);
        let height = self.config.height.max(1);
        let side = (width.min(height) / 4).max(1);
        let offset = (self.frame_count * 4 % u64::from(width)) as u32;

        Ok(RgbImage::from_fn(width, height, |x, y| {
            if x >= offset && x < offset + side && y >= height / 3 && y < height / 3 + side {
                Rgb([255, 140, 0])
            } else {
                let shade = ((x + y) * 64 / (width + height)) as u8;
                Rgb([shade, shade, shade.saturating_add(16)])
            }
        }))
    }

    pub(super) fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }
}

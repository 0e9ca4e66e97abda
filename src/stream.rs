//! Live MJPEG detection feed.
//!
//! Each iteration captures one frame, runs the shared detector on it, draws
//! boxes and `label conf%` text onto the frame in place, JPEG-encodes it and
//! writes it as one `multipart/x-mixed-replace` part. Live frames never touch
//! the result store or the history ledger.
//!
//! The loop ends when capture fails, when a write fails (the client went
//! away), or when the cancel flag is raised. Production is capped at the
//! camera's `target_fps`.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::annotate::{draw_detections, AnnotationStyle};
use crate::camera::FrameSource;
use crate::detect::{run_detector, InferenceParams, SharedDetector};
use crate::pipeline::encode_jpeg;

/// Multipart boundary token used by the feed.
pub const BOUNDARY: &str = "frame";

pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
}

/// Wrap one JPEG as a multipart part.
pub fn mjpeg_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    CaptureFailed,
    ClientGone,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_sent: u64,
    pub reason: StopReason,
}

pub struct LiveStream<'a> {
    detector: &'a SharedDetector,
    params: InferenceParams,
    min_interval: Duration,
    cancel: &'a AtomicBool,
}

impl<'a> LiveStream<'a> {
    pub fn new(
        detector: &'a SharedDetector,
        params: InferenceParams,
        target_fps: u32,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            detector,
            params,
            min_interval: frame_interval(target_fps),
            cancel,
        }
    }

    /// Stream until capture fails, the sink fails, or cancellation.
    ///
    /// Errors from detection or encoding are returned; the sink has already
    /// received every complete part sent before them.
    pub fn run<S: FrameSource + ?Sized, W: Write>(
        &self,
        source: &mut S,
        sink: &mut W,
    ) -> Result<StreamStats> {
        let mut frames_sent = 0u64;
        let style = AnnotationStyle::live();
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(stats(frames_sent, StopReason::Cancelled));
            }
            let started = Instant::now();

            let mut frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    log::info!("live feed: capture failed, ending stream: {}", err);
                    return Ok(stats(frames_sent, StopReason::CaptureFailed));
                }
            };

            let result = run_detector(self.detector, &frame, self.params)?;
            draw_detections(&mut frame, &result, &style);
            let part = mjpeg_part(&encode_jpeg(&frame)?);

            if let Err(err) = sink.write_all(&part).and_then(|_| sink.flush()) {
                log::debug!("live feed: client write failed: {}", err);
                return Ok(stats(frames_sent, StopReason::ClientGone));
            }
            frames_sent += 1;

            let elapsed = started.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
    }
}

fn stats(frames_sent: u64, reason: StopReason) -> StreamStats {
    StreamStats {
        frames_sent,
        reason,
    }
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(1) / target_fps
    }
}

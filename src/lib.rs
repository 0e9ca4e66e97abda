//! Firewatch
//!
//! HTTP service in front of a fire/smoke object detector.
//!
//! # Capabilities
//!
//! 1. **Predict**: an uploaded image is run through the detector, annotated,
//!    stored under a fresh reference and recorded in the history ledger.
//! 2. **History**: every successful prediction, newest first.
//! 3. **Live feed**: camera frames with detections drawn in, as MJPEG.
//!
//! # Module Structure
//!
//! - `config`: JSON file plus `FIREWATCH_*` environment overrides
//! - `detect`: backend trait, registry, stub and ONNX backends, YOLO post-processing
//! - `prediction`: wire form of a detection, including the no-detection sentinel
//! - `annotate`: box and label drawing
//! - `storage`: annotated result images and raw uploads
//! - `history`: append-only JSON ledger
//! - `pipeline`: the per-request predict flow
//! - `camera`: frame sources (synthetic, V4L2)
//! - `stream`: live MJPEG loop
//! - `api`: HTTP server

pub mod annotate;
pub mod api;
pub mod camera;
pub mod config;
pub mod detect;
pub mod history;
pub mod pipeline;
pub mod prediction;
pub mod storage;
pub mod stream;

pub use config::FirewatchConfig;
pub use detect::{BoxPrediction, DetectionResult, DetectorBackend, InferenceParams};
pub use history::{HistoryEntry, HistoryLedger};
pub use pipeline::{InferencePipeline, PredictResponse, Upload};
pub use prediction::{Prediction, NO_DETECTION_LABEL};

//! Per-request inference pipeline behind `POST /predict`.
//!
//! Steps, in order: persist the upload under a sanitized name, decode it,
//! run the detector, format predictions (sentinel on empty), annotate, store
//! the annotated JPEG under a fresh reference, append one history entry.
//! A failure at any step aborts the request; steps already completed are not
//! rolled back.

use std::sync::Arc;

use anyhow::{Context, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::annotate::annotate;
use crate::config::FirewatchConfig;
use crate::detect::{run_detector, InferenceParams, SharedDetector};
use crate::history::{HistoryEntry, HistoryLedger};
use crate::prediction::{predictions_from, Prediction};
use crate::storage::{DirResultStore, ResultStore, StoreError, UploadStore};

pub const JPEG_QUALITY: u8 = 90;

/// One uploaded image as received from the client.
#[derive(Clone, Debug)]
pub struct Upload {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: Vec<Prediction>,
    pub result_image: String,
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode_image(image)
        .context("encode jpeg")?;
    Ok(out)
}

pub struct InferencePipeline {
    detector: SharedDetector,
    params: InferenceParams,
    uploads: UploadStore,
    results: Arc<dyn ResultStore>,
    ledger: HistoryLedger,
    public_url: String,
}

impl InferencePipeline {
    pub fn new(
        detector: SharedDetector,
        params: InferenceParams,
        uploads: UploadStore,
        results: Arc<dyn ResultStore>,
        ledger: HistoryLedger,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            detector,
            params,
            uploads,
            results,
            ledger,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build the on-disk pipeline described by `config`, creating directories.
    pub fn open(config: &FirewatchConfig, detector: SharedDetector) -> Result<Self> {
        let uploads = UploadStore::open(&config.storage.upload_dir)?;
        let results = DirResultStore::open(&config.storage.result_dir)?;
        let ledger = HistoryLedger::open(&config.storage.history_path)?;
        Ok(Self::new(
            detector,
            config.detector.params(),
            uploads,
            Arc::new(results),
            ledger,
            config.public_url.clone(),
        ))
    }

    pub fn detector(&self) -> &SharedDetector {
        &self.detector
    }

    pub fn params(&self) -> InferenceParams {
        self.params
    }

    pub fn result_url(&self, reference: &str) -> String {
        format!("{}/results/{}", self.public_url, reference)
    }

    pub fn predict(&self, upload: &Upload) -> Result<PredictResponse> {
        let saved = self
            .uploads
            .save(upload.filename.as_deref(), &upload.bytes)?;
        log::debug!("upload saved to {}", saved.display());

        let image = image::load_from_memory(&upload.bytes)
            .context("decode uploaded image")?
            .to_rgb8();
        let result = run_detector(&self.detector, &image, self.params)?;
        let predictions = predictions_from(&result);

        let annotated = annotate(&image, &result);
        let jpeg = encode_jpeg(&annotated)?;
        let reference = self.results.store(&jpeg).context("store annotated image")?;
        let url = self.result_url(&reference);

        self.ledger
            .append(HistoryEntry::now(url.clone(), predictions.clone()))?;

        log::info!(
            "prediction stored as {} ({} detections)",
            reference,
            result.boxes.len()
        );
        Ok(PredictResponse {
            prediction: predictions,
            result_image: url,
        })
    }

    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        self.ledger.list()
    }

    pub fn retrieve(&self, reference: &str) -> Result<Vec<u8>, StoreError> {
        self.results.retrieve(reference)
    }
}

//! Prediction history ledger.
//!
//! The ledger is one JSON array on disk, newest entry first. Every append
//! rewrites the whole file: load, insert at index 0, write to a sibling temp
//! file, rename over the ledger. Appends from one process are serialized by a
//! mutex so concurrent predictions cannot drop each other's entries; separate
//! processes sharing the file are not coordinated.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::prediction::Prediction;

/// Local-time format used for entry timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    /// Absolute URL of the stored annotated image.
    #[serde(rename = "image")]
    pub image_reference: String,
    #[serde(rename = "prediction")]
    pub predictions: Vec<Prediction>,
}

impl HistoryEntry {
    /// Entry stamped with the current local time.
    pub fn now(image_reference: String, predictions: Vec<Prediction>) -> Self {
        Self {
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            image_reference,
            predictions,
        }
    }
}

pub struct HistoryLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HistoryLedger {
    /// Open the ledger at `path`, creating its parent directory. The file itself
    /// is created on first append.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create history directory {}", parent.display()))?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full ledger in on-disk order, newest first.
    pub fn list(&self) -> Result<Vec<HistoryEntry>> {
        load_entries(&self.path)
    }

    /// Insert `entry` at the head and rewrite the ledger.
    pub fn append(&self, entry: HistoryEntry) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("history lock poisoned"))?;
        let mut entries = load_entries(&self.path)?;
        entries.insert(0, entry);
        write_entries(&self.path, &entries)?;
        log::debug!(
            "history ledger {} now holds {} entries",
            self.path.display(),
            entries.len()
        );
        Ok(())
    }
}

fn load_entries(path: &Path) -> Result<Vec<HistoryEntry>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(anyhow!("failed to read history {}: {}", path.display(), err));
        }
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&raw).map_err(|e| anyhow!("invalid history file {}: {}", path.display(), e))
}

fn write_entries(path: &Path, entries: &[HistoryEntry]) -> Result<()> {
    let payload = serde_json::to_vec_pretty(entries)?;
    let mut tmp_name = path
        .file_name()
        .ok_or_else(|| anyhow!("history path {} has no file name", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, payload).with_context(|| format!("write history {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace history {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(image: &str) -> HistoryEntry {
        HistoryEntry {
            timestamp: "2024-05-01 12:00:00".to_string(),
            image_reference: image.to_string(),
            predictions: vec![Prediction {
                class_label: "fire".to_string(),
                confidence: 90.0,
                bounding_box: Some([10, 10, 50, 50]),
            }],
        }
    }

    #[test]
    fn missing_file_is_empty_ledger() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = HistoryLedger::open(dir.path().join("history/detections.json"))?;
        assert!(ledger.list()?.is_empty());
        assert!(dir.path().join("history").is_dir());
        Ok(())
    }

    #[test]
    fn append_inserts_at_head() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = HistoryLedger::open(dir.path().join("detections.json"))?;
        ledger.append(entry("http://localhost:5000/results/a_result.jpg"))?;
        ledger.append(entry("http://localhost:5000/results/b_result.jpg"))?;

        let entries = ledger.list()?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], entry("http://localhost:5000/results/b_result.jpg"));
        assert_eq!(entries[1].image_reference, "http://localhost:5000/results/a_result.jpg");

        // Reads are stable without intervening writes.
        assert_eq!(ledger.list()?, entries);
        Ok(())
    }

    #[test]
    fn file_is_a_single_json_array_with_wire_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("detections.json");
        let ledger = HistoryLedger::open(&path)?;
        ledger.append(entry("http://x/results/r.jpg"))?;

        let value: serde_json::Value = serde_json::from_slice(&fs::read(&path)?)?;
        let array = value.as_array().ok_or_else(|| anyhow!("not an array"))?;
        assert_eq!(array.len(), 1);
        assert_eq!(array[0]["image"], "http://x/results/r.jpg");
        assert_eq!(array[0]["prediction"][0]["class"], "fire");
        assert_eq!(array[0]["prediction"][0]["bbox"][2], 50);
        assert!(!dir.path().join("detections.json.tmp").exists());
        Ok(())
    }

    #[test]
    fn concurrent_appends_are_not_lost() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ledger = Arc::new(HistoryLedger::open(dir.path().join("detections.json"))?);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.append(entry(&format!("img-{i}"))))
            })
            .collect();
        for handle in handles {
            handle.join().map_err(|_| anyhow!("append thread panicked"))??;
        }
        assert_eq!(ledger.list()?.len(), 8);
        Ok(())
    }

    #[test]
    fn timestamp_has_expected_shape() {
        let e = HistoryEntry::now("u".to_string(), Vec::new());
        assert_eq!(e.timestamp.len(), 19);
        assert_eq!(&e.timestamp[4..5], "-");
        assert_eq!(&e.timestamp[10..11], " ");
        assert_eq!(&e.timestamp[13..14], ":");
    }

    #[test]
    fn corrupt_ledger_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("detections.json");
        fs::write(&path, "{not json")?;
        let ledger = HistoryLedger::open(&path)?;
        assert!(ledger.list().is_err());
        assert!(ledger.append(entry("x")).is_err());
        Ok(())
    }
}

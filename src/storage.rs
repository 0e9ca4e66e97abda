use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use regex::Regex;

/// Suffix appended to every generated result reference.
pub const RESULT_SUFFIX: &str = "_result.jpg";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("result '{0}' not found")]
    NotFound(String),
    #[error("result store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("result store lock poisoned")]
    Poisoned,
}

/// Addressable storage for annotated result images.
///
/// References are generated by the store, never by the client; `retrieve`
/// returns exactly the bytes passed to `store`.
pub trait ResultStore: Send + Sync {
    fn store(&self, image_bytes: &[u8]) -> Result<String, StoreError>;

    fn retrieve(&self, reference: &str) -> Result<Vec<u8>, StoreError>;
}

/// Fresh `<32 hex>_result.jpg` reference from 128 random bits.
pub fn new_reference() -> String {
    let mut id = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut id);
    format!("{}{}", hex::encode(id), RESULT_SUFFIX)
}

/// A reference must be a plain file name: no separators, no leading dot.
pub fn is_plain_file_name(reference: &str) -> bool {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_\-][A-Za-z0-9_.\-]{0,254}$").expect("static regex")
    });
    re.is_match(reference) && !reference.contains("..")
}

/// Results kept as files in one directory.
pub struct DirResultStore {
    root: PathBuf,
}

impl DirResultStore {
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create result directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResultStore for DirResultStore {
    fn store(&self, image_bytes: &[u8]) -> Result<String, StoreError> {
        let reference = new_reference();
        fs::write(self.root.join(&reference), image_bytes)?;
        Ok(reference)
    }

    fn retrieve(&self, reference: &str) -> Result<Vec<u8>, StoreError> {
        if !is_plain_file_name(reference) {
            return Err(StoreError::NotFound(reference.to_string()));
        }
        let path = self.root.join(reference);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(reference.to_string()))
            }
            Err(err) if path.is_dir() => {
                log::debug!("result lookup hit a directory {}: {}", path.display(), err);
                Err(StoreError::NotFound(reference.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Default)]
pub struct InMemoryResultStore {
    images: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.images.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultStore for InMemoryResultStore {
    fn store(&self, image_bytes: &[u8]) -> Result<String, StoreError> {
        let reference = new_reference();
        self.images
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .insert(reference.clone(), image_bytes.to_vec());
        Ok(reference)
    }

    fn retrieve(&self, reference: &str) -> Result<Vec<u8>, StoreError> {
        self.images
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))
    }
}

/// Strip a client-supplied file name down to something safe to join onto a
/// directory: ASCII letters, digits, `_`, `.` and `-`. Path separators and
/// whitespace become `_`; leading dots and underscores are dropped.
pub fn sanitize_filename(name: &str) -> String {
    static UNSAFE_RE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE_RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("static regex"));

    let joined = name
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = re.replace_all(&collapsed, "");
    cleaned.trim_start_matches(['.', '_']).to_string()
}

/// Where uploaded originals land before inference.
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create upload directory {}", root.display()))?;
        Ok(Self { root })
    }

    /// Persist an upload under its sanitized name and return the written path.
    pub fn save(&self, filename: Option<&str>, bytes: &[u8]) -> Result<PathBuf> {
        let mut name = sanitize_filename(filename.unwrap_or_default());
        if name.is_empty() {
            name = "upload".to_string();
        }
        let path = self.root.join(&name);
        if !path.starts_with(&self.root) {
            return Err(anyhow!("upload name '{}' escapes upload directory", name));
        }
        fs::write(&path, bytes).with_context(|| format!("write upload {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_unique_hex_names() {
        let a = new_reference();
        let b = new_reference();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32 + RESULT_SUFFIX.len());
        assert!(a.ends_with(RESULT_SUFFIX));
        assert!(a[..32].chars().all(|c| c.is_ascii_hexdigit()));
        assert!(is_plain_file_name(&a));
    }

    #[test]
    fn plain_file_names_exclude_paths_and_dotfiles() {
        assert!(is_plain_file_name("abc_result.jpg"));
        assert!(is_plain_file_name("-x.jpg"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name(".env"));
        assert!(!is_plain_file_name("a/b.jpg"));
        assert!(!is_plain_file_name("a..jpg"));
        assert!(!is_plain_file_name(&"a".repeat(256)));
    }

    #[test]
    fn dir_store_round_trips_and_reports_unknown() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = DirResultStore::open(dir.path().join("results"))?;
        let reference = store.store(b"jpeg bytes")?;
        assert_eq!(store.retrieve(&reference)?, b"jpeg bytes");

        assert!(matches!(
            store.retrieve("missing_result.jpg"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.retrieve("../secret.txt"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.retrieve(".."), Err(StoreError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn in_memory_store_round_trips() -> Result<()> {
        let store = InMemoryResultStore::new();
        let reference = store.store(&[1, 2, 3])?;
        assert_eq!(store.retrieve(&reference)?, vec![1, 2, 3]);
        assert_eq!(store.len(), 1);
        assert!(matches!(store.retrieve("nope"), Err(StoreError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn sanitize_removes_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename("My cool pic.jpg"), "My_cool_pic.jpg");
        assert_eq!(sanitize_filename("C:\\Windows\\x.png"), "C_Windows_x.png");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("fïre.jpg"), "fre.jpg");
        assert_eq!(sanitize_filename("../.."), "");
    }

    #[test]
    fn upload_store_writes_sanitized_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let uploads = UploadStore::open(dir.path().join("uploads"))?;
        let path = uploads.save(Some("../evil.jpg"), b"abc")?;
        assert_eq!(path, dir.path().join("uploads").join("evil.jpg"));
        assert_eq!(fs::read(&path)?, b"abc");

        let fallback = uploads.save(None, b"x")?;
        assert!(fallback.ends_with("upload"));
        Ok(())
    }
}

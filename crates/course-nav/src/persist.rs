//! Key/value persistence adapters with opaque revision tokens.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::PersistError;

#[derive(Debug, Clone, PartialEq)]
pub struct Stored {
    pub rev: String,
    pub value: Value,
}

#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Result<Stored, PersistError>;

    /// `expected_rev = None` creates the key and fails with `Conflict` if it
    /// exists. `Some(rev)` updates it and fails with `Conflict` if the stored
    /// revision has moved on. Returns the new revision.
    async fn put(&self, key: &str, value: Value, expected_rev: Option<&str>) -> Result<String, PersistError>;

    async fn close(&self) -> Result<(), PersistError> {
        Ok(())
    }
}

/// `<generation>-<content hash>`, generation counting from 1.
pub fn next_rev(prev: Option<&str>, value: &Value) -> String {
    let generation = prev
        .and_then(|r| r.split('-').next())
        .and_then(|g| g.parse::<u64>().ok())
        .unwrap_or(0) + 1;
    let body = serde_json::to_vec(value).unwrap_or_default();
    let digest = blake3::hash(&body);
    format!("{}-{}", generation, hex::encode(&digest.as_bytes()[..8]))
}

fn check_rev(key: &str, current: Option<&str>, expected: Option<&str>) -> Result<(), PersistError> {
    match (current, expected) {
        (None, None) => Ok(()),
        (Some(cur), Some(exp)) if cur == exp => Ok(()),
        (None, Some(_)) => Err(PersistError::NotFound(key.to_string())),
        _ => Err(PersistError::Conflict(key.to_string())),
    }
}

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    records: Mutex<HashMap<String, Stored>>,
    closed: AtomicBool,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reads a record even after `close`.
    pub async fn peek(&self, key: &str) -> Option<Stored> {
        self.records.lock().await.get(key).cloned()
    }

    fn ensure_open(&self) -> Result<(), PersistError> {
        if self.is_closed() { Err(PersistError::Closed) } else { Ok(()) }
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryAdapter {
    async fn get(&self, key: &str) -> Result<Stored, PersistError> {
        self.ensure_open()?;
        self.records.lock().await.get(key).cloned()
            .ok_or_else(|| PersistError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: Value, expected_rev: Option<&str>) -> Result<String, PersistError> {
        self.ensure_open()?;
        let mut records = self.records.lock().await;
        let current = records.get(key).map(|s| s.rev.clone());
        check_rev(key, current.as_deref(), expected_rev)?;
        let rev = next_rev(current.as_deref(), &value);
        records.insert(key.to_string(), Stored { rev: rev.clone(), value });
        Ok(rev)
    }

    async fn close(&self) -> Result<(), PersistError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev")]
    rev: String,
    setting: Value,
}

/// One JSON document per key under a directory.
#[derive(Debug)]
pub struct FileAdapter {
    dir: PathBuf,
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl FileAdapter {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, PersistError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        debug!("persist: file store at {}", dir.display());
        Ok(Self { dir, write_lock: Mutex::new(()), closed: AtomicBool::new(false) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn doc_path(&self, key: &str) -> Result<PathBuf, PersistError> {
        let ok = !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !ok {
            return Err(PersistError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("bad record key {:?}", key),
            )));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }

    async fn read_doc(&self, key: &str) -> Result<Option<Document>, PersistError> {
        let path = self.doc_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_open(&self) -> Result<(), PersistError> {
        if self.closed.load(Ordering::SeqCst) { Err(PersistError::Closed) } else { Ok(()) }
    }
}

#[async_trait]
impl PersistenceAdapter for FileAdapter {
    async fn get(&self, key: &str) -> Result<Stored, PersistError> {
        self.ensure_open()?;
        match self.read_doc(key).await? {
            Some(doc) => Ok(Stored { rev: doc.rev, value: doc.setting }),
            None => Err(PersistError::NotFound(key.to_string())),
        }
    }

    async fn put(&self, key: &str, value: Value, expected_rev: Option<&str>) -> Result<String, PersistError> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().await;
        let current = self.read_doc(key).await?.map(|d| d.rev);
        check_rev(key, current.as_deref(), expected_rev)?;

        let rev = next_rev(current.as_deref(), &value);
        let doc = Document { id: key.to_string(), rev: rev.clone(), setting: value };
        let path = self.doc_path(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&doc)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(rev)
    }

    async fn close(&self) -> Result<(), PersistError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

//! Durable storage for error records
//!
//! The error log hands batches to an [`ErrorPersistence`] backend. Two
//! backends ship here: an in-memory store for tests and embedding, and an
//! append-only JSON-lines file.

use crate::classifier::ErrorRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Persistence backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ErrorPersistence: Send + Sync {
    /// Store a batch. The batch is either stored whole or the call fails.
    async fn append(&self, batch: &[ErrorRecord]) -> Result<(), PersistenceError>;

    /// Up to `limit` most recent records, oldest first
    async fn load_recent(&self, limit: usize) -> Result<Vec<ErrorRecord>, PersistenceError>;
}

#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    records: Mutex<Vec<ErrorRecord>>,
    batches: Mutex<usize>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ErrorRecord> {
        self.records.lock().await.clone()
    }

    pub async fn batch_count(&self) -> usize {
        *self.batches.lock().await
    }
}

#[async_trait]
impl ErrorPersistence for InMemoryPersistence {
    async fn append(&self, batch: &[ErrorRecord]) -> Result<(), PersistenceError> {
        self.records.lock().await.extend_from_slice(batch);
        *self.batches.lock().await += 1;
        Ok(())
    }

    async fn load_recent(&self, limit: usize) -> Result<Vec<ErrorRecord>, PersistenceError> {
        let records = self.records.lock().await;
        let skip = records.len().saturating_sub(limit);
        Ok(records[skip..].to_vec())
    }
}

/// One JSON document per line, appended in batch order
#[derive(Debug)]
pub struct JsonLinesPersistence {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ErrorPersistence for JsonLinesPersistence {
    async fn append(&self, batch: &[ErrorRecord]) -> Result<(), PersistenceError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut buffer = Vec::new();
        for record in batch {
            serde_json::to_writer(&mut buffer, record)?;
            buffer.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buffer).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_recent(&self, limit: usize) -> Result<Vec<ErrorRecord>, PersistenceError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ErrorRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable error record"
                ),
            }
        }
        let skip = records.len().saturating_sub(limit);
        records.drain(..skip);
        Ok(records)
    }
}

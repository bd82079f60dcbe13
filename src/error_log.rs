//! Bounded in-memory error log with batched persistence
//!
//! The log keeps the most recent `capacity` records, evicting the oldest
//! first. When a persistence backend is attached, appended records are also
//! queued and written in batches of `flush_batch_size`, either when a batch
//! fills up or on the flush interval. A failed batch stays queued for the
//! next flush; the queue itself is bounded by `capacity`.

use crate::classifier::ErrorRecord;
use crate::metrics::ResilienceMetrics;
use crate::persistence::{ErrorPersistence, PersistenceError};
use common::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorLogConfig {
    pub capacity: usize,
    pub flush_batch_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for ErrorLogConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            flush_batch_size: 50,
            flush_interval_ms: 5_000,
        }
    }
}

impl ErrorLogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("error_log.capacity", "must be at least 1"));
        }
        if self.flush_batch_size == 0 || self.flush_batch_size > self.capacity {
            return Err(ConfigError::invalid(
                "error_log.flush_batch_size",
                "must be between 1 and capacity",
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "error_log.flush_interval_ms",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LogState {
    entries: VecDeque<ErrorRecord>,
    pending: VecDeque<ErrorRecord>,
    evicted: u64,
    dropped_unpersisted: u64,
}

pub struct ErrorLog {
    config: ErrorLogConfig,
    state: Mutex<LogState>,
    persistence: Option<Arc<dyn ErrorPersistence>>,
    flush_requested: Notify,
    flush_lock: Mutex<()>,
    metrics: Option<Arc<ResilienceMetrics>>,
}

impl std::fmt::Debug for ErrorLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorLog")
            .field("config", &self.config)
            .field("persistent", &self.persistence.is_some())
            .finish_non_exhaustive()
    }
}

impl ErrorLog {
    pub fn new(
        config: ErrorLogConfig,
        persistence: Option<Arc<dyn ErrorPersistence>>,
        metrics: Option<Arc<ResilienceMetrics>>,
    ) -> Self {
        Self {
            state: Mutex::new(LogState {
                entries: VecDeque::with_capacity(config.capacity),
                ..LogState::default()
            }),
            config,
            persistence,
            flush_requested: Notify::new(),
            flush_lock: Mutex::new(()),
            metrics,
        }
    }

    pub fn config(&self) -> &ErrorLogConfig {
        &self.config
    }

    pub async fn append(&self, record: ErrorRecord) {
        let mut state = self.state.lock().await;
        if state.entries.len() >= self.config.capacity {
            state.entries.pop_front();
            state.evicted += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_eviction();
            }
        }
        if self.persistence.is_some() {
            if state.pending.len() >= self.config.capacity {
                state.pending.pop_front();
                state.dropped_unpersisted += 1;
                warn!("Persistence queue full, dropping oldest unpersisted record");
            }
            state.pending.push_back(record.clone());
            if state.pending.len() >= self.config.flush_batch_size {
                self.flush_requested.notify_one();
            }
        }
        state.entries.push_back(record);
    }

    /// The last `n` records, oldest first
    pub async fn recent(&self, n: usize) -> Vec<ErrorRecord> {
        let state = self.state.lock().await;
        let skip = state.entries.len().saturating_sub(n);
        state.entries.iter().skip(skip).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    pub async fn evicted(&self) -> u64 {
        self.state.lock().await.evicted
    }

    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn dropped_unpersisted(&self) -> u64 {
        self.state.lock().await.dropped_unpersisted
    }

    /// Write all queued records. Returns how many were persisted.
    pub async fn flush(&self) -> Result<usize, PersistenceError> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };
        let _flushing = self.flush_lock.lock().await;
        let mut written = 0;
        loop {
            let batch: Vec<ErrorRecord> = {
                let mut state = self.state.lock().await;
                let take = state.pending.len().min(self.config.flush_batch_size);
                state.pending.drain(..take).collect()
            };
            if batch.is_empty() {
                break;
            }
            if let Err(e) = persistence.append(&batch).await {
                let mut state = self.state.lock().await;
                for record in batch.into_iter().rev() {
                    state.pending.push_front(record);
                }
                while state.pending.len() > self.config.capacity {
                    state.pending.pop_front();
                    state.dropped_unpersisted += 1;
                }
                return Err(e);
            }
            written += batch.len();
        }
        if written > 0 {
            debug!(records = written, "Flushed error records");
        }
        Ok(written)
    }

    /// Load persisted records into the in-memory log, oldest first
    pub async fn restore(&self, limit: usize) -> Result<usize, PersistenceError> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };
        let records = persistence.load_recent(limit.min(self.config.capacity)).await?;
        let mut restored = 0;
        let mut state = self.state.lock().await;
        for record in records.into_iter().rev() {
            if state.entries.len() >= self.config.capacity {
                break;
            }
            state.entries.push_front(record);
            restored += 1;
        }
        Ok(restored)
    }

    /// Flush on the interval and whenever a batch fills up. Flushes once more on cancel.
    pub fn spawn_flusher(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let log = Arc::clone(self);
        let period = Duration::from_millis(self.config.flush_interval_ms);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = log.flush_requested.notified() => {}
                }
                if let Err(e) = log.flush().await {
                    error!(error = %e, "Failed to persist error records");
                }
            }
            if let Err(e) = log.flush().await {
                error!(error = %e, "Failed to persist error records on shutdown");
            }
            debug!("Error log flusher stopped");
        })
    }
}

//! Authoritative in-memory course record backed by a persistence adapter.
//!
//! Writes to the adapter run on a dedicated worker task fed by a queue, so
//! a persist never starts before the previous one for the same key is done
//! and callers never wait on storage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{PersistError, ValidationError};
use crate::navdata::{Mutation, NavData, NavField};
use crate::persist::PersistenceAdapter;

pub const DEFAULT_KEY: &str = "navData";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Durability {
    Durable,
    /// At least one write is queued and not yet attempted.
    Pending,
    /// The last write (or the initial read) failed; memory is ahead of storage.
    Degraded(String),
}

enum PersistJob {
    Write(NavData),
    Flush(oneshot::Sender<()>),
}

pub struct NavDataStore {
    key: String,
    data: NavData,
    adapter: Arc<dyn PersistenceAdapter>,
    jobs: Option<mpsc::UnboundedSender<PersistJob>>,
    worker: Option<JoinHandle<()>>,
    status: Arc<watch::Sender<Durability>>,
    queued: Arc<AtomicUsize>,
}

impl NavDataStore {
    /// Spawns the persistence worker; must be called inside a tokio runtime.
    pub fn new(adapter: Arc<dyn PersistenceAdapter>, key: impl Into<String>) -> Self {
        let key = key.into();
        let (status, _) = watch::channel(Durability::Durable);
        let status = Arc::new(status);
        let queued = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(persist_worker(adapter.clone(), key.clone(), rx, status.clone(), queued.clone()));
        Self {
            key,
            data: NavData::default(),
            adapter,
            jobs: Some(tx),
            worker: Some(worker),
            status,
            queued,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Replaces the in-memory record with the stored one. Returns whether a
    /// record was found; any failure leaves the defaults in place.
    pub async fn load(&mut self) -> bool {
        match self.adapter.get(&self.key).await {
            Ok(stored) => match serde_json::from_value::<NavData>(stored.value) {
                Ok(data) => {
                    info!("persist: loaded {} (rev {})", self.key, stored.rev);
                    self.data = data;
                    true
                }
                Err(e) => {
                    warn!("persist: stored {} unreadable, keeping defaults: {}", self.key, e);
                    self.status.send_replace(Durability::Degraded(e.to_string()));
                    false
                }
            },
            Err(PersistError::NotFound(_)) => {
                info!("persist: no stored {}", self.key);
                false
            }
            Err(e) => {
                warn!("persist: reading {} failed, keeping defaults: {}", self.key, e);
                self.status.send_replace(Durability::Degraded(e.to_string()));
                false
            }
        }
    }

    pub fn apply(&mut self, mutation: Mutation) -> Result<Vec<NavField>, ValidationError> {
        self.apply_at(mutation, OffsetDateTime::now_utc())
    }

    pub fn apply_at(&mut self, mutation: Mutation, now: OffsetDateTime) -> Result<Vec<NavField>, ValidationError> {
        self.data.apply(mutation, now)
    }

    /// See [`NavData::apply_relayed`].
    pub fn apply_relayed(&mut self, mutation: Mutation) -> Result<Vec<NavField>, ValidationError> {
        self.data.apply_relayed(mutation)
    }

    /// Queues the current record for storage and returns immediately.
    pub fn persist(&self) {
        let Some(tx) = &self.jobs else {
            warn!("persist: store for {} is closed, write dropped", self.key);
            return;
        };
        self.queued.fetch_add(1, Ordering::SeqCst);
        if tx.send(PersistJob::Write(self.data.clone())).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            warn!("persist: store for {} is closed, write dropped", self.key);
            return;
        }
        self.status.send_if_modified(|s| {
            if *s == Durability::Durable {
                *s = Durability::Pending;
                true
            } else {
                false
            }
        });
    }

    /// Resolves once every write queued before this call has been attempted.
    pub async fn flush(&self) {
        let Some(tx) = &self.jobs else { return };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(PersistJob::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn snapshot(&self) -> NavData {
        self.data.clone()
    }

    pub fn get(&self) -> &NavData {
        &self.data
    }

    pub fn durability(&self) -> watch::Receiver<Durability> {
        self.status.subscribe()
    }

    /// Drains queued writes, then closes the adapter. Idempotent.
    pub async fn close(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
            if let Err(e) = self.adapter.close().await {
                warn!("persist: closing store failed: {}", e);
            }
            debug!("persist: {} closed", self.key);
        }
    }
}

async fn persist_worker(
    adapter: Arc<dyn PersistenceAdapter>,
    key: String,
    mut jobs: mpsc::UnboundedReceiver<PersistJob>,
    status: Arc<watch::Sender<Durability>>,
    queued: Arc<AtomicUsize>,
) {
    while let Some(job) = jobs.recv().await {
        match job {
            PersistJob::Write(data) => match write_record(adapter.as_ref(), &key, &data).await {
                Ok(rev) => {
                    debug!("persist: {} stored at rev {}", key, rev);
                    let left = queued.fetch_sub(1, Ordering::SeqCst) - 1;
                    status.send_replace(if left == 0 { Durability::Durable } else { Durability::Pending });
                }
                Err(e) => {
                    warn!("persist: {} not durable: {}", key, e);
                    queued.fetch_sub(1, Ordering::SeqCst);
                    status.send_replace(Durability::Degraded(e.to_string()));
                }
            },
            PersistJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Update against the current revision; if that fails for any reason, fall
/// back to a single create attempt.
pub async fn write_record(adapter: &dyn PersistenceAdapter, key: &str, data: &NavData) -> Result<String, PersistError> {
    let value: Value = serde_json::to_value(data)?;
    let updated = match adapter.get(key).await {
        Ok(current) => adapter.put(key, value.clone(), Some(&current.rev)).await,
        Err(e) => Err(e),
    };
    match updated {
        Ok(rev) => Ok(rev),
        Err(e) => {
            debug!("persist: update of {} failed ({}), creating", key, e);
            adapter.put(key, value, None).await
        }
    }
}

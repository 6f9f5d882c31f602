//! Event-bus and broadcast-sink seams, plus an in-process implementation of both.

use course_proto::Delta;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::error::EmitError;

#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub path: String,
    pub value: Value,
    pub origin: String,
}

pub type BusCallback = Box<dyn Fn(BusEvent) + Send + Sync>;

/// Subscribe-by-path delivery of `{value, origin}` updates.
pub trait EventBus: Send + Sync {
    fn subscribe(&self, path: &str, on_value: BusCallback) -> Subscription;
}

/// Best-effort outbound delivery of tagged deltas.
pub trait BroadcastSink: Send + Sync {
    fn broadcast(&self, delta: Delta) -> Result<(), EmitError>;
}

/// Detaches its subscription when `unsubscribe` is called or when dropped.
pub struct Subscription {
    path: String,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(path: impl Into<String>, detach: Box<dyn FnOnce() + Send>) -> Self {
        Self { path: path.into(), detach: Some(detach) }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(detach) = self.detach.take() {
            debug!("bus: detaching {}", self.path);
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Single-process bus: everything broadcast is visible to every subscriber.
#[derive(Debug, Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<Delta>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, delta: Delta) -> Result<usize, EmitError> {
        self.tx.send(delta).map_err(|_| EmitError::NoReceivers)
    }

    /// Raw feed of every delta, for mirroring to logs or stdout.
    pub fn tap(&self) -> broadcast::Receiver<Delta> {
        self.tx.subscribe()
    }
}

impl BroadcastSink for LocalBus {
    fn broadcast(&self, delta: Delta) -> Result<(), EmitError> {
        self.publish(delta).map(|_| ())
    }
}

impl EventBus for LocalBus {
    /// Must be called from within a tokio runtime.
    fn subscribe(&self, path: &str, on_value: BusCallback) -> Subscription {
        let mut rx = self.tx.subscribe();
        let watched = path.to_string();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(delta) => {
                        for pv in delta.values {
                            if pv.path == watched {
                                on_value(BusEvent { path: pv.path, value: pv.value, origin: delta.origin.clone() });
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("bus: subscriber on {} lagged, {} deltas dropped", watched, n),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Subscription::new(path, Box::new(move || task.abort()))
    }
}

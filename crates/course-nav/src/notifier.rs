//! Repeating alarm emitter.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use course_proto::Delta;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::bus::BroadcastSink;

pub const MIN_PERIOD: Duration = Duration::from_millis(500);

/// Emission permit shared with one timer task. A tick holds the lock while it
/// emits, so once `close` returns that task can never emit again, even if it
/// is mid-poll on another worker thread.
#[derive(Clone)]
struct Gate(Arc<Mutex<bool>>);

impl Gate {
    fn open() -> Self {
        Gate(Arc::new(Mutex::new(true)))
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn close(&self) {
        *self.lock() = false;
    }

    /// Returns false once closed; nothing is emitted then.
    fn emit(&self, sink: &dyn BroadcastSink, delta: Delta) -> bool {
        let open = self.lock();
        if !*open {
            return false;
        }
        if let Err(e) = sink.broadcast(delta) {
            warn!("notifier: emit failed: {}", e);
        }
        true
    }
}

struct Running {
    task: JoinHandle<()>,
    gate: Gate,
}

pub struct Notifier {
    sink: Arc<dyn BroadcastSink>,
    period: Duration,
    armed: watch::Sender<Option<Delta>>,
    running: Option<Running>,
}

impl Notifier {
    /// Periods below [`MIN_PERIOD`] are raised to it.
    pub fn new(sink: Arc<dyn BroadcastSink>, period: Duration) -> Self {
        let (armed, _) = watch::channel(None);
        Self { sink, period: period.max(MIN_PERIOD), armed, running: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn armed(&self) -> Option<Delta> {
        self.armed.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().map_or(false, |r| !r.task.is_finished())
    }

    /// Sets the message to repeat. A running timer picks it up on its next tick.
    pub fn arm(&mut self, message: Delta) {
        self.armed.send_replace(Some(message));
    }

    pub fn disarm(&mut self) {
        self.armed.send_replace(None);
    }

    /// (Re)starts the timer. The first emission happens one period from now.
    pub fn start(&mut self) {
        self.stop();
        let sink = self.sink.clone();
        let mut armed = self.armed.subscribe();
        let period = self.period;
        let gate = Gate::open();
        let permit = gate.clone();
        debug!("notifier: started, period {:?}", period);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let message = armed.borrow_and_update().clone();
                let Some(delta) = message else { continue };
                if !permit.emit(sink.as_ref(), delta) {
                    return;
                }
            }
        });
        self.running = Some(Running { task, gate });
    }

    /// No emission from the stopped timer is observable once this returns.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.gate.close();
            running.task.abort();
            debug!("notifier: stopped");
        }
    }

    /// Returns false (and changes nothing) for periods below [`MIN_PERIOD`].
    pub fn set_period(&mut self, period: Duration) -> bool {
        if period < MIN_PERIOD {
            return false;
        }
        self.period = period;
        if self.is_running() {
            self.start();
        }
        true
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop();
    }
}

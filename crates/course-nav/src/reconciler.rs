//! Course reconciliation service.
//!
//! One task owns the course record, the range watcher and the notifier. Bus
//! events, write commands, distance samples and the periodic re-broadcast are
//! all funnelled into it through a single queue, so no two inputs are ever
//! applied concurrently. Every accepted write follows apply -> persist ->
//! broadcast; rejected writes touch nothing.

use std::sync::Arc;
use std::time::Duration;

use course_proto::{paths, Delta, Notification, PathValue};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bus::{BroadcastSink, BusCallback, BusEvent, EventBus, Subscription};
use crate::error::ValidationError;
use crate::geo;
use crate::navdata::{Mutation, NavData, NavField, Position};
use crate::notifier::Notifier;
use crate::persist::PersistenceAdapter;
use crate::store::{Durability, NavDataStore, DEFAULT_KEY};
use crate::watcher::{RangeWatcher, Transition};

pub const DEFAULT_ORIGIN: &str = "freeboard-sk-helper";

/// Shorter re-broadcast intervals are raised to this.
pub const MIN_REBROADCAST: Duration = Duration::from_secs(1);

const APPROACHING: &str = "Approaching destination";
const CLEARED: &str = "Destination circle cleared";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Tag on everything this service emits; inbound updates carrying it are ignored.
    pub origin: String,
    pub record_key: String,
    /// Raised to [`MIN_REBROADCAST`] when shorter.
    pub rebroadcast_interval: Duration,
    pub notify_period: Duration,
    pub sample_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            record_key: DEFAULT_KEY.to_string(),
            rebroadcast_interval: Duration::from_secs(30),
            notify_period: Duration::from_millis(5000),
            sample_size: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self { accepted: true, reason: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { accepted: false, reason: Some(reason.into()) }
    }

    /// HTTP-style status for hosts that answer PUT requests.
    pub fn status_code(&self) -> u16 {
        if self.accepted { 200 } else { 400 }
    }
}

enum Input {
    Bus(BusEvent),
    Command { path: String, value: Value, reply: oneshot::Sender<CommandResult> },
    Distance(f64),
    Snapshot(oneshot::Sender<NavData>),
    Shutdown,
}

/// Cheap, cloneable entry point into a running [`Reconciler`].
#[derive(Clone)]
pub struct CourseHandle {
    tx: mpsc::UnboundedSender<Input>,
    durability: watch::Receiver<Durability>,
}

impl CourseHandle {
    /// Validated external write of one course field.
    pub async fn put(&self, path: &str, value: Value) -> CommandResult {
        let (reply, rx) = oneshot::channel();
        let input = Input::Command { path: path.to_string(), value, reply };
        if self.tx.send(input).is_err() {
            return CommandResult::rejected("course service stopped");
        }
        rx.await.unwrap_or_else(|_| CommandResult::rejected("course service stopped"))
    }

    /// Distance to the next point in meters; non-finite means "no valid fix".
    pub fn distance_sample(&self, meters: f64) {
        let _ = self.tx.send(Input::Distance(meters));
    }

    pub async fn snapshot(&self) -> Option<NavData> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Input::Snapshot(reply)).ok()?;
        rx.await.ok()
    }

    pub fn durability(&self) -> Durability {
        self.durability.borrow().clone()
    }
}

pub struct Reconciler {
    handle: CourseHandle,
    task: Option<JoinHandle<()>>,
}

impl Reconciler {
    /// Loads the stored record, subscribes to the bus and starts the service task.
    pub async fn start(
        config: ReconcilerConfig,
        adapter: Arc<dyn PersistenceAdapter>,
        bus: Arc<dyn EventBus>,
        sink: Arc<dyn BroadcastSink>,
    ) -> Self {
        info!("course: starting (origin {})", config.origin);
        let mut store = NavDataStore::new(adapter, config.record_key.clone());
        let mut watcher = RangeWatcher::new(0.0, 100.0, config.sample_size);

        let loaded = store.load().await;
        if let Some(radius) = store.get().next_point.arrival_circle {
            watcher.set_range_max(radius);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions = paths::WRITABLE
            .iter()
            .chain(std::iter::once(&paths::POSITION))
            .map(|path| bus.subscribe(path, echo_guard(config.origin.clone(), tx.clone())))
            .collect();

        let handle = CourseHandle { tx, durability: store.durability() };
        let notifier = Notifier::new(sink.clone(), config.notify_period);
        let core = CourseCore { config, store, watcher, notifier, sink, subscriptions };
        if loaded {
            core.broadcast_fields(&NavField::ALL);
        }
        let task = tokio::spawn(core.run(rx));
        Self { handle, task: Some(task) }
    }

    pub fn handle(&self) -> CourseHandle {
        self.handle.clone()
    }

    /// Detaches from the bus, stops all timers and closes storage. No
    /// emissions happen after this returns.
    pub async fn shutdown(mut self) {
        let _ = self.handle.tx.send(Input::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("course: service task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.handle.tx.send(Input::Shutdown);
        }
    }
}

/// Drops anything this service emitted itself before it reaches the queue.
fn echo_guard(origin: String, tx: mpsc::UnboundedSender<Input>) -> BusCallback {
    Box::new(move |ev: BusEvent| {
        if ev.origin == origin {
            return;
        }
        let _ = tx.send(Input::Bus(ev));
    })
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Command,
    Relayed,
}

struct CourseCore {
    config: ReconcilerConfig,
    store: NavDataStore,
    watcher: RangeWatcher,
    notifier: Notifier,
    sink: Arc<dyn BroadcastSink>,
    subscriptions: Vec<Subscription>,
}

impl CourseCore {
    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<Input>) {
        let period = self.config.rebroadcast_interval.max(MIN_REBROADCAST);
        let mut rebroadcast = tokio::time::interval_at(Instant::now() + period, period);
        rebroadcast.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(Input::Shutdown) | None => break,
                    Some(input) => self.handle(input),
                },
                _ = rebroadcast.tick() => {
                    debug!("course: periodic re-broadcast");
                    self.broadcast_fields(&NavField::ALL);
                }
            }
        }
        drop(rebroadcast);
        self.shutdown().await;
    }

    fn handle(&mut self, input: Input) {
        match input {
            Input::Bus(ev) if ev.path == paths::POSITION => self.on_position(&ev.value),
            Input::Bus(ev) => {
                if let Err(e) = self.write(&ev.path, &ev.value, Source::Relayed) {
                    debug!("course: ignored update on {} from {}: {}", ev.path, ev.origin, e);
                }
            }
            Input::Command { path, value, reply } => {
                let result = match self.write(&path, &value, Source::Command) {
                    Ok(()) => CommandResult::ok(),
                    Err(e) => {
                        info!("course: rejected write to {}: {}", path, e);
                        CommandResult::rejected(e.to_string())
                    }
                };
                let _ = reply.send(result);
            }
            Input::Distance(meters) => self.on_distance(meters),
            Input::Snapshot(reply) => {
                let _ = reply.send(self.store.snapshot());
            }
            Input::Shutdown => {}
        }
    }

    /// Writes that leave every output unchanged are accepted but neither
    /// stored nor broadcast, so two services sharing a bus settle after one
    /// exchange.
    fn write(&mut self, path: &str, value: &Value, source: Source) -> Result<(), ValidationError> {
        let mutation = Mutation::parse(path, value)?;
        let changed = match source {
            Source::Command => self.store.apply(mutation)?,
            Source::Relayed => self.store.apply_relayed(mutation)?,
        };
        if changed.is_empty() {
            debug!("course: {} unchanged", path);
            return Ok(());
        }
        self.store.persist();
        self.broadcast_fields(&changed);

        if changed.contains(&NavField::NextPosition) {
            // new destination: the old range history no longer applies
            self.watcher.reset();
            self.clear_alarm();
        }
        if changed.contains(&NavField::ArrivalCircle) {
            match self.store.get().next_point.arrival_circle {
                // the next evaluated sample reports any enter/exit
                Some(radius) => self.watcher.set_range_max(radius),
                None => {
                    self.watcher.reset();
                    self.clear_alarm();
                }
            }
        }
        Ok(())
    }

    fn on_position(&mut self, value: &Value) {
        let Some(dest) = self.store.get().next_point.position else { return };
        let distance = match Position::from_value(value) {
            Ok(Some(here)) => {
                let d = geo::distance_m(&here, &dest);
                self.emit(Delta::new(self.config.origin.clone(), vec![
                    PathValue::new(paths::NEXT_POINT_BEARING_TRUE, json!(geo::bearing_rad(&here, &dest))),
                    PathValue::new(paths::NEXT_POINT_DISTANCE, json!(d)),
                ]));
                d
            }
            _ => f64::NAN,
        };
        self.on_distance(distance);
    }

    fn on_distance(&mut self, meters: f64) {
        if self.store.get().next_point.arrival_circle.is_none() {
            return;
        }
        match self.watcher.observe(meters) {
            Transition::Entered { value, .. } => {
                info!("course: inside arrival circle ({:.0} m to go)", value);
                let alarm = self.notification(Notification::alarm(APPROACHING));
                self.emit(alarm.clone());
                self.notifier.arm(alarm);
                self.notifier.start();
            }
            Transition::Exited { value, .. } => {
                debug!("course: left arrival circle ({:?})", value);
                self.clear_alarm();
            }
            Transition::Steady(_) | Transition::None => {}
        }
    }

    /// Stops a running alarm and tells consumers it is over. No-op otherwise.
    fn clear_alarm(&mut self) {
        if !self.notifier.is_running() {
            return;
        }
        self.notifier.stop();
        self.notifier.disarm();
        info!("course: arrival alarm cleared");
        let cleared = self.notification(Notification::normal(CLEARED));
        self.emit(cleared);
    }

    fn notification(&self, n: Notification) -> Delta {
        Delta::new(self.config.origin.clone(), vec![n.to_path_value(paths::ARRIVAL_CIRCLE_NOTIFICATION)])
    }

    fn broadcast_fields(&self, fields: &[NavField]) {
        if fields.is_empty() {
            return;
        }
        let values = self.store.get().to_path_values(fields);
        self.emit(Delta::new(self.config.origin.clone(), values));
    }

    fn emit(&self, delta: Delta) {
        if let Err(e) = self.sink.broadcast(delta) {
            warn!("course: broadcast failed: {}", e);
        }
    }

    async fn shutdown(mut self) {
        info!("course: shutting down");
        for sub in self.subscriptions.drain(..) {
            sub.unsubscribe();
        }
        self.notifier.stop();
        self.store.close().await;
        info!("course: stopped");
    }
}

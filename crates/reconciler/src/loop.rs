//! Continuous reconciliation loop.
//!
//! Keeps a due time per resource and dispatches due resources to the
//! [`Reconciler`], at most one in flight per key and at most
//! `max_concurrent` overall. Successful passes requeue after the poll
//! interval; failures requeue with exponential backoff. A change to any
//! Operator makes every Ride due immediately, since a Ride's status is a
//! join against the Operator collection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use themepark_core::{ObjectKey, ResourceKind};
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::reconciler::{ReconcileOutcome, ReconcileReport, Reconciler};
use crate::store::StoreEvent;

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Delay between steady-state reconciles of one resource.
    pub poll_interval: Duration,
    /// How often the schedule is scanned for due resources.
    pub tick_interval: Duration,
    /// Maximum concurrent reconciles.
    pub max_concurrent: usize,
    /// Delay after the first failure; doubled per consecutive failure.
    pub backoff_base: Duration,
    /// Upper bound on the failure delay.
    pub max_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            tick_interval: Duration::from_millis(100),
            max_concurrent: 10,
            backoff_base: Duration::from_millis(500),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl LoopConfig {
    /// Requeue delay after `failures` consecutive failures.
    #[must_use]
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Counters describing loop activity.
#[derive(Debug, Default)]
pub struct LoopStats {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`LoopStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStatsSnapshot {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl LoopStats {
    /// Read the counters.
    #[must_use]
    pub fn snapshot(&self) -> LoopStatsSnapshot {
        LoopStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Schedule {
    due: Instant,
    failures: u32,
    /// A change arrived while the key was in flight.
    dirty: bool,
}

impl Schedule {
    fn now() -> Self {
        Self {
            due: Instant::now(),
            failures: 0,
            dirty: false,
        }
    }
}

/// Continuous reconciliation loop.
pub struct ReconciliationLoop {
    reconciler: Arc<Reconciler>,
    config: LoopConfig,
    schedule: BTreeMap<ObjectKey, Schedule>,
    running: HashMap<task::Id, ObjectKey>,
    tasks: JoinSet<Result<ReconcileReport>>,
    semaphore: Arc<Semaphore>,
    events: Option<broadcast::Receiver<StoreEvent>>,
    cancel: CancellationToken,
    stats: Arc<LoopStats>,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
}

impl ReconciliationLoop {
    /// Create a new reconciliation loop.
    ///
    /// Subscribes to store changes immediately, so nothing applied after
    /// construction is missed.
    pub fn new(reconciler: Arc<Reconciler>, config: LoopConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let events = Some(reconciler.store().subscribe());
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            reconciler,
            config,
            schedule: BTreeMap::new(),
            running: HashMap::new(),
            tasks: JoinSet::new(),
            semaphore,
            events,
            cancel: CancellationToken::new(),
            stats: Arc::new(LoopStats::default()),
            stop_rx,
            stop_tx,
        }
    }

    /// Run the reconciliation loop until stopped.
    ///
    /// On stop, in-flight reconciles are cancelled and drained.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoopStopped`] if the loop was stopped before it
    /// started.
    pub async fn run(&mut self) -> Result<()> {
        if *self.stop_rx.borrow() {
            return Err(Error::LoopStopped);
        }
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis(),
            max_concurrent = self.config.max_concurrent,
            "Starting reconciliation loop"
        );

        self.resync().await;
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => self.dispatch_due(),
                Some(joined) = self.tasks.join_next_with_id() => {
                    self.complete(joined);
                    self.dispatch_due();
                }
                event = next_event(&mut self.events) => self.on_event(event).await,
                _ = self.stop_rx.changed() => {
                    if *self.stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.complete(joined);
        }
        info!(stats = ?self.stats.snapshot(), "Reconciliation loop stopped");
        Ok(())
    }

    /// Reconcile every known resource once, in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource keys cannot be listed. Failures
    /// of individual passes are reported per key.
    pub async fn reconcile_once(&self) -> Result<Vec<(ObjectKey, Result<ReconcileReport>)>> {
        let keys = self.reconciler.keys().await?;
        let results: Vec<_> = stream::iter(keys)
            .map(|key| async move {
                let result = self.reconciler.reconcile(&key, &self.cancel).await;
                self.record(&result);
                (key, result)
            })
            .buffered(self.config.max_concurrent.max(1))
            .collect()
            .await;
        Ok(results)
    }

    /// Add every stored resource to the schedule, due now.
    async fn resync(&mut self) {
        match self.reconciler.keys().await {
            Ok(keys) => {
                for key in keys {
                    self.mark_due(key);
                }
            }
            // Keys still arrive through change notifications.
            Err(e) => warn!(error = %e, "Resync failed"),
        }
    }

    fn mark_due(&mut self, key: ObjectKey) {
        let in_flight = self.is_in_flight(&key);
        let entry = self.schedule.entry(key).or_insert_with(Schedule::now);
        if in_flight {
            entry.dirty = true;
        } else {
            entry.due = Instant::now();
        }
    }

    fn is_in_flight(&self, key: &ObjectKey) -> bool {
        self.running.values().any(|running| running == key)
    }

    fn dispatch_due(&mut self) {
        let now = Instant::now();
        let due: Vec<ObjectKey> = self
            .schedule
            .iter()
            .filter(|(key, entry)| entry.due <= now && !self.is_in_flight(key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in due {
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                break;
            };
            let reconciler = Arc::clone(&self.reconciler);
            let cancel = self.cancel.clone();
            let task_key = key.clone();
            let handle = self.tasks.spawn(async move {
                let _permit = permit;
                reconciler.reconcile(&task_key, &cancel).await
            });
            debug!(%key, "Dispatched");
            self.running.insert(handle.id(), key);
            self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn complete(
        &mut self,
        joined: std::result::Result<(task::Id, Result<ReconcileReport>), JoinError>,
    ) {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(e) => {
                error!(error = %e, "Reconcile task failed");
                (e.id(), Err(Error::Cancelled))
            }
        };
        let Some(key) = self.running.remove(&id) else {
            warn!(task = %id, "Completed task has no key");
            return;
        };
        self.record(&result);
        self.requeue(key, result);
    }

    fn requeue(&mut self, key: ObjectKey, result: Result<ReconcileReport>) {
        match result {
            Ok(report)
                if matches!(
                    report.outcome,
                    ReconcileOutcome::Deleted | ReconcileOutcome::Gone
                ) =>
            {
                self.schedule.remove(&key);
            }
            Ok(_) => {
                if let Some(entry) = self.schedule.get_mut(&key) {
                    let delay = if entry.dirty {
                        Duration::ZERO
                    } else {
                        self.config.poll_interval
                    };
                    *entry = Schedule {
                        due: Instant::now() + delay,
                        failures: 0,
                        dirty: false,
                    };
                }
            }
            Err(e) => {
                if let Some(entry) = self.schedule.get_mut(&key) {
                    let failures = entry.failures.saturating_add(1);
                    let delay = if e.is_retryable() {
                        self.config.backoff_delay(failures)
                    } else {
                        self.config.max_backoff
                    };
                    debug!(%key, failures, delay_ms = delay.as_millis(), "Requeued with backoff");
                    *entry = Schedule {
                        due: Instant::now() + delay,
                        failures,
                        dirty: false,
                    };
                }
            }
        }
    }

    fn record(&self, result: &Result<ReconcileReport>) {
        let counter = if result.is_ok() {
            &self.stats.succeeded
        } else {
            &self.stats.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    async fn on_event(
        &mut self,
        event: Option<std::result::Result<StoreEvent, broadcast::error::RecvError>>,
    ) {
        match event {
            Some(Ok(event)) => {
                if !event.changes_desired_state() {
                    return;
                }
                let key = event.key().clone();
                if matches!(event, StoreEvent::Removed(_)) {
                    if !self.is_in_flight(&key) {
                        self.schedule.remove(&key);
                    }
                } else {
                    self.mark_due(key.clone());
                }
                if key.kind == ResourceKind::Operator {
                    let rides: Vec<ObjectKey> = self
                        .schedule
                        .keys()
                        .filter(|k| k.kind == ResourceKind::Ride)
                        .cloned()
                        .collect();
                    debug!(operator = %key, rides = rides.len(), "Operator changed; requeueing rides");
                    for ride in rides {
                        self.mark_due(ride);
                    }
                }
                self.dispatch_due();
            }
            Some(Err(broadcast::error::RecvError::Lagged(missed))) => {
                warn!(missed, "Store notifications lagged; resyncing");
                self.resync().await;
            }
            Some(Err(broadcast::error::RecvError::Closed)) | None => {
                warn!("Store notifications closed; relying on polling");
                self.events = None;
            }
        }
    }

    /// Shared activity counters.
    #[must_use]
    pub fn stats(&self) -> Arc<LoopStats> {
        Arc::clone(&self.stats)
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    #[must_use]
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<StoreEvent>>,
) -> Option<std::result::Result<StoreEvent, broadcast::error::RecvError>> {
    match events {
        Some(rx) => Some(rx.recv().await),
        None => std::future::pending().await,
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

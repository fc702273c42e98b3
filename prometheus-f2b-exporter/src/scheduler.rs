//! Background poll loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::BuildFailure;
use crate::snapshot::{Snapshot, SnapshotBuilder};
use crate::store::SharedStore;

/// Whether a poll cycle is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
}

/// Result of a single poll cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// A snapshot was published.
    Published { jails: usize, errors: usize },
    /// Jails could not be enumerated; the previous snapshot was kept.
    Failed(BuildFailure),
    /// Another cycle was still running.
    Skipped,
}

/// Result of a scheduler tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// A cycle was started in the background.
    Started(JoinHandle<CycleOutcome>),
    /// Another cycle was still running, nothing was started.
    Skipped,
}

/// Runs collect-build-publish on a fixed interval.
///
/// At most one cycle runs at a time. A tick that fires while a cycle is in
/// flight is dropped, not queued.
pub struct PollScheduler {
    builder: Arc<SnapshotBuilder>,
    store: SharedStore,
    interval: Duration,
    slot: Arc<Semaphore>,
    seeded: bool,
}

impl PollScheduler {
    /// Create a new scheduler.
    pub fn new(builder: SnapshotBuilder, store: SharedStore, interval: Duration) -> Self {
        Self {
            builder: Arc::new(builder),
            store,
            interval,
            slot: Arc::new(Semaphore::new(1)),
            seeded: false,
        }
    }

    /// Publish a first snapshot from an already known jail list.
    ///
    /// Once seeded, [`run`](Self::run) waits a full interval before its
    /// first poll instead of polling immediately.
    pub async fn seed(&mut self, jail_names: Vec<String>) -> CycleOutcome {
        let Some(_permit) = self.acquire() else {
            return CycleOutcome::Skipped;
        };

        self.store.record_attempt(Utc::now());
        let snapshot = self.builder.build_from(jail_names).await;
        self.seeded = true;
        publish(&self.store, snapshot)
    }

    /// Current state of the scheduler.
    pub fn state(&self) -> SchedulerState {
        if self.slot.available_permits() == 0 {
            SchedulerState::Polling
        } else {
            SchedulerState::Idle
        }
    }

    /// Run one cycle in the current task, unless one is already running.
    pub async fn poll_once(&self) -> CycleOutcome {
        match self.acquire() {
            Some(permit) => run_cycle(&self.builder, &self.store, permit).await,
            None => CycleOutcome::Skipped,
        }
    }

    /// Start one cycle in the background, unless one is already running.
    pub fn tick(&self) -> TickOutcome {
        let Some(permit) = self.acquire() else {
            return TickOutcome::Skipped;
        };

        let builder = self.builder.clone();
        let store = self.store.clone();
        TickOutcome::Started(tokio::spawn(async move {
            run_cycle(&builder, &store, permit).await
        }))
    }

    fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match self.slot.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                self.store.record_skip();
                debug!("Previous poll still running, skipping tick");
                None
            }
        }
    }

    /// Poll until the shutdown signal is received.
    ///
    /// A cycle still running at shutdown is abandoned; since publishing is a
    /// single swap at the end of a cycle, no partial snapshot becomes visible.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting poll scheduler");

        let mut interval = if self.seeded {
            tokio::time::interval_at(Instant::now() + self.interval, self.interval)
        } else {
            tokio::time::interval(self.interval)
        };
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<CycleOutcome>> = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let TickOutcome::Started(handle) = self.tick() {
                        in_flight = Some(handle);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = in_flight
            && !handle.is_finished()
        {
            debug!("Abandoning in-flight poll");
            handle.abort();
        }

        info!("Poll scheduler stopped");
    }
}

async fn run_cycle(
    builder: &SnapshotBuilder,
    store: &SharedStore,
    _permit: OwnedSemaphorePermit,
) -> CycleOutcome {
    store.record_attempt(Utc::now());

    match builder.build().await {
        Ok(snapshot) => publish(store, snapshot),
        Err(e) => {
            warn!(error = %e, "Poll failed, keeping previous snapshot");
            store.record_failure(&e);
            CycleOutcome::Failed(e)
        }
    }
}

fn publish(store: &SharedStore, snapshot: Snapshot) -> CycleOutcome {
    let jails = snapshot.jails().len();
    let errors = snapshot.collection_errors().len();
    let published = store.publish(snapshot);
    store.record_success(&published);
    debug!(jails, errors, "Published snapshot");
    CycleOutcome::Published { jails, errors }
}

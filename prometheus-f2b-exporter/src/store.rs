//! Holder of the latest published snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::snapshot::Snapshot;

/// Poll diagnostics kept next to the snapshot.
///
/// None of these values are rendered into the metrics output; they are served
/// as JSON on `/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollStatus {
    /// Cycles that published a snapshot.
    pub polls_succeeded: u64,
    /// Cycles that failed to enumerate jails.
    pub polls_failed: u64,
    /// Ticks skipped because a poll was still running.
    pub ticks_skipped: u64,
    /// Failed cycles since the last success.
    pub consecutive_failures: u64,
    /// Start of the most recent cycle.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Collection time of the most recent published snapshot.
    pub last_success: Option<DateTime<Utc>>,
    /// Error of the most recent cycle, cleared by a success.
    pub last_error: Option<String>,
}

/// Thread-safe store for the current snapshot.
///
/// Writers build the new snapshot outside the lock; the critical section is a
/// single pointer assignment, and readers only clone an [`Arc`].
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: RwLock<Option<Arc<Snapshot>>>,
    status: RwLock<PollStatus>,
}

/// Create a shareable store handle.
pub type SharedStore = Arc<SnapshotStore>;

impl SnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current snapshot.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write() = Some(snapshot.clone());
        snapshot
    }

    /// The latest published snapshot, if any.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    /// Record the start of a poll cycle.
    pub fn record_attempt(&self, at: DateTime<Utc>) {
        self.status.write().last_attempt = Some(at);
    }

    /// Record a cycle that published `snapshot`.
    pub fn record_success(&self, snapshot: &Snapshot) {
        let mut status = self.status.write();
        status.polls_succeeded += 1;
        status.consecutive_failures = 0;
        status.last_success = Some(snapshot.collected_at());
        status.last_error = None;
    }

    /// Record a cycle that failed without publishing.
    pub fn record_failure(&self, error: impl ToString) {
        let mut status = self.status.write();
        status.polls_failed += 1;
        status.consecutive_failures += 1;
        status.last_error = Some(error.to_string());
    }

    /// Record a tick that was skipped because a poll was in flight.
    pub fn record_skip(&self) {
        self.status.write().ticks_skipped += 1;
    }

    /// Current poll diagnostics.
    pub fn status(&self) -> PollStatus {
        self.status.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tests::record;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn snapshot(banned: u64) -> Snapshot {
        Snapshot::new(
            Utc::now(),
            Duration::from_millis(5),
            vec![record("sshd", banned)],
            BTreeSet::new(),
        )
    }

    #[test]
    fn test_empty_store() {
        let store = SnapshotStore::new();
        assert!(store.current().is_none());
        assert_eq!(store.status(), PollStatus::default());
    }

    #[test]
    fn test_publish_replaces_whole_snapshot() {
        let store = SnapshotStore::new();
        store.publish(snapshot(1));
        let held = store.current().unwrap();

        store.publish(snapshot(7));

        // Readers keep the snapshot they already hold
        assert_eq!(held.jail("sshd").unwrap().currently_banned, 1);
        assert_eq!(
            store.current().unwrap().jail("sshd").unwrap().currently_banned,
            7
        );
    }

    #[test]
    fn test_failure_keeps_snapshot() {
        let store = SnapshotStore::new();
        let published = store.publish(snapshot(3));
        store.record_success(&published);

        store.record_failure("Fail2ban control channel unreachable");
        store.record_failure("Fail2ban control channel unreachable");

        assert!(Arc::ptr_eq(&store.current().unwrap(), &published));
        let status = store.status();
        assert_eq!(status.polls_succeeded, 1);
        assert_eq!(status.polls_failed, 2);
        assert_eq!(status.consecutive_failures, 2);
        assert!(status.last_error.is_some());
    }

    #[test]
    fn test_success_clears_error() {
        let store = SnapshotStore::new();
        store.record_failure("boom");
        let published = store.publish(snapshot(0));
        store.record_success(&published);

        let status = store.status();
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_error, None);
        assert_eq!(status.last_success, Some(published.collected_at()));
    }

    #[test]
    fn test_concurrent_readers_see_complete_snapshots() {
        let store = Arc::new(SnapshotStore::new());
        store.publish(snapshot(0));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let current = store.current().unwrap();
                        let jail = current.jail("sshd").unwrap();
                        assert_eq!(jail.banned_ips.len() as u64, jail.currently_banned);
                        assert_eq!(jail.total_banned, jail.currently_banned * 2);
                    }
                })
            })
            .collect();

        for banned in 1..200 {
            store.publish(snapshot(banned));
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}

//! Immutable point-in-time view of all jails and the builder that produces it.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::client::JailClient;
use crate::config::FilterConfig;
use crate::error::{BuildFailure, ErrorKind};

/// Counters of a single jail at the time of a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JailRecord {
    /// Jail name, unique within a snapshot.
    pub name: String,
    /// Hosts banned right now.
    pub currently_banned: u64,
    /// Bans since the daemon started.
    pub total_banned: u64,
    /// Failed attempts since the daemon started.
    pub failed_attempts: u64,
    /// Failures currently being tracked by the filter.
    pub currently_failed: u64,
    /// Addresses currently banned.
    pub banned_ips: Vec<String>,
}

/// A jail that could not be collected in a poll.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CollectionError {
    pub jail: String,
    pub kind: ErrorKind,
}

/// All jails' metrics at one point in time.
///
/// A snapshot is never modified after construction; the next successful poll
/// replaces it as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    collected_at: DateTime<Utc>,
    poll_duration: Duration,
    jails: Vec<JailRecord>,
    collection_errors: BTreeSet<CollectionError>,
}

impl Snapshot {
    /// Assemble a snapshot, dropping any jail that appears more than once or
    /// also appears in `collection_errors`.
    pub fn new(
        collected_at: DateTime<Utc>,
        poll_duration: Duration,
        jails: Vec<JailRecord>,
        collection_errors: BTreeSet<CollectionError>,
    ) -> Self {
        let jails = {
            let failed: HashSet<&str> =
                collection_errors.iter().map(|e| e.jail.as_str()).collect();
            let mut seen = HashSet::new();
            jails
                .into_iter()
                .filter(|j| !failed.contains(j.name.as_str()) && seen.insert(j.name.clone()))
                .collect()
        };

        Self {
            collected_at,
            poll_duration,
            jails,
            collection_errors,
        }
    }

    /// When collection of this snapshot started.
    pub fn collected_at(&self) -> DateTime<Utc> {
        self.collected_at
    }

    /// How long the poll took.
    pub fn poll_duration(&self) -> Duration {
        self.poll_duration
    }

    /// Successfully collected jails, in the order Fail2ban listed them.
    pub fn jails(&self) -> &[JailRecord] {
        &self.jails
    }

    /// Jails that failed to collect.
    pub fn collection_errors(&self) -> &BTreeSet<CollectionError> {
        &self.collection_errors
    }

    /// Look up a jail by name.
    pub fn jail(&self, name: &str) -> Option<&JailRecord> {
        self.jails.iter().find(|j| j.name == name)
    }

    /// Sum of currently banned hosts over all jails.
    pub fn total_currently_banned(&self) -> u64 {
        self.jails.iter().map(|j| j.currently_banned).sum()
    }

    /// Number of distinct addresses banned in any jail.
    pub fn unique_banned_ips(&self) -> usize {
        self.jails
            .iter()
            .flat_map(|j| j.banned_ips.iter())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Time elapsed since collection, zero if the clock went backwards.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.collected_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Jail filter built from include/exclude glob patterns.
#[derive(Debug, Default)]
pub struct JailFilter {
    include: Vec<glob::Pattern>,
    exclude: Vec<glob::Pattern>,
}

impl JailFilter {
    /// Create a new filter from configuration. Invalid patterns are ignored;
    /// they are rejected earlier by config validation.
    pub fn new(config: &FilterConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<glob::Pattern> {
            patterns
                .iter()
                .filter_map(|p| glob::Pattern::new(p).ok())
                .collect()
        };

        Self {
            include: compile(&config.include_jails),
            exclude: compile(&config.exclude_jails),
        }
    }

    /// Check if a jail should be collected.
    pub fn should_include(&self, jail: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(jail)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(jail))
    }
}

/// Builds snapshots by querying every jail through a [`JailClient`].
pub struct SnapshotBuilder {
    client: Arc<dyn JailClient>,
    filter: JailFilter,
}

impl SnapshotBuilder {
    /// Create a new builder.
    pub fn new(client: Arc<dyn JailClient>, filter: JailFilter) -> Self {
        Self { client, filter }
    }

    /// Enumerate jails and collect each of them.
    ///
    /// Fails only if the jail list itself cannot be obtained.
    pub async fn build(&self) -> Result<Snapshot, BuildFailure> {
        let started = Instant::now();
        let collected_at = Utc::now();

        let names = self.client.list_jails().await?;
        Ok(self.collect(names, started, collected_at).await)
    }

    /// Collect the given jails. Failures are recorded per jail and never
    /// abort the build.
    pub async fn build_from(&self, jail_names: Vec<String>) -> Snapshot {
        self.collect(jail_names, Instant::now(), Utc::now()).await
    }

    async fn collect(
        &self,
        jail_names: Vec<String>,
        started: Instant,
        collected_at: DateTime<Utc>,
    ) -> Snapshot {
        let mut seen = HashSet::new();
        let mut jails = Vec::with_capacity(jail_names.len());
        let mut errors = BTreeSet::new();

        for name in jail_names {
            if !seen.insert(name.clone()) {
                trace!(jail = %name, "Duplicate jail name ignored");
                continue;
            }
            if !self.filter.should_include(&name) {
                trace!(jail = %name, "Jail filtered out");
                continue;
            }

            match self.client.query_jail(&name).await {
                Ok(record) => jails.push(record),
                Err(e) => {
                    warn!(jail = %name, kind = %e.kind, error = %e.message, "Jail query failed");
                    errors.insert(CollectionError {
                        jail: name,
                        kind: e.kind,
                    });
                }
            }
        }

        let snapshot = Snapshot::new(collected_at, started.elapsed(), jails, errors);
        debug!(
            jails = snapshot.jails().len(),
            errors = snapshot.collection_errors().len(),
            duration_ms = snapshot.poll_duration().as_millis() as u64,
            "Snapshot built"
        );
        snapshot
    }
}

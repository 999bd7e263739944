//! Per-cluster failure and backoff bookkeeping.
//!
//! Health state is scoped to one platform within one orchestration run.
//! Each platform task constructs its own tracker, so clusters that serve
//! several platforms are tracked independently and nothing leaks between
//! runs.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Every cluster in the candidate set has reached its failure limit.
#[derive(Clone, Copy, Debug, Error)]
#[error("every cluster has reached its failure limit")]
pub struct NoUsableCluster;

/// Failure record for a single cluster.
#[derive(Clone, Debug)]
pub struct ClusterHealth {
    fails: u32,
    retry_at: DateTime<Utc>,
    max_fails: u32,
}

impl ClusterHealth {
    fn new(max_fails: u32) -> Self {
        Self {
            fails: 0,
            retry_at: DateTime::<Utc>::UNIX_EPOCH,
            max_fails,
        }
    }

    /// A dead cluster never re-enters rotation for this run.
    pub fn is_dead(&self) -> bool {
        self.fails >= self.max_fails
    }

    /// Whether the cluster is inside its retry-wait window.
    pub fn in_backoff(&self) -> bool {
        Utc::now() < self.retry_at
    }

    /// Count a failure and start a backoff window. No-op once dead.
    pub fn record_failure(&mut self, backoff: Duration) {
        if self.is_dead() {
            return;
        }
        self.fails += 1;
        self.retry_at = Utc::now() + backoff;
    }

    pub fn fails(&self) -> u32 {
        self.fails
    }

    pub fn retry_at(&self) -> DateTime<Utc> {
        self.retry_at
    }
}

/// Retry eligibility for the clusters of one platform.
///
/// Records are created lazily: a cluster that never failed is always
/// usable and carries an epoch retry time (no wait).
#[derive(Debug)]
pub struct ClusterHealthTracker {
    max_fails: u32,
    clusters: HashMap<String, ClusterHealth>,
}

impl ClusterHealthTracker {
    pub fn new(max_fails: u32) -> Self {
        Self {
            max_fails,
            clusters: HashMap::new(),
        }
    }

    /// Record a failure against a cluster, starting a backoff window.
    pub fn record_failure(&mut self, cluster: &str, backoff: Duration) {
        let max_fails = self.max_fails;
        self.clusters
            .entry(cluster.to_string())
            .or_insert_with(|| ClusterHealth::new(max_fails))
            .record_failure(backoff);
    }

    /// A cluster is usable when it is neither dead nor in backoff.
    pub fn is_usable(&self, cluster: &str) -> bool {
        match self.clusters.get(cluster) {
            Some(health) => !health.is_dead() && !health.in_backoff(),
            None => true,
        }
    }

    pub fn is_dead(&self, cluster: &str) -> bool {
        self.clusters
            .get(cluster)
            .map(ClusterHealth::is_dead)
            .unwrap_or(false)
    }

    pub fn fails(&self, cluster: &str) -> u32 {
        self.clusters
            .get(cluster)
            .map(ClusterHealth::fails)
            .unwrap_or(0)
    }

    /// Earliest instant at which any non-dead cluster leaves backoff.
    ///
    /// Clusters without a failure record count as immediately available.
    /// Fails when every named cluster is dead: there is nothing left to
    /// wait for.
    pub fn earliest_retry_at<'a>(
        &self,
        clusters: impl IntoIterator<Item = &'a str>,
    ) -> Result<DateTime<Utc>, NoUsableCluster> {
        clusters
            .into_iter()
            .filter(|name| !self.is_dead(name))
            .map(|name| {
                self.clusters
                    .get(name)
                    .map(ClusterHealth::retry_at)
                    .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
            })
            .min()
            .ok_or(NoUsableCluster)
    }
}

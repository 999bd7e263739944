use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;

use crate::config::{Cluster, DispatchConfig};
use crate::dispatch::CancelToken;
use crate::error::DispatchError;
use crate::health::ClusterHealthTracker;
use crate::session::{ClusterConfigProvider, RemoteBuildSession};
use crate::telemetry;

/// A launch candidate produced for one selection attempt.
///
/// Ephemeral: computed, ranked, and discarded per attempt.
#[derive(Clone)]
pub struct ClusterInfo {
    pub cluster: Cluster,
    pub platform: String,
    pub session: Arc<dyn RemoteBuildSession>,
    /// Active builds divided by configured capacity.
    pub load: f64,
}

impl fmt::Debug for ClusterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterInfo")
            .field("cluster", &self.cluster.name)
            .field("platform", &self.platform)
            .field("load", &self.load)
            .finish_non_exhaustive()
    }
}

/// Produces a load-ranked list of launchable clusters for a platform.
pub struct ClusterSelector {
    config: DispatchConfig,
    provider: Arc<dyn ClusterConfigProvider>,
}

impl ClusterSelector {
    pub fn new(config: DispatchConfig, provider: Arc<dyn ClusterConfigProvider>) -> Self {
        Self { config, provider }
    }

    /// Rank the platform's launchable clusters, best candidate first.
    ///
    /// Loops until at least one usable cluster answered a load query:
    /// waits out the earliest backoff window, probes every usable
    /// candidate in priority order, records query failures against the
    /// health tracker, and drops clusters that died. Fails with
    /// [`DispatchError::AllClustersFailed`] once the candidate set is
    /// exhausted, or [`DispatchError::Canceled`] when the dispatch is
    /// canceled mid-wait.
    pub async fn ranked_candidates(
        &self,
        platform: &str,
        candidates: &mut Vec<Cluster>,
        health: &mut ClusterHealthTracker,
        cancel: &CancelToken,
    ) -> Result<Vec<ClusterInfo>, DispatchError> {
        let mut reachable: Vec<ClusterInfo> = Vec::new();

        while reachable.is_empty() {
            self.wait_for_any_cluster(candidates, health, cancel).await?;

            let mut probe_order = candidates.clone();
            probe_order.sort_by_key(|cluster| cluster.priority);

            for cluster in &probe_order {
                if cancel.is_cancelled() {
                    return Err(DispatchError::Canceled);
                }
                if !health.is_usable(&cluster.name) {
                    continue;
                }
                match self.query_load(cluster, platform).await {
                    Ok(info) => reachable.push(info),
                    Err(err) => {
                        tracing::warn!(
                            platform = %platform,
                            cluster = %cluster.name,
                            "failed to query cluster load: {err}"
                        );
                        telemetry::record_cluster_query_failure(&cluster.name);
                        health.record_failure(&cluster.name, self.config.find_cluster_retry_delay());
                    }
                }
            }

            candidates.retain(|cluster| !health.is_dead(&cluster.name));
        }

        Ok(rank(reachable))
    }

    async fn query_load(
        &self,
        cluster: &Cluster,
        platform: &str,
    ) -> Result<ClusterInfo, crate::error::SessionError> {
        let session = self.provider.session(cluster, platform);
        let active = session.active_build_count().await?;
        let load = f64::from(active) / f64::from(cluster.max_concurrent_builds);
        tracing::debug!(
            platform = %platform,
            cluster = %cluster.name,
            load = load,
            active = active,
            capacity = cluster.max_concurrent_builds,
            "enabled cluster load"
        );
        telemetry::set_cluster_load(platform, &cluster.name, load);
        Ok(ClusterInfo {
            cluster: cluster.clone(),
            platform: platform.to_string(),
            session,
            load,
        })
    }

    /// Sleep until the earliest backoff window among the candidates
    /// elapses, observing cancellation.
    async fn wait_for_any_cluster(
        &self,
        candidates: &[Cluster],
        health: &ClusterHealthTracker,
        cancel: &CancelToken,
    ) -> Result<(), DispatchError> {
        let earliest = health
            .earliest_retry_at(candidates.iter().map(|cluster| cluster.name.as_str()))
            .map_err(|_| DispatchError::AllClustersFailed)?;

        let now = Utc::now();
        if earliest <= now {
            if cancel.is_cancelled() {
                return Err(DispatchError::Canceled);
            }
            return Ok(());
        }

        let wait = (earliest - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = cancel.cancelled() => Err(DispatchError::Canceled),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }
}

/// Sort candidates by priority, then stable-sort by load.
///
/// Load dominates; priority only breaks ties among equal loads because
/// the second sort is stable.
fn rank(mut candidates: Vec<ClusterInfo>) -> Vec<ClusterInfo> {
    candidates.sort_by_key(|info| info.cluster.priority);
    candidates.sort_by(|a, b| a.load.partial_cmp(&b.load).unwrap_or(Ordering::Equal));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use tokio::sync::mpsc;

    use crate::build::{BuildId, BuildStatus};
    use crate::error::SessionError;
    use crate::params::BuildParams;

    struct NoopSession;

    #[async_trait]
    impl RemoteBuildSession for NoopSession {
        fn cluster_url(&self) -> String {
            "https://cluster.local".into()
        }

        fn namespace(&self) -> String {
            "worker".into()
        }

        async fn active_build_count(&self) -> Result<u32, SessionError> {
            Ok(0)
        }

        async fn submit_build(&self, _params: &BuildParams) -> Result<BuildId, SessionError> {
            Err(SessionError::Rejected("noop".into()))
        }

        async fn stream_logs(
            &self,
            _build: &BuildId,
        ) -> Result<mpsc::Receiver<String>, SessionError> {
            let (_, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn await_completion(&self, _build: &BuildId) -> Result<BuildStatus, SessionError> {
            Ok(BuildStatus::Complete)
        }

        async fn cancel(&self, _build: &BuildId) -> Result<(), SessionError> {
            Ok(())
        }

        async fn inspect_failure_detail(
            &self,
            _build: &BuildId,
        ) -> Result<Option<Map<String, Value>>, SessionError> {
            Ok(None)
        }

        async fn annotations(
            &self,
            _build: &BuildId,
        ) -> Result<HashMap<String, String>, SessionError> {
            Ok(HashMap::new())
        }
    }

    fn info(name: &str, priority: i32, load: f64) -> ClusterInfo {
        ClusterInfo {
            cluster: Cluster {
                name: name.into(),
                priority,
                max_concurrent_builds: 10,
            },
            platform: "x86_64".into(),
            session: Arc::new(NoopSession),
            load,
        }
    }

    #[test]
    fn test_rank_prefers_lowest_load() {
        let ranked = rank(vec![info("busy", 0, 0.8), info("idle", 5, 0.5)]);
        assert_eq!(ranked[0].cluster.name, "idle");
        assert_eq!(ranked[1].cluster.name, "busy");
    }

    #[test]
    fn test_rank_breaks_load_ties_by_priority() {
        let ranked = rank(vec![
            info("second", 2, 0.5),
            info("first", 1, 0.5),
            info("third", 3, 0.5),
        ]);
        let names: Vec<_> = ranked
            .iter()
            .map(|info| info.cluster.name.as_str())
            .collect();
        assert_eq!(names, ["first", "second", "third"]);
    }

    #[test]
    fn test_rank_load_dominates_priority() {
        let ranked = rank(vec![info("preferred", 0, 0.9), info("fallback", 9, 0.1)]);
        assert_eq!(ranked[0].cluster.name, "fallback");
    }
}

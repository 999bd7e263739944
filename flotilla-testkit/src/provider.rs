use std::collections::HashMap;
use std::sync::Arc;

use flotilla::{Cluster, ClusterConfigProvider, DispatchError, RemoteBuildSession};

use crate::MockBuildSession;

/// Cluster configuration provider backed by fixed in-memory maps.
///
/// Register platforms with their cluster sets and a mock session per
/// cluster name, then hand the provider to a supervisor behind an `Arc`.
#[derive(Default)]
pub struct StaticClusterProvider {
    clusters: HashMap<String, Vec<Cluster>>,
    sessions: HashMap<String, Arc<MockBuildSession>>,
}

impl StaticClusterProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the cluster set for a platform.
    pub fn add_platform(&mut self, platform: impl Into<String>, clusters: Vec<Cluster>) {
        self.clusters.insert(platform.into(), clusters);
    }

    /// Register the session answering for a cluster name.
    pub fn add_session(&mut self, cluster_name: impl Into<String>, session: Arc<MockBuildSession>) {
        self.sessions.insert(cluster_name.into(), session);
    }

    /// The mock session registered for a cluster, for assertions.
    pub fn session_for(&self, cluster_name: &str) -> Arc<MockBuildSession> {
        Arc::clone(
            self.sessions
                .get(cluster_name)
                .unwrap_or_else(|| panic!("no session registered for cluster {cluster_name}")),
        )
    }
}

impl ClusterConfigProvider for StaticClusterProvider {
    fn enabled_clusters_for_platform(
        &self,
        platform: &str,
    ) -> Result<Vec<Cluster>, DispatchError> {
        self.clusters
            .get(platform)
            .filter(|clusters| !clusters.is_empty())
            .cloned()
            .ok_or_else(|| DispatchError::UnknownPlatform {
                platform: platform.to_string(),
            })
    }

    fn session(&self, cluster: &Cluster, _platform: &str) -> Arc<dyn RemoteBuildSession> {
        self.session_for(&cluster.name)
    }
}

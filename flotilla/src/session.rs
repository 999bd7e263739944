use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::build::{BuildId, BuildStatus};
use crate::config::Cluster;
use crate::error::{DispatchError, SessionError};
use crate::params::BuildParams;

/// Capability interface for one cluster's remote build backend.
///
/// Implementors wrap whatever API the cluster speaks. All calls are
/// treated as at-most-once; the dispatch core only retries operations
/// whose failure was clearly transient or a clean rejection.
#[async_trait]
pub trait RemoteBuildSession: Send + Sync {
    /// Base URI of the cluster's API endpoint.
    fn cluster_url(&self) -> String;

    /// Namespace worker builds run in.
    fn namespace(&self) -> String;

    /// Number of builds currently active on the cluster.
    async fn active_build_count(&self) -> Result<u32, SessionError>;

    /// Submit a new worker build and return its identity.
    async fn submit_build(&self, params: &BuildParams) -> Result<BuildId, SessionError>;

    /// Follow the build's log output.
    ///
    /// The channel closes once the build reaches a terminal state. The
    /// stream cannot be restarted.
    async fn stream_logs(&self, build: &BuildId) -> Result<mpsc::Receiver<String>, SessionError>;

    /// Block until the build reaches a terminal state.
    async fn await_completion(&self, build: &BuildId) -> Result<BuildStatus, SessionError>;

    /// Request that the build be stopped.
    async fn cancel(&self, build: &BuildId) -> Result<(), SessionError>;

    /// Structured failure detail for a failed build, when the backend
    /// has any (for example pod-level status).
    async fn inspect_failure_detail(
        &self,
        build: &BuildId,
    ) -> Result<Option<Map<String, Value>>, SessionError>;

    /// Raw annotations the backend reported for the build.
    async fn annotations(&self, build: &BuildId) -> Result<HashMap<String, String>, SessionError>;
}

/// Source of cluster configuration and per-cluster sessions.
pub trait ClusterConfigProvider: Send + Sync {
    /// Enabled clusters for a platform.
    ///
    /// Fails with [`DispatchError::UnknownPlatform`] when no clusters are
    /// configured for it.
    fn enabled_clusters_for_platform(&self, platform: &str)
        -> Result<Vec<Cluster>, DispatchError>;

    /// Open a session against a cluster for one selection attempt.
    fn session(&self, cluster: &Cluster, platform: &str) -> Arc<dyn RemoteBuildSession>;
}

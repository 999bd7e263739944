use chrono::Duration;
use serde::{Deserialize, Serialize};

/// A remote worker cluster serving one CPU architecture.
///
/// Static configuration, read-only during an orchestration run. Cluster
/// names are unique within the set configured for a platform.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique name within the platform's cluster set.
    pub name: String,
    /// Lower values are preferred when computed loads are equal.
    pub priority: i32,
    /// Capacity used to turn an active-build count into a load ratio.
    pub max_concurrent_builds: u32,
}

impl Cluster {
    /// Create a cluster definition, validating its capacity.
    pub fn new(
        name: impl Into<String>,
        priority: i32,
        max_concurrent_builds: u32,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            max_concurrent_builds > 0,
            "max_concurrent_builds must be positive"
        );
        Ok(Self {
            name: name.into(),
            priority,
            max_concurrent_builds,
        })
    }
}

/// Configuration for dispatch retry and supervision behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Delay in seconds before re-querying a cluster that could not be
    /// reached for its load.
    pub find_cluster_retry_delay_secs: u64,
    /// Delay in seconds before reusing a cluster that refused to start a
    /// build.
    pub failure_retry_delay_secs: u64,
    /// Failure count at which a cluster is considered dead for the rest
    /// of the run.
    pub max_cluster_fails: u32,
    /// Buffer capacity of the dispatch event channel.
    pub event_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            find_cluster_retry_delay_secs: 15,
            failure_retry_delay_secs: 10,
            max_cluster_fails: 20,
            event_capacity: 256,
        }
    }
}

impl DispatchConfig {
    /// Backoff applied to a cluster whose load query failed.
    pub fn find_cluster_retry_delay(&self) -> Duration {
        Duration::seconds(self.find_cluster_retry_delay_secs as i64)
    }

    /// Backoff applied to a cluster that refused a build.
    pub fn failure_retry_delay(&self) -> Duration {
        Duration::seconds(self.failure_retry_delay_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_requires_capacity() {
        assert!(Cluster::new("a", 0, 0).is_err());
        assert!(Cluster::new("a", 0, 1).is_ok());
    }

    #[test]
    fn test_default_delays() {
        let config = DispatchConfig::default();
        assert_eq!(config.find_cluster_retry_delay(), Duration::seconds(15));
        assert_eq!(config.failure_retry_delay(), Duration::seconds(10));
        assert_eq!(config.max_cluster_fails, 20);
    }
}

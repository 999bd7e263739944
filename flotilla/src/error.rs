use thiserror::Error;

/// Failure modes reported by a cluster's remote build session.
///
/// The split matters for retry policy: transient and rejected failures are
/// safe to retry against another cluster, anything else leaves the remote
/// side in an unknown state and must not be retried.
#[derive(Clone, Debug, Error)]
pub enum SessionError {
    /// Connectivity-level failure; the same call may succeed later.
    #[error("transient cluster error: {0}")]
    Transient(String),

    /// The remote side understood the request and refused it.
    #[error("build request rejected: {0}")]
    Rejected(String),

    /// Anything else. The remote side may or may not have acted on the
    /// request.
    #[error("{0}")]
    Other(String),
}

impl SessionError {
    /// Whether the failure is safe to retry against another cluster.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Transient(_) | SessionError::Rejected(_))
    }
}

/// Errors surfaced by the dispatch core.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No clusters are configured for the platform. Fatal for that
    /// platform, never retried.
    #[error("no clusters found for platform {platform}")]
    UnknownPlatform {
        /// The platform that has no cluster configuration.
        platform: String,
    },

    /// Every candidate cluster reached its failure limit.
    #[error("Could not find appropriate cluster for worker build.")]
    AllClustersFailed,

    /// Dispatch was requested with an empty platform set.
    #[error("no enabled platform to build on")]
    NoPlatforms,

    /// One or more worker builds did not succeed. The payload maps each
    /// failed platform to its structured failure reason.
    #[error("worker builds failed: {reasons}")]
    BuildsFailed {
        /// JSON object: platform name to structured reason.
        reasons: serde_json::Value,
    },

    /// The orchestration was canceled. Raised only after every live
    /// worker build received a best-effort cancel and every platform task
    /// acknowledged the cancellation.
    #[error("dispatch canceled")]
    Canceled,

    /// A platform task panicked.
    #[error("platform task aborted: {0}")]
    TaskPanicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_session_errors() {
        assert!(SessionError::Transient("timeout".into()).is_retryable());
        assert!(SessionError::Rejected("quota".into()).is_retryable());
        assert!(!SessionError::Other("boom".into()).is_retryable());
    }

    #[test]
    fn test_other_displays_bare_message() {
        let err = SessionError::Other("connection reset".into());
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn test_all_clusters_failed_message() {
        assert_eq!(
            DispatchError::AllClustersFailed.to_string(),
            "Could not find appropriate cluster for worker build."
        );
    }

    #[test]
    fn test_builds_failed_carries_json_payload() {
        let reasons = serde_json::json!({
            "ppc64le": { "general": "build not started" }
        });
        let err = DispatchError::BuildsFailed { reasons };
        assert!(err.to_string().contains("ppc64le"));
    }
}

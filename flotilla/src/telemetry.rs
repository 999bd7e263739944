//! Tracing and telemetry instrumentation for flotilla.
//!
//! Helper functions for creating tracing spans and recording metrics
//! during dispatch lifecycle events. All functions work both with and
//! without the `metrics` feature flag.

use tracing::{info_span, Span};

/// Create a tracing span covering one platform's dispatch task.
///
/// Every log line emitted while selecting, launching, and monitoring the
/// platform's build carries the platform field.
#[must_use]
pub fn platform_span(platform: impl AsRef<str>) -> Span {
    info_span!(
        "flotilla.platform",
        platform = %platform.as_ref(),
    )
}

/// Create a tracing span for a cluster launch attempt.
#[must_use]
pub fn launch_span(platform: impl AsRef<str>, cluster: impl AsRef<str>) -> Span {
    info_span!(
        "flotilla.launch",
        platform = %platform.as_ref(),
        cluster = %cluster.as_ref(),
    )
}

/// Record a worker build launch.
pub fn record_build_launched(platform: impl AsRef<str>, cluster: impl AsRef<str>) {
    tracing::info!(
        platform = %platform.as_ref(),
        cluster = %cluster.as_ref(),
        "worker build launched"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_build_launched(platform.as_ref(), cluster.as_ref());
}

/// Record a worker build reaching a terminal outcome.
pub fn record_build_completed(platform: impl AsRef<str>, status: impl AsRef<str>) {
    tracing::info!(
        platform = %platform.as_ref(),
        status = %status.as_ref(),
        "worker build settled"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_build_completed(platform.as_ref(), status.as_ref());
}

/// Record a failed cluster load query.
pub fn record_cluster_query_failure(cluster: impl AsRef<str>) {
    #[cfg(feature = "metrics")]
    crate::metrics::record_cluster_query_failure(cluster.as_ref());

    #[cfg(not(feature = "metrics"))]
    let _ = cluster;
}

/// Update the observed load gauge for a cluster.
pub fn set_cluster_load(platform: impl AsRef<str>, cluster: impl AsRef<str>, load: f64) {
    #[cfg(feature = "metrics")]
    crate::metrics::set_cluster_load(platform.as_ref(), cluster.as_ref(), load);

    #[cfg(not(feature = "metrics"))]
    let _ = (platform, cluster, load);
}

/// Observe the wall-clock duration of a worker build.
pub fn observe_build_duration(
    platform: impl AsRef<str>,
    status: impl AsRef<str>,
    duration_secs: f64,
) {
    tracing::debug!(
        platform = %platform.as_ref(),
        status = %status.as_ref(),
        duration_secs = duration_secs,
        "worker build duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_build_duration(platform.as_ref(), status.as_ref(), duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_span() {
        let span = platform_span("x86_64");
        assert_eq!(span.metadata().unwrap().name(), "flotilla.platform");
    }

    #[test]
    fn test_launch_span() {
        let span = launch_span("ppc64le", "worker01");
        assert_eq!(span.metadata().unwrap().name(), "flotilla.launch");
    }

    #[test]
    fn test_record_helpers_do_not_panic() {
        record_build_launched("x86_64", "worker01");
        record_build_completed("x86_64", "complete");
        record_cluster_query_failure("worker01");
        set_cluster_load("x86_64", "worker01", 0.5);
        observe_build_duration("x86_64", "complete", 1.5);
    }
}

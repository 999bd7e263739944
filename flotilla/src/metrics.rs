//! Prometheus metrics instrumentation for flotilla.
//!
//! All metrics are conditionally compiled behind the `metrics` feature
//! flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `flotilla_builds_launched_total` - Worker builds created on clusters
//! - `flotilla_builds_completed_total` - Worker builds that settled
//! - `flotilla_cluster_query_failures_total` - Failed cluster load queries
//!
//! ## Gauges
//! - `flotilla_cluster_load` - Last observed load ratio per cluster
//!
//! ## Histograms
//! - `flotilla_build_duration_seconds` - Worker build wall-clock duration
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, GaugeVec, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for flotilla metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for worker builds created on clusters.
///
/// Labels:
/// - `platform`: The target CPU architecture
/// - `cluster`: The cluster the build was created on
pub static BUILDS_LAUNCHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "flotilla_builds_launched_total",
        "Total number of worker builds launched",
    );
    CounterVec::new(opts, &["platform", "cluster"])
        .expect("flotilla_builds_launched_total metric creation failed")
});

/// Counter for worker builds that settled.
///
/// Labels:
/// - `platform`: The target CPU architecture
/// - `status`: The terminal outcome (complete, failed, canceled, monitor_error)
pub static BUILDS_COMPLETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "flotilla_builds_completed_total",
        "Total number of worker builds that settled",
    );
    CounterVec::new(opts, &["platform", "status"])
        .expect("flotilla_builds_completed_total metric creation failed")
});

/// Counter for failed cluster load queries.
///
/// Labels:
/// - `cluster`: The cluster that could not be reached
pub static CLUSTER_QUERY_FAILURES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "flotilla_cluster_query_failures_total",
        "Total number of failed cluster load queries",
    );
    CounterVec::new(opts, &["cluster"])
        .expect("flotilla_cluster_query_failures_total metric creation failed")
});

/// Gauge for the last observed load ratio per cluster.
///
/// Labels:
/// - `platform`: The target CPU architecture
/// - `cluster`: The cluster queried
pub static CLUSTER_LOAD: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "flotilla_cluster_load",
        "Last observed load ratio (active builds / capacity)",
    );
    GaugeVec::new(opts, &["platform", "cluster"])
        .expect("flotilla_cluster_load metric creation failed")
});

/// Histogram for worker build wall-clock duration in seconds.
///
/// Labels:
/// - `platform`: The target CPU architecture
/// - `status`: The terminal outcome
pub static BUILD_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(1.0, 2.0, 14).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "flotilla_build_duration_seconds",
        "Worker build wall-clock duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["platform", "status"])
        .expect("flotilla_build_duration_seconds metric creation failed")
});

/// Initialize all metrics by registering them with the global registry.
///
/// This function is idempotent - calling it multiple times is safe.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(BUILDS_LAUNCHED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(BUILDS_COMPLETED_TOTAL.clone()),
        Box::new(CLUSTER_QUERY_FAILURES_TOTAL.clone()),
        Box::new(CLUSTER_LOAD.clone()),
        Box::new(BUILD_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

/// Helper to record a worker build launch.
pub fn record_build_launched(platform: &str, cluster: &str) {
    BUILDS_LAUNCHED_TOTAL
        .with_label_values(&[platform, cluster])
        .inc();
}

/// Helper to record a settled worker build.
pub fn record_build_completed(platform: &str, status: &str) {
    BUILDS_COMPLETED_TOTAL
        .with_label_values(&[platform, status])
        .inc();
}

/// Helper to record a failed cluster load query.
pub fn record_cluster_query_failure(cluster: &str) {
    CLUSTER_QUERY_FAILURES_TOTAL
        .with_label_values(&[cluster])
        .inc();
}

/// Helper to update the cluster load gauge.
pub fn set_cluster_load(platform: &str, cluster: &str, load: f64) {
    CLUSTER_LOAD.with_label_values(&[platform, cluster]).set(load);
}

/// Helper to observe a worker build duration.
pub fn observe_build_duration(platform: &str, status: &str, duration_secs: f64) {
    BUILD_DURATION_SECONDS
        .with_label_values(&[platform, status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics().expect("metrics initialization should succeed");
    }

    #[test]
    fn test_record_build_launched() {
        record_build_launched("x86_64", "worker01");
    }

    #[test]
    fn test_record_build_completed() {
        record_build_completed("x86_64", "complete");
        record_build_completed("x86_64", "failed");
        record_build_completed("x86_64", "monitor_error");
    }

    #[test]
    fn test_set_cluster_load() {
        set_cluster_load("ppc64le", "worker02", 0.8);
    }

    #[test]
    fn test_gather_metrics() {
        init_metrics().expect("metrics initialization should succeed");

        record_build_launched("x86_64", "worker01");
        record_build_completed("x86_64", "complete");

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("flotilla_builds_launched_total"));
        assert!(output.contains("flotilla_builds_completed_total"));
    }
}

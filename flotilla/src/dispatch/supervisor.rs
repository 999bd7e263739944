use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, Notify};
use tracing::Instrument;

use crate::aggregate::{aggregate_builds, OrchestrationResult};
use crate::build::WorkerBuild;
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::events::{DispatchEvent, DispatchEventPayload, EventMeta, InProcEventBus};
use crate::health::ClusterHealthTracker;
use crate::params::{generate_upload_dir, worker_build_params, BuildParams};
use crate::selector::ClusterSelector;
use crate::session::ClusterConfigProvider;
use crate::worker::WorkerBuildHandle;

/// Token for signaling cooperative cancellation to platform tasks.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<CancelTokenInner>,
}

#[derive(Debug)]
struct CancelTokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a new cancellation token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelTokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before the flag check so a cancel racing with this
        // call cannot be missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameter layers shared by every platform task of one run.
struct DispatchRequest {
    base: BuildParams,
    platform_overrides: HashMap<String, BuildParams>,
    global_overrides: BuildParams,
    upload_dir: String,
}

/// Top-level concurrency engine for one orchestration run.
///
/// Runs one cancellable task per requested platform. Each task selects a
/// cluster, launches a worker build on it (retrying lower-ranked
/// candidates on launch failure), then monitors the build to completion.
/// The supervisor joins all tasks and aggregates their records into a
/// single [`OrchestrationResult`].
///
/// A supervisor drives one run at a time; concurrent `dispatch` calls on
/// the same supervisor are not supported. Once [`cancel`] has been
/// called the supervisor is spent.
///
/// [`cancel`]: DispatchSupervisor::cancel
pub struct DispatchSupervisor {
    config: DispatchConfig,
    provider: Arc<dyn ClusterConfigProvider>,
    events: Arc<InProcEventBus>,
    cancel_token: CancelToken,
    launched: Arc<Mutex<Vec<WorkerBuildHandle>>>,
}

impl std::fmt::Debug for DispatchSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSupervisor")
            .field("config", &self.config)
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl DispatchSupervisor {
    /// Create a supervisor over the given cluster configuration.
    pub fn new(config: DispatchConfig, provider: Arc<dyn ClusterConfigProvider>) -> Self {
        let events = Arc::new(InProcEventBus::new(config.event_capacity));
        Self {
            config,
            provider,
            events,
            cancel_token: CancelToken::new(),
            launched: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Subscribe to dispatch lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// Token observed by every platform task of this supervisor.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel_token.clone()
    }

    /// Request cancellation of the in-progress dispatch.
    pub fn cancel(&self) {
        tracing::info!("dispatch cancellation requested");
        self.cancel_token.cancel();
    }

    /// Fan the build request out across all requested platforms.
    ///
    /// Returns once every platform task has settled. The result carries
    /// exactly one [`WorkerBuild`] per requested platform, succeeded or
    /// failed, plus the upload-directory token every launched build was
    /// given. Returns an error only for orchestration-level faults
    /// (cancellation, task panic); per-platform build failures are
    /// reported through the result's fail reasons.
    pub async fn dispatch(
        &self,
        platforms: &BTreeSet<String>,
        base_params: &BuildParams,
        platform_overrides: &HashMap<String, BuildParams>,
        global_overrides: &BuildParams,
    ) -> Result<OrchestrationResult, DispatchError> {
        if platforms.is_empty() {
            return Err(DispatchError::NoPlatforms);
        }

        let upload_dir = generate_upload_dir();
        tracing::info!(
            upload_dir = %upload_dir,
            platforms = ?platforms,
            "dispatching worker builds"
        );

        let request = Arc::new(DispatchRequest {
            base: base_params.clone(),
            platform_overrides: platform_overrides.clone(),
            global_overrides: global_overrides.clone(),
            upload_dir: upload_dir.clone(),
        });

        self.launched.lock().await.clear();
        let results: Arc<Mutex<Vec<WorkerBuild>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::with_capacity(platforms.len());
        for platform in platforms {
            handles.push(tokio::spawn(Self::run_platform(
                platform.clone(),
                self.config.clone(),
                Arc::clone(&self.provider),
                Arc::clone(&self.events),
                Arc::clone(&request),
                Arc::clone(&self.launched),
                Arc::clone(&results),
                self.cancel_token.clone(),
            )));
        }

        let tasks = futures::future::join_all(handles);
        tokio::pin!(tasks);
        let joined = tokio::select! {
            joined = &mut tasks => joined,
            _ = self.cancel_token.cancelled() => {
                tracing::info!("dispatch canceled, cancelling worker builds");
                self.cancel_live_builds().await;
                tasks.await
            }
        };

        let mut panic_message = None;
        for result in joined {
            if let Err(err) = result {
                tracing::error!("platform task aborted: {err}");
                panic_message.get_or_insert_with(|| err.to_string());
            }
        }

        if panic_message.is_some() || self.cancel_token.is_cancelled() {
            // A build may have launched after the first sweep; the
            // per-handle guard keeps cancellation at-most-once.
            self.cancel_live_builds().await;
        }
        if let Some(message) = panic_message {
            return Err(DispatchError::TaskPanicked(message));
        }
        if self.cancel_token.is_cancelled() {
            return Err(DispatchError::Canceled);
        }

        let builds = {
            let mut guard = results.lock().await;
            std::mem::take(&mut *guard)
        };
        let result = aggregate_builds(builds, upload_dir);
        for (platform, build) in &result.per_platform {
            tracing::info!(
                platform = %platform,
                status = %build.status,
                "platform settled"
            );
        }
        Ok(result)
    }

    /// Best-effort cancel every launched build that is still live.
    async fn cancel_live_builds(&self) {
        let handles = { self.launched.lock().await.clone() };
        futures::future::join_all(handles.iter().map(|handle| handle.cancel())).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_platform(
        platform: String,
        config: DispatchConfig,
        provider: Arc<dyn ClusterConfigProvider>,
        events: Arc<InProcEventBus>,
        request: Arc<DispatchRequest>,
        launched: Arc<Mutex<Vec<WorkerBuildHandle>>>,
        results: Arc<Mutex<Vec<WorkerBuild>>>,
        cancel: CancelToken,
    ) {
        let record = Self::select_and_monitor(
            &platform, &config, &provider, &events, &request, &launched, &cancel,
        )
        .instrument(crate::telemetry::platform_span(&platform))
        .await;
        results.lock().await.push(record);
    }

    /// One platform's SELECTING → LAUNCHING → MONITORING loop.
    ///
    /// Always settles with exactly one record: a monitored build's
    /// outcome, or a placeholder carrying the reason no build started.
    async fn select_and_monitor(
        platform: &str,
        config: &DispatchConfig,
        provider: &Arc<dyn ClusterConfigProvider>,
        events: &Arc<InProcEventBus>,
        request: &DispatchRequest,
        launched: &Arc<Mutex<Vec<WorkerBuildHandle>>>,
        cancel: &CancelToken,
    ) -> WorkerBuild {
        let clusters = match provider.enabled_clusters_for_platform(platform) {
            Ok(clusters) => clusters,
            Err(err) => {
                tracing::error!(platform = %platform, "{err}");
                return Self::fail_platform(platform, events, err.to_string());
            }
        };

        let selector = ClusterSelector::new(config.clone(), Arc::clone(provider));
        let mut health = ClusterHealthTracker::new(config.max_cluster_fails);
        let mut candidates = clusters;
        let params = worker_build_params(
            &request.base,
            platform,
            &request.upload_dir,
            &request.global_overrides,
            request.platform_overrides.get(platform),
        );

        loop {
            let ranked = match selector
                .ranked_candidates(platform, &mut candidates, &mut health, cancel)
                .await
            {
                Ok(ranked) => ranked,
                Err(DispatchError::Canceled) => return Self::canceled_platform(platform),
                Err(err) => {
                    tracing::warn!(platform = %platform, "{err}");
                    return Self::fail_platform(platform, events, err.to_string());
                }
            };

            for info in ranked {
                if cancel.is_cancelled() {
                    return Self::canceled_platform(platform);
                }
                tracing::info!(
                    platform = %platform,
                    cluster = %info.cluster.name,
                    load = info.load,
                    "attempting to start worker build"
                );
                match WorkerBuildHandle::launch(&info, &params, Arc::clone(events)).await {
                    Ok(handle) => {
                        launched.lock().await.push(handle.clone());
                        return handle.monitor(cancel).await;
                    }
                    Err(err) if err.is_retryable() => {
                        tracing::warn!(
                            platform = %platform,
                            cluster = %info.cluster.name,
                            "failed to create worker build: {err}"
                        );
                        health.record_failure(&info.cluster.name, config.failure_retry_delay());
                    }
                    Err(err) => {
                        // Ambiguous failure: the remote side may or may
                        // not have acted, so no further launch attempts.
                        tracing::error!(
                            platform = %platform,
                            cluster = %info.cluster.name,
                            "failed to create worker build: {err}"
                        );
                        let mut record = Self::fail_platform(platform, events, err.to_string());
                        record.cluster_name = Some(info.cluster.name.clone());
                        return record;
                    }
                }
            }
        }
    }

    fn fail_platform(
        platform: &str,
        events: &Arc<InProcEventBus>,
        reason: String,
    ) -> WorkerBuild {
        events.publish(DispatchEvent {
            meta: EventMeta::new(platform),
            payload: DispatchEventPayload::Failed {
                reason: reason.clone(),
            },
        });
        WorkerBuild::placeholder(platform, reason)
    }

    fn canceled_platform(platform: &str) -> WorkerBuild {
        let mut record = WorkerBuild::placeholder(platform, "dispatch canceled");
        record.status = crate::build::BuildStatus::Canceled;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_cancel_token_shared_state() {
        let token = CancelToken::new();
        let clone1 = token.clone();
        let clone2 = token.clone();

        token.cancel();

        assert!(clone1.is_cancelled());
        assert!(clone2.is_cancelled());

        // cancelled() should return immediately (not hang)
        timeout(Duration::from_secs(1), clone1.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        let clone1 = token.clone();
        let clone2 = token.clone();
        let clone3 = token.clone();

        let h1 = tokio::spawn(async move { clone1.cancelled().await });
        let h2 = tokio::spawn(async move { clone2.cancelled().await });
        let h3 = tokio::spawn(async move { clone3.cancelled().await });

        // Give waiters time to enter the wait
        tokio::time::sleep(Duration::from_millis(50)).await;

        token.cancel();

        let results = timeout(
            Duration::from_secs(5),
            futures::future::join_all(vec![h1, h2, h3]),
        )
        .await
        .expect("waiters did not observe cancellation within 5 seconds");

        for result in results {
            result.expect("waiter task panicked");
        }
    }

    #[tokio::test]
    async fn test_cancel_token_default_not_cancelled() {
        let token = CancelToken::default();
        assert!(!token.is_cancelled());
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::build::{BuildAnnotations, BuildId, BuildStatus, WorkerBuild};
use crate::config::Cluster;
use crate::dispatch::CancelToken;
use crate::error::SessionError;
use crate::events::{DispatchEvent, DispatchEventPayload, EventMeta, InProcEventBus};
use crate::selector::ClusterInfo;
use crate::session::RemoteBuildSession;
use crate::telemetry;

/// One in-flight remote build: identity, log stream, completion wait,
/// cancellation, failure diagnosis.
///
/// Created by a successful launch; cloned into the supervisor's registry
/// so cleanup can reach live builds. Cancellation is issued at most once
/// per build regardless of which clone requests it.
#[derive(Clone)]
pub struct WorkerBuildHandle {
    platform: String,
    cluster: Cluster,
    session: Arc<dyn RemoteBuildSession>,
    build_id: BuildId,
    events: Arc<InProcEventBus>,
    launched_at: Instant,
    finished: Arc<AtomicBool>,
    cancel_requested: Arc<AtomicBool>,
}

impl std::fmt::Debug for WorkerBuildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerBuildHandle")
            .field("platform", &self.platform)
            .field("cluster", &self.cluster.name)
            .field("build_id", &self.build_id)
            .field("finished", &self.finished.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl WorkerBuildHandle {
    /// Submit a build to the candidate cluster's session.
    ///
    /// The caller retries the next-ranked cluster on a retryable error;
    /// any other error means the remote state is unknown and the platform
    /// must not launch again.
    pub async fn launch(
        info: &ClusterInfo,
        params: &crate::params::BuildParams,
        events: Arc<InProcEventBus>,
    ) -> Result<Self, SessionError> {
        let build_id = info.session.submit_build(params).await?;
        tracing::info!(
            platform = %info.platform,
            cluster = %info.cluster.name,
            build = %build_id,
            "created worker build"
        );
        telemetry::record_build_launched(&info.platform, &info.cluster.name);
        events.publish(DispatchEvent {
            meta: EventMeta::new(&info.platform),
            payload: DispatchEventPayload::Launched {
                cluster: info.cluster.name.clone(),
                build_id,
            },
        });
        Ok(Self {
            platform: info.platform.clone(),
            cluster: info.cluster.clone(),
            session: Arc::clone(&info.session),
            build_id,
            events,
            launched_at: Instant::now(),
            finished: Arc::new(AtomicBool::new(false)),
            cancel_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster.name
    }

    pub fn build_id(&self) -> BuildId {
        self.build_id
    }

    /// Best-effort cancellation of the remote build.
    ///
    /// Skipped when the build already finished or a cancel was already
    /// issued. Remote-side errors are swallowed: cancellation is advisory
    /// cleanup and never masks the original failure.
    pub async fn cancel(&self) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        if self.cancel_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.session.cancel(&self.build_id).await {
            Ok(()) => {
                tracing::info!(
                    platform = %self.platform,
                    build = %self.build_id,
                    "canceled worker build"
                );
                self.events.publish(DispatchEvent {
                    meta: EventMeta::new(&self.platform),
                    payload: DispatchEventPayload::Canceled {
                        build_id: self.build_id,
                    },
                });
            }
            Err(err) => {
                tracing::warn!(
                    platform = %self.platform,
                    build = %self.build_id,
                    "failed to cancel worker build: {err}"
                );
            }
        }
    }

    /// Stream logs and block until the build settles or the dispatch is
    /// canceled, producing the platform's final record.
    pub async fn monitor(&self, cancel: &CancelToken) -> WorkerBuild {
        let logs = self.spawn_log_pump();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.session.await_completion(&self.build_id) => Some(result),
        };

        logs.abort();
        let _ = logs.await;

        let mut record = WorkerBuild {
            platform: self.platform.clone(),
            cluster_name: Some(self.cluster.name.clone()),
            build_id: Some(self.build_id),
            status: BuildStatus::Pending,
            monitor_error: None,
            fail_reason: None,
            annotations: None,
        };

        match outcome {
            None => {
                // Dispatch canceled while the build was live; stop it
                // before the supervisor reports the cancellation.
                self.cancel().await;
                self.finished.store(true, Ordering::SeqCst);
                record.status = BuildStatus::Canceled;
                record.fail_reason = Some(json!({ "general": "build canceled" }));
            }
            Some(Ok(status)) => {
                self.finished.store(true, Ordering::SeqCst);
                record.status = status;
                telemetry::observe_build_duration(
                    &self.platform,
                    status.as_str(),
                    self.launched_at.elapsed().as_secs_f64(),
                );
                if status == BuildStatus::Complete {
                    record.annotations = self.fetch_annotations().await;
                } else {
                    record.fail_reason = Some(self.diagnose_failure(None).await);
                }
                telemetry::record_build_completed(&self.platform, status.as_str());
                self.events.publish(DispatchEvent {
                    meta: EventMeta::new(&self.platform),
                    payload: DispatchEventPayload::Finished {
                        build_id: self.build_id,
                        status,
                    },
                });
            }
            Some(Err(err)) => {
                let message = err.to_string();
                tracing::error!(
                    platform = %self.platform,
                    build = %self.build_id,
                    "failed to monitor worker build: {message}"
                );
                // The remote side is in an unknown state; attempt to stop
                // the build rather than leave it running unmonitored.
                self.cancel().await;
                record.status = BuildStatus::Failed;
                record.monitor_error = Some(message.clone());
                record.fail_reason = Some(self.diagnose_failure(Some(&message)).await);
                telemetry::record_build_completed(&self.platform, "monitor_error");
                self.events.publish(DispatchEvent {
                    meta: EventMeta::new(&self.platform),
                    payload: DispatchEventPayload::Failed { reason: message },
                });
            }
        }

        record
    }

    /// Structured failure reason for this build. Never fails.
    ///
    /// A monitor error takes precedence; otherwise the backend is asked
    /// for failure detail, with a generic fallback when it has none.
    pub async fn diagnose_failure(&self, monitor_error: Option<&str>) -> Value {
        if let Some(message) = monitor_error {
            return json!({ "general": message });
        }

        let mut reason = serde_json::Map::new();
        match self.session.inspect_failure_detail(&self.build_id).await {
            Ok(Some(detail)) => reason.extend(detail),
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(
                    platform = %self.platform,
                    build = %self.build_id,
                    "failure detail unavailable: {err}"
                );
            }
        }
        if reason.is_empty() {
            reason.insert("general".into(), Value::String("worker build failed".into()));
        }
        Value::Object(reason)
    }

    async fn fetch_annotations(&self) -> Option<BuildAnnotations> {
        match self.session.annotations(&self.build_id).await {
            Ok(raw) => Some(BuildAnnotations::from_raw(
                &raw,
                self.session.cluster_url(),
                self.session.namespace(),
                self.build_id.to_string(),
            )),
            Err(err) => {
                tracing::warn!(
                    platform = %self.platform,
                    build = %self.build_id,
                    "failed to fetch build annotations: {err}"
                );
                None
            }
        }
    }

    /// Forward remote log lines, tagged with the platform, until the
    /// stream closes or monitoring stops.
    fn spawn_log_pump(&self) -> tokio::task::JoinHandle<()> {
        let session = Arc::clone(&self.session);
        let events = Arc::clone(&self.events);
        let platform = self.platform.clone();
        let build_id = self.build_id;

        tokio::spawn(async move {
            let mut lines = match session.stream_logs(&build_id).await {
                Ok(rx) => rx,
                Err(err) => {
                    tracing::warn!(
                        platform = %platform,
                        build = %build_id,
                        "failed to stream build logs: {err}"
                    );
                    return;
                }
            };
            while let Some(line) = lines.recv().await {
                tracing::info!(platform = %platform, build = %build_id, "{line}");
                events.publish(DispatchEvent {
                    meta: EventMeta::new(&platform),
                    payload: DispatchEventPayload::LogLine { build_id, line },
                });
            }
        })
    }
}

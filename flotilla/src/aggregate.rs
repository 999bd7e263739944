use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::build::WorkerBuild;
use crate::error::DispatchError;

/// Consolidated outcome of one orchestration run.
///
/// Carries exactly one [`WorkerBuild`] per requested platform and the
/// upload-directory token every launched build was given.
#[derive(Clone, Debug)]
pub struct OrchestrationResult {
    pub per_platform: HashMap<String, WorkerBuild>,
    pub upload_dir: String,
    /// Platform name to structured failure reason, for every platform
    /// that did not succeed. Empty means overall success.
    pub fail_reasons: Map<String, Value>,
    pub succeeded: bool,
}

impl OrchestrationResult {
    /// The record for one platform, if it was requested.
    pub fn build_info(&self, platform: &str) -> Option<&WorkerBuild> {
        self.per_platform.get(platform)
    }

    /// Pipeline-facing verdict.
    ///
    /// Fails with [`DispatchError::BuildsFailed`] carrying the
    /// per-platform failure reasons as its JSON payload, so callers can
    /// tell which platforms failed and why.
    pub fn verdict(&self) -> Result<(), DispatchError> {
        if self.succeeded {
            Ok(())
        } else {
            Err(DispatchError::BuildsFailed {
                reasons: Value::Object(self.fail_reasons.clone()),
            })
        }
    }
}

/// Combine per-platform records into the final verdict.
///
/// A platform failed if no remote build backs its record or the backing
/// build did not complete. Failure reasons come from the record's stored
/// diagnosis, with a build-not-started fallback for placeholders.
pub fn aggregate_builds(builds: Vec<WorkerBuild>, upload_dir: String) -> OrchestrationResult {
    let mut fail_reasons = Map::new();
    for build in &builds {
        if !build.is_succeeded() {
            let reason = build
                .fail_reason
                .clone()
                .unwrap_or_else(|| json!({ "general": "build not started" }));
            fail_reasons.insert(build.platform.clone(), reason);
        }
    }

    let succeeded = fail_reasons.is_empty();
    let per_platform = builds
        .into_iter()
        .map(|build| (build.platform.clone(), build))
        .collect();

    OrchestrationResult {
        per_platform,
        upload_dir,
        fail_reasons,
        succeeded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{BuildId, BuildStatus};

    fn complete_build(platform: &str) -> WorkerBuild {
        WorkerBuild {
            platform: platform.into(),
            cluster_name: Some("worker01".into()),
            build_id: Some(BuildId::new()),
            status: BuildStatus::Complete,
            monitor_error: None,
            fail_reason: None,
            annotations: None,
        }
    }

    #[test]
    fn test_all_complete_is_success() {
        let result = aggregate_builds(
            vec![complete_build("x86_64"), complete_build("ppc64le")],
            "upload/run".into(),
        );
        assert!(result.succeeded);
        assert!(result.fail_reasons.is_empty());
        assert_eq!(result.per_platform.len(), 2);
        assert!(result.verdict().is_ok());
    }

    #[test]
    fn test_failed_platform_carries_reason() {
        let mut failed = complete_build("ppc64le");
        failed.status = BuildStatus::Failed;
        failed.fail_reason = Some(json!({ "general": "boom" }));

        let result = aggregate_builds(
            vec![complete_build("x86_64"), failed],
            "upload/run".into(),
        );
        assert!(!result.succeeded);
        assert_eq!(result.fail_reasons["ppc64le"]["general"], "boom");
        assert!(!result.fail_reasons.contains_key("x86_64"));
    }

    #[test]
    fn test_placeholder_defaults_to_build_not_started() {
        let build = WorkerBuild {
            platform: "s390x".into(),
            cluster_name: None,
            build_id: None,
            status: BuildStatus::Unreachable,
            monitor_error: None,
            fail_reason: None,
            annotations: None,
        };
        let result = aggregate_builds(vec![build], "upload/run".into());
        assert_eq!(result.fail_reasons["s390x"]["general"], "build not started");
    }

    #[test]
    fn test_verdict_payload_is_the_reason_mapping() {
        let mut failed = complete_build("ppc64le");
        failed.status = BuildStatus::Failed;
        failed.fail_reason = Some(json!({ "general": "boom" }));

        let result = aggregate_builds(vec![failed], "upload/run".into());
        match result.verdict() {
            Err(DispatchError::BuildsFailed { reasons }) => {
                assert_eq!(reasons["ppc64le"]["general"], "boom");
            }
            other => panic!("expected BuildsFailed, got {other:?}"),
        }
    }
}

use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Identity of one remote worker build.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BuildId(pub Uuid);

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildId {
    /// Create a new build ID using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for BuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a worker build.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Canceled,
    Unreachable,
}

impl BuildStatus {
    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Complete | BuildStatus::Failed | BuildStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Complete => "complete",
            BuildStatus::Failed => "failed",
            BuildStatus::Canceled => "canceled",
            BuildStatus::Unreachable => "unreachable",
        }
    }
}

impl Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The record retained for one platform once its task settles.
///
/// A record with no `build_id` is a placeholder: no remote build backs it
/// and `monitor_error` carries the reason the platform never launched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerBuild {
    pub platform: String,
    pub cluster_name: Option<String>,
    pub build_id: Option<BuildId>,
    pub status: BuildStatus,
    pub monitor_error: Option<String>,
    pub fail_reason: Option<Value>,
    pub annotations: Option<BuildAnnotations>,
}

impl WorkerBuild {
    /// Placeholder for a platform whose build never started.
    pub fn placeholder(platform: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            platform: platform.into(),
            cluster_name: None,
            build_id: None,
            status: BuildStatus::Unreachable,
            monitor_error: Some(reason.clone()),
            fail_reason: Some(json!({ "general": reason })),
            annotations: None,
        }
    }

    /// A platform succeeded only if a real remote build completed.
    pub fn is_succeeded(&self) -> bool {
        self.build_id.is_some() && self.status == BuildStatus::Complete
    }
}

/// Reference to the remote build within its cluster.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildRef {
    #[serde(rename = "cluster-url")]
    pub cluster_url: String,
    pub namespace: String,
    #[serde(rename = "build-name")]
    pub build_name: String,
}

/// Consolidated annotations published for a completed worker build.
///
/// Raw annotations arrive from the backend as string values with embedded
/// JSON; `digests` and `plugins-metadata` are parsed here so downstream
/// metadata submission gets structured values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildAnnotations {
    pub build: BuildRef,
    pub digests: Value,
    #[serde(rename = "plugins-metadata")]
    pub plugins_metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_fragment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_fragment_key: Option<String>,
}

impl BuildAnnotations {
    /// Assemble annotations from the backend's raw string map.
    pub fn from_raw(
        raw: &HashMap<String, String>,
        cluster_url: impl Into<String>,
        namespace: impl Into<String>,
        build_name: impl Into<String>,
    ) -> Self {
        let digests = raw
            .get("digests")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_else(|| json!([]));
        let plugins_metadata = raw
            .get("plugins-metadata")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_else(|| json!({}));

        // The fragment is only usable when both halves are present.
        let (metadata_fragment, metadata_fragment_key) =
            match (raw.get("metadata_fragment"), raw.get("metadata_fragment_key")) {
                (Some(fragment), Some(key)) => (Some(fragment.clone()), Some(key.clone())),
                _ => (None, None),
            };

        Self {
            build: BuildRef {
                cluster_url: cluster_url.into(),
                namespace: namespace.into(),
                build_name: build_name.into(),
            },
            digests,
            plugins_metadata,
            metadata_fragment,
            metadata_fragment_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(BuildStatus::Complete.is_terminal());
        assert!(BuildStatus::Failed.is_terminal());
        assert!(BuildStatus::Canceled.is_terminal());
        assert!(!BuildStatus::Pending.is_terminal());
        assert!(!BuildStatus::Running.is_terminal());
        assert!(!BuildStatus::Unreachable.is_terminal());
    }

    #[test]
    fn test_placeholder_is_not_succeeded() {
        let build = WorkerBuild::placeholder("ppc64le", "no cluster");
        assert!(!build.is_succeeded());
        assert!(build.build_id.is_none());
        assert_eq!(
            build.fail_reason.unwrap()["general"],
            Value::String("no cluster".into())
        );
    }

    #[test]
    fn test_annotations_parse_embedded_json() {
        let mut raw = HashMap::new();
        raw.insert(
            "digests".to_string(),
            r#"[{"digest": "sha256:abcd"}]"#.to_string(),
        );
        raw.insert("plugins-metadata".to_string(), r#"{"errors": {}}"#.to_string());

        let annotations =
            BuildAnnotations::from_raw(&raw, "https://worker01", "worker", "build-1");
        assert_eq!(annotations.digests[0]["digest"], "sha256:abcd");
        assert_eq!(annotations.plugins_metadata["errors"], json!({}));
        assert!(annotations.metadata_fragment.is_none());
        assert_eq!(annotations.build.build_name, "build-1");
    }

    #[test]
    fn test_annotations_default_when_missing() {
        let raw = HashMap::new();
        let annotations = BuildAnnotations::from_raw(&raw, "url", "ns", "name");
        assert_eq!(annotations.digests, json!([]));
        assert_eq!(annotations.plugins_metadata, json!({}));
    }

    #[test]
    fn test_annotations_fragment_requires_both_keys() {
        let mut raw = HashMap::new();
        raw.insert("metadata_fragment".to_string(), "frag".to_string());
        let annotations = BuildAnnotations::from_raw(&raw, "url", "ns", "name");
        assert!(annotations.metadata_fragment.is_none());

        raw.insert("metadata_fragment_key".to_string(), "key".to_string());
        let annotations = BuildAnnotations::from_raw(&raw, "url", "ns", "name");
        assert_eq!(annotations.metadata_fragment.as_deref(), Some("frag"));
        assert_eq!(annotations.metadata_fragment_key.as_deref(), Some("key"));
    }
}

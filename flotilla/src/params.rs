use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Keyword parameters submitted with a worker build request.
///
/// Merging never mutates the source maps: every merge operates on a clone,
/// so callers can reuse their override maps across dispatch calls.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildParams(Map<String, Value>);

impl BuildParams {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Insert a parameter, returning the previous value if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Overlay another parameter map; its entries win on key conflicts.
    pub fn apply_overrides(&mut self, overrides: &BuildParams) {
        for (key, value) in overrides.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for BuildParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for BuildParams {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Build the parameters submitted for one platform's worker build.
///
/// Merge order: base parameters, then global overrides, then the
/// platform's own overrides, each later layer winning key conflicts. The
/// platform identity and the run's shared upload directory are always
/// injected.
pub fn worker_build_params(
    base: &BuildParams,
    platform: &str,
    upload_dir: &str,
    global_overrides: &BuildParams,
    platform_overrides: Option<&BuildParams>,
) -> BuildParams {
    let mut params = base.clone();

    // The worker derives its architecture from the platform parameter.
    params.remove("architecture");
    params.insert("platform", platform);
    params.insert("upload_dir", upload_dir);

    params.apply_overrides(global_overrides);
    if let Some(overrides) = platform_overrides {
        params.apply_overrides(overrides);
    }

    params
}

/// Create the upload-directory token shared by all of a run's builds.
///
/// Every worker build of the run is told the same path so their outputs
/// land in one place.
pub fn generate_upload_dir() -> String {
    format!("upload/{}", Uuid::now_v7())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> BuildParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_merge_order_platform_wins() {
        let base = params(&[("a", json!(1)), ("b", json!(2))]);
        let global = params(&[("b", json!(3)), ("c", json!(4))]);
        let platform = params(&[("c", json!(5)), ("d", json!(6))]);

        let merged =
            worker_build_params(&base, "x86_64", "upload/run", &global, Some(&platform));

        assert_eq!(merged.get("a"), Some(&json!(1)));
        assert_eq!(merged.get("b"), Some(&json!(3)));
        assert_eq!(merged.get("c"), Some(&json!(5)));
        assert_eq!(merged.get("d"), Some(&json!(6)));
        assert_eq!(merged.get("platform"), Some(&json!("x86_64")));
        assert_eq!(merged.get("upload_dir"), Some(&json!("upload/run")));
    }

    #[test]
    fn test_merge_leaves_inputs_untouched() {
        let base = params(&[("a", json!(1))]);
        let global = params(&[("b", json!(2))]);
        let platform = params(&[("c", json!(3))]);

        let before = (base.clone(), global.clone(), platform.clone());
        let _ = worker_build_params(&base, "s390x", "upload/run", &global, Some(&platform));
        assert_eq!(before, (base, global, platform));
    }

    #[test]
    fn test_architecture_is_dropped() {
        let base = params(&[("architecture", json!("amd64"))]);
        let merged =
            worker_build_params(&base, "x86_64", "upload/run", &BuildParams::new(), None);
        assert!(merged.get("architecture").is_none());
    }

    #[test]
    fn test_upload_dir_is_unique() {
        let a = generate_upload_dir();
        let b = generate_upload_dir();
        assert!(a.starts_with("upload/"));
        assert_ne!(a, b);
    }
}

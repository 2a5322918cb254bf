//! Pod template loading and rendering.
//!
//! The template is a Pod manifest in JSON. A YAML manifest converts with
//! `kubectl create --dry-run=client -o json -f workload.yaml`.
//!
//! Rendering fills in the per-workload parts: name, selector labels,
//! execution time and, for carbon-aware submissions, a preferred node
//! affinity.

use std::path::Path;

use serde_json::{Map, Value, json};
use thiserror::Error;

use carbon_core::{PlacementHint, WorkloadDescriptor};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read template {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("template is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid pod template: {0}")]
    Structure(String),
}

/// Split an equality label selector (`a=b,c=d`) into pairs.
///
/// Set-based expressions are not supported; terms without `=` are skipped.
pub fn parse_label_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|term| {
            let (key, value) = term.split_once('=')?;
            let key = key.trim().trim_end_matches('=');
            let value = value.trim().trim_start_matches('=');
            (!key.is_empty()).then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

/// `preferredDuringSchedulingIgnoredDuringExecution` affinity on hostname.
pub fn node_affinity(hint: &PlacementHint) -> Value {
    json!({
        "nodeAffinity": {
            "preferredDuringSchedulingIgnoredDuringExecution": [{
                "weight": hint.weight,
                "preference": {
                    "matchExpressions": [{
                        "key": "kubernetes.io/hostname",
                        "operator": "In",
                        "values": [hint.node],
                    }]
                }
            }]
        }
    })
}

#[derive(Debug, Clone)]
pub struct PodTemplate {
    manifest: Value,
    exec_time_env: String,
}

impl PodTemplate {
    pub fn from_file(path: &Path, exec_time_env: &str) -> Result<Self, ManifestError> {
        let yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "yaml" | "yml"));
        if yaml {
            return Err(ManifestError::Structure(format!(
                "{} is YAML; templates are JSON, convert with \
                 `kubectl create --dry-run=client -o json -f {}`",
                path.display(),
                path.display()
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&text, exec_time_env)
    }

    pub fn from_json(text: &str, exec_time_env: &str) -> Result<Self, ManifestError> {
        Self::from_value(serde_json::from_str(text)?, exec_time_env)
    }

    /// Wrap a manifest, checking the parts rendering depends on.
    pub fn from_value(manifest: Value, exec_time_env: &str) -> Result<Self, ManifestError> {
        if !manifest.is_object() {
            return Err(ManifestError::Structure("template must be a JSON object".into()));
        }
        let has_container = manifest
            .pointer("/spec/containers/0")
            .is_some_and(Value::is_object);
        if !has_container {
            return Err(ManifestError::Structure("spec.containers[0] is missing".into()));
        }
        Ok(Self {
            manifest,
            exec_time_env: exec_time_env.to_string(),
        })
    }

    /// Produce the manifest for one workload.
    ///
    /// `labels` are merged into `metadata.labels`, overriding template values
    /// with the same key. Any `affinity` in the template is replaced when the
    /// workload carries a hint and kept otherwise.
    pub fn render(
        &self,
        workload: &WorkloadDescriptor,
        labels: &[(String, String)],
    ) -> Result<Value, ManifestError> {
        let mut pod = self.manifest.clone();
        let root = object(&mut pod, "template")?;

        {
            let metadata = object(
                root.entry("metadata").or_insert_with(|| json!({})),
                "metadata",
            )?;
            metadata.remove("generateName");
            metadata.insert("name".into(), json!(workload.name));
            let pod_labels = object(
                metadata.entry("labels").or_insert_with(|| json!({})),
                "metadata.labels",
            )?;
            for (key, value) in labels {
                pod_labels.insert(key.clone(), json!(value));
            }
        }

        let spec = root
            .get_mut("spec")
            .ok_or_else(|| ManifestError::Structure("spec is missing".into()))
            .and_then(|v| object(v, "spec"))?;

        {
            let container = spec
                .get_mut("containers")
                .and_then(Value::as_array_mut)
                .and_then(|c| c.first_mut())
                .ok_or_else(|| ManifestError::Structure("spec.containers[0] is missing".into()))
                .and_then(|v| object(v, "spec.containers[0]"))?;
            let env = container
                .entry("env")
                .or_insert_with(|| json!([]))
                .as_array_mut()
                .ok_or_else(|| {
                    ManifestError::Structure("spec.containers[0].env must be a list".into())
                })?;

            let exec_time = json!(workload.exec_time_secs.to_string());
            let existing = env
                .iter_mut()
                .filter_map(Value::as_object_mut)
                .find(|var| {
                    var.get("name").and_then(Value::as_str) == Some(self.exec_time_env.as_str())
                });
            match existing {
                Some(var) => {
                    var.insert("value".into(), exec_time);
                }
                None => env.push(json!({ "name": self.exec_time_env, "value": exec_time })),
            }
        }

        if let Some(hint) = &workload.hint {
            spec.insert("affinity".into(), node_affinity(hint));
        }

        Ok(pod)
    }
}

fn object<'a>(
    value: &'a mut Value,
    what: &str,
) -> Result<&'a mut Map<String, Value>, ManifestError> {
    value
        .as_object_mut()
        .ok_or_else(|| ManifestError::Structure(format!("{what} must be an object")))
}

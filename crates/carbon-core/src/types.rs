//! Shared types used across the carbon-aware experiment crates.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which experimental strategy is active for a scheduling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentPhase {
    /// Workloads carry a soft hint toward the lowest-intensity node.
    CarbonAware,
    /// Workloads are submitted without any placement hint.
    Baseline,
}

impl ExperimentPhase {
    pub fn label(&self) -> &'static str {
        match self {
            ExperimentPhase::CarbonAware => "carbon-aware",
            ExperimentPhase::Baseline => "baseline",
        }
    }

    pub fn is_carbon_aware(&self) -> bool {
        matches!(self, ExperimentPhase::CarbonAware)
    }
}

impl fmt::Display for ExperimentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors building a [`NodeRegionMap`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeMapError {
    #[error("node region map is empty")]
    Empty,

    #[error("duplicate node in region map: {0}")]
    DuplicateNode(String),
}

/// Static node → region binding.
///
/// Entries keep their declaration order, which the node selector uses to
/// break ties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRegionMap {
    entries: Vec<(String, String)>,
}

impl NodeRegionMap {
    /// Build a map from `(node, region)` pairs in declaration order.
    pub fn new<I, N, R>(entries: I) -> Result<Self, NodeMapError>
    where
        I: IntoIterator<Item = (N, R)>,
        N: Into<String>,
        R: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (node, region) in entries {
            let node = node.into();
            if !seen.insert(node.clone()) {
                return Err(NodeMapError::DuplicateNode(node));
            }
            out.push((node, region.into()));
        }
        if out.is_empty() {
            return Err(NodeMapError::Empty);
        }
        Ok(Self { entries: out })
    }

    /// Iterate `(node, region)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), r.as_str()))
    }

    /// Distinct regions, first occurrence order.
    pub fn regions(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|(_, r)| seen.insert(r.as_str()))
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Region → carbon intensity for one tick. Never cached across ticks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntensitySnapshot {
    values: HashMap<String, f64>,
}

impl IntensitySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: impl Into<String>, intensity: f64) {
        self.values.insert(region.into(), intensity);
    }

    pub fn get(&self, region: &str) -> Option<f64> {
        self.values.get(region).copied()
    }

    /// Drop every region not listed in `regions`.
    pub fn retain_regions(&mut self, regions: &[String]) {
        self.values.retain(|r, _| regions.iter().any(|want| want == r));
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for IntensitySnapshot {
    fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Soft placement preference toward one node.
///
/// The orchestrator may still place the workload elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementHint {
    pub node: String,
    /// Preference weight, 1..=100.
    pub weight: u32,
}

/// The recommendation produced by one scheduling tick.
///
/// Both the submitter and the decision log read the recommended node from
/// the same value, so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingDecision {
    pub tick: u32,
    pub phase: ExperimentPhase,
    /// Recommended node.
    pub node: String,
    /// Intensity of the recommended node's region.
    pub intensity: f64,
    /// Every eligible node's intensity.
    pub node_intensity: BTreeMap<String, f64>,
    /// Nodes whose region was missing from the snapshot.
    pub excluded: Vec<String>,
    pub decided_at: DateTime<Utc>,
}

/// A synthetic workload ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadDescriptor {
    pub name: String,
    pub exec_time_secs: u32,
    pub hint: Option<PlacementHint>,
}

/// Where the orchestrator actually put a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementEvent {
    pub workload: String,
    pub node: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_map_keeps_declaration_order() {
        let map = NodeRegionMap::new([("vm3", "NL"), ("vm1", "DE"), ("vm2", "DE")]).unwrap();
        let nodes: Vec<_> = map.iter().map(|(n, _)| n).collect();
        assert_eq!(nodes, vec!["vm3", "vm1", "vm2"]);
        assert_eq!(map.regions(), vec!["NL".to_string(), "DE".to_string()]);
    }

    #[test]
    fn node_map_rejects_duplicates_and_empty() {
        let dup = NodeRegionMap::new([("a", "X"), ("a", "Y")]);
        assert_eq!(dup, Err(NodeMapError::DuplicateNode("a".to_string())));

        let empty = NodeRegionMap::new(Vec::<(String, String)>::new());
        assert_eq!(empty, Err(NodeMapError::Empty));
    }

    #[test]
    fn snapshot_retain_regions() {
        let mut snap: IntensitySnapshot = [("DE", 300.0), ("NL", 250.0), ("FR", 40.0)]
            .into_iter()
            .collect();
        snap.retain_regions(&["DE".to_string(), "NL".to_string()]);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.get("FR"), None);
        assert_eq!(snap.get("NL"), Some(250.0));
    }

    #[test]
    fn phase_serializes_snake_case() {
        let json = serde_json::to_string(&ExperimentPhase::CarbonAware).unwrap();
        assert_eq!(json, "\"carbon_aware\"");
        assert_eq!(ExperimentPhase::Baseline.to_string(), "baseline");
    }
}

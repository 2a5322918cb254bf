//! Node selection for carbon-aware placement.
//!
//! Resolves each node's intensity through its region and picks the node
//! with the lowest value:
//! - **Eligibility**: nodes whose region is missing from the snapshot are
//!   excluded (partial signal) and can never be selected
//! - **Minimum**: strictly lowest intensity wins
//! - **Tie-break**: first node in declaration order wins

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

use carbon_core::{IntensitySnapshot, NodeRegionMap};

/// Intensity resolved for a single node.
struct NodeIntensity {
    node_id: String,
    intensity: f64,
}

/// Outcome of a node selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub node_id: String,
    pub intensity: f64,
    /// Intensity of every eligible node, for the audit record.
    pub node_intensity: BTreeMap<String, f64>,
    /// Nodes dropped because their region had no signal.
    pub excluded: Vec<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("no eligible node: no signal for any node region (excluded: {})", .excluded.join(", "))]
    NoEligibleNode { excluded: Vec<String> },
}

/// Split nodes into eligible (declaration order) and excluded.
fn resolve(
    snapshot: &IntensitySnapshot,
    map: &NodeRegionMap,
) -> (Vec<NodeIntensity>, Vec<String>) {
    let mut eligible = Vec::with_capacity(map.len());
    let mut excluded = Vec::new();

    for (node, region) in map.iter() {
        match snapshot.get(region) {
            Some(intensity) => eligible.push(NodeIntensity {
                node_id: node.to_string(),
                intensity,
            }),
            None => excluded.push(node.to_string()),
        }
    }

    (eligible, excluded)
}

/// Pick the lowest-intensity node.
pub fn select_node(
    snapshot: &IntensitySnapshot,
    map: &NodeRegionMap,
) -> Result<Selection, SelectionError> {
    let (eligible, excluded) = resolve(snapshot, map);

    if !excluded.is_empty() {
        warn!(
            excluded = ?excluded,
            "partial signal: nodes without region intensity are not eligible"
        );
    }

    // Strict comparison keeps the earliest node on ties.
    let mut best: Option<&NodeIntensity> = None;
    for candidate in &eligible {
        match best {
            Some(current) if candidate.intensity >= current.intensity => {}
            _ => best = Some(candidate),
        }
    }

    let best = best.ok_or_else(|| SelectionError::NoEligibleNode {
        excluded: excluded.clone(),
    })?;

    Ok(Selection {
        node_id: best.node_id.clone(),
        intensity: best.intensity,
        node_intensity: eligible
            .iter()
            .map(|n| (n.node_id.clone(), n.intensity))
            .collect(),
        excluded,
    })
}

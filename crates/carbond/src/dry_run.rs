//! In-process stand-in for the cluster, used by `carbond run --dry-run`.
//!
//! Accepts every workload and reports a placement right away: on the hinted
//! node when it is part of the cluster, otherwise on a random node.

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use carbon_core::{PlacementEvent, WorkloadDescriptor};
use carbon_scheduler::{BoxFuture, Orchestrator, SubmitOutcome};

pub struct SimulatedCluster {
    nodes: Vec<String>,
    events: mpsc::Sender<PlacementEvent>,
}

impl SimulatedCluster {
    pub fn new(nodes: Vec<String>, events: mpsc::Sender<PlacementEvent>) -> Self {
        Self { nodes, events }
    }

    fn place(&self, workload: &WorkloadDescriptor) -> Option<String> {
        if let Some(hint) = workload.hint.as_ref().filter(|h| self.nodes.contains(&h.node)) {
            return Some(hint.node.clone());
        }
        if self.nodes.is_empty() {
            return None;
        }
        let pick = rand::rng().random_range(0..self.nodes.len());
        Some(self.nodes[pick].clone())
    }
}

impl Orchestrator for SimulatedCluster {
    fn submit<'a>(&'a self, workload: &'a WorkloadDescriptor) -> BoxFuture<'a, SubmitOutcome> {
        let placed = self.place(workload);
        Box::pin(async move {
            let Some(node) = placed else {
                return SubmitOutcome::Rejected {
                    reason: "simulated cluster has no nodes".to_string(),
                };
            };
            debug!(workload = %workload.name, node = %node, "simulated placement");
            let event = PlacementEvent {
                workload: workload.name.clone(),
                node,
            };
            if self.events.try_send(event).is_err() {
                warn!(workload = %workload.name, "placement event dropped");
            }
            SubmitOutcome::Accepted
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbon_core::PlacementHint;

    fn workload(hint: Option<&str>) -> WorkloadDescriptor {
        WorkloadDescriptor {
            name: "carbon-aware-x".into(),
            exec_time_secs: 20,
            hint: hint.map(|node| PlacementHint {
                node: node.into(),
                weight: 100,
            }),
        }
    }

    fn nodes() -> Vec<String> {
        vec!["vm1".into(), "vm2".into(), "vm3".into()]
    }

    #[tokio::test]
    async fn honors_hint() {
        let (tx, mut rx) = mpsc::channel(4);
        let cluster = SimulatedCluster::new(nodes(), tx);

        assert!(cluster.submit(&workload(Some("vm3"))).await.is_accepted());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.workload, "carbon-aware-x");
        assert_eq!(event.node, "vm3");
    }

    #[tokio::test]
    async fn unhinted_or_unknown_node_lands_somewhere_known() {
        let (tx, mut rx) = mpsc::channel(4);
        let cluster = SimulatedCluster::new(nodes(), tx);

        cluster.submit(&workload(None)).await;
        cluster.submit(&workload(Some("vm9"))).await;
        for _ in 0..2 {
            let event = rx.recv().await.unwrap();
            assert!(nodes().contains(&event.node));
        }
    }

    #[tokio::test]
    async fn empty_cluster_rejects() {
        let (tx, _rx) = mpsc::channel(1);
        let cluster = SimulatedCluster::new(Vec::new(), tx);
        assert!(!cluster.submit(&workload(None)).await.is_accepted());
    }
}

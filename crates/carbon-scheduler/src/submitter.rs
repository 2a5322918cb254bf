//! Workload submitter.
//!
//! Builds a fresh [`WorkloadDescriptor`] per decision (unique name,
//! randomized duration, optional soft hint) and hands it to the
//! orchestrator. Submission is fire-and-forget: we wait for the
//! orchestrator to accept or reject the workload, never for placement.

use std::future::Future;
use std::ops::RangeInclusive;
use std::pin::Pin;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use carbon_core::{PlacementHint, SchedulingDecision, WorkloadDescriptor};

/// Boxed future alias for orchestrator calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Orchestrator's answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Accepted,
    Rejected { reason: String },
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}

/// The cluster's "submit workload" capability.
pub trait Orchestrator: Send + Sync {
    fn submit<'a>(&'a self, workload: &'a WorkloadDescriptor) -> BoxFuture<'a, SubmitOutcome>;
}

/// Knobs for building workloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSettings {
    pub name_prefix: String,
    /// Closed range the execution time is drawn from, in seconds.
    pub exec_time_secs: RangeInclusive<u32>,
    /// Weight of the soft placement hint, 1..=100.
    pub hint_weight: u32,
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            name_prefix: "carbon-aware".to_string(),
            exec_time_secs: 20..=60,
            hint_weight: 100,
        }
    }
}

/// A submitted workload and the orchestrator's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub workload: WorkloadDescriptor,
    pub outcome: SubmitOutcome,
}

pub struct WorkloadSubmitter {
    orchestrator: Arc<dyn Orchestrator>,
    settings: WorkloadSettings,
}

impl WorkloadSubmitter {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, settings: WorkloadSettings) -> Self {
        Self {
            orchestrator,
            settings,
        }
    }

    /// Build a workload for `decision` using the thread-local RNG.
    pub fn build(&self, decision: &SchedulingDecision) -> WorkloadDescriptor {
        self.build_with(&mut rand::rng(), decision)
    }

    /// Build a workload for `decision`.
    ///
    /// The hint toward `decision.node` is attached only in the carbon-aware
    /// phase; baseline workloads never carry one.
    pub fn build_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        decision: &SchedulingDecision,
    ) -> WorkloadDescriptor {
        let lo = *self.settings.exec_time_secs.start();
        let hi = *self.settings.exec_time_secs.end();
        let exec_time_secs = if lo >= hi { lo } else { rng.random_range(lo..=hi) };

        let hint = decision.phase.is_carbon_aware().then(|| PlacementHint {
            node: decision.node.clone(),
            weight: self.settings.hint_weight,
        });

        WorkloadDescriptor {
            name: format!("{}-{}", self.settings.name_prefix, Uuid::new_v4().simple()),
            exec_time_secs,
            hint,
        }
    }

    /// Build and submit a workload for `decision`.
    pub async fn submit(&self, decision: &SchedulingDecision) -> Submission {
        let workload = self.build(decision);
        let outcome = self.orchestrator.submit(&workload).await;

        match &outcome {
            SubmitOutcome::Accepted => debug!(
                workload = %workload.name,
                hinted = workload.hint.is_some(),
                exec_time_secs = workload.exec_time_secs,
                "workload accepted"
            ),
            SubmitOutcome::Rejected { reason } => warn!(
                workload = %workload.name,
                %reason,
                "workload rejected by orchestrator"
            ),
        }

        Submission { workload, outcome }
    }
}

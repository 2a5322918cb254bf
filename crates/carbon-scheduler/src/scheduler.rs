//! Scheduler loop: one experiment cycle per period.
//!
//! Each cycle:
//! - asks the phase controller which strategy is active (switching the
//!   decision log sink on a transition)
//! - fetches a fresh intensity snapshot and selects a node
//! - submits a workload and logs the decision
//!
//! The fetch → select → submit → log unit runs on its own task and the loop
//! awaits it before sleeping, so cycles never overlap. Any failure of the
//! unit, panics included, is logged and the loop moves on.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use carbon_core::{NodeRegionMap, SchedulingDecision};
use carbon_placement::select_node;
use carbon_signal::IntensityProvider;

use crate::decision_log::DecisionLogger;
use crate::error::{SchedulerError, SchedulerResult};
use crate::phase::{PhaseController, PhaseTick};
use crate::submitter::{Submission, WorkloadSubmitter};

/// Loop timing and experiment length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    pub period: Duration,
    pub total_cycles: u32,
    pub carbon_aware_fraction: f64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(10),
            total_cycles: 600,
            carbon_aware_fraction: 0.5,
        }
    }
}

/// What one successful cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub decision: SchedulingDecision,
    pub submission: Submission,
}

/// Totals for a finished (or interrupted) run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Cycles started.
    pub cycles: u32,
    /// Cycles skipped because of an error.
    pub failed: u32,
    pub accepted: u32,
    pub rejected: u32,
    /// Whether shutdown ended the run before the last cycle.
    pub interrupted: bool,
}

/// Everything one cycle needs, cheap to clone into a task.
#[derive(Clone)]
struct CycleContext {
    provider: Arc<dyn IntensityProvider>,
    nodes: Arc<NodeRegionMap>,
    submitter: Arc<WorkloadSubmitter>,
    logger: Arc<DecisionLogger>,
}

impl CycleContext {
    async fn execute(self, tick: PhaseTick) -> SchedulerResult<CycleReport> {
        let regions = self.nodes.regions();
        let snapshot = self.provider.fetch(&regions).await?;
        let selection = select_node(&snapshot, &self.nodes)?;

        let decision = SchedulingDecision {
            tick: tick.index,
            phase: tick.phase,
            node: selection.node_id,
            intensity: selection.intensity,
            node_intensity: selection.node_intensity,
            excluded: selection.excluded,
            decided_at: Utc::now(),
        };

        let submission = self.submitter.submit(&decision).await;
        self.logger.log_submission(&decision, &submission);

        Ok(CycleReport {
            decision,
            submission,
        })
    }
}

pub struct ExperimentScheduler {
    phases: PhaseController,
    period: Duration,
    ctx: CycleContext,
}

impl ExperimentScheduler {
    pub fn new(
        settings: SchedulerSettings,
        provider: Arc<dyn IntensityProvider>,
        nodes: NodeRegionMap,
        submitter: Arc<WorkloadSubmitter>,
        logger: Arc<DecisionLogger>,
    ) -> Self {
        Self {
            phases: PhaseController::new(settings.total_cycles, settings.carbon_aware_fraction),
            period: settings.period,
            ctx: CycleContext {
                provider,
                nodes: Arc::new(nodes),
                submitter,
                logger,
            },
        }
    }

    pub fn phases(&self) -> &PhaseController {
        &self.phases
    }

    /// Run a single fetch → select → submit → log unit for `tick`.
    pub async fn run_cycle(&self, tick: PhaseTick) -> SchedulerResult<CycleReport> {
        self.ctx.clone().execute(tick).await
    }

    /// Drive all cycles, or until `shutdown` changes.
    ///
    /// Shutdown is only observed between cycles; an in-flight cycle always
    /// runs to completion.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> RunSummary {
        let total = self.phases.total_cycles();
        info!(
            total_cycles = total,
            baseline_from = self.phases.boundary(),
            period_ms = self.period.as_millis() as u64,
            "experiment scheduler started"
        );

        let mut summary = RunSummary::default();

        for index in 0..total {
            if *shutdown.borrow() {
                summary.interrupted = true;
                break;
            }
            let Some(tick) = self.phases.tick(index) else {
                break;
            };

            if tick.transitioned {
                self.ctx.logger.activate(tick.phase);
                info!(tick = index, phase = %tick.phase, "experiment phase started");
            }

            summary.cycles += 1;
            let handle = tokio::spawn(self.ctx.clone().execute(tick));
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(SchedulerError::Worker(e.to_string())),
            };

            match result {
                Ok(report) => {
                    if report.submission.outcome.is_accepted() {
                        summary.accepted += 1;
                    } else {
                        summary.rejected += 1;
                    }
                    debug!(
                        tick = index,
                        workload = %report.submission.workload.name,
                        node = %report.decision.node,
                        "cycle complete"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        tick = index,
                        phase = %tick.phase,
                        error = %e,
                        "error creating workload, cycle skipped"
                    );
                }
            }

            if index + 1 == total {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                _ = shutdown.changed() => {
                    info!(tick = index, "scheduler shutting down");
                    summary.interrupted = true;
                    break;
                }
            }
        }

        info!(
            cycles = summary.cycles,
            failed = summary.failed,
            accepted = summary.accepted,
            rejected = summary.rejected,
            interrupted = summary.interrupted,
            "experiment scheduler finished"
        );
        summary
    }
}

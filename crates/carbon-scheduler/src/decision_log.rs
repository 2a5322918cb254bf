//! Decision log: append-only audit trail of the experiment.
//!
//! Each phase owns one sink (by default `carbonaware_strategy.log` and
//! `normal_strategy.log`). Records are JSON lines of two kinds:
//!
//! - **submission**: written to the sink of the phase the decision was
//!   made in, carrying the recommendation and the full intensity map
//! - **placement**: written to the sink of the phase active when the
//!   orchestrator reports where a workload landed
//!
//! Writes never fail the caller. A failed append is reported through
//! `tracing` and counted.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info};

use carbon_core::{ExperimentPhase, PlacementEvent, SchedulingDecision};

use crate::submitter::{SubmitOutcome, Submission};

/// An append-only line sink.
pub trait DecisionSink: Send + Sync {
    fn append(&self, line: &str) -> io::Result<()>;

    /// Human-readable location, for log messages.
    fn describe(&self) -> String;
}

/// Appends lines to a file, one write per record.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    /// Open `path` for appending, creating it and its parent directory.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl DecisionSink for FileSink {
    fn append(&self, line: &str) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("decision log file lock poisoned"))?;
        writeln!(file, "{line}")?;
        file.flush()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory sink.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn records(&self) -> Vec<DecisionRecord> {
        self.lines()
            .iter()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    /// Make every subsequent append fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl DecisionSink for MemorySink {
    fn append(&self, line: &str) -> io::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::other("memory sink set to fail"));
        }
        self.lines
            .lock()
            .map_err(|_| io::Error::other("memory sink lock poisoned"))?
            .push(line.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Evidence of one recommendation and the submission it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub timestamp: DateTime<Utc>,
    pub tick: u32,
    pub phase: ExperimentPhase,
    pub workload: String,
    pub recommended_node: String,
    pub recommended_intensity: f64,
    pub node_intensity: BTreeMap<String, f64>,
    #[serde(default)]
    pub excluded_nodes: Vec<String>,
    pub hinted: bool,
    pub exec_time_secs: u32,
    pub outcome: SubmitOutcome,
}

/// Where the orchestrator actually put a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRecord {
    pub timestamp: DateTime<Utc>,
    /// Phase active when the placement was observed.
    pub phase: ExperimentPhase,
    pub workload: String,
    pub node: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum DecisionRecord {
    Submission(SubmissionRecord),
    Placement(PlacementRecord),
}

impl DecisionRecord {
    pub fn workload(&self) -> &str {
        match self {
            DecisionRecord::Submission(r) => &r.workload,
            DecisionRecord::Placement(r) => &r.workload,
        }
    }
}

/// Routes records to the per-phase sinks.
pub struct DecisionLogger {
    carbon_aware: Arc<dyn DecisionSink>,
    baseline: Arc<dyn DecisionSink>,
    /// Active phase; written by the scheduler loop on transitions only.
    active: watch::Sender<ExperimentPhase>,
    write_failures: AtomicU64,
}

impl DecisionLogger {
    pub fn new(carbon_aware: Arc<dyn DecisionSink>, baseline: Arc<dyn DecisionSink>) -> Self {
        let (active, _) = watch::channel(ExperimentPhase::CarbonAware);
        Self {
            carbon_aware,
            baseline,
            active,
            write_failures: AtomicU64::new(0),
        }
    }

    /// Open file sinks `dir/carbon_aware_file` and `dir/baseline_file`.
    pub fn open(dir: &Path, carbon_aware_file: &str, baseline_file: &str) -> io::Result<Self> {
        let carbon_aware = FileSink::open(dir.join(carbon_aware_file))?;
        let baseline = FileSink::open(dir.join(baseline_file))?;
        Ok(Self::new(Arc::new(carbon_aware), Arc::new(baseline)))
    }

    /// The sink that owns records of `phase`.
    pub fn sink_for(&self, phase: ExperimentPhase) -> &Arc<dyn DecisionSink> {
        match phase {
            ExperimentPhase::CarbonAware => &self.carbon_aware,
            ExperimentPhase::Baseline => &self.baseline,
        }
    }

    /// Switch the active sink. Returns whether the phase changed.
    pub fn activate(&self, phase: ExperimentPhase) -> bool {
        let changed = self.active.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                *current = phase;
                true
            }
        });
        if changed {
            info!(
                %phase,
                sink = %self.sink_for(phase).describe(),
                "decision log switched sink"
            );
        }
        changed
    }

    pub fn active_phase(&self) -> ExperimentPhase {
        *self.active.borrow()
    }

    /// Append the submission record for `decision` to the decision's own phase sink.
    pub fn log_submission(&self, decision: &SchedulingDecision, submission: &Submission) {
        let workload = &submission.workload;
        info!(
            workload = %workload.name,
            phase = %decision.phase,
            recommended_node = %decision.node,
            recommended_intensity = decision.intensity,
            all_nodes = ?decision.node_intensity,
            accepted = submission.outcome.is_accepted(),
            "scheduling decision"
        );

        let record = DecisionRecord::Submission(SubmissionRecord {
            timestamp: Utc::now(),
            tick: decision.tick,
            phase: decision.phase,
            workload: workload.name.clone(),
            recommended_node: decision.node.clone(),
            recommended_intensity: decision.intensity,
            node_intensity: decision.node_intensity.clone(),
            excluded_nodes: decision.excluded.clone(),
            hinted: workload.hint.is_some(),
            exec_time_secs: workload.exec_time_secs,
            outcome: submission.outcome.clone(),
        });
        self.write(decision.phase, &record);
    }

    /// Append a placement record to the currently active sink.
    pub fn log_placement(&self, event: &PlacementEvent) {
        let phase = self.active_phase();
        info!(workload = %event.workload, node = %event.node, "actual placement");

        let record = DecisionRecord::Placement(PlacementRecord {
            timestamp: Utc::now(),
            phase,
            workload: event.workload.clone(),
            node: event.node.clone(),
        });
        self.write(phase, &record);
    }

    /// Number of appends that failed so far.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    fn write(&self, phase: ExperimentPhase, record: &DecisionRecord) {
        let sink = self.sink_for(phase);
        let result = serde_json::to_string(record)
            .map_err(io::Error::other)
            .and_then(|line| sink.append(&line));

        if let Err(e) = result {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                sink = %sink.describe(),
                workload = %record.workload(),
                error = %e,
                "failed to append decision record"
            );
        }
    }
}

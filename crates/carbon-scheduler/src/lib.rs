//! Experiment driver: phases, submissions and the decision log.
//!
//! Alternates between a carbon-aware and a baseline strategy on a fixed
//! schedule, submits one synthetic workload per cycle and keeps an
//! auditable record of every recommendation and every observed placement.
//!
//! # Architecture
//!
//! ```text
//! ExperimentScheduler (one cycle per period)
//!   ├── PhaseController (tick → phase, transition flag)
//!   ├── IntensityProvider (fetch snapshot)
//!   ├── select_node (snapshot → recommendation)
//!   ├── WorkloadSubmitter → Orchestrator (fire-and-forget)
//!   └── DecisionLogger (per-phase sinks)
//!
//! PlacementObserver (orchestrator events) ──→ DecisionLogger
//! ```

pub mod decision_log;
pub mod error;
pub mod observer;
pub mod phase;
pub mod report;
pub mod scheduler;
pub mod submitter;

pub use decision_log::{
    DecisionLogger, DecisionRecord, DecisionSink, FileSink, MemorySink, PlacementRecord,
    SubmissionRecord,
};
pub use error::{SchedulerError, SchedulerResult};
pub use observer::PlacementObserver;
pub use phase::{PhaseController, PhaseTick};
pub use report::{ExperimentReport, PhaseReport, summarize, summarize_files};
pub use scheduler::{CycleReport, ExperimentScheduler, RunSummary, SchedulerSettings};
pub use submitter::{
    BoxFuture, Orchestrator, SubmitOutcome, Submission, WorkloadSettings, WorkloadSubmitter,
};

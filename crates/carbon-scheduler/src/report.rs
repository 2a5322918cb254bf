//! Offline analysis of decision logs.
//!
//! Joins submission and placement records by workload name and compares
//! the recommended node with the node the workload actually landed on,
//! per experiment phase.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;

use serde::Serialize;

use carbon_core::ExperimentPhase;

use crate::decision_log::{DecisionRecord, PlacementRecord, SubmissionRecord};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseReport {
    pub submissions: u64,
    pub rejected: u64,
    pub placements_observed: u64,
    /// Placements that landed on the recommended node.
    pub placements_on_recommended: u64,
    pub mean_recommended_intensity: Option<f64>,
    /// Mean intensity of the node actually used, where known.
    pub mean_placed_intensity: Option<f64>,
}

impl PhaseReport {
    /// Share of observed placements that followed the recommendation.
    pub fn hit_rate(&self) -> Option<f64> {
        (self.placements_observed > 0)
            .then(|| self.placements_on_recommended as f64 / self.placements_observed as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExperimentReport {
    pub carbon_aware: PhaseReport,
    pub baseline: PhaseReport,
    /// Placements with no matching submission record.
    pub unmatched_placements: u64,
    pub unparsable_lines: u64,
}

#[derive(Default)]
struct Accumulator {
    report: PhaseReport,
    recommended_sum: f64,
    placed_sum: f64,
    placed_known: u64,
}

impl Accumulator {
    fn add(&mut self, submission: &SubmissionRecord, placement: Option<&PlacementRecord>) {
        self.report.submissions += 1;
        if !submission.outcome.is_accepted() {
            self.report.rejected += 1;
        }
        self.recommended_sum += submission.recommended_intensity;

        if let Some(placement) = placement {
            self.report.placements_observed += 1;
            if placement.node == submission.recommended_node {
                self.report.placements_on_recommended += 1;
            }
            if let Some(intensity) = submission.node_intensity.get(&placement.node) {
                self.placed_sum += intensity;
                self.placed_known += 1;
            }
        }
    }

    fn finish(mut self) -> PhaseReport {
        if self.report.submissions > 0 {
            self.report.mean_recommended_intensity =
                Some(self.recommended_sum / self.report.submissions as f64);
        }
        if self.placed_known > 0 {
            self.report.mean_placed_intensity = Some(self.placed_sum / self.placed_known as f64);
        }
        self.report
    }
}

/// Summarize decision-log lines from any number of sinks.
pub fn summarize<'a, I>(lines: I) -> ExperimentReport
where
    I: IntoIterator<Item = &'a str>,
{
    let mut submissions: Vec<SubmissionRecord> = Vec::new();
    let mut placements: HashMap<String, PlacementRecord> = HashMap::new();
    let mut unparsable_lines = 0;

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<DecisionRecord>(line) {
            Ok(DecisionRecord::Submission(s)) => submissions.push(s),
            Ok(DecisionRecord::Placement(p)) => {
                // Redelivered or rescheduled: keep the latest observation.
                let keep_existing = placements
                    .get(&p.workload)
                    .is_some_and(|existing| existing.timestamp > p.timestamp);
                if !keep_existing {
                    placements.insert(p.workload.clone(), p);
                }
            }
            Err(_) => unparsable_lines += 1,
        }
    }

    let mut aware = Accumulator::default();
    let mut base = Accumulator::default();
    for submission in &submissions {
        let placement = placements.remove(&submission.workload);
        let acc = match submission.phase {
            ExperimentPhase::CarbonAware => &mut aware,
            ExperimentPhase::Baseline => &mut base,
        };
        acc.add(submission, placement.as_ref());
    }

    ExperimentReport {
        carbon_aware: aware.finish(),
        baseline: base.finish(),
        unmatched_placements: placements.len() as u64,
        unparsable_lines,
    }
}

/// Summarize log files. Missing files count as empty.
pub fn summarize_files<P: AsRef<Path>>(paths: &[P]) -> io::Result<ExperimentReport> {
    let mut contents = Vec::with_capacity(paths.len());
    for path in paths {
        match std::fs::read_to_string(path) {
            Ok(text) => contents.push(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(summarize(contents.iter().flat_map(|c| c.lines())))
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"))
}

impl fmt::Display for ExperimentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<14} {:>11} {:>9} {:>10} {:>9} {:>9} {:>15} {:>14}",
            "PHASE",
            "SUBMISSIONS",
            "REJECTED",
            "PLACEMENTS",
            "FOLLOWED",
            "HIT RATE",
            "MEAN RECOMMEND",
            "MEAN PLACED"
        )?;
        for (phase, r) in [
            (ExperimentPhase::CarbonAware, &self.carbon_aware),
            (ExperimentPhase::Baseline, &self.baseline),
        ] {
            let hit_rate = r
                .hit_rate()
                .map_or_else(|| "-".to_string(), |h| format!("{:.1}%", h * 100.0));
            writeln!(
                f,
                "{:<14} {:>11} {:>9} {:>10} {:>9} {:>9} {:>15} {:>14}",
                phase.label(),
                r.submissions,
                r.rejected,
                r.placements_observed,
                r.placements_on_recommended,
                hit_rate,
                fmt_opt(r.mean_recommended_intensity),
                fmt_opt(r.mean_placed_intensity),
            )?;
        }
        if self.unmatched_placements > 0 || self.unparsable_lines > 0 {
            writeln!(
                f,
                "unmatched placements: {}, unparsable lines: {}",
                self.unmatched_placements, self.unparsable_lines
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};

    use crate::submitter::SubmitOutcome;

    fn submission(name: &str, phase: ExperimentPhase, recommended: &str, accepted: bool) -> String {
        let record = DecisionRecord::Submission(SubmissionRecord {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            tick: 0,
            phase,
            workload: name.to_string(),
            recommended_node: recommended.to_string(),
            recommended_intensity: 80.0,
            node_intensity: BTreeMap::from([
                ("vm1".to_string(), 120.0),
                ("vm2".to_string(), 80.0),
            ]),
            excluded_nodes: Vec::new(),
            hinted: phase.is_carbon_aware(),
            exec_time_secs: 30,
            outcome: if accepted {
                SubmitOutcome::Accepted
            } else {
                SubmitOutcome::Rejected {
                    reason: "denied".to_string(),
                }
            },
        });
        serde_json::to_string(&record).unwrap()
    }

    fn placement(name: &str, node: &str, minute: u32) -> String {
        let record = DecisionRecord::Placement(PlacementRecord {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap(),
            phase: ExperimentPhase::CarbonAware,
            workload: name.to_string(),
            node: node.to_string(),
        });
        serde_json::to_string(&record).unwrap()
    }

    #[test]
    fn joins_by_workload_name() {
        let lines = [
            submission("w1", ExperimentPhase::CarbonAware, "vm2", true),
            submission("w2", ExperimentPhase::CarbonAware, "vm2", true),
            submission("w3", ExperimentPhase::Baseline, "vm2", true),
            submission("w4", ExperimentPhase::Baseline, "vm2", false),
            placement("w1", "vm2", 1),
            placement("w2", "vm1", 2),
            placement("w3", "vm1", 3),
            placement("ghost", "vm1", 4),
            "garbage".to_string(),
        ];

        let report = summarize(lines.iter().map(String::as_str));

        assert_eq!(report.carbon_aware.submissions, 2);
        assert_eq!(report.carbon_aware.placements_observed, 2);
        assert_eq!(report.carbon_aware.placements_on_recommended, 1);
        assert_eq!(report.carbon_aware.hit_rate(), Some(0.5));
        assert_eq!(report.carbon_aware.mean_placed_intensity, Some(100.0));

        assert_eq!(report.baseline.submissions, 2);
        assert_eq!(report.baseline.rejected, 1);
        assert_eq!(report.baseline.placements_observed, 1);
        assert_eq!(report.baseline.mean_recommended_intensity, Some(80.0));

        assert_eq!(report.unmatched_placements, 1);
        assert_eq!(report.unparsable_lines, 1);
    }

    #[test]
    fn latest_placement_wins() {
        let lines = [
            submission("w1", ExperimentPhase::CarbonAware, "vm2", true),
            placement("w1", "vm2", 9),
            placement("w1", "vm1", 5),
        ];
        let report = summarize(lines.iter().map(String::as_str));
        assert_eq!(report.carbon_aware.placements_on_recommended, 1);
    }

    #[test]
    fn summarize_files_tolerates_missing_sink() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("carbonaware_strategy.log");
        std::fs::write(
            &present,
            format!(
                "{}\n{}\n",
                submission("w1", ExperimentPhase::CarbonAware, "vm2", true),
                placement("w1", "vm2", 1)
            ),
        )
        .unwrap();
        let missing = dir.path().join("normal_strategy.log");

        let report = summarize_files(&[present, missing]).unwrap();
        assert_eq!(report.carbon_aware.submissions, 1);
        assert_eq!(report.baseline, PhaseReport::default());

        let table = report.to_string();
        assert!(table.contains("carbon-aware"));
        assert!(table.contains("100.0%"));
    }
}

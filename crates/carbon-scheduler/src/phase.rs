//! Experiment phase controller.
//!
//! The experiment runs a fixed number of cycles. The first share of them
//! (by default half) is carbon-aware, the rest is baseline. The phase is a
//! pure function of the tick index, so the controller holds no mutable
//! state and can be resumed or tested at any tick.

use carbon_core::ExperimentPhase;

/// Phase information for one scheduling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTick {
    pub index: u32,
    pub phase: ExperimentPhase,
    /// True when this tick's phase differs from the previous tick's.
    /// Always true for tick 0.
    pub transitioned: bool,
}

/// Decides which strategy is active for each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseController {
    total_cycles: u32,
    boundary: u32,
}

impl PhaseController {
    /// Create a controller over `total_cycles` ticks, with the first
    /// `carbon_aware_fraction` of them carbon-aware.
    ///
    /// The fraction is clamped to `[0, 1]`.
    pub fn new(total_cycles: u32, carbon_aware_fraction: f64) -> Self {
        let fraction = if carbon_aware_fraction.is_nan() {
            0.0
        } else {
            carbon_aware_fraction.clamp(0.0, 1.0)
        };
        // 100 * 0.29 is 28.999999999999996 in binary; nudge before flooring.
        let boundary = (f64::from(total_cycles) * fraction + 1e-9).floor() as u32;
        Self {
            total_cycles,
            boundary: boundary.min(total_cycles),
        }
    }

    pub fn total_cycles(&self) -> u32 {
        self.total_cycles
    }

    /// First tick of the baseline phase.
    pub fn boundary(&self) -> u32 {
        self.boundary
    }

    /// Phase active at tick `index`.
    pub fn phase_at(&self, index: u32) -> ExperimentPhase {
        if index < self.boundary {
            ExperimentPhase::CarbonAware
        } else {
            ExperimentPhase::Baseline
        }
    }

    /// Phase and transition flag for tick `index`, or `None` past the last cycle.
    pub fn tick(&self, index: u32) -> Option<PhaseTick> {
        if index >= self.total_cycles {
            return None;
        }
        let phase = self.phase_at(index);
        let transitioned = index == 0 || self.phase_at(index - 1) != phase;
        Some(PhaseTick {
            index,
            phase,
            transitioned,
        })
    }
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new(600, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_splits_at_300() {
        let ctl = PhaseController::default();
        assert_eq!(ctl.total_cycles(), 600);
        assert_eq!(ctl.boundary(), 300);

        for i in 0..300 {
            assert_eq!(ctl.tick(i).unwrap().phase, ExperimentPhase::CarbonAware, "tick {i}");
        }
        for i in 300..600 {
            assert_eq!(ctl.tick(i).unwrap().phase, ExperimentPhase::Baseline, "tick {i}");
        }
    }

    #[test]
    fn transition_flag_only_at_start_and_boundary() {
        let ctl = PhaseController::new(600, 0.5);
        let transitions: Vec<u32> = (0..600)
            .filter_map(|i| ctl.tick(i))
            .filter(|t| t.transitioned)
            .map(|t| t.index)
            .collect();
        assert_eq!(transitions, vec![0, 300]);

        let flip = ctl.tick(300).unwrap();
        assert_eq!(flip.phase, ExperimentPhase::Baseline);
        assert!(flip.transitioned);
        assert!(!ctl.tick(301).unwrap().transitioned);
    }

    #[test]
    fn behavior_ends_at_total_cycles() {
        let ctl = PhaseController::new(10, 0.5);
        assert!(ctl.tick(9).is_some());
        assert!(ctl.tick(10).is_none());
        assert!(ctl.tick(u32::MAX).is_none());
    }

    #[test]
    fn phase_is_independent_of_query_order() {
        let ctl = PhaseController::new(600, 0.5);
        let later = ctl.tick(450).unwrap();
        let earlier = ctl.tick(12).unwrap();
        assert_eq!(later.phase, ExperimentPhase::Baseline);
        assert_eq!(earlier.phase, ExperimentPhase::CarbonAware);
        assert_eq!(ctl.tick(450).unwrap(), later);
    }

    #[test]
    fn inexact_fractions_split_at_the_decimal_boundary() {
        assert_eq!(PhaseController::new(100, 0.29).boundary(), 29);
        assert_eq!(PhaseController::new(100, 0.57).boundary(), 57);
        assert_eq!(PhaseController::new(1000, 0.001).boundary(), 1);
        assert_eq!(PhaseController::new(10, 0.7).boundary(), 7);
        assert_eq!(PhaseController::new(3, 1.0 / 3.0).boundary(), 1);

        let ctl = PhaseController::new(100, 0.29);
        assert_eq!(ctl.phase_at(28), ExperimentPhase::CarbonAware);
        assert_eq!(ctl.phase_at(29), ExperimentPhase::Baseline);
        assert!(ctl.tick(29).unwrap().transitioned);
    }

    #[test]
    fn custom_and_degenerate_fractions() {
        let ctl = PhaseController::new(7, 0.3);
        assert_eq!(ctl.boundary(), 2);
        assert_eq!(ctl.phase_at(1), ExperimentPhase::CarbonAware);
        assert_eq!(ctl.phase_at(2), ExperimentPhase::Baseline);

        let all_baseline = PhaseController::new(5, 0.0);
        assert!((0..5).all(|i| all_baseline.phase_at(i) == ExperimentPhase::Baseline));
        assert!(all_baseline.tick(0).unwrap().transitioned);
        assert!((1..5).all(|i| !all_baseline.tick(i).unwrap().transitioned));

        let all_aware = PhaseController::new(5, 1.0);
        assert!((0..5).all(|i| all_aware.phase_at(i) == ExperimentPhase::CarbonAware));

        assert_eq!(PhaseController::new(10, 2.0).boundary(), 10);
        assert_eq!(PhaseController::new(10, 0.99).boundary(), 9);
        assert_eq!(PhaseController::new(10, f64::NAN).boundary(), 0);
    }
}

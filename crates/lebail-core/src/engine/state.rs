use super::parameters::ParameterVector;
use super::tasks::residuals::RFactors;
use serde::Serialize;

/// Refinement stage. Stage 1 fits positions and scale with the profile frozen; stage 2
/// frees every parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Position = 1,
    Profile = 2,
}

impl Stage {
    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Position => "Stage 1: Unit Cell, Zero Shift & Scale",
            Stage::Profile => "Stage 2: Profile Parameters",
        }
    }

    /// Stage for zero-based iteration `iteration` given the stage-1 length.
    pub fn for_iteration(iteration: usize, stage1_iterations: usize) -> Self {
        if iteration < stage1_iterations {
            Stage::Position
        } else {
            Stage::Profile
        }
    }
}

/// Number of leading position-only iterations: a third of the budget, at least three,
/// never more than the budget itself.
pub fn stage1_iterations(max_iterations: usize, staged: bool) -> usize {
    if staged {
        (max_iterations / 3).max(3).min(max_iterations)
    } else {
        0
    }
}

/// Mutable bookkeeping of one refinement run.
#[derive(Debug, Clone)]
pub struct RefinementState {
    pub iteration: usize,
    pub stage: Stage,
    pub parameters: ParameterVector,
    pub r_factors: Option<RFactors>,
    pub converged: bool,
    pub previous_rwp: f64,
    pub rwp_change: f64,
}

impl RefinementState {
    pub fn new(initial_stage: Stage) -> Self {
        Self {
            iteration: 0,
            stage: initial_stage,
            parameters: ParameterVector::default(),
            r_factors: None,
            converged: false,
            previous_rwp: f64::INFINITY,
            rwp_change: f64::INFINITY,
        }
    }

    /// Records `rwp` and reports whether the relative change from the previous value
    /// fell below `threshold`.
    pub fn record_rwp(&mut self, rwp: f64, threshold: f64) -> bool {
        let delta = (self.previous_rwp - rwp).abs();
        self.rwp_change = if !self.previous_rwp.is_finite() {
            f64::INFINITY
        } else if self.previous_rwp > 0.0 {
            delta / self.previous_rwp
        } else {
            delta
        };
        self.previous_rwp = rwp;
        self.converged = self.rwp_change < threshold;
        self.converged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage1_is_a_third_of_the_budget_with_a_floor_of_three() {
        assert_eq!(stage1_iterations(15, true), 5);
        assert_eq!(stage1_iterations(20, true), 6);
        assert_eq!(stage1_iterations(6, true), 3);
    }

    #[test]
    fn stage1_never_exceeds_the_budget() {
        assert_eq!(stage1_iterations(2, true), 2);
        assert_eq!(stage1_iterations(0, true), 0);
    }

    #[test]
    fn unstaged_refinement_starts_in_the_profile_stage() {
        assert_eq!(stage1_iterations(15, false), 0);
        assert_eq!(Stage::for_iteration(0, 0), Stage::Profile);
    }

    #[test]
    fn fresh_state_is_not_converged() {
        let state = RefinementState::new(Stage::Position);
        assert!(!state.converged);
        assert!(state.rwp_change.is_infinite());
    }

    #[test]
    fn first_recorded_rwp_never_converges() {
        let mut state = RefinementState::new(Stage::Profile);
        assert!(!state.record_rwp(10.0, 1e-5));
        assert!(!state.record_rwp(9.0, 1e-5));
        assert!(state.record_rwp(9.0 * (1.0 - 1e-7), 1e-5));
    }

    #[test]
    fn zero_threshold_disables_convergence() {
        let mut state = RefinementState::new(Stage::Profile);
        state.record_rwp(5.0, 0.0);
        assert!(!state.record_rwp(5.0, 0.0));
    }
}

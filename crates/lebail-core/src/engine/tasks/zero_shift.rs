use super::residuals::weighted_residuals;
use super::synthesis::{IntensityModel, accumulate_phase};
use crate::core::models::pattern::PatternData;
use crate::core::models::phase::Phase;
use crate::engine::context::RefinementContext;
use crate::engine::diagnostics::Diagnostics;
use crate::engine::parameters::ParameterEntry;
use crate::engine::solver::ResidualModel;
use crate::engine::state::Stage;
use tracing::{debug, instrument, warn};

/// Whole-pattern residuals as a function of a single zero shift applied to every phase.
struct SharedShiftObjective<'a> {
    phases: &'a [Phase],
    pattern: &'a PatternData,
    model: IntensityModel,
    wavelength: f64,
}

impl ResidualModel for SharedShiftObjective<'_> {
    fn residual_count(&self) -> usize {
        self.pattern.len()
    }

    fn residuals(&self, params: &[f64], out: &mut [f64]) {
        let mut calculated = vec![0.0; self.pattern.len()];
        for phase in self.phases {
            let mut shifted = phase.clone();
            shifted.zero_shift = params[0];
            accumulate_phase(
                &shifted,
                self.model,
                self.wavelength,
                self.pattern.two_theta(),
                &mut calculated,
            );
        }
        let none = vec![0.0; self.pattern.len()];
        weighted_residuals(self.pattern, &none, &calculated, out);
    }
}

/// Refines the instrument zero shift shared by all phases and writes it back to each.
#[instrument(skip_all, name = "shared_zero_shift")]
pub fn run(
    context: &RefinementContext,
    phases: &mut [Phase],
    entry: &ParameterEntry,
    stage: Stage,
    iteration: usize,
    diagnostics: &mut Diagnostics,
) {
    let Some(first) = phases.first() else {
        return;
    };
    let initial = [entry.bound.clamp(first.zero_shift)];

    let objective = SharedShiftObjective {
        phases,
        pattern: context.pattern,
        model: context.model,
        wavelength: context.wavelength(),
    };
    let outcome = match context.solver().solve(&objective, &initial, &[entry.bound]) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "Shared zero-shift solve failed; keeping previous value");
            diagnostics.push(super::phase_fit::non_convergence("(shared)", stage, iteration));
            return;
        }
    };

    debug!(
        zero_shift = outcome.parameters[0],
        termination = ?outcome.termination,
        "Shared zero shift refined"
    );
    if !outcome.converged() {
        diagnostics.push(super::phase_fit::non_convergence("(shared)", stage, iteration));
    }

    for phase in phases.iter_mut() {
        phase.zero_shift = outcome.parameters[0];
    }
}

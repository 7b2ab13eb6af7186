use super::residuals::weighted_residuals;
use super::synthesis::{IntensityModel, accumulate_phase, other_phases_pattern};
use crate::core::models::pattern::PatternData;
use crate::core::models::phase::Phase;
use crate::engine::context::RefinementContext;
use crate::engine::diagnostics::{Diagnostic, Diagnostics};
use crate::engine::parameters::{Bound, ParameterEntry, apply_to_phase};
use crate::engine::solver::{ResidualModel, SolverOutcome};
use crate::engine::state::Stage;
use tracing::{debug, instrument, warn};

/// Scale ratio below which a solver call is reported as a scale collapse.
const SCALE_COLLAPSE_RATIO: f64 = 0.2;

/// Residuals of one phase's parameter slice with every other phase held fixed.
struct PhaseObjective<'a> {
    template: &'a Phase,
    entries: &'a [ParameterEntry],
    pattern: &'a PatternData,
    other: &'a [f64],
    model: IntensityModel,
    wavelength: f64,
}

impl ResidualModel for PhaseObjective<'_> {
    fn residual_count(&self) -> usize {
        self.pattern.len()
    }

    fn residuals(&self, params: &[f64], out: &mut [f64]) {
        let mut phase = self.template.clone();
        apply_to_phase(&mut phase, self.entries, params);
        let mut calculated = vec![0.0; self.pattern.len()];
        accumulate_phase(
            &phase,
            self.model,
            self.wavelength,
            self.pattern.two_theta(),
            &mut calculated,
        );
        weighted_residuals(self.pattern, self.other, &calculated, out);
    }
}

/// Refines the parameter slice `entries` of phase `index` against the full pattern.
///
/// The contribution of all other phases is synthesized once up front. Solver failures
/// and exhausted iteration budgets are recorded as diagnostics and never abort the run;
/// the phase keeps the best estimate the solver produced (or its previous values).
#[instrument(skip_all, name = "phase_fit", fields(phase = %phases[index].name))]
pub fn run(
    context: &RefinementContext,
    phases: &mut [Phase],
    index: usize,
    entries: &[ParameterEntry],
    stage: Stage,
    iteration: usize,
    diagnostics: &mut Diagnostics,
) {
    if entries.is_empty() {
        return;
    }

    let other = other_phases_pattern(
        phases,
        index,
        context.model,
        context.wavelength(),
        context.two_theta(),
    );
    let initial: Vec<f64> = entries.iter().map(|e| e.value).collect();
    let bounds: Vec<Bound> = entries.iter().map(|e| e.bound).collect();
    let scale_before = phases[index].scale;

    let outcome: SolverOutcome = {
        let objective = PhaseObjective {
            template: &phases[index],
            entries,
            pattern: context.pattern,
            other: &other,
            model: context.model,
            wavelength: context.wavelength(),
        };
        match context.solver().solve(&objective, &initial, &bounds) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Solver failed; keeping previous parameters");
                diagnostics.push(non_convergence(&phases[index].name, stage, iteration));
                return;
            }
        }
    };

    let phase = &mut phases[index];
    apply_to_phase(phase, entries, &outcome.parameters);

    debug!(
        iterations = outcome.iterations,
        evaluations = outcome.evaluations,
        initial_cost = outcome.initial_cost,
        cost = outcome.cost,
        termination = ?outcome.termination,
        "Phase solve finished"
    );

    if !outcome.converged() {
        diagnostics.push(non_convergence(&phase.name, stage, iteration));
    }

    if phase.scale < scale_before * SCALE_COLLAPSE_RATIO {
        diagnostics.push(Diagnostic::ScaleCollapsed {
            phase: phase.name.clone(),
            iteration,
            from: scale_before,
            to: phase.scale,
        });
    }
}

pub(crate) fn non_convergence(phase: &str, stage: Stage, iteration: usize) -> Diagnostic {
    Diagnostic::SolverNonConvergence {
        phase: phase.to_string(),
        stage,
        first_iteration: iteration,
        last_iteration: iteration,
        occurrences: 1,
    }
}

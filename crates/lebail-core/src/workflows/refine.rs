use super::report::{IterationRecord, PhaseParameters, PhaseResult, RefinementReport};
use crate::core::models::pattern::PatternData;
use crate::core::models::phase::Phase;
use crate::engine::cancel::CancelToken;
use crate::engine::config::RefinementConfig;
use crate::engine::context::RefinementContext;
use crate::engine::diagnostics::{Diagnostic, Diagnostics};
use crate::engine::error::EngineError;
use crate::engine::parameters::{ParameterVector, write_to_phase};
use crate::engine::progress::{IterationSnapshot, Progress, ProgressReporter};
use crate::engine::state::{RefinementState, Stage, stage1_iterations};
use crate::engine::tasks;
use crate::engine::tasks::residuals::RFactors;
use crate::engine::tasks::synthesis::total_pattern;
use tracing::{debug, info, instrument, warn};

/// Phase collection with the lowest Rwp seen so far; restored when a run is cancelled.
struct BestSnapshot {
    phases: Vec<Phase>,
    rwp: f64,
}

impl BestSnapshot {
    fn offer(&mut self, phases: &[Phase], rwp: f64) {
        if rwp <= self.rwp || !self.rwp.is_finite() {
            self.phases = phases.to_vec();
            self.rwp = rwp;
        }
    }
}

/// Runs a staged Le Bail refinement of `phases` against `pattern`.
///
/// `phases` is updated in place with the refined parameters and extracted intensities.
/// When `cancel` is raised the run stops at the next checkpoint and `phases` is reset to
/// the best state reached so far.
///
/// # Errors
///
/// Returns [`EngineError::NoPhases`] or [`EngineError::EmptyPattern`] before any
/// computation, and [`EngineError::DimensionMismatch`] if the calculated and
/// experimental arrays ever disagree in length.
#[instrument(skip_all, name = "lebail_refinement")]
pub fn run(
    pattern: &PatternData,
    phases: &mut [Phase],
    config: &RefinementConfig,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> Result<RefinementReport, EngineError> {
    if phases.is_empty() {
        return Err(EngineError::NoPhases);
    }
    if pattern.is_empty() {
        return Err(EngineError::EmptyPattern);
    }

    // === Phase 0: Preparation ===
    reporter.report(Progress::StageStart {
        name: "Preparation",
    });
    let context = RefinementContext::new(pattern, config, cancel);
    let mut diagnostics = Diagnostics::new();

    clamp_into_bounds(phases, &context);

    let stage1 = stage1_iterations(config.max_iterations, config.staged_refinement);
    let mut state = RefinementState::new(Stage::for_iteration(0, stage1));
    state.parameters = ParameterVector::assemble(phases, state.stage, config, context.two_theta());

    let initial = evaluate(&context, phases, state.parameters.len())?;
    let mut best = BestSnapshot {
        phases: phases.to_vec(),
        rwp: initial.rwp,
    };
    info!(
        phases = phases.len(),
        points = pattern.len(),
        max_iterations = config.max_iterations,
        stage1_iterations = stage1,
        rwp = initial.rwp,
        "Starting Le Bail refinement."
    );
    reporter.report(Progress::StageFinish);

    // === Phase 1: Iterative refinement ===
    let mut history = Vec::new();
    let mut cancelled = false;
    let mut free_parameter_warning = false;
    let mut current_stage: Option<Stage> = None;

    reporter.report(Progress::TaskStart {
        total_steps: config.max_iterations as u64,
    });
    for iteration in 1..=config.max_iterations {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let stage = Stage::for_iteration(iteration - 1, stage1);
        if current_stage != Some(stage) {
            info!(stage = stage.number(), "Entering {}.", stage.name());
            reporter.report(Progress::Message(stage.name().to_string()));
            current_stage = Some(stage);
        }
        state.iteration = iteration;
        state.stage = stage;
        state.parameters = ParameterVector::assemble(phases, stage, config, context.two_theta());

        if config.independent_intensities
            && !free_parameter_warning
            && state.parameters.len() > config.stability_threshold
        {
            diagnostics.push(Diagnostic::TooManyFreeParameters {
                count: state.parameters.len(),
                threshold: config.stability_threshold,
            });
            free_parameter_warning = true;
        }

        let completed = refine_parameters(&context, phases, &state, &mut diagnostics);
        if !completed {
            cancelled = true;
            break;
        }

        tasks::extraction::run(
            phases,
            pattern,
            config.wavelength,
            config.extraction_passes,
            config.independent_intensities,
        );
        state.parameters.refresh(phases);

        let calculated = total_pattern(phases, context.model, config.wavelength, context.two_theta());
        let r_factors = tasks::residuals::evaluate(pattern, &calculated, state.parameters.len())?;
        state.r_factors = Some(r_factors);
        log_iteration(&context, phases, &state, &r_factors)?;

        history.push(IterationRecord {
            iteration,
            stage,
            r_factors,
            phases: phases.iter().map(PhaseParameters::of).collect(),
        });
        best.offer(phases, r_factors.rwp);

        if reporter.is_observed() {
            reporter.report(Progress::Iteration(Box::new(snapshot(
                pattern, calculated, iteration, stage, r_factors,
            ))));
        }
        reporter.report(Progress::TaskIncrement);

        if stage == Stage::Profile
            && state.record_rwp(r_factors.rwp, config.convergence_threshold)
        {
            info!(
                iteration,
                rwp_change = state.rwp_change,
                "Converged: relative Rwp change below threshold."
            );
            break;
        }
    }
    reporter.report(Progress::TaskFinish);

    // === Phase 2: Finalize ===
    reporter.report(Progress::StageStart {
        name: "Finalizing",
    });
    if cancelled {
        warn!(
            completed = history.len(),
            best_rwp = best.rwp,
            "Refinement cancelled; restoring best state."
        );
        phases.clone_from_slice(&best.phases);
        state.converged = false;
    }

    let final_parameters =
        ParameterVector::assemble(phases, state.stage, config, context.two_theta());
    if !history.is_empty() {
        check_bounds(phases, &final_parameters, &mut diagnostics);
    }

    let report = finalize(
        &context,
        phases,
        final_parameters.len(),
        state.converged,
        cancelled,
        history,
        diagnostics,
    )?;
    reporter.report(Progress::StageFinish);

    info!(
        iterations = report.iterations,
        converged = report.converged,
        cancelled = report.cancelled,
        rwp = report.r_factors.rwp,
        gof = report.r_factors.gof,
        "Refinement finished."
    );
    Ok(report)
}

/// Moves every phase parameter into its bound before the first iteration. In shared
/// zero-shift mode this also gives every phase the same starting shift.
fn clamp_into_bounds(phases: &mut [Phase], context: &RefinementContext) {
    let vector = ParameterVector::assemble(phases, Stage::Profile, context.config, context.two_theta());
    for entry in vector.entries() {
        match entry.phase {
            Some(index) => write_to_phase(&mut phases[index], entry.kind, entry.value),
            None => {
                for phase in phases.iter_mut() {
                    write_to_phase(phase, entry.kind, entry.value);
                }
            }
        }
    }
}

/// Fits every phase slice in turn, then the shared zero shift if there is one. Returns
/// `false` when cancelled before all fits completed.
fn refine_parameters(
    context: &RefinementContext,
    phases: &mut [Phase],
    state: &RefinementState,
    diagnostics: &mut Diagnostics,
) -> bool {
    for index in 0..phases.len() {
        if context.cancel.is_cancelled() {
            return false;
        }
        tasks::phase_fit::run(
            context,
            phases,
            index,
            state.parameters.phase_slice(index),
            state.stage,
            state.iteration,
            diagnostics,
        );
    }

    if let Some(entry) = state.parameters.shared_zero_shift() {
        if context.cancel.is_cancelled() {
            return false;
        }
        tasks::zero_shift::run(
            context,
            phases,
            entry,
            state.stage,
            state.iteration,
            diagnostics,
        );
    }
    true
}

fn evaluate(
    context: &RefinementContext,
    phases: &[Phase],
    free_parameters: usize,
) -> Result<RFactors, EngineError> {
    let calculated = total_pattern(phases, context.model, context.wavelength(), context.two_theta());
    tasks::residuals::evaluate(context.pattern, &calculated, free_parameters)
}

fn log_iteration(
    context: &RefinementContext,
    phases: &[Phase],
    state: &RefinementState,
    r: &RFactors,
) -> Result<(), EngineError> {
    info!(
        iteration = state.iteration,
        stage = state.stage.number(),
        rwp = r.rwp,
        rp = r.rp,
        gof = r.gof,
        "Iteration complete."
    );
    let contributions = tasks::residuals::phase_contributions(
        context.pattern,
        phases,
        context.model,
        context.wavelength(),
    )?;
    for c in &contributions {
        debug!(
            phase = %c.name,
            contribution = c.contribution_percent,
            rwp = c.rwp,
            scale = c.scale,
            "Phase contribution."
        );
    }
    Ok(())
}

fn snapshot(
    pattern: &PatternData,
    calculated: Vec<f64>,
    iteration: usize,
    stage: Stage,
    r_factors: RFactors,
) -> IterationSnapshot {
    let difference = pattern
        .intensity()
        .iter()
        .zip(&calculated)
        .map(|(o, c)| o - c)
        .collect();
    IterationSnapshot {
        iteration,
        stage,
        two_theta: pattern.two_theta().to_vec(),
        experimental: pattern.intensity().to_vec(),
        calculated,
        difference,
        r_factors,
    }
}

fn check_bounds(phases: &[Phase], parameters: &ParameterVector, diagnostics: &mut Diagnostics) {
    for entry in parameters.entries() {
        if let Some(side) = entry.bound.side(entry.value) {
            diagnostics.push(Diagnostic::ParameterAtBound {
                phase: entry.phase.map(|index| phases[index].name.clone()),
                parameter: entry.kind.to_string(),
                value: entry.value,
                side,
            });
        }
    }
}

fn finalize(
    context: &RefinementContext,
    phases: &[Phase],
    free_parameters: usize,
    converged: bool,
    cancelled: bool,
    history: Vec<IterationRecord>,
    diagnostics: Diagnostics,
) -> Result<RefinementReport, EngineError> {
    let pattern = context.pattern;
    let calculated = total_pattern(phases, context.model, context.wavelength(), context.two_theta());
    let r_factors = tasks::residuals::evaluate(pattern, &calculated, free_parameters)?;
    let contributions = tasks::residuals::phase_contributions(
        pattern,
        phases,
        context.model,
        context.wavelength(),
    )?;

    let results = phases
        .iter()
        .zip(&contributions)
        .map(|(phase, contribution)| {
            PhaseResult::build(
                phase,
                contribution,
                context.wavelength(),
                context.config.independent_intensities,
            )
        })
        .collect();

    let difference = pattern
        .intensity()
        .iter()
        .zip(&calculated)
        .map(|(o, c)| o - c)
        .collect();

    Ok(RefinementReport {
        phases: results,
        r_factors,
        converged: converged && !cancelled,
        cancelled,
        iterations: history.len(),
        history,
        diagnostics: diagnostics.into_vec(),
        two_theta: pattern.two_theta().to_vec(),
        experimental: pattern.intensity().to_vec(),
        calculated,
        difference,
    })
}

use super::parameters::BoundSide;
use super::state::Stage;
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Non-fatal quality findings collected during a refinement and returned in the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Diagnostic {
    /// A refined parameter finished on one of its bounds.
    ParameterAtBound {
        phase: Option<String>,
        parameter: String,
        value: f64,
        side: BoundSide,
    },
    /// A solver call ran out of iterations; its best estimate was kept.
    SolverNonConvergence {
        phase: String,
        stage: Stage,
        first_iteration: usize,
        last_iteration: usize,
        occurrences: usize,
    },
    /// Independent-intensity mode produced more free parameters than is numerically safe.
    TooManyFreeParameters { count: usize, threshold: usize },
    /// A phase's scale dropped below a fifth of its value at the start of a solver call.
    ScaleCollapsed {
        phase: String,
        iteration: usize,
        from: f64,
        to: f64,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::ParameterAtBound {
                phase,
                parameter,
                value,
                side,
            } => {
                let side = match side {
                    BoundSide::Lower => "lower",
                    BoundSide::Upper => "upper",
                };
                match phase {
                    Some(phase) => write!(
                        f,
                        "{phase}: {parameter} = {value:.6} is at its {side} bound (wrong phase or poor starting width?)"
                    ),
                    None => write!(f, "{parameter} = {value:.6} is at its {side} bound"),
                }
            }
            Diagnostic::SolverNonConvergence {
                phase,
                stage,
                first_iteration,
                last_iteration,
                occurrences,
            } => write!(
                f,
                "{phase}: solver hit its iteration limit {occurrences} time(s) in stage {} (iterations {first_iteration}-{last_iteration})",
                stage.number()
            ),
            Diagnostic::TooManyFreeParameters { count, threshold } => write!(
                f,
                "{count} free parameters exceed the stability threshold of {threshold}; consider narrowing the angular window"
            ),
            Diagnostic::ScaleCollapsed {
                phase,
                iteration,
                from,
                to,
            } => write!(
                f,
                "{phase}: scale collapsed from {from:.4} to {to:.4} in iteration {iteration} (wrong phase or FWHM mismatch?)"
            ),
        }
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs and records `diagnostic`. Repeated solver non-convergence of the same phase in
    /// the same stage is folded into a single entry.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        if let Diagnostic::SolverNonConvergence {
            phase,
            stage,
            last_iteration,
            ..
        } = &diagnostic
        {
            let existing = self.items.iter_mut().find_map(|d| match d {
                Diagnostic::SolverNonConvergence {
                    phase: p,
                    stage: s,
                    last_iteration: last,
                    occurrences,
                    ..
                } if p == phase && s == stage => Some((last, occurrences)),
                _ => None,
            });
            if let Some((last, occurrences)) = existing {
                *last = *last_iteration;
                *occurrences += 1;
                return;
            }
        }
        warn!("{}", diagnostic);
        self.items.push(diagnostic);
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

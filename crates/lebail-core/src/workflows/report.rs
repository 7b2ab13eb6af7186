use crate::core::models::cell::{LatticeSystem, MillerIndex, UnitCell};
use crate::core::models::phase::{Phase, ProfileParams};
use crate::core::utils::geometry::two_theta_from_d;
use crate::engine::diagnostics::Diagnostic;
use crate::engine::state::Stage;
use crate::engine::tasks::residuals::{PhaseContribution, RFactors};
use serde::Serialize;
use std::fmt;

/// Final state of one refined reflection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReflectionResult {
    pub hkl: MillerIndex,
    /// d-spacing for the refined unit cell.
    pub d_spacing: f64,
    /// Peak position including the zero shift; `None` when unreachable at this wavelength.
    pub two_theta: Option<f64>,
    pub multiplicity: u32,
    pub theoretical_intensity: f64,
    pub observed_intensity: f64,
    /// Refined multiplier, reported in independent-intensity mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
}

/// Refinable parameters of one phase at a point in the refinement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseParameters {
    pub name: String,
    pub cell: UnitCell,
    pub zero_shift: f64,
    pub scale: f64,
    pub profile: ProfileParams,
}

impl PhaseParameters {
    pub fn of(phase: &Phase) -> Self {
        Self {
            name: phase.name.clone(),
            cell: phase.cell,
            zero_shift: phase.zero_shift,
            scale: phase.scale,
            profile: phase.profile,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseResult {
    #[serde(flatten)]
    pub parameters: PhaseParameters,
    pub initial_cell: UnitCell,
    pub lattice: LatticeSystem,
    pub contribution_percent: f64,
    pub rwp: f64,
    pub reflections: Vec<ReflectionResult>,
}

impl PhaseResult {
    pub(crate) fn build(
        phase: &Phase,
        contribution: &PhaseContribution,
        wavelength: f64,
        independent_intensities: bool,
    ) -> Self {
        let reflections = phase
            .reflections()
            .iter()
            .map(|r| {
                let d = r.d_spacing_for(&phase.cell);
                ReflectionResult {
                    hkl: r.hkl,
                    d_spacing: d,
                    two_theta: two_theta_from_d(d, wavelength).map(|tt| tt + phase.zero_shift),
                    multiplicity: r.multiplicity,
                    theoretical_intensity: r.theoretical_intensity(),
                    observed_intensity: r.observed_intensity(),
                    multiplier: independent_intensities.then(|| r.multiplier()),
                }
            })
            .collect();
        Self {
            parameters: PhaseParameters::of(phase),
            initial_cell: *phase.initial_cell(),
            lattice: phase.lattice(),
            contribution_percent: contribution.contribution_percent,
            rwp: contribution.rwp,
            reflections,
        }
    }
}

/// One completed refinement iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationRecord {
    /// One-based iteration number.
    pub iteration: usize,
    pub stage: Stage,
    pub r_factors: RFactors,
    pub phases: Vec<PhaseParameters>,
}

/// Outcome of a refinement run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefinementReport {
    pub phases: Vec<PhaseResult>,
    pub r_factors: RFactors,
    pub converged: bool,
    pub cancelled: bool,
    /// Number of iterations actually completed.
    pub iterations: usize,
    pub history: Vec<IterationRecord>,
    pub diagnostics: Vec<Diagnostic>,
    pub two_theta: Vec<f64>,
    pub experimental: Vec<f64>,
    pub calculated: Vec<f64>,
    pub difference: Vec<f64>,
}

impl RefinementReport {
    /// Renders a plain-text report of the fit quality and the refined parameters.
    pub fn summary(&self) -> String {
        self.to_string()
    }

    fn status(&self) -> &'static str {
        if self.cancelled {
            "cancelled"
        } else if self.converged {
            "converged"
        } else {
            "not converged"
        }
    }
}

impl fmt::Display for RefinementReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.r_factors;
        writeln!(
            f,
            "Le Bail refinement: {} after {} iteration(s)",
            self.status(),
            self.iterations
        )?;
        writeln!(f)?;
        writeln!(f, "  Rp   = {:>8.3} %", r.rp)?;
        writeln!(f, "  Rwp  = {:>8.3} %", r.rwp)?;
        writeln!(f, "  Rexp = {:>8.3} %", r.rexp)?;
        writeln!(f, "  GoF  = {:>8.3}", r.gof)?;
        writeln!(f, "  chi2 = {:>8.3}", r.chi_squared)?;
        writeln!(f, "  Quality: {}", r.quality())?;

        for phase in &self.phases {
            let p = &phase.parameters;
            let c = &p.cell;
            writeln!(f)?;
            writeln!(
                f,
                "Phase '{}' ({:.1} % of calculated intensity, Rwp {:.2} %)",
                p.name, phase.contribution_percent, phase.rwp
            )?;
            writeln!(
                f,
                "  Cell:    a={:.5} b={:.5} c={:.5} alpha={:.3} beta={:.3} gamma={:.3} ({})",
                c.a, c.b, c.c, c.alpha, c.beta, c.gamma, phase.lattice
            )?;
            writeln!(f, "  Scale:   {:.6}", p.scale)?;
            writeln!(f, "  Zero:    {:.5} deg", p.zero_shift)?;
            writeln!(
                f,
                "  Profile: U={:.6} V={:.6} W={:.6} eta={:.4}",
                p.profile.u, p.profile.v, p.profile.w, p.profile.eta
            )?;
        }

        if !self.diagnostics.is_empty() {
            writeln!(f)?;
            writeln!(f, "Warnings:")?;
            for diagnostic in &self.diagnostics {
                writeln!(f, "  - {diagnostic}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utils::geometry::CU_KA1;
    use crate::engine::tasks::synthesis::test_support::phase_at;

    fn report_for(phase: &Phase, diagnostics: Vec<Diagnostic>) -> RefinementReport {
        let contribution = PhaseContribution {
            name: phase.name.clone(),
            contribution_percent: 100.0,
            rwp: 4.2,
            scale: phase.scale,
        };
        RefinementReport {
            phases: vec![PhaseResult::build(phase, &contribution, CU_KA1, false)],
            r_factors: RFactors {
                rp: 3.0,
                rwp: 4.2,
                rexp: 2.0,
                gof: 4.41,
                chi_squared: 4.41,
            },
            converged: true,
            cancelled: false,
            iterations: 7,
            history: Vec::new(),
            diagnostics,
            two_theta: Vec::new(),
            experimental: Vec::new(),
            calculated: Vec::new(),
            difference: Vec::new(),
        }
    }

    #[test]
    fn reflection_positions_include_the_zero_shift() {
        let phase = phase_at("quartz", &[(20.0, 100.0)]).with_zero_shift(0.05);
        let report = report_for(&phase, Vec::new());
        let tt = report.phases[0].reflections[0].two_theta.unwrap();
        assert!((tt - 20.05).abs() < 1e-9);
        assert_eq!(report.phases[0].reflections[0].multiplier, None);
    }

    #[test]
    fn summary_shows_grade_phase_and_warnings() {
        let phase = phase_at("quartz", &[(20.0, 100.0)]);
        let report = report_for(
            &phase,
            vec![Diagnostic::TooManyFreeParameters {
                count: 120,
                threshold: 100,
            }],
        );
        let text = report.summary();
        assert!(text.contains("converged after 7 iteration(s)"));
        assert!(text.contains("Quality: Excellent"));
        assert!(text.contains("Phase 'quartz'"));
        assert!(text.contains("Warnings:"));
        assert!(text.contains("gamma=90.000 (cubic)"));
        assert_eq!(text, report.to_string());
    }

    #[test]
    fn cancelled_run_is_labelled_before_convergence() {
        let phase = phase_at("quartz", &[(20.0, 100.0)]);
        let mut report = report_for(&phase, Vec::new());
        report.cancelled = true;
        let text = report.summary();
        assert!(text.starts_with("Le Bail refinement: cancelled after 7 iteration(s)\n"));
        assert!(!text.contains("Warnings:"));
    }
}

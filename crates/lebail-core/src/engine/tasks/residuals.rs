use super::synthesis::{IntensityModel, phase_pattern};
use crate::core::models::pattern::PatternData;
use crate::core::models::phase::Phase;
use crate::engine::error::EngineError;
use serde::Serialize;

/// Whole-pattern agreement statistics. Percentages except `gof` and `chi_squared`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RFactors {
    pub rp: f64,
    pub rwp: f64,
    pub rexp: f64,
    pub gof: f64,
    pub chi_squared: f64,
}

impl RFactors {
    /// Quality grade by Rwp: Excellent < 5 %, Very Good < 10 %, Good < 15 %,
    /// Acceptable < 25 %, otherwise Poor.
    pub fn quality(&self) -> &'static str {
        match self.rwp {
            r if r < 5.0 => "Excellent",
            r if r < 10.0 => "Very Good",
            r if r < 15.0 => "Good",
            r if r < 25.0 => "Acceptable",
            _ => "Poor",
        }
    }
}

/// Computes Rp, Rwp, Rexp, GoF and reduced χ² of `calculated` against the pattern.
///
/// # Errors
///
/// Returns [`EngineError::DimensionMismatch`] when `calculated` does not have one value
/// per active sample.
pub fn evaluate(
    pattern: &PatternData,
    calculated: &[f64],
    free_parameters: usize,
) -> Result<RFactors, EngineError> {
    check_dimensions(pattern, calculated)?;

    let mut abs_diff = 0.0;
    let mut sum_obs = 0.0;
    let mut weighted_sq_diff = 0.0;
    let mut weighted_sq_obs = 0.0;
    for (i, (&obs, &calc)) in pattern.intensity().iter().zip(calculated).enumerate() {
        let w = pattern.weight(i);
        let diff = obs - calc;
        abs_diff += diff.abs();
        sum_obs += obs;
        weighted_sq_diff += w * diff * diff;
        weighted_sq_obs += w * obs * obs;
    }

    let n = pattern.len();
    let degrees_of_freedom = n.saturating_sub(free_parameters) as f64;
    let has_dof = n > free_parameters;

    let rp = if sum_obs > 0.0 {
        100.0 * abs_diff / sum_obs
    } else {
        f64::INFINITY
    };
    let rwp = if weighted_sq_obs > 0.0 {
        100.0 * (weighted_sq_diff / weighted_sq_obs).sqrt()
    } else {
        f64::INFINITY
    };
    let rexp = if has_dof && weighted_sq_obs > 0.0 {
        100.0 * (degrees_of_freedom / weighted_sq_obs).sqrt()
    } else {
        f64::INFINITY
    };
    let gof = if rexp.is_finite() && rexp > 0.0 {
        (rwp / rexp).powi(2)
    } else {
        f64::INFINITY
    };
    let chi_squared = if has_dof {
        weighted_sq_diff / degrees_of_freedom
    } else {
        f64::INFINITY
    };

    Ok(RFactors {
        rp,
        rwp,
        rexp,
        gof,
        chi_squared,
    })
}

/// Weighted profile R-factor alone; used for per-phase diagnostics.
pub fn weighted_profile_r(pattern: &PatternData, calculated: &[f64]) -> Result<f64, EngineError> {
    check_dimensions(pattern, calculated)?;
    let (num, den) = pattern
        .intensity()
        .iter()
        .zip(calculated)
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, (&obs, &calc))| {
            let w = pattern.weight(i);
            (num + w * (obs - calc).powi(2), den + w * obs * obs)
        });
    Ok(if den > 0.0 {
        100.0 * (num / den).sqrt()
    } else {
        f64::INFINITY
    })
}

/// Writes `(observed - other - calculated) / σ` into `out`.
pub fn weighted_residuals(pattern: &PatternData, other: &[f64], calculated: &[f64], out: &mut [f64]) {
    for (i, o) in out.iter_mut().enumerate() {
        *o = (pattern.intensity()[i] - other[i] - calculated[i]) / pattern.sigma()[i];
    }
}

/// Share of one phase in the calculated pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseContribution {
    pub name: String,
    /// Percentage of the summed calculated intensity coming from this phase.
    pub contribution_percent: f64,
    /// Rwp of this phase alone against the full experimental pattern.
    pub rwp: f64,
    pub scale: f64,
}

/// Splits the calculated pattern into per-phase shares and single-phase Rwp values.
pub fn phase_contributions(
    pattern: &PatternData,
    phases: &[Phase],
    model: IntensityModel,
    wavelength: f64,
) -> Result<Vec<PhaseContribution>, EngineError> {
    let curves: Vec<Vec<f64>> = phases
        .iter()
        .map(|phase| phase_pattern(phase, model, wavelength, pattern.two_theta()))
        .collect();
    let total: f64 = curves.iter().flatten().sum();

    phases
        .iter()
        .zip(&curves)
        .map(|(phase, curve)| {
            let sum: f64 = curve.iter().sum();
            Ok(PhaseContribution {
                name: phase.name.clone(),
                contribution_percent: if total > 0.0 { 100.0 * sum / total } else { 0.0 },
                rwp: weighted_profile_r(pattern, curve)?,
                scale: phase.scale,
            })
        })
        .collect()
}

fn check_dimensions(pattern: &PatternData, calculated: &[f64]) -> Result<(), EngineError> {
    if calculated.len() != pattern.len() {
        return Err(EngineError::DimensionMismatch {
            expected: pattern.len(),
            found: calculated.len(),
        });
    }
    Ok(())
}

use crate::core::models::pattern::AngularRange;
use crate::core::utils::geometry::CU_KA1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Invalid value for {parameter}: {reason}")]
    InvalidValue {
        parameter: &'static str,
        reason: String,
    },
    #[error("Invalid angular window: minimum {min} must be below maximum {max}")]
    InvalidWindow { min: f64, max: f64 },
}

/// How zero-point offsets are refined when several phases are fitted together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZeroShiftMode {
    /// Each phase refines its own zero shift as part of its parameter slice.
    #[default]
    PerPhase,
    /// One instrument zero shift, refined against the full pattern and written to
    /// every phase.
    Shared,
}

/// Tolerances and budgets of the bounded Levenberg-Marquardt solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    /// Maximum accepted-or-rejected LM steps per solver call.
    pub max_iterations: usize,
    /// Relative reduction of the cost below which the fit is considered converged.
    pub ftol: f64,
    /// Relative step size below which the fit is considered converged.
    pub xtol: f64,
    /// Infinity norm of the projected gradient below which the fit is converged.
    pub gtol: f64,
    pub initial_lambda: f64,
    /// Relative forward-difference step for the Jacobian.
    pub diff_step: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-10,
            initial_lambda: 1e-3,
            diff_step: 1e-6,
        }
    }
}

/// Bound policy applied when the parameter vector is assembled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterBounds {
    /// Allowed relative deviation of every cell parameter from the phase's initial cell.
    pub cell_fraction: f64,
    /// Symmetric bound on the zero shift, in degrees two-theta.
    pub zero_shift: f64,
    /// Scale bounds as factors of the phase's initial scale.
    pub scale_factors: (f64, f64),
    pub u: (f64, f64),
    pub v: (f64, f64),
    pub w: (f64, f64),
    pub eta: (f64, f64),
    pub multiplier: (f64, f64),
}

impl Default for ParameterBounds {
    fn default() -> Self {
        Self {
            cell_fraction: 0.05,
            zero_shift: 0.1,
            scale_factors: (0.01, 100.0),
            u: (-0.05, 0.05),
            v: (-0.05, 0.05),
            w: (1e-5, 0.05),
            eta: (0.0, 1.0),
            multiplier: (0.1, 10.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefinementConfig {
    pub max_iterations: usize,
    /// Relative Rwp change that stops the refinement; 0 disables early stopping.
    pub convergence_threshold: f64,
    pub staged_refinement: bool,
    pub independent_intensities: bool,
    pub extraction_passes: usize,
    pub zero_shift_mode: ZeroShiftMode,
    pub window: Option<AngularRange>,
    /// X-ray wavelength in Å.
    pub wavelength: f64,
    /// Free-parameter count above which independent-intensity mode is flagged.
    pub stability_threshold: usize,
    pub bounds: ParameterBounds,
    pub solver: SolverConfig,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            convergence_threshold: 1e-5,
            staged_refinement: true,
            independent_intensities: false,
            extraction_passes: 5,
            zero_shift_mode: ZeroShiftMode::PerPhase,
            window: None,
            wavelength: CU_KA1,
            stability_threshold: 100,
            bounds: ParameterBounds::default(),
            solver: SolverConfig::default(),
        }
    }
}

#[derive(Default)]
pub struct RefinementConfigBuilder {
    max_iterations: Option<usize>,
    convergence_threshold: Option<f64>,
    staged_refinement: Option<bool>,
    independent_intensities: Option<bool>,
    extraction_passes: Option<usize>,
    zero_shift_mode: Option<ZeroShiftMode>,
    window: Option<(f64, f64)>,
    wavelength: Option<f64>,
    stability_threshold: Option<usize>,
    bounds: Option<ParameterBounds>,
    solver: Option<SolverConfig>,
}

impl RefinementConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = Some(iterations);
        self
    }
    pub fn convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = Some(threshold);
        self
    }
    pub fn staged_refinement(mut self, staged: bool) -> Self {
        self.staged_refinement = Some(staged);
        self
    }
    pub fn independent_intensities(mut self, enabled: bool) -> Self {
        self.independent_intensities = Some(enabled);
        self
    }
    pub fn extraction_passes(mut self, passes: usize) -> Self {
        self.extraction_passes = Some(passes);
        self
    }
    pub fn zero_shift_mode(mut self, mode: ZeroShiftMode) -> Self {
        self.zero_shift_mode = Some(mode);
        self
    }
    pub fn window(mut self, min: f64, max: f64) -> Self {
        self.window = Some((min, max));
        self
    }
    pub fn wavelength(mut self, wavelength: f64) -> Self {
        self.wavelength = Some(wavelength);
        self
    }
    pub fn stability_threshold(mut self, threshold: usize) -> Self {
        self.stability_threshold = Some(threshold);
        self
    }
    pub fn bounds(mut self, bounds: ParameterBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }
    pub fn solver(mut self, solver: SolverConfig) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn build(self) -> Result<RefinementConfig, ConfigError> {
        let defaults = RefinementConfig::default();

        let convergence_threshold = self
            .convergence_threshold
            .unwrap_or(defaults.convergence_threshold);
        if !(convergence_threshold >= 0.0) || !convergence_threshold.is_finite() {
            return Err(ConfigError::InvalidValue {
                parameter: "convergence_threshold",
                reason: format!("must be a finite non-negative number, got {convergence_threshold}"),
            });
        }

        let extraction_passes = self.extraction_passes.unwrap_or(defaults.extraction_passes);
        if extraction_passes == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "extraction_passes",
                reason: "at least one pass is required".to_string(),
            });
        }

        let wavelength = self.wavelength.unwrap_or(defaults.wavelength);
        if !(wavelength > 0.0) || !wavelength.is_finite() {
            return Err(ConfigError::InvalidValue {
                parameter: "wavelength",
                reason: format!("must be positive, got {wavelength}"),
            });
        }

        let window = match self.window {
            Some((min, max)) => Some(
                AngularRange::new(min, max).map_err(|_| ConfigError::InvalidWindow { min, max })?,
            ),
            None => None,
        };

        let bounds = self.bounds.unwrap_or(defaults.bounds);
        validate_bounds(&bounds)?;

        Ok(RefinementConfig {
            max_iterations: self.max_iterations.unwrap_or(defaults.max_iterations),
            convergence_threshold,
            staged_refinement: self.staged_refinement.unwrap_or(defaults.staged_refinement),
            independent_intensities: self
                .independent_intensities
                .unwrap_or(defaults.independent_intensities),
            extraction_passes,
            zero_shift_mode: self.zero_shift_mode.unwrap_or(defaults.zero_shift_mode),
            window,
            wavelength,
            stability_threshold: self
                .stability_threshold
                .unwrap_or(defaults.stability_threshold),
            bounds,
            solver: self.solver.unwrap_or(defaults.solver),
        })
    }
}

fn validate_bounds(bounds: &ParameterBounds) -> Result<(), ConfigError> {
    let ranges = [
        ("bounds.scale_factors", bounds.scale_factors),
        ("bounds.u", bounds.u),
        ("bounds.v", bounds.v),
        ("bounds.w", bounds.w),
        ("bounds.eta", bounds.eta),
        ("bounds.multiplier", bounds.multiplier),
    ];
    for (parameter, (lower, upper)) in ranges {
        if !(lower <= upper) {
            return Err(ConfigError::InvalidValue {
                parameter,
                reason: format!("lower bound {lower} exceeds upper bound {upper}"),
            });
        }
    }
    if !(bounds.cell_fraction >= 0.0 && bounds.zero_shift >= 0.0 && bounds.scale_factors.0 > 0.0)
    {
        return Err(ConfigError::InvalidValue {
            parameter: "bounds",
            reason: "cell fraction and zero shift must be non-negative, scale factors positive"
                .to_string(),
        });
    }
    Ok(())
}

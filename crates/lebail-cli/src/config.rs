use crate::cli::RefineArgs;
use crate::error::{CliError, Result};
use crate::utils::parser;
use lebail::engine::config::{
    ParameterBounds, RefinementConfig, RefinementConfigBuilder, SolverConfig, ZeroShiftMode,
};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialSolverConfig {
    max_iterations: Option<usize>,
    ftol: Option<f64>,
    xtol: Option<f64>,
    gtol: Option<f64>,
    initial_lambda: Option<f64>,
    diff_step: Option<f64>,
}

impl PartialSolverConfig {
    fn resolve(self) -> SolverConfig {
        let d = SolverConfig::default();
        SolverConfig {
            max_iterations: self.max_iterations.unwrap_or(d.max_iterations),
            ftol: self.ftol.unwrap_or(d.ftol),
            xtol: self.xtol.unwrap_or(d.xtol),
            gtol: self.gtol.unwrap_or(d.gtol),
            initial_lambda: self.initial_lambda.unwrap_or(d.initial_lambda),
            diff_step: self.diff_step.unwrap_or(d.diff_step),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct PartialBoundsConfig {
    cell_fraction: Option<f64>,
    zero_shift: Option<f64>,
    scale_factors: Option<(f64, f64)>,
    u: Option<(f64, f64)>,
    v: Option<(f64, f64)>,
    w: Option<(f64, f64)>,
    eta: Option<(f64, f64)>,
    multiplier: Option<(f64, f64)>,
}

impl PartialBoundsConfig {
    fn resolve(self) -> ParameterBounds {
        let d = ParameterBounds::default();
        ParameterBounds {
            cell_fraction: self.cell_fraction.unwrap_or(d.cell_fraction),
            zero_shift: self.zero_shift.unwrap_or(d.zero_shift),
            scale_factors: self.scale_factors.unwrap_or(d.scale_factors),
            u: self.u.unwrap_or(d.u),
            v: self.v.unwrap_or(d.v),
            w: self.w.unwrap_or(d.w),
            eta: self.eta.unwrap_or(d.eta),
            multiplier: self.multiplier.unwrap_or(d.multiplier),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(deny_unknown_fields)]
struct PartialWindow {
    min: f64,
    max: f64,
}

/// Refinement settings as read from a TOML file; every key is optional.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PartialRefinementConfig {
    max_iterations: Option<usize>,
    convergence_threshold: Option<f64>,
    staged_refinement: Option<bool>,
    independent_intensities: Option<bool>,
    extraction_passes: Option<usize>,
    zero_shift_mode: Option<ZeroShiftMode>,
    window: Option<PartialWindow>,
    wavelength: Option<f64>,
    stability_threshold: Option<usize>,
    estimate_scale: Option<bool>,
    bounds: Option<PartialBoundsConfig>,
    solver: Option<PartialSolverConfig>,
}

/// Fully merged settings for one `refine` invocation.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub refinement: RefinementConfig,
    pub estimate_scale: bool,
}

impl PartialRefinementConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Applies `-S` assignments, then CLI flags, on top of the file values and builds the
    /// validated library configuration.
    pub fn merge_with_cli(mut self, args: &RefineArgs) -> Result<ResolvedConfig> {
        self.apply_set_values(&args.set_values)?;

        let mut builder = RefinementConfigBuilder::new();
        if let Some(n) = args.max_iterations.or(self.max_iterations) {
            builder = builder.max_iterations(n);
        }
        if let Some(threshold) = self.convergence_threshold {
            builder = builder.convergence_threshold(threshold);
        }
        if args.no_staged {
            builder = builder.staged_refinement(false);
        } else if let Some(staged) = self.staged_refinement {
            builder = builder.staged_refinement(staged);
        }
        if args.independent_intensities {
            builder = builder.independent_intensities(true);
        } else if let Some(independent) = self.independent_intensities {
            builder = builder.independent_intensities(independent);
        }
        if let Some(passes) = self.extraction_passes {
            builder = builder.extraction_passes(passes);
        }
        if args.shared_zero_shift {
            builder = builder.zero_shift_mode(ZeroShiftMode::Shared);
        } else if let Some(mode) = self.zero_shift_mode {
            builder = builder.zero_shift_mode(mode);
        }
        let window = args
            .window
            .or(self.window.map(|w| (w.min, w.max)));
        if let Some((min, max)) = window {
            builder = builder.window(min, max);
        }
        if let Some(wavelength) = self.wavelength {
            builder = builder.wavelength(wavelength);
        }
        if let Some(threshold) = self.stability_threshold {
            builder = builder.stability_threshold(threshold);
        }
        builder = builder
            .bounds(self.bounds.unwrap_or_default().resolve())
            .solver(self.solver.unwrap_or_default().resolve());

        Ok(ResolvedConfig {
            refinement: builder.build()?,
            estimate_scale: args.estimate_scale || self.estimate_scale.unwrap_or(false),
        })
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for assignment in set_values {
            let (key, value) = parser::parse_assignment(assignment)
                .map_err(|e| CliError::Config(e.to_string()))?;

            match key {
                "max-iterations" => self.max_iterations = Some(parse_value(key, value)?),
                "convergence-threshold" => {
                    self.convergence_threshold = Some(parse_value(key, value)?)
                }
                "staged-refinement" => self.staged_refinement = Some(parse_value(key, value)?),
                "independent-intensities" => {
                    self.independent_intensities = Some(parse_value(key, value)?)
                }
                "extraction-passes" => self.extraction_passes = Some(parse_value(key, value)?),
                "zero-shift-mode" => {
                    self.zero_shift_mode = Some(match value {
                        "per-phase" => ZeroShiftMode::PerPhase,
                        "shared" => ZeroShiftMode::Shared,
                        _ => {
                            return Err(CliError::Config(format!(
                                "Invalid value for {}: {} (expected 'per-phase' or 'shared')",
                                key, value
                            )));
                        }
                    })
                }
                "wavelength" => self.wavelength = Some(parse_value(key, value)?),
                "stability-threshold" => {
                    self.stability_threshold = Some(parse_value(key, value)?)
                }
                "estimate-scale" => self.estimate_scale = Some(parse_value(key, value)?),
                "bounds.cell-fraction" => {
                    self.bounds.get_or_insert_with(Default::default).cell_fraction =
                        Some(parse_value(key, value)?)
                }
                "bounds.zero-shift" => {
                    self.bounds.get_or_insert_with(Default::default).zero_shift =
                        Some(parse_value(key, value)?)
                }
                "solver.max-iterations" => {
                    self.solver.get_or_insert_with(Default::default).max_iterations =
                        Some(parse_value(key, value)?)
                }
                "solver.ftol" => {
                    self.solver.get_or_insert_with(Default::default).ftol =
                        Some(parse_value(key, value)?)
                }
                "solver.xtol" => {
                    self.solver.get_or_insert_with(Default::default).xtol =
                        Some(parse_value(key, value)?)
                }
                "solver.gtol" => {
                    self.solver.get_or_insert_with(Default::default).gtol =
                        Some(parse_value(key, value)?)
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: {}", key, value)))
}

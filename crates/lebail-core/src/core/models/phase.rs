use super::cell::{LatticeSystem, MillerIndex, UnitCell};
use super::reflection::Reflection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid unit cell: {0}")]
    InvalidCell(String),
    #[error("Invalid reflection {hkl}: {reason}")]
    InvalidReflection { hkl: MillerIndex, reason: String },
    #[error("Invalid value for {parameter}: {value}")]
    InvalidParameter { parameter: &'static str, value: f64 },
}

/// Caglioti width coefficients and the pseudo-Voigt mixing fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileParams {
    pub u: f64,
    pub v: f64,
    pub w: f64,
    /// Lorentzian fraction, 0 = pure Gaussian, 1 = pure Lorentzian.
    pub eta: f64,
}

impl Default for ProfileParams {
    fn default() -> Self {
        Self {
            u: 0.01,
            v: -0.001,
            w: 0.01,
            eta: 0.5,
        }
    }
}

/// A candidate crystalline phase under refinement.
///
/// The unit cell and scale the phase was created with are remembered as anchors: cell
/// bounds and scale bounds are expressed relative to them, and reflection positions are
/// derived from the ratio between the current and the initial cell. The lattice system is
/// inferred from the initial cell unless overridden, and decides which lengths refine
/// together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Phase {
    pub name: String,
    pub cell: UnitCell,
    lattice: LatticeSystem,
    pub scale: f64,
    /// Additive two-theta offset in degrees.
    pub zero_shift: f64,
    pub profile: ProfileParams,
    initial_cell: UnitCell,
    initial_scale: f64,
    reflections: Vec<Reflection>,
}

impl Phase {
    pub fn new(name: &str, cell: UnitCell, reflections: Vec<Reflection>) -> Self {
        let mut reflections = reflections;
        for reflection in &mut reflections {
            reflection.anchor_to(&cell);
        }
        // Descending d is ascending two-theta for any wavelength.
        reflections.sort_by(|a, b| b.d_spacing.total_cmp(&a.d_spacing));

        Self {
            name: name.to_string(),
            cell,
            lattice: cell.lattice_system(),
            scale: 1.0,
            zero_shift: 0.0,
            profile: ProfileParams::default(),
            initial_cell: cell,
            initial_scale: 1.0,
            reflections,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Result<Self, ModelError> {
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(ModelError::InvalidParameter {
                parameter: "scale",
                value: scale,
            });
        }
        self.scale = scale;
        self.initial_scale = scale;
        Ok(self)
    }

    pub fn with_lattice(mut self, lattice: LatticeSystem) -> Result<Self, ModelError> {
        if !lattice.admits(&self.cell) {
            return Err(ModelError::InvalidCell(format!(
                "lengths a={} b={} c={} do not fit a {lattice} lattice",
                self.cell.a, self.cell.b, self.cell.c
            )));
        }
        self.lattice = lattice;
        Ok(self)
    }

    pub fn lattice(&self) -> LatticeSystem {
        self.lattice
    }

    /// Sets the `a` length together with every length the lattice ties to it.
    pub fn set_cell_a(&mut self, value: f64) {
        self.cell.a = value;
        if self.lattice.ties_b_to_a() {
            self.cell.b = value;
        }
        if self.lattice.ties_c_to_a() {
            self.cell.c = value;
        }
    }

    pub fn with_zero_shift(mut self, zero_shift: f64) -> Self {
        self.zero_shift = zero_shift;
        self
    }

    pub fn with_profile(mut self, profile: ProfileParams) -> Result<Self, ModelError> {
        if !(0.0..=1.0).contains(&profile.eta) {
            return Err(ModelError::InvalidParameter {
                parameter: "eta",
                value: profile.eta,
            });
        }
        self.profile = profile;
        Ok(self)
    }

    pub fn initial_cell(&self) -> &UnitCell {
        &self.initial_cell
    }

    pub fn initial_scale(&self) -> f64 {
        self.initial_scale
    }

    pub(crate) fn rebase_scale(&mut self, scale: f64) {
        self.scale = scale;
        self.initial_scale = scale;
    }

    pub fn reflections(&self) -> &[Reflection] {
        &self.reflections
    }

    pub(crate) fn reflections_mut(&mut self) -> &mut [Reflection] {
        &mut self.reflections
    }
}

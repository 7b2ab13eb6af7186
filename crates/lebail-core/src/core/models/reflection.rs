use super::cell::{MillerIndex, UnitCell};
use super::phase::ModelError;
use serde::Serialize;

/// A single diffraction peak of a phase.
///
/// The theoretical intensity is supplied by the structure-factor calculator and is never
/// modified afterwards. The observed intensity is re-estimated by the refinement engine
/// and is kept on the same basis as the theoretical one (per unit phase scale).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reflection {
    /// Miller indices of the diffracting plane family.
    pub hkl: MillerIndex,
    /// Interplanar spacing in Å as supplied for the initial unit cell.
    pub d_spacing: f64,
    /// Number of symmetry-equivalent planes folded into this reflection.
    pub multiplicity: u32,
    theoretical_intensity: f64,
    observed_intensity: f64,
    multiplier: f64,
    #[serde(skip)]
    reference_cell_d: Option<f64>,
}

impl Reflection {
    pub fn new(
        hkl: MillerIndex,
        d_spacing: f64,
        theoretical_intensity: f64,
        multiplicity: u32,
    ) -> Result<Self, ModelError> {
        if !(d_spacing > 0.0) || !d_spacing.is_finite() {
            return Err(ModelError::InvalidReflection {
                hkl,
                reason: format!("d-spacing must be positive, got {d_spacing}"),
            });
        }
        if !(theoretical_intensity >= 0.0) || !theoretical_intensity.is_finite() {
            return Err(ModelError::InvalidReflection {
                hkl,
                reason: format!(
                    "theoretical intensity must be non-negative, got {theoretical_intensity}"
                ),
            });
        }
        Ok(Self {
            hkl,
            d_spacing,
            multiplicity,
            theoretical_intensity,
            observed_intensity: theoretical_intensity,
            multiplier: 1.0,
            reference_cell_d: None,
        })
    }

    pub fn theoretical_intensity(&self) -> f64 {
        self.theoretical_intensity
    }

    pub fn observed_intensity(&self) -> f64 {
        self.observed_intensity
    }

    /// Per-reflection intensity multiplier used in independent-intensity mode.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub(crate) fn set_observed_intensity(&mut self, value: f64) {
        self.observed_intensity = value.max(0.0);
    }

    pub(crate) fn set_multiplier(&mut self, value: f64) {
        self.multiplier = value;
    }

    /// Intensity the independent-intensity model assigns to this reflection.
    #[inline]
    pub fn free_intensity(&self) -> f64 {
        self.theoretical_intensity * self.multiplier
    }

    pub(crate) fn anchor_to(&mut self, initial_cell: &UnitCell) {
        self.reference_cell_d = initial_cell.d_spacing(self.hkl);
    }

    /// d-spacing for `cell`, rescaled from the supplied value by the ratio of the
    /// cell-derived spacings of the current and initial cells.
    pub fn d_spacing_for(&self, cell: &UnitCell) -> f64 {
        match (self.reference_cell_d, cell.d_spacing(self.hkl)) {
            (Some(reference), Some(current)) if reference > 0.0 => {
                self.d_spacing * current / reference
            }
            _ => self.d_spacing,
        }
    }
}

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use super::phase::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MillerIndex {
    pub h: i32,
    pub k: i32,
    pub l: i32,
}

impl MillerIndex {
    pub const fn new(h: i32, k: i32, l: i32) -> Self {
        Self { h, k, l }
    }

    fn as_vector(&self) -> Vector3<f64> {
        Vector3::new(self.h as f64, self.k as f64, self.l as f64)
    }
}

impl std::fmt::Display for MillerIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.h, self.k, self.l)
    }
}

/// Relative tolerance under which two cell lengths count as equal.
const LENGTH_TOLERANCE: f64 = 1e-6;
/// Tolerance in degrees for recognizing special angles.
const ANGLE_TOLERANCE: f64 = 1e-4;

/// Crystal lattice system, which decides the cell lengths that move together.
///
/// Angles are held at their starting values for every system, so the system only
/// determines which of `b` and `c` follow `a` when the cell is rescaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LatticeSystem {
    Cubic,
    Tetragonal,
    Hexagonal,
    Rhombohedral,
    Orthorhombic,
    Monoclinic,
    Triclinic,
}

impl LatticeSystem {
    #[inline]
    pub fn ties_b_to_a(&self) -> bool {
        matches!(
            self,
            LatticeSystem::Cubic
                | LatticeSystem::Tetragonal
                | LatticeSystem::Hexagonal
                | LatticeSystem::Rhombohedral
        )
    }

    #[inline]
    pub fn ties_c_to_a(&self) -> bool {
        matches!(self, LatticeSystem::Cubic | LatticeSystem::Rhombohedral)
    }

    /// Whether `cell` has the equal lengths this system ties together.
    pub fn admits(&self, cell: &UnitCell) -> bool {
        (!self.ties_b_to_a() || lengths_equal(cell.a, cell.b))
            && (!self.ties_c_to_a() || lengths_equal(cell.a, cell.c))
    }
}

impl std::fmt::Display for LatticeSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LatticeSystem::Cubic => "cubic",
            LatticeSystem::Tetragonal => "tetragonal",
            LatticeSystem::Hexagonal => "hexagonal",
            LatticeSystem::Rhombohedral => "rhombohedral",
            LatticeSystem::Orthorhombic => "orthorhombic",
            LatticeSystem::Monoclinic => "monoclinic",
            LatticeSystem::Triclinic => "triclinic",
        };
        f.write_str(name)
    }
}

fn lengths_equal(x: f64, y: f64) -> bool {
    (x - y).abs() <= LENGTH_TOLERANCE * x.abs().max(y.abs())
}

fn angle_is(angle: f64, target: f64) -> bool {
    (angle - target).abs() <= ANGLE_TOLERANCE
}

/// Lattice lengths in Å and inter-axial angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitCell {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl UnitCell {
    pub fn new(a: f64, b: f64, c: f64, alpha: f64, beta: f64, gamma: f64) -> Result<Self, ModelError> {
        let cell = Self {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        };
        for (name, value) in [("a", a), ("b", b), ("c", c)] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(ModelError::InvalidCell(format!(
                    "length {name} must be positive, got {value}"
                )));
            }
        }
        for (name, value) in [("alpha", alpha), ("beta", beta), ("gamma", gamma)] {
            if !(value > 0.0 && value < 180.0) {
                return Err(ModelError::InvalidCell(format!(
                    "angle {name} must lie in (0, 180) degrees, got {value}"
                )));
            }
        }
        if cell.volume().is_none() {
            return Err(ModelError::InvalidCell(
                "angles do not describe a valid parallelepiped".to_string(),
            ));
        }
        Ok(cell)
    }

    pub fn cubic(a: f64) -> Self {
        Self {
            a,
            b: a,
            c: a,
            alpha: 90.0,
            beta: 90.0,
            gamma: 90.0,
        }
    }

    pub fn as_array(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.alpha, self.beta, self.gamma]
    }

    pub fn from_array(values: [f64; 6]) -> Self {
        let [a, b, c, alpha, beta, gamma] = values;
        Self {
            a,
            b,
            c,
            alpha,
            beta,
            gamma,
        }
    }

    /// Most symmetric lattice system consistent with the cell metric.
    pub fn lattice_system(&self) -> LatticeSystem {
        let ab = lengths_equal(self.a, self.b);
        let bc = lengths_equal(self.b, self.c);
        let right = [self.alpha, self.beta, self.gamma].map(|angle| angle_is(angle, 90.0));

        if right.iter().all(|&r| r) {
            if ab && bc {
                LatticeSystem::Cubic
            } else if ab {
                LatticeSystem::Tetragonal
            } else {
                LatticeSystem::Orthorhombic
            }
        } else if ab && right[0] && right[1] && angle_is(self.gamma, 120.0) {
            LatticeSystem::Hexagonal
        } else if ab
            && bc
            && angle_is(self.alpha, self.beta)
            && angle_is(self.beta, self.gamma)
        {
            LatticeSystem::Rhombohedral
        } else if right[0] && right[2] {
            LatticeSystem::Monoclinic
        } else {
            LatticeSystem::Triclinic
        }
    }

    fn is_orthogonal(&self) -> bool {
        self.alpha == 90.0 && self.beta == 90.0 && self.gamma == 90.0
    }

    /// Direct-space metric tensor `G`, with `G_ij = a_i · a_j`.
    pub fn metric_tensor(&self) -> Matrix3<f64> {
        let (ca, cb, cg) = (
            self.alpha.to_radians().cos(),
            self.beta.to_radians().cos(),
            self.gamma.to_radians().cos(),
        );
        let (a, b, c) = (self.a, self.b, self.c);
        Matrix3::new(
            a * a,
            a * b * cg,
            a * c * cb,
            a * b * cg,
            b * b,
            b * c * ca,
            a * c * cb,
            b * c * ca,
            c * c,
        )
    }

    /// Cell volume in Å³, or `None` for degenerate angle combinations.
    pub fn volume(&self) -> Option<f64> {
        let det = self.metric_tensor().determinant();
        (det > 0.0).then(|| det.sqrt())
    }

    /// Interplanar spacing of `hkl` from the reciprocal metric, `1/d² = hᵀ G* h`.
    ///
    /// Orthogonal cells use the closed form, so a length never perturbs the spacing of
    /// reflections it does not enter.
    pub fn d_spacing(&self, hkl: MillerIndex) -> Option<f64> {
        let h = hkl.as_vector();
        let inv_d_sq = if self.is_orthogonal() {
            (h.x / self.a).powi(2) + (h.y / self.b).powi(2) + (h.z / self.c).powi(2)
        } else {
            let reciprocal = self.metric_tensor().try_inverse()?;
            (h.transpose() * reciprocal * h)[(0, 0)]
        };
        (inv_d_sq > 0.0 && inv_d_sq.is_finite()).then(|| 1.0 / inv_d_sq.sqrt())
    }
}

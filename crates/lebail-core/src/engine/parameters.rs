use super::config::{ParameterBounds, RefinementConfig, ZeroShiftMode};
use super::state::Stage;
use super::tasks::synthesis::peak_geometry;
use crate::core::models::phase::Phase;
use serde::Serialize;
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParameterKind {
    /// Length `a`, carrying every length the phase's lattice ties to it.
    CellA,
    CellB,
    CellC,
    ZeroShift,
    Scale,
    U,
    V,
    W,
    Eta,
    /// Intensity multiplier of the reflection with this index in its phase.
    Multiplier(usize),
    SharedZeroShift,
}

impl ParameterKind {
    pub fn is_profile(&self) -> bool {
        matches!(
            self,
            ParameterKind::U | ParameterKind::V | ParameterKind::W | ParameterKind::Eta
        )
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterKind::CellA => write!(f, "a"),
            ParameterKind::CellB => write!(f, "b"),
            ParameterKind::CellC => write!(f, "c"),
            ParameterKind::ZeroShift => write!(f, "zero_shift"),
            ParameterKind::Scale => write!(f, "scale"),
            ParameterKind::U => write!(f, "U"),
            ParameterKind::V => write!(f, "V"),
            ParameterKind::W => write!(f, "W"),
            ParameterKind::Eta => write!(f, "eta"),
            ParameterKind::Multiplier(index) => write!(f, "multiplier[{index}]"),
            ParameterKind::SharedZeroShift => write!(f, "shared_zero_shift"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundSide {
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bound {
    pub lower: f64,
    pub upper: f64,
}

impl Bound {
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            lower: a.min(b),
            upper: a.max(b),
        }
    }

    fn from_pair((lower, upper): (f64, f64)) -> Self {
        Self::new(lower, upper)
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }

    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }

    /// Which bound `value` sits on, within a tolerance relative to the bound width.
    pub fn side(&self, value: f64) -> Option<BoundSide> {
        let tolerance = 1e-6 * (self.upper - self.lower).abs().max(f64::EPSILON);
        if (value - self.lower).abs() <= tolerance {
            Some(BoundSide::Lower)
        } else if (self.upper - value).abs() <= tolerance {
            Some(BoundSide::Upper)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterEntry {
    /// Owning phase, `None` for parameters shared by all phases.
    pub phase: Option<usize>,
    pub kind: ParameterKind,
    pub value: f64,
    pub bound: Bound,
}

/// Flat layout of every free parameter of one refinement stage, grouped per phase with
/// shared parameters last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterVector {
    entries: Vec<ParameterEntry>,
    phase_ranges: Vec<Range<usize>>,
}

impl ParameterVector {
    /// Builds the free-parameter layout for `stage`, with every value clamped into its
    /// bound. Only the cell lengths independent under the phase's lattice system are
    /// free; angles keep their starting values. Per-reflection multipliers are only
    /// included for reflections whose peak reaches the active samples in `two_theta`.
    pub fn assemble(
        phases: &[Phase],
        stage: Stage,
        config: &RefinementConfig,
        two_theta: &[f64],
    ) -> Self {
        let bounds = &config.bounds;
        let mut entries = Vec::new();
        let mut phase_ranges = Vec::with_capacity(phases.len());

        for (index, phase) in phases.iter().enumerate() {
            let start = entries.len();
            let mut push = |kind: ParameterKind, bound: Bound| {
                entries.push(ParameterEntry {
                    phase: Some(index),
                    kind,
                    value: bound.clamp(read_from_phase(phase, kind)),
                    bound,
                });
            };

            let initial = phase.initial_cell();
            let lattice = phase.lattice();
            let lengths = [
                (ParameterKind::CellA, initial.a, true),
                (ParameterKind::CellB, initial.b, !lattice.ties_b_to_a()),
                (ParameterKind::CellC, initial.c, !lattice.ties_c_to_a()),
            ];
            for (kind, value, independent) in lengths {
                if independent {
                    let delta = bounds.cell_fraction * value.abs();
                    push(kind, Bound::new(value - delta, value + delta));
                }
            }

            if config.zero_shift_mode == ZeroShiftMode::PerPhase {
                push(ParameterKind::ZeroShift, zero_shift_bound(bounds));
            }

            let (lo, hi) = bounds.scale_factors;
            let initial_scale = phase.initial_scale();
            push(
                ParameterKind::Scale,
                Bound::new(initial_scale * lo, initial_scale * hi),
            );

            if stage == Stage::Profile {
                push(ParameterKind::U, Bound::from_pair(bounds.u));
                push(ParameterKind::V, Bound::from_pair(bounds.v));
                push(ParameterKind::W, Bound::from_pair(bounds.w));
                push(ParameterKind::Eta, Bound::from_pair(bounds.eta));

                if config.independent_intensities {
                    for (reflection, peak) in peak_geometry(phase, config.wavelength) {
                        if !peak.support(two_theta).is_empty() {
                            push(
                                ParameterKind::Multiplier(reflection),
                                Bound::from_pair(bounds.multiplier),
                            );
                        }
                    }
                }
            }

            phase_ranges.push(start..entries.len());
        }

        if config.zero_shift_mode == ZeroShiftMode::Shared {
            if let Some(first) = phases.first() {
                let bound = zero_shift_bound(bounds);
                entries.push(ParameterEntry {
                    phase: None,
                    kind: ParameterKind::SharedZeroShift,
                    value: bound.clamp(first.zero_shift),
                    bound,
                });
            }
        }

        Self {
            entries,
            phase_ranges,
        }
    }

    pub fn entries(&self) -> &[ParameterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The slice of parameters refined by the per-phase solve of `phase`.
    pub fn phase_slice(&self, phase: usize) -> &[ParameterEntry] {
        self.phase_ranges
            .get(phase)
            .map_or(&[], |range| &self.entries[range.clone()])
    }

    pub fn shared_zero_shift(&self) -> Option<&ParameterEntry> {
        self.entries
            .iter()
            .find(|e| e.kind == ParameterKind::SharedZeroShift)
    }

    pub fn multiplier_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.kind, ParameterKind::Multiplier(_)))
            .count()
    }

    /// Re-reads current values from `phases`, keeping the layout and bounds.
    pub fn refresh(&mut self, phases: &[Phase]) {
        for entry in &mut self.entries {
            let phase = match entry.phase {
                Some(index) => phases.get(index),
                None => phases.first(),
            };
            if let Some(phase) = phase {
                entry.value = read_from_phase(phase, entry.kind);
            }
        }
    }
}

fn zero_shift_bound(bounds: &ParameterBounds) -> Bound {
    Bound::new(-bounds.zero_shift, bounds.zero_shift)
}

pub fn read_from_phase(phase: &Phase, kind: ParameterKind) -> f64 {
    match kind {
        ParameterKind::CellA => phase.cell.a,
        ParameterKind::CellB => phase.cell.b,
        ParameterKind::CellC => phase.cell.c,
        ParameterKind::ZeroShift | ParameterKind::SharedZeroShift => phase.zero_shift,
        ParameterKind::Scale => phase.scale,
        ParameterKind::U => phase.profile.u,
        ParameterKind::V => phase.profile.v,
        ParameterKind::W => phase.profile.w,
        ParameterKind::Eta => phase.profile.eta,
        ParameterKind::Multiplier(index) => phase
            .reflections()
            .get(index)
            .map_or(1.0, |r| r.multiplier()),
    }
}

pub fn write_to_phase(phase: &mut Phase, kind: ParameterKind, value: f64) {
    match kind {
        ParameterKind::CellA => phase.set_cell_a(value),
        ParameterKind::CellB => phase.cell.b = value,
        ParameterKind::CellC => phase.cell.c = value,
        ParameterKind::ZeroShift | ParameterKind::SharedZeroShift => phase.zero_shift = value,
        ParameterKind::Scale => phase.scale = value,
        ParameterKind::U => phase.profile.u = value,
        ParameterKind::V => phase.profile.v = value,
        ParameterKind::W => phase.profile.w = value,
        ParameterKind::Eta => phase.profile.eta = value,
        ParameterKind::Multiplier(index) => {
            if let Some(reflection) = phase.reflections_mut().get_mut(index) {
                reflection.set_multiplier(value);
            }
        }
    }
}

/// Writes `values` (aligned with `entries`) into `phase`.
pub fn apply_to_phase(phase: &mut Phase, entries: &[ParameterEntry], values: &[f64]) {
    for (entry, &value) in entries.iter().zip(values) {
        write_to_phase(phase, entry.kind, value);
    }
}

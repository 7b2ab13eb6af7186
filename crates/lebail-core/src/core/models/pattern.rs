use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Floor applied to intensities before synthesizing `sqrt(I)` uncertainties, so that
/// empty baseline regions still get a finite weight.
const MIN_COUNTS_FOR_SIGMA: f64 = 1.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PatternError {
    #[error(
        "Pattern arrays disagree in length: {two_theta} angles, {intensity} intensities, {sigma} uncertainties"
    )]
    LengthMismatch {
        two_theta: usize,
        intensity: usize,
        sigma: usize,
    },
    #[error("Pattern contains no samples")]
    Empty,
    #[error("Angles must be strictly increasing (violated at index {index})")]
    NotIncreasing { index: usize },
    #[error("Non-finite sample at index {index}")]
    NonFinite { index: usize },
    #[error("Uncertainty at index {index} must be positive (got {value})")]
    InvalidUncertainty { index: usize, value: f64 },
    #[error("Invalid angular range: minimum {min} must be below maximum {max}")]
    InvalidRange { min: f64, max: f64 },
}

/// An inclusive two-theta interval in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngularRange {
    pub min: f64,
    pub max: f64,
}

impl AngularRange {
    pub fn new(min: f64, max: f64) -> Result<Self, PatternError> {
        if !(min < max) {
            return Err(PatternError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    #[inline]
    pub fn contains(&self, two_theta: f64) -> bool {
        two_theta >= self.min && two_theta <= self.max
    }
}

/// Column-oriented angle/intensity/uncertainty samples with strictly increasing angles.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PatternData {
    two_theta: Vec<f64>,
    intensity: Vec<f64>,
    sigma: Vec<f64>,
}

impl PatternData {
    pub fn len(&self) -> usize {
        self.two_theta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.two_theta.is_empty()
    }

    pub fn two_theta(&self) -> &[f64] {
        &self.two_theta
    }

    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    pub fn sigma(&self) -> &[f64] {
        &self.sigma
    }

    /// Statistical weight `1/σ²` of sample `index`.
    #[inline]
    pub fn weight(&self, index: usize) -> f64 {
        let s = self.sigma[index];
        1.0 / (s * s)
    }

    fn windowed(&self, range: AngularRange) -> PatternData {
        let start = self.two_theta.partition_point(|&x| x < range.min);
        let end = self.two_theta.partition_point(|&x| x <= range.max);
        let end = end.max(start);
        PatternData {
            two_theta: self.two_theta[start..end].to_vec(),
            intensity: self.intensity[start..end].to_vec(),
            sigma: self.sigma[start..end].to_vec(),
        }
    }
}

/// A measured powder pattern.
///
/// The samples passed to [`ExperimentalPattern::new`] are kept as an immutable original
/// snapshot for the whole lifetime of the value. Every angular window is re-derived from
/// that snapshot, never from a previously windowed view, so repeated windowing cannot
/// compound truncation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentalPattern {
    original: PatternData,
    active: PatternData,
    window: Option<AngularRange>,
}

impl ExperimentalPattern {
    /// Validates and stores a pattern. When `sigma` is `None`, uncertainties are
    /// synthesized as `sqrt(max(I, 1))`.
    pub fn new(
        two_theta: Vec<f64>,
        intensity: Vec<f64>,
        sigma: Option<Vec<f64>>,
    ) -> Result<Self, PatternError> {
        let sigma = match sigma {
            Some(s) => s,
            None => intensity
                .iter()
                .map(|&i| i.max(MIN_COUNTS_FOR_SIGMA).sqrt())
                .collect(),
        };

        if two_theta.len() != intensity.len() || two_theta.len() != sigma.len() {
            return Err(PatternError::LengthMismatch {
                two_theta: two_theta.len(),
                intensity: intensity.len(),
                sigma: sigma.len(),
            });
        }
        if two_theta.is_empty() {
            return Err(PatternError::Empty);
        }

        for index in 0..two_theta.len() {
            if !two_theta[index].is_finite() || !intensity[index].is_finite() {
                return Err(PatternError::NonFinite { index });
            }
            if !(sigma[index] > 0.0) || !sigma[index].is_finite() {
                return Err(PatternError::InvalidUncertainty {
                    index,
                    value: sigma[index],
                });
            }
            if index > 0 && two_theta[index] <= two_theta[index - 1] {
                return Err(PatternError::NotIncreasing { index });
            }
        }

        let original = PatternData {
            two_theta,
            intensity,
            sigma,
        };
        Ok(Self {
            active: original.clone(),
            original,
            window: None,
        })
    }

    pub fn original(&self) -> &PatternData {
        &self.original
    }

    /// The view every downstream computation fits against.
    pub fn active(&self) -> &PatternData {
        &self.active
    }

    pub fn window(&self) -> Option<AngularRange> {
        self.window
    }

    /// Restricts the active view to `[min, max]` (inclusive), always derived from the
    /// original samples.
    pub fn apply_window(&mut self, min: f64, max: f64) -> Result<(), PatternError> {
        let range = AngularRange::new(min, max)?;
        self.set_window(Some(range));
        Ok(())
    }

    pub fn set_window(&mut self, range: Option<AngularRange>) {
        self.active = match range {
            Some(r) => self.original.windowed(r),
            None => self.original.clone(),
        };
        self.window = range;
    }

    pub fn clear_window(&mut self) {
        self.set_window(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_pattern() -> ExperimentalPattern {
        let two_theta: Vec<f64> = (0..101).map(|i| 10.0 + i as f64 * 0.1).collect();
        let intensity: Vec<f64> = two_theta.iter().map(|x| x * 2.0).collect();
        ExperimentalPattern::new(two_theta, intensity, None).unwrap()
    }

    #[test]
    fn missing_uncertainties_are_synthesized_from_counts() {
        let pattern =
            ExperimentalPattern::new(vec![1.0, 2.0, 3.0], vec![16.0, 0.0, 4.0], None).unwrap();
        assert_eq!(pattern.active().sigma(), &[4.0, 1.0, 2.0]);
        assert_eq!(pattern.active().weight(0), 1.0 / 16.0);
    }

    #[test]
    fn construction_rejects_non_increasing_angles() {
        let result = ExperimentalPattern::new(vec![1.0, 1.0], vec![1.0, 1.0], None);
        assert_eq!(result, Err(PatternError::NotIncreasing { index: 1 }));
    }

    #[test]
    fn construction_rejects_non_positive_uncertainty() {
        let result =
            ExperimentalPattern::new(vec![1.0, 2.0], vec![1.0, 1.0], Some(vec![1.0, 0.0]));
        assert!(matches!(
            result,
            Err(PatternError::InvalidUncertainty { index: 1, .. })
        ));
    }

    #[test]
    fn construction_rejects_length_mismatch() {
        let result = ExperimentalPattern::new(vec![1.0, 2.0], vec![1.0], None);
        assert!(matches!(result, Err(PatternError::LengthMismatch { .. })));
    }

    #[test]
    fn construction_rejects_empty_input() {
        let result = ExperimentalPattern::new(vec![], vec![], None);
        assert_eq!(result, Err(PatternError::Empty));
    }

    #[test]
    fn window_is_inclusive_on_both_ends() {
        let mut pattern = ramp_pattern();
        pattern.apply_window(11.95, 13.05).unwrap();
        let active = pattern.active();
        assert_eq!(active.len(), 11);
        assert!((active.two_theta()[0] - 12.0).abs() < 1e-9);
        assert!((active.two_theta()[10] - 13.0).abs() < 1e-9);
    }

    #[test]
    fn applying_the_same_window_twice_is_idempotent() {
        let mut pattern = ramp_pattern();
        pattern.apply_window(12.0, 15.0).unwrap();
        let once = pattern.active().len();
        pattern.apply_window(12.0, 15.0).unwrap();
        assert_eq!(pattern.active().len(), once);
    }

    #[test]
    fn a_wider_window_is_rederived_from_the_original() {
        let mut pattern = ramp_pattern();
        pattern.apply_window(11.95, 13.05).unwrap();
        pattern.apply_window(10.0, 20.0).unwrap();
        assert_eq!(pattern.active().len(), 101);
        assert_eq!(pattern.original().len(), 101);
    }

    #[test]
    fn invalid_range_is_rejected_and_leaves_active_view_untouched() {
        let mut pattern = ramp_pattern();
        pattern.apply_window(11.95, 13.05).unwrap();
        let result = pattern.apply_window(15.0, 15.0);
        assert_eq!(
            result,
            Err(PatternError::InvalidRange {
                min: 15.0,
                max: 15.0
            })
        );
        assert_eq!(pattern.active().len(), 11);
        assert_eq!(pattern.window(), Some(AngularRange::new(11.95, 13.05).unwrap()));
    }

    #[test]
    fn clearing_the_window_restores_the_original_view() {
        let mut pattern = ramp_pattern();
        pattern.apply_window(11.95, 13.05).unwrap();
        pattern.clear_window();
        assert_eq!(pattern.active(), pattern.original());
        assert!(pattern.window().is_none());
    }

    #[test]
    fn window_outside_the_data_yields_an_empty_view() {
        let mut pattern = ramp_pattern();
        pattern.apply_window(50.0, 60.0).unwrap();
        assert!(pattern.active().is_empty());
    }
}

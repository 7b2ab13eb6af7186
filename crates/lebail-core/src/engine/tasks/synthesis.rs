use crate::core::models::pattern::PatternData;
use crate::core::models::phase::Phase;
use crate::core::profile::shape::PeakProfile;
use crate::core::profile::width::caglioti_fwhm;
use crate::core::utils::geometry::two_theta_from_d;

/// Which per-reflection intensity the calculated curve is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntensityModel {
    /// Intensities re-estimated from the data (Le Bail).
    Observed,
    /// Theoretical intensity times the reflection's bounded multiplier (Pawley-style).
    Independent,
}

impl IntensityModel {
    pub fn for_mode(independent_intensities: bool) -> Self {
        if independent_intensities {
            Self::Independent
        } else {
            Self::Observed
        }
    }
}

/// Positioned unit-height profiles of a phase's reachable reflections, as
/// `(reflection index, profile)` pairs in reflection order.
pub fn peak_geometry(phase: &Phase, wavelength: f64) -> Vec<(usize, PeakProfile)> {
    let p = &phase.profile;
    phase
        .reflections()
        .iter()
        .enumerate()
        .filter_map(|(index, reflection)| {
            let d = reflection.d_spacing_for(&phase.cell);
            let bragg = two_theta_from_d(d, wavelength)?;
            let center = bragg + phase.zero_shift;
            let fwhm = caglioti_fwhm(center, p.u, p.v, p.w);
            Some((index, PeakProfile::new(center, fwhm, p.eta)))
        })
        .collect()
}

/// Adds the phase's calculated curve (`scale × I_k × profile_k`) into `out`.
pub fn accumulate_phase(
    phase: &Phase,
    model: IntensityModel,
    wavelength: f64,
    two_theta: &[f64],
    out: &mut [f64],
) {
    let reflections = phase.reflections();
    for (index, peak) in peak_geometry(phase, wavelength) {
        let reflection = &reflections[index];
        let intensity = match model {
            IntensityModel::Observed => reflection.observed_intensity(),
            IntensityModel::Independent => reflection.free_intensity(),
        };
        peak.accumulate(two_theta, phase.scale * intensity, out);
    }
}

pub fn phase_pattern(
    phase: &Phase,
    model: IntensityModel,
    wavelength: f64,
    two_theta: &[f64],
) -> Vec<f64> {
    let mut out = vec![0.0; two_theta.len()];
    accumulate_phase(phase, model, wavelength, two_theta, &mut out);
    out
}

pub fn total_pattern(
    phases: &[Phase],
    model: IntensityModel,
    wavelength: f64,
    two_theta: &[f64],
) -> Vec<f64> {
    let mut out = vec![0.0; two_theta.len()];
    for phase in phases {
        accumulate_phase(phase, model, wavelength, two_theta, &mut out);
    }
    out
}

/// Sum of every phase except `skip`; held fixed while phase `skip` is being fitted.
pub fn other_phases_pattern(
    phases: &[Phase],
    skip: usize,
    model: IntensityModel,
    wavelength: f64,
    two_theta: &[f64],
) -> Vec<f64> {
    let mut out = vec![0.0; two_theta.len()];
    for (index, phase) in phases.iter().enumerate() {
        if index != skip {
            accumulate_phase(phase, model, wavelength, two_theta, &mut out);
        }
    }
    out
}

/// Scale that brings the phase's strongest reflection to 80 % of the strongest measured
/// intensity, both taken over the angular range where data and reflections overlap.
/// Falls back to 1.0 when there is no overlap.
pub fn estimate_scale(phase: &Phase, pattern: &PatternData, wavelength: f64) -> f64 {
    const TARGET_FRACTION: f64 = 0.8;

    let (Some(&exp_min), Some(&exp_max)) =
        (pattern.two_theta().first(), pattern.two_theta().last())
    else {
        return 1.0;
    };

    let reflections = phase.reflections();
    let peaks: Vec<(f64, f64)> = peak_geometry(phase, wavelength)
        .into_iter()
        .map(|(index, peak)| (peak.center, reflections[index].theoretical_intensity()))
        .collect();
    let theo_min = peaks.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let theo_max = peaks.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);

    let overlap_min = exp_min.max(theo_min);
    let overlap_max = exp_max.min(theo_max);
    if !(overlap_min < overlap_max) {
        return 1.0;
    }

    let exp_peak = pattern
        .two_theta()
        .iter()
        .zip(pattern.intensity())
        .filter(|(x, _)| (overlap_min..=overlap_max).contains(*x))
        .map(|(_, &y)| y)
        .fold(f64::NEG_INFINITY, f64::max);
    let theo_peak = peaks
        .iter()
        .filter(|(x, _)| (overlap_min..=overlap_max).contains(x))
        .map(|&(_, i)| i)
        .fold(f64::NEG_INFINITY, f64::max);

    if theo_peak > 0.0 && exp_peak > 0.0 {
        TARGET_FRACTION * exp_peak / theo_peak
    } else {
        1.0
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::core::models::cell::MillerIndex;
    use crate::core::models::reflection::Reflection;
    use crate::core::utils::geometry::CU_KA1;

    #[test]
    fn peaks_are_placed_at_their_bragg_angles_plus_zero_shift() {
        let phase = phase_at("p", &[(20.0, 100.0), (30.0, 60.0)]).with_zero_shift(0.05);
        let geometry = peak_geometry(&phase, CU_KA1);
        assert_eq!(geometry.len(), 2);
        assert!((geometry[0].1.center - 20.05).abs() < 1e-9);
        assert!((geometry[1].1.center - 30.05).abs() < 1e-9);
    }

    #[test]
    fn unreachable_reflections_are_skipped() {
        let near = phase_at("p", &[(20.0, 100.0)]);
        let far = Reflection::new(MillerIndex::new(9, 0, 0), 0.5, 10.0, 6).unwrap();
        let phase = Phase::new("p", near.cell, vec![near.reflections()[0].clone(), far]);
        assert_eq!(peak_geometry(&phase, CU_KA1).len(), 1);
    }

    #[test]
    fn peak_height_equals_scale_times_intensity() {
        let phase = phase_at("p", &[(30.0, 60.0)])
            .with_profile(narrow_profile())
            .unwrap()
            .with_scale(2.0)
            .unwrap();
        let two_theta = sampling(29.0, 31.0, 0.01);
        let pattern = phase_pattern(&phase, IntensityModel::Observed, CU_KA1, &two_theta);
        let max = pattern.iter().cloned().fold(0.0, f64::max);
        assert!((max - 120.0).abs() < 1e-6);
    }

    #[test]
    fn total_is_the_sum_of_phase_patterns() {
        let a = phase_at("a", &[(20.0, 100.0)]);
        let b = phase_at("b", &[(20.1, 50.0)]);
        let two_theta = sampling(19.0, 21.0, 0.01);
        let phases = vec![a, b];
        let total = total_pattern(&phases, IntensityModel::Observed, CU_KA1, &two_theta);
        let others = other_phases_pattern(&phases, 0, IntensityModel::Observed, CU_KA1, &two_theta);
        let own = phase_pattern(&phases[0], IntensityModel::Observed, CU_KA1, &two_theta);
        for i in 0..two_theta.len() {
            assert!((total[i] - others[i] - own[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn both_intensity_models_agree_before_refinement() {
        let phase = phase_at("p", &[(20.0, 100.0), (30.0, 60.0)]);
        let two_theta = sampling(15.0, 35.0, 0.02);
        let observed = phase_pattern(&phase, IntensityModel::Observed, CU_KA1, &two_theta);
        let independent = phase_pattern(&phase, IntensityModel::Independent, CU_KA1, &two_theta);
        assert_eq!(observed, independent);
    }

    #[test]
    fn scale_estimate_targets_eighty_percent_of_the_measured_maximum() {
        let peaks = [(20.0, 50.0), (25.0, 100.0), (30.0, 50.0)];
        let truth = phase_at("p", &peaks)
            .with_profile(narrow_profile())
            .unwrap()
            .with_scale(3.0)
            .unwrap();
        let pattern = synthetic_pattern(&[truth], sampling(15.0, 35.0, 0.01));
        let candidate = phase_at("p", &peaks);
        let scale = estimate_scale(&candidate, pattern.active(), CU_KA1);
        assert!((scale - 0.8 * 3.0).abs() < 1e-3);
    }

    #[test]
    fn scale_estimate_falls_back_without_overlap() {
        let phase = phase_at("p", &[(60.0, 100.0), (70.0, 50.0)]);
        let pattern = synthetic_pattern(&[], sampling(15.0, 35.0, 0.1));
        assert_eq!(estimate_scale(&phase, pattern.active(), CU_KA1), 1.0);
    }
}

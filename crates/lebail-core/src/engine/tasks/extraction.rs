//! Le Bail intensity apportionment.
//!
//! Each pass distributes every measured sample among the reflections overlapping it in
//! proportion to their current calculated contribution, then normalizes each
//! reflection's share by its own profile so the result stays on the per-unit-scale
//! basis of the theoretical intensities:
//!
//! `I_k ← I_k · Σ_i h_k(x_i)·y_i / ycalc_i  /  Σ_i h_k(x_i)`
//!
//! All reflections of all phases are updated together from the same `ycalc` (one pass
//! never sees a partially updated curve). The number of passes is fixed.

use super::synthesis::peak_geometry;
use crate::core::models::pattern::PatternData;
use crate::core::models::phase::Phase;
use std::ops::Range;
use tracing::trace;

struct PeakSupport {
    phase: usize,
    reflection: usize,
    range: Range<usize>,
    heights: Vec<f64>,
}

/// Re-estimates the observed intensity of every reflection of every phase.
///
/// Seeds are the previously extracted value when positive, otherwise the theoretical
/// intensity times the reflection's multiplier; in independent-intensity mode the seed is
/// always the latter. Reflections that cover no sample with a positive calculated value
/// keep the observed intensity they had before the call.
pub fn run(
    phases: &mut [Phase],
    pattern: &PatternData,
    wavelength: f64,
    passes: usize,
    independent_intensities: bool,
) {
    let two_theta = pattern.two_theta();
    let observed = pattern.intensity();

    let mut intensities: Vec<Vec<f64>> = phases
        .iter()
        .map(|phase| {
            phase
                .reflections()
                .iter()
                .map(|r| {
                    if !independent_intensities && r.observed_intensity() > 0.0 {
                        r.observed_intensity()
                    } else {
                        r.free_intensity()
                    }
                })
                .collect()
        })
        .collect();

    let supports: Vec<PeakSupport> = phases
        .iter()
        .enumerate()
        .flat_map(|(phase_index, phase)| {
            peak_geometry(phase, wavelength)
                .into_iter()
                .map(move |(reflection, peak)| {
                    let range = peak.support(two_theta);
                    let heights = two_theta[range.clone()]
                        .iter()
                        .map(|&x| peak.height(x))
                        .collect();
                    PeakSupport {
                        phase: phase_index,
                        reflection,
                        range,
                        heights,
                    }
                })
        })
        .filter(|s| !s.range.is_empty())
        .collect();
    let scales: Vec<f64> = phases.iter().map(|p| p.scale).collect();

    let mut covered = vec![false; supports.len()];
    let mut calculated = vec![0.0; two_theta.len()];
    let mut updates = vec![None; supports.len()];

    for pass in 0..passes {
        calculated.fill(0.0);
        for s in &supports {
            let amplitude = scales[s.phase] * intensities[s.phase][s.reflection];
            for (offset, &h) in s.heights.iter().enumerate() {
                calculated[s.range.start + offset] += amplitude * h;
            }
        }

        for (k, s) in supports.iter().enumerate() {
            let mut apportioned = 0.0;
            let mut profile_sum = 0.0;
            for (offset, &h) in s.heights.iter().enumerate() {
                let i = s.range.start + offset;
                if calculated[i] <= 0.0 {
                    continue;
                }
                apportioned += h * observed[i] / calculated[i];
                profile_sum += h;
            }
            updates[k] = (profile_sum > 0.0).then(|| {
                let current = intensities[s.phase][s.reflection];
                (current * apportioned / profile_sum).max(0.0)
            });
        }

        for (k, s) in supports.iter().enumerate() {
            if let Some(value) = updates[k] {
                intensities[s.phase][s.reflection] = value;
                covered[k] = true;
            }
        }
        trace!(pass, "Le Bail apportionment pass complete");
    }

    for (k, s) in supports.iter().enumerate() {
        if covered[k] {
            let value = intensities[s.phase][s.reflection];
            phases[s.phase].reflections_mut()[s.reflection].set_observed_intensity(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utils::geometry::CU_KA1;
    use crate::engine::tasks::synthesis::test_support::*;

    fn with_narrow_profile(phase: Phase) -> Phase {
        phase.with_profile(narrow_profile()).unwrap()
    }

    #[test]
    fn isolated_peak_is_recovered_in_a_single_pass() {
        let truth = with_narrow_profile(phase_at("p", &[(30.0, 70.0)]));
        let pattern = synthetic_pattern(&[truth], sampling(29.0, 31.0, 0.01));
        let mut phases = vec![with_narrow_profile(phase_at("p", &[(30.0, 10.0)]))];
        run(&mut phases, pattern.active(), CU_KA1, 1, false);
        let extracted = phases[0].reflections()[0].observed_intensity();
        assert!((extracted - 70.0).abs() < 1e-9);
        assert_eq!(phases[0].reflections()[0].theoretical_intensity(), 10.0);
    }

    #[test]
    fn extraction_is_independent_of_the_phase_scale() {
        let truth = with_narrow_profile(phase_at("p", &[(30.0, 70.0)]));
        let pattern = synthetic_pattern(&[truth], sampling(29.0, 31.0, 0.01));
        let mut phases = vec![
            with_narrow_profile(phase_at("p", &[(30.0, 10.0)]))
                .with_scale(2.0)
                .unwrap(),
        ];
        run(&mut phases, pattern.active(), CU_KA1, 1, false);
        let extracted = phases[0].reflections()[0].observed_intensity();
        assert!((extracted - 35.0).abs() < 1e-9);
    }

    #[test]
    fn overlapping_peaks_are_partitioned_towards_the_true_ratio() {
        let peaks = [(30.0, 100.0), (30.2, 40.0)];
        let truth = with_narrow_profile(phase_at("p", &peaks));
        let pattern = synthetic_pattern(&[truth], sampling(29.0, 31.5, 0.01));
        let mut phases = vec![with_narrow_profile(phase_at(
            "p",
            &[(30.0, 70.0), (30.2, 70.0)],
        ))];
        run(&mut phases, pattern.active(), CU_KA1, 200, false);
        let r = phases[0].reflections();
        assert!((r[0].observed_intensity() - 100.0).abs() < 0.5);
        assert!((r[1].observed_intensity() - 40.0).abs() < 0.5);
    }

    #[test]
    fn negative_measurements_never_produce_negative_intensities() {
        let two_theta = sampling(29.0, 31.0, 0.01);
        let n = two_theta.len();
        let pattern = crate::core::models::pattern::ExperimentalPattern::new(
            two_theta,
            vec![-5.0; n],
            Some(vec![1.0; n]),
        )
        .unwrap();
        let mut phases = vec![with_narrow_profile(phase_at("p", &[(30.0, 10.0)]))];
        run(&mut phases, pattern.active(), CU_KA1, 5, false);
        assert_eq!(phases[0].reflections()[0].observed_intensity(), 0.0);
    }

    #[test]
    fn reflections_outside_the_window_keep_their_previous_estimate() {
        let truth = with_narrow_profile(phase_at("p", &[(30.0, 70.0)]));
        let pattern = synthetic_pattern(&[truth], sampling(29.0, 31.0, 0.01));
        let mut phases = vec![with_narrow_profile(phase_at(
            "p",
            &[(30.0, 10.0), (45.0, 12.0)],
        ))];
        phases[0].reflections_mut()[1].set_observed_intensity(3.5);
        run(&mut phases, pattern.active(), CU_KA1, 5, true);
        assert_eq!(phases[0].reflections()[1].observed_intensity(), 3.5);
    }

    #[test]
    fn zero_estimates_are_reseeded_from_theory() {
        let truth = with_narrow_profile(phase_at("p", &[(30.0, 70.0)]));
        let pattern = synthetic_pattern(&[truth], sampling(29.0, 31.0, 0.01));
        let mut phases = vec![with_narrow_profile(phase_at("p", &[(30.0, 10.0)]))];
        phases[0].reflections_mut()[0].set_observed_intensity(0.0);
        run(&mut phases, pattern.active(), CU_KA1, 1, false);
        assert!((phases[0].reflections()[0].observed_intensity() - 70.0).abs() < 1e-9);
    }
}

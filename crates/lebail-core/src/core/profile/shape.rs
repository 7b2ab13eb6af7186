use std::f64::consts::LN_2;

/// Peak contributions are evaluated only within this many FWHM of the centre.
pub const FWHM_CUTOFF: f64 = 5.0;

/// Unit-height Gaussian with the given full width at half maximum.
#[inline]
pub fn gaussian(dx: f64, fwhm: f64) -> f64 {
    let sigma = fwhm / (2.0 * (2.0 * LN_2).sqrt());
    let z = dx / sigma;
    (-0.5 * z * z).exp()
}

/// Unit-height Lorentzian with the given full width at half maximum.
#[inline]
pub fn lorentzian(dx: f64, fwhm: f64) -> f64 {
    let gamma = fwhm / 2.0;
    let z = dx / gamma;
    1.0 / (1.0 + z * z)
}

#[inline]
pub fn pseudo_voigt(dx: f64, fwhm: f64, eta: f64) -> f64 {
    (1.0 - eta) * gaussian(dx, fwhm) + eta * lorentzian(dx, fwhm)
}

/// A positioned pseudo-Voigt peak of unit height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakProfile {
    pub center: f64,
    pub fwhm: f64,
    pub eta: f64,
}

impl PeakProfile {
    pub fn new(center: f64, fwhm: f64, eta: f64) -> Self {
        Self { center, fwhm, eta }
    }

    /// Height at `x`, exactly zero outside the cutoff window.
    #[inline]
    pub fn height(&self, x: f64) -> f64 {
        let dx = x - self.center;
        if self.fwhm <= 0.0 || dx.abs() > FWHM_CUTOFF * self.fwhm {
            return 0.0;
        }
        pseudo_voigt(dx, self.fwhm, self.eta)
    }

    /// Index range of the sorted `two_theta` samples inside the cutoff window.
    pub fn support(&self, two_theta: &[f64]) -> std::ops::Range<usize> {
        if self.fwhm <= 0.0 || !self.fwhm.is_finite() {
            return 0..0;
        }
        let half = FWHM_CUTOFF * self.fwhm;
        let start = two_theta.partition_point(|&x| x < self.center - half);
        let end = two_theta.partition_point(|&x| x <= self.center + half);
        start..end.max(start)
    }

    /// Adds `amplitude × profile` into `out`, touching only samples inside the support.
    pub fn accumulate(&self, two_theta: &[f64], amplitude: f64, out: &mut [f64]) {
        if amplitude == 0.0 {
            return;
        }
        for i in self.support(two_theta) {
            out[i] += amplitude * pseudo_voigt(two_theta[i] - self.center, self.fwhm, self.eta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() < TOLERANCE
    }

    #[test]
    fn both_components_are_half_height_at_half_width() {
        assert!(f64_approx_equal(gaussian(0.05, 0.1), 0.5));
        assert!(f64_approx_equal(lorentzian(0.05, 0.1), 0.5));
        assert!(f64_approx_equal(pseudo_voigt(-0.05, 0.1, 0.3), 0.5));
    }

    #[test]
    fn pseudo_voigt_has_unit_height_at_center() {
        for eta in [0.0, 0.25, 1.0] {
            assert!(f64_approx_equal(pseudo_voigt(0.0, 0.2, eta), 1.0));
        }
    }

    #[test]
    fn eta_selects_the_pure_shapes() {
        assert!(f64_approx_equal(pseudo_voigt(0.13, 0.2, 0.0), gaussian(0.13, 0.2)));
        assert!(f64_approx_equal(pseudo_voigt(0.13, 0.2, 1.0), lorentzian(0.13, 0.2)));
    }

    #[test]
    fn height_is_exactly_zero_beyond_the_cutoff() {
        let peak = PeakProfile::new(30.0, 0.1, 1.0);
        assert!(peak.height(30.49) > 0.0);
        assert_eq!(peak.height(30.51), 0.0);
        assert_eq!(peak.height(29.49), 0.0);
    }

    #[test]
    fn support_selects_only_samples_within_the_cutoff() {
        let two_theta: Vec<f64> = (0..1000).map(|i| 25.0 + i as f64 * 0.01).collect();
        let peak = PeakProfile::new(30.0, 0.1, 0.5);
        let support = peak.support(&two_theta);
        assert!(support.len() >= 99 && support.len() <= 101);
        assert!(two_theta[support.start] >= 29.5 - 1e-9);
        assert!(two_theta[support.end - 1] <= 30.5 + 1e-9);
    }

    #[test]
    fn accumulate_leaves_samples_outside_the_support_untouched() {
        let two_theta: Vec<f64> = (0..200).map(|i| 29.0 + i as f64 * 0.01).collect();
        let mut out = vec![0.0; two_theta.len()];
        PeakProfile::new(30.0, 0.05, 0.5).accumulate(&two_theta, 10.0, &mut out);
        assert_eq!(out[0], 0.0);
        assert!((out[100] - 10.0).abs() < 1e-9);
        assert_eq!(out[199], 0.0);
    }

    #[test]
    fn degenerate_width_has_empty_support() {
        let peak = PeakProfile::new(30.0, 0.0, 0.5);
        assert!(peak.support(&[29.0, 30.0, 31.0]).is_empty());
    }
}

/// Smallest FWHM² the Caglioti relation may produce, keeping widths finite and positive
/// for any coefficient combination the bounds allow.
pub const MIN_FWHM_SQUARED: f64 = 1e-6;

/// Caglioti peak width `sqrt(U·tan²θ + V·tanθ + W)` for a peak at `two_theta` degrees.
#[inline]
pub fn caglioti_fwhm(two_theta: f64, u: f64, v: f64, w: f64) -> f64 {
    let tan_theta = (two_theta / 2.0).to_radians().tan();
    let fwhm_sq = u * tan_theta * tan_theta + v * tan_theta + w;
    fwhm_sq.max(MIN_FWHM_SQUARED).sqrt()
}

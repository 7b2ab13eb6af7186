/// Cu Kα1 wavelength in Å.
pub const CU_KA1: f64 = 1.5406;

/// Bragg angle `2θ` in degrees for spacing `d` (Å), or `None` when `λ / 2d > 1`.
#[inline]
pub fn two_theta_from_d(d: f64, wavelength: f64) -> Option<f64> {
    if d <= 0.0 {
        return None;
    }
    let sin_theta = wavelength / (2.0 * d);
    if !(0.0..=1.0).contains(&sin_theta) {
        return None;
    }
    Some(2.0 * sin_theta.asin().to_degrees())
}

#[inline]
pub fn d_from_two_theta(two_theta: f64, wavelength: f64) -> Option<f64> {
    let sin_theta = (two_theta.to_radians() / 2.0).sin();
    (sin_theta > 0.0).then(|| wavelength / (2.0 * sin_theta))
}

/// Re-expresses a peak position measured at `from` wavelength at `to` wavelength.
pub fn convert_two_theta(two_theta: f64, from: f64, to: f64) -> Option<f64> {
    d_from_two_theta(two_theta, from).and_then(|d| two_theta_from_d(d, to))
}

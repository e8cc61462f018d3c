//! Low-discrepancy sample generation over Burley's normalized diffusion profile.
//!
//! Radii come from inverse-transform sampling of the profile's radial CDF
//! driven by a radical-inverse sequence; azimuths come from a 1D spherical
//! Fibonacci sequence. Each 2x2 pixel block rotates the pattern by one of four
//! fixed angles.

use std::f32::consts::{FRAC_1_SQRT_2, TAU};

/// 2^-32, maps a reversed `u32` into [0, 1).
pub(crate) const INV_U32_RANGE: f32 = 2.328_306_4e-10;
/// Keeps the complementary CDF strictly positive so the radius stays finite.
pub(crate) const MAX_CDF: f32 = 0.999_99;
/// Conjugate of the golden ratio, `(sqrt(5) - 1) / 2`.
pub(crate) const GOLDEN_RATIO_CONJUGATE: f32 = 0.618_034;

/// Rotation for each class: 0, pi/2, pi/4 and 3pi/4.
pub const ROTATION_COS: [f32; 4] = [1.0, 0.0, FRAC_1_SQRT_2, -FRAC_1_SQRT_2];
pub const ROTATION_SIN: [f32; 4] = [0.0, 1.0, FRAC_1_SQRT_2, FRAC_1_SQRT_2];

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Sample {
    /// Offset on the profile plane, in millimetres.
    pub offset: [f32; 2],
    /// Distance from the centre in millimetres, `>= 0`.
    pub radius: f32,
}

/// Van der Corput radical inverse in base 2.
#[inline]
pub fn radical_inverse(index: u32) -> f32 {
    (index.reverse_bits() as f32 * INV_U32_RANGE).min(MAX_CDF)
}

/// Azimuth of the `index`-th point of the 1D spherical Fibonacci sequence.
#[inline]
pub fn fibonacci_azimuth(index: u32) -> f32 {
    TAU * (index as f32 * GOLDEN_RATIO_CONJUGATE).fract()
}

/// Rotation class of a pixel from its coordinate parity.
#[inline]
pub fn rotation_class(x: usize, y: usize) -> usize {
    (x & 1) | ((y & 1) << 1)
}

/// Inverse of the radial CDF of Burley's normalized diffusion,
/// `cdf(r) = 1 - exp(-s r) / 4 - 3 exp(-s r / 3) / 4`.
///
/// `u` is the CDF value in [0, 1) and `shape` the profile parameter `s` in 1/mm.
pub fn burley_inverse_cdf(u: f32, shape: f32) -> f32 {
    let ccdf = 1.0 - u.clamp(0.0, MAX_CDF);
    let g = 1.0 + 4.0 * ccdf * (2.0 * ccdf + (1.0 + 4.0 * ccdf * ccdf).sqrt());
    let n = g.powf(-1.0 / 3.0);
    let p = g * n * n;
    let c = 1.0 + p + n;
    let x = 3.0 * (c / (4.0 * ccdf)).ln();
    (x / shape).max(0.0)
}

/// Sample `index` of the sequence for rotation class `class`, distributed for
/// the profile with shape parameter `min_shape`.
pub fn get_sample(index: u32, class: usize, min_shape: f32) -> Sample {
    let radius = burley_inverse_cdf(radical_inverse(index), min_shape);
    let (sin_phi, cos_phi) = fibonacci_azimuth(index).sin_cos();
    let cos_g = ROTATION_COS[class & 3];
    let sin_g = ROTATION_SIN[class & 3];
    let x = cos_phi * cos_g - sin_phi * sin_g;
    let y = cos_phi * sin_g + sin_phi * cos_g;
    Sample {
        offset: [x * radius, y * radius],
        radius,
    }
}

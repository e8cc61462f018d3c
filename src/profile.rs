use std::f32::consts::PI;

const INV_8PI: f32 = 1.0 / (8.0 * PI);

/// Burley's normalized diffusion profile without the `1 / r` term,
/// `s / (8 pi) * (exp(-s r / 3) + exp(-s r))`.
#[inline]
pub fn burley_profile(r: f32, shape: f32) -> f32 {
    let exp_13 = (-shape * r / 3.0).exp();
    shape * INV_8PI * exp_13 * (1.0 + exp_13 * exp_13)
}

/// Per-channel kernel weight of one sample.
///
/// `radius` is the sampled planar distance and `depth_delta_mm` the depth
/// difference between the neighbour and the centre, both in millimetres. The
/// surface distance is approximated as `sqrt(r^2 + dz^2)`, which only holds
/// for convex surfaces. The profile is divided by its value at the sampled
/// radius under `min_shape`, the distribution the radius was drawn from.
pub fn kernel_weight(radius: f32, depth_delta_mm: f32, shape: [f32; 3], min_shape: f32) -> [f32; 3] {
    if radius <= 0.0 {
        return [0.0; 3];
    }
    let pdf = burley_profile(radius, min_shape);
    if pdf <= 0.0 {
        return [0.0; 3];
    }
    let distance = radius.hypot(depth_delta_mm);
    shape.map(|s| burley_profile(distance, s) / pdf)
}

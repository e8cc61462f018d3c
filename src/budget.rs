use crate::model::Derived;
use crate::packing::PixelState;

/// Meters to millimetres.
pub const MM_PER_METER: f32 = 1000.0;

pub const SMALL_FOOTPRINT_PX: f32 = 1.0;
pub const MEDIUM_FOOTPRINT_PX: f32 = 4.0;
pub const SMALL_FOOTPRINT_SCALE: f32 = 0.3;
pub const MEDIUM_FOOTPRINT_SCALE: f32 = 0.6;

/// Screen pixels covered by one millimetre at `linear_depth` meters, per axis.
pub fn pixels_per_mm(derived: &Derived, linear_depth: f32) -> [f32; 2] {
    let depth_mm = (linear_depth * derived.depth_to_mm).max(f32::MIN_POSITIVE);
    [
        0.5 * derived.width as f32 * derived.proj_scale[0] / depth_mm,
        0.5 * derived.height as f32 * derived.proj_scale[1] / depth_mm,
    ]
}

/// On-screen extent in pixels of the widest channel's scatter distance.
pub fn footprint_px(state: &PixelState, pixels_per_mm: [f32; 2]) -> f32 {
    state.max_scatter_mm() * pixels_per_mm[0].max(pixels_per_mm[1])
}

pub fn footprint_scale(footprint: f32) -> f32 {
    if footprint < SMALL_FOOTPRINT_PX {
        SMALL_FOOTPRINT_SCALE
    } else if footprint < MEDIUM_FOOTPRINT_PX {
        MEDIUM_FOOTPRINT_SCALE
    } else {
        1.0
    }
}

/// Samples for one pixel: the budget scaled by quality and footprint, at least one.
pub fn sample_count(max_samples: u32, quality: f32, footprint: f32) -> u32 {
    let scaled = max_samples as f32 * quality.clamp(0.0, 1.0) * footprint_scale(footprint);
    (scaled.round() as u32).clamp(1, max_samples.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprint_sample_counts() {
        assert_eq!(sample_count(200, 1.0, 0.5), 60);
        assert_eq!(sample_count(200, 1.0, 2.0), 120);
        assert_eq!(sample_count(200, 1.0, 5.0), 200);
        assert_eq!(sample_count(200, 0.5, 5.0), 100);
    }

    #[test]
    fn never_below_one_sample() {
        assert_eq!(sample_count(200, 0.0, 10.0), 1);
        assert_eq!(sample_count(0, 1.0, 10.0), 1);
    }

    #[test]
    fn monotonic_in_quality_and_footprint() {
        let footprints = [0.0f32, 0.5, 0.99, 1.0, 2.0, 3.99, 4.0, 50.0];
        for q in 0..=20 {
            let quality = q as f32 / 20.0;
            for pair in footprints.windows(2) {
                assert!(sample_count(200, quality, pair[0]) <= sample_count(200, quality, pair[1]));
            }
            if q > 0 {
                let lower = (q - 1) as f32 / 20.0;
                for &fp in &footprints {
                    assert!(sample_count(200, lower, fp) <= sample_count(200, quality, fp));
                }
            }
        }
    }

    #[test]
    fn closer_surfaces_cover_more_pixels() {
        let derived = Derived::for_test(640, 480, [1.0, 1.0]);
        let near = pixels_per_mm(&derived, 0.5);
        let far = pixels_per_mm(&derived, 5.0);
        assert!(near[0] > far[0]);
        assert!((near[0] - 0.64).abs() < 1e-5);
        assert!((near[1] - 0.48).abs() < 1e-5);
    }
}

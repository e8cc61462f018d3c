//! CPU dispatch of the screen-space subsurface scattering kernel.
//!
//! The image is covered by 16x16 work-groups. Within a group every thread
//! first loads its tile cells and classifies its own pixel; pixels without
//! scattering are written right away with alpha 0. After the tile is sealed
//! the remaining threads run the sample loop and write alpha 1.

use rayon::prelude::*;

use crate::budget::{footprint_px, pixels_per_mm, sample_count};
use crate::frame::{Frame, SceneFrames};
use crate::model::Derived;
use crate::packing::PixelState;
use crate::profile::kernel_weight;
use crate::sampling::{get_sample, rotation_class};
use crate::tile::{FetchSource, TileBuilder, TileCache, TileLayout};

/// Guard on the weight sum when every sample was rejected.
pub const WEIGHT_EPSILON: f32 = 1e-6;

/// Alpha of pixels the convolution ran on.
pub const SCATTERED_ALPHA: f32 = 1.0;
/// Alpha of pixels that kept their input color.
pub const UNTOUCHED_ALPHA: f32 = 0.0;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ScatterCounters {
    pub scattered: u64,
    pub untouched: u64,
    pub samples: u64,
    pub tile_fetches: u64,
    pub direct_fetches: u64,
}

impl ScatterCounters {
    pub fn merge(mut self, other: Self) -> Self {
        self.scattered += other.scattered;
        self.untouched += other.untouched;
        self.samples += other.samples;
        self.tile_fetches += other.tile_fetches;
        self.direct_fetches += other.direct_fetches;
        self
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Accumulator {
    pub color_sum: [f32; 3],
    pub weight_sum: [f32; 3],
}

impl Accumulator {
    #[inline]
    pub fn add(&mut self, weight: [f32; 3], color: [f32; 3]) {
        for c in 0..3 {
            self.color_sum[c] += weight[c] * color[c];
            self.weight_sum[c] += weight[c];
        }
    }

    pub fn normalized(&self) -> [f32; 3] {
        [0, 1, 2].map(|c| self.color_sum[c] / (self.weight_sum[c] + WEIGHT_EPSILON))
    }
}

/// Blends the filtered color over the original by `strength` and flags it.
pub fn composite(original: [f32; 3], filtered: [f32; 3], strength: f32) -> [f32; 4] {
    let mix = |c: usize| original[c] + (filtered[c] - original[c]) * strength;
    [mix(0), mix(1), mix(2), SCATTERED_ALPHA]
}

/// Output for a pixel that skipped the convolution.
#[inline]
pub fn untouched(diffuse: [f32; 4]) -> [f32; 4] {
    [diffuse[0], diffuse[1], diffuse[2], UNTOUCHED_ALPHA]
}

/// Runs the sample loop for one pixel at tile-local coordinate `local`.
pub fn convolve(
    state: &PixelState,
    pixel: (usize, usize),
    local: (i64, i64),
    tile: &TileCache,
    frames: &SceneFrames,
    derived: &Derived,
    counters: &mut ScatterCounters,
) -> [f32; 4] {
    let ppm = pixels_per_mm(derived, state.linear_depth);
    let n = sample_count(derived.max_samples, state.quality, footprint_px(state, ppm));
    let class = rotation_class(pixel.0, pixel.1);
    let min_shape = state.min_shape();

    let mut acc = Accumulator::default();
    for i in 0..n {
        let sample = get_sample(i, class, min_shape);
        let dx = (sample.offset[0] * ppm[0]).round() as i64;
        let dy = (sample.offset[1] * ppm[1]).round() as i64;
        let (texel, source) =
            tile.resolve(local.0.saturating_add(dx), local.1.saturating_add(dy), frames);
        match source {
            FetchSource::Tile => counters.tile_fetches += 1,
            FetchSource::Direct => counters.direct_fetches += 1,
        }
        if !texel.is_valid() {
            continue;
        }
        let depth_delta_mm = (texel.depth - state.linear_depth) * derived.depth_to_mm;
        let weight = kernel_weight(sample.radius, depth_delta_mm, state.shape, min_shape);
        acc.add(weight, texel.color);
    }
    counters.samples += u64::from(n);

    composite(state.diffuse, acc.normalized(), state.strength)
}

/// Executes work-group `group`, writing its pixels into `band`, the rows of
/// the output covered by the group's row of work-groups.
pub fn dispatch_group(
    layout: TileLayout,
    group: (usize, usize),
    frames: &SceneFrames,
    derived: &Derived,
    band: &mut [[f32; 4]],
) -> ScatterCounters {
    let mut counters = ScatterCounters::default();
    let gw = layout.group_width();
    let gh = layout.group_height();
    let pad = layout.pad() as i64;
    let origin = (group.0 * gw, group.1 * gh);

    let mut builder = TileBuilder::new(layout, group);
    let mut active = Vec::with_capacity(layout.threads());
    for thread in 0..layout.threads() {
        builder.load_thread(thread, frames);

        let (tx, ty) = (thread % gw, thread / gw);
        let (x, y) = (origin.0 + tx, origin.1 + ty);
        if x >= derived.width || y >= derived.height {
            continue;
        }
        let diffuse = frames.diffuse.get(x, y);
        match PixelState::derive(diffuse, frames.depth.get(x, y), frames.scatter.get(x, y)) {
            Some(state) => active.push((thread, state)),
            None => {
                band[ty * derived.width + x] = untouched(diffuse);
                counters.untouched += 1;
            }
        }
    }

    let tile = builder.finish();
    for (thread, state) in active {
        let (tx, ty) = (thread % gw, thread / gw);
        let (x, y) = (origin.0 + tx, origin.1 + ty);
        let local = (tx as i64 + pad, ty as i64 + pad);
        band[ty * derived.width + x] =
            convolve(&state, (x, y), local, &tile, frames, derived, &mut counters);
        counters.scattered += 1;
    }
    counters
}

pub fn render_cpu(frames: &SceneFrames, derived: &Derived) -> (Frame<[f32; 4]>, ScatterCounters) {
    let layout = TileLayout::REFERENCE;
    let width = derived.width;
    let mut pixels = vec![[0.0f32; 4]; width * derived.height];

    let counters = pixels
        .par_chunks_mut(width * layout.group_height())
        .enumerate()
        .map(|(gy, band)| {
            (0..derived.groups_x)
                .map(|gx| dispatch_group(layout, (gx, gy), frames, derived, band))
                .fold(ScatterCounters::default(), ScatterCounters::merge)
        })
        .reduce(ScatterCounters::default, ScatterCounters::merge);

    let output = Frame::from_fn(width, derived.height, |x, y| pixels[y * width + x]);
    (output, counters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packing::{encode_alpha, DISABLED_ALPHA};

    #[test]
    fn empty_accumulator_stays_finite() {
        let acc = Accumulator::default();
        assert_eq!(acc.normalized(), [0.0; 3]);
    }

    #[test]
    fn accumulator_normalizes_per_channel() {
        let mut acc = Accumulator::default();
        acc.add([1.0, 2.0, 0.0], [0.5, 0.5, 0.5]);
        acc.add([1.0, 2.0, 0.0], [1.0, 0.0, 0.25]);
        let out = acc.normalized();
        assert!((out[0] - 0.75).abs() < 1e-5);
        assert!((out[1] - 0.25).abs() < 1e-5);
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn composite_blends_by_strength() {
        assert_eq!(composite([0.2, 0.4, 0.6], [1.0; 3], 0.0), [0.2, 0.4, 0.6, 1.0]);
        assert_eq!(composite([0.2, 0.4, 0.6], [1.0; 3], 1.0), [1.0, 1.0, 1.0, 1.0]);
        let half = composite([0.0; 3], [1.0; 3], 0.5);
        assert!((half[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn untouched_clears_flag() {
        assert_eq!(untouched([0.1, 0.2, 0.3, 0.9]), [0.1, 0.2, 0.3, 0.0]);
    }

    fn flat_scene(width: usize, height: usize, alpha: f32) -> SceneFrames {
        SceneFrames::new(
            Frame::filled(width, height, [0.6, 0.3, 0.2, alpha]),
            Frame::filled(width, height, 0.5),
            Frame::filled(width, height, [3.0, 1.5, 0.75]),
        )
        .unwrap()
    }

    #[test]
    fn uniform_surface_is_a_fixed_point() {
        let frames = flat_scene(40, 24, encode_alpha(1.0, 0.5));
        let derived = Derived::for_test(40, 24, [1.5, 2.0]);
        let (output, counters) = render_cpu(&frames, &derived);
        assert_eq!(counters.scattered, 40 * 24);
        for pixel in output.pixels() {
            assert!((pixel[0] - 0.6).abs() < 1e-3, "{pixel:?}");
            assert!((pixel[1] - 0.3).abs() < 1e-3, "{pixel:?}");
            assert!((pixel[2] - 0.2).abs() < 1e-3, "{pixel:?}");
            assert_eq!(pixel[3], SCATTERED_ALPHA);
        }
    }

    #[test]
    fn partial_groups_cover_the_image() {
        let frames = flat_scene(17, 33, 0.0);
        let derived = Derived::for_test(17, 33, [1.0, 1.0]);
        let (output, counters) = render_cpu(&frames, &derived);
        assert_eq!(counters.untouched, 17 * 33);
        assert_eq!(counters.samples, 0);
        assert!(output.pixels().all(|p| *p == [0.6, 0.3, 0.2, 0.0]));
    }

    #[test]
    fn output_keeps_pixel_positions() {
        let diffuse = Frame::from_fn(19, 35, |x, y| {
            [x as f32 / 19.0, y as f32 / 35.0, 0.5, DISABLED_ALPHA]
        });
        let frames = SceneFrames::new(
            diffuse.clone(),
            Frame::filled(19, 35, 0.5),
            Frame::filled(19, 35, [3.0, 1.5, 0.75]),
        )
        .unwrap();
        let derived = Derived::for_test(19, 35, [1.0, 1.0]);
        let (output, _) = render_cpu(&frames, &derived);
        assert_eq!(output.dimensions(), (19, 35));
        for y in 0..35 {
            for x in 0..19 {
                assert_eq!(output.get(x, y), untouched(diffuse.get(x, y)), "({x}, {y})");
            }
        }
    }
}

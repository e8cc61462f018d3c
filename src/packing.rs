//! Strength/quality packing in the diffuse alpha channel.
//!
//! The alpha of the diffuse buffer carries two factors. A negative alpha marks
//! a pixel with subsurface scattering disabled. Alpha at or above
//! [`SATURATED_ALPHA`] decodes both factors to exactly 1.0, absorbing the
//! quantization error of the encoding. Below that, the tenths digit holds the
//! strength in ninths and the remainder of the tenth holds the quality.

const ALPHA_SCALE: f32 = 10.0;
const FACTOR_LEVELS: f32 = 9.0;
const QUALITY_SPAN: f32 = 0.9;
const DECODE_BIAS: f32 = 1e-3;

/// Packed alpha at or above this decodes to full strength and quality.
pub const SATURATED_ALPHA: f32 = 0.99;

/// Guard added to scatter distances before taking the reciprocal.
pub const SCATTER_EPSILON: f32 = 1e-4;

/// Pixels with a strength below this skip the convolution.
pub const FACTOR_EPSILON: f32 = 1e-3;

/// Alpha written for pixels with subsurface scattering disabled.
pub const DISABLED_ALPHA: f32 = -1.0;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Packed {
    pub strength: f32,
    pub quality: f32,
}

pub fn decode_alpha(alpha: f32) -> Option<Packed> {
    if alpha < 0.0 {
        return None;
    }
    if alpha >= SATURATED_ALPHA {
        return Some(Packed {
            strength: 1.0,
            quality: 1.0,
        });
    }
    let scaled = alpha * ALPHA_SCALE;
    let level = (scaled + DECODE_BIAS).floor();
    Some(Packed {
        strength: (level / FACTOR_LEVELS).clamp(0.0, 1.0),
        quality: ((scaled - level) / QUALITY_SPAN).clamp(0.0, 1.0),
    })
}

pub fn encode_alpha(strength: f32, quality: f32) -> f32 {
    let level = (strength.clamp(0.0, 1.0) * FACTOR_LEVELS).round();
    (level + quality.clamp(0.0, 1.0) * QUALITY_SPAN) / ALPHA_SCALE
}

/// Everything a thread derives about its own pixel before touching the tile.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PixelState {
    pub diffuse: [f32; 3],
    pub strength: f32,
    pub quality: f32,
    pub linear_depth: f32,
    /// Per-channel inverse scatter distance `S = 1 / d` in 1/mm.
    pub shape: [f32; 3],
}

impl PixelState {
    /// Returns `None` when the pixel takes the early-exit path.
    pub fn derive(diffuse: [f32; 4], linear_depth: f32, scatter_mm: [f32; 3]) -> Option<Self> {
        let packed = decode_alpha(diffuse[3])?;
        if packed.strength < FACTOR_EPSILON || linear_depth <= 0.0 {
            return None;
        }
        Some(Self {
            diffuse: [diffuse[0], diffuse[1], diffuse[2]],
            strength: packed.strength,
            quality: packed.quality,
            linear_depth,
            shape: scatter_mm.map(|d| 1.0 / (d.max(0.0) + SCATTER_EPSILON)),
        })
    }

    /// Smallest shape parameter, i.e. the widest channel's profile.
    pub fn min_shape(&self) -> f32 {
        self.shape[0].min(self.shape[1]).min(self.shape[2])
    }

    /// Largest scatter distance in millimetres.
    pub fn max_scatter_mm(&self) -> f32 {
        1.0 / self.min_shape()
    }
}

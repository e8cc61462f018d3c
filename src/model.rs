use crate::budget::MM_PER_METER;
use crate::params::{Params, Projection};

/// Threads per work-group along each axis.
pub const GROUP_DIM: usize = 16;

/// Constants shared by every invocation of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub width: usize,
    pub height: usize,
    /// Diagonal entries `(m00, m11)` of the projection matrix.
    pub proj_scale: [f32; 2],
    /// Converts linear depth samples to millimetres.
    pub depth_to_mm: f32,
    pub max_samples: u32,
    pub groups_x: usize,
    pub groups_y: usize,
}

/// Dispatch-independent knobs for [`crate::render_frames`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatterSettings {
    pub projection: Projection,
    pub max_samples: u32,
}

impl Default for ScatterSettings {
    fn default() -> Self {
        Self {
            projection: Projection::Fov(60.0),
            max_samples: 200,
        }
    }
}

impl From<&Params> for ScatterSettings {
    fn from(params: &Params) -> Self {
        Self {
            projection: params.projection,
            max_samples: params.max_samples,
        }
    }
}

pub fn derive_common(settings: &ScatterSettings, size: (usize, usize)) -> Result<Derived, String> {
    let (width, height) = size;
    if width == 0 || height == 0 {
        return Err("input image is empty after ROI".into());
    }
    if u32::try_from(width).is_err() || u32::try_from(height).is_err() {
        return Err(format!("input size {width}x{height} is too large"));
    }
    let proj_scale = resolve_projection(settings.projection, width, height)?;
    Ok(Derived {
        width,
        height,
        proj_scale,
        depth_to_mm: MM_PER_METER,
        max_samples: settings.max_samples.max(1),
        groups_x: width.div_ceil(GROUP_DIM),
        groups_y: height.div_ceil(GROUP_DIM),
    })
}

fn resolve_projection(projection: Projection, width: usize, height: usize) -> Result<[f32; 2], String> {
    let scale = match projection {
        Projection::Fov(degrees) => {
            if !(degrees > 0.0 && degrees < 180.0) {
                return Err(format!("field of view {degrees} is out of range"));
            }
            let half = (degrees.to_radians() * 0.5).tan();
            if !(half.is_finite() && half > 0.0) {
                return Err(format!("field of view {degrees} is out of range"));
            }
            let proj_y = 1.0 / half;
            [proj_y * height as f32 / width as f32, proj_y]
        }
        Projection::Matrix(x, y) => [x, y],
    };
    if scale.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
        return Err("projection scale must be positive and finite".into());
    }
    Ok(scale)
}

#[cfg(test)]
impl Derived {
    pub fn for_test(width: usize, height: usize, proj_scale: [f32; 2]) -> Self {
        derive_common(
            &ScatterSettings {
                projection: Projection::Matrix(proj_scale[0], proj_scale[1]),
                max_samples: 200,
            },
            (width, height),
        )
        .expect("valid test dimensions")
    }
}

use std::fs;
use std::time::Instant;

use log::{debug, info};
use thiserror::Error;

use color::{load_scene, save_output};
use kernel::render_cpu;
use model::{derive_common, Derived};

pub mod params;

pub mod budget;
mod color;
pub mod frame;
pub mod kernel;
pub mod model;
pub mod packing;
pub mod profile;
pub mod sampling;
pub mod tile;
pub mod wgpu;

pub use color::{depth_frame, diffuse_frame, repack_alpha, scatter_frame};
pub use frame::{Frame, SceneFrames, Texel};
pub use kernel::ScatterCounters;
pub use model::{ScatterSettings, GROUP_DIM};
pub use params::{
    build_params, CliArgs, Device, Params, ParamsBuilder, ParamsError, ParamsResult, Projection,
    Roi, ScatterSource,
};

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("parameter error: {0}")]
    Params(#[from] ParamsError),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("gpu error: {0}")]
    Gpu(String),
    #[error("{0}")]
    Message(String),
}

#[derive(Debug)]
pub struct RenderStats {
    pub device: Device,
    pub size: (usize, usize),
    pub groups: (usize, usize),
    pub proj_scale: [f32; 2],
    pub max_samples: u32,
    /// Per-pixel counts; `None` for dry runs and the GPU backend.
    pub counters: Option<ScatterCounters>,
}

impl RenderStats {
    pub fn mean_samples(&self) -> Option<f64> {
        let counters = self.counters?;
        (counters.scattered > 0).then(|| counters.samples as f64 / counters.scattered as f64)
    }

    /// One-line summary of the per-pixel counters for `--explain`.
    pub fn counters_line(&self) -> String {
        match self.counters {
            Some(counters) => format!(
                "scattered {} / untouched {} pixels, mean {:.1} samples, {} tile / {} direct fetches",
                counters.scattered,
                counters.untouched,
                self.mean_samples().unwrap_or(0.0),
                counters.tile_fetches,
                counters.direct_fetches
            ),
            None if self.device == Device::Gpu => {
                "per-pixel statistics are not collected by the GPU backend".to_owned()
            }
            None => "no per-pixel statistics were collected".to_owned(),
        }
    }
}

pub fn render(params: &Params) -> RenderResult<RenderStats> {
    let (frame, stats) = render_to_frame(params)?;

    if let Some(parent) = params.output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let format = resolve_format(params)?;
    save_output(&frame, &params.output_path, format)?;
    info!("wrote {}", params.output_path.display());

    Ok(stats)
}

pub fn render_to_frame(params: &Params) -> RenderResult<(Frame<[f32; 4]>, RenderStats)> {
    let frames = load_scene(params)?;
    render_frames(&frames, &ScatterSettings::from(params), params.device)
}

/// Runs the subsurface scattering pass over already loaded inputs.
pub fn render_frames(
    frames: &SceneFrames,
    settings: &ScatterSettings,
    device: Device,
) -> RenderResult<(Frame<[f32; 4]>, RenderStats)> {
    let derived = derive_for_frames(frames, settings)?;
    info!(
        "dispatching {}x{} work-groups over {}x{} pixels on {:?}",
        derived.groups_x, derived.groups_y, derived.width, derived.height, device
    );
    let start = Instant::now();
    let (output, counters) = match device {
        Device::Cpu => {
            let (output, counters) = render_cpu(frames, &derived);
            (output, Some(counters))
        }
        Device::Gpu => {
            let ctx = wgpu::context()?;
            (wgpu::render_gpu(ctx, frames, &derived)?, None)
        }
    };
    debug!("subsurface pass took {:.2?}", start.elapsed());
    Ok((output, make_stats(device, &derived, counters)))
}

pub fn dry_run(params: &Params) -> RenderResult<RenderStats> {
    let frames = load_scene(params)?;
    let derived = derive_for_frames(&frames, &ScatterSettings::from(params))?;
    resolve_format(params)?;
    Ok(make_stats(params.device, &derived, None))
}

fn derive_for_frames(frames: &SceneFrames, settings: &ScatterSettings) -> RenderResult<Derived> {
    derive_common(settings, frames.dimensions()).map_err(RenderError::Message)
}

fn resolve_format(params: &Params) -> RenderResult<image::ImageFormat> {
    if let Some(token) = params.output_format.as_deref() {
        parse_format_token(token)
    } else if let Some(ext) = params.output_path.extension() {
        parse_format_token(ext.to_string_lossy().as_ref())
    } else {
        Ok(image::ImageFormat::Png)
    }
}

fn parse_format_token(token: &str) -> RenderResult<image::ImageFormat> {
    let trimmed = token.trim().trim_start_matches('.');
    image::ImageFormat::from_extension(trimmed).ok_or_else(|| {
        RenderError::Message(format!("unsupported or unknown image format '{trimmed}'"))
    })
}

fn make_stats(device: Device, derived: &Derived, counters: Option<ScatterCounters>) -> RenderStats {
    RenderStats {
        device,
        size: (derived.width, derived.height),
        groups: (derived.groups_x, derived.groups_y),
        proj_scale: derived.proj_scale,
        max_samples: derived.max_samples,
        counters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(device: Device, counters: Option<ScatterCounters>) -> RenderStats {
        RenderStats {
            device,
            size: (4, 4),
            groups: (1, 1),
            proj_scale: [1.0, 1.0],
            max_samples: 200,
            counters,
        }
    }

    #[test]
    fn gpu_stats_explain_missing_counters() {
        let line = stats(Device::Gpu, None).counters_line();
        assert!(line.contains("GPU backend"), "{line}");
    }

    #[test]
    fn cpu_stats_report_counters() {
        let counters = ScatterCounters {
            scattered: 4,
            untouched: 12,
            samples: 100,
            tile_fetches: 90,
            direct_fetches: 10,
        };
        let line = stats(Device::Cpu, Some(counters)).counters_line();
        assert!(line.starts_with("scattered 4 / untouched 12 pixels, mean 25.0 samples"), "{line}");
        assert!(line.ends_with("90 tile / 10 direct fetches"), "{line}");
    }

    #[test]
    fn format_tokens() {
        assert_eq!(parse_format_token(".exr").unwrap(), image::ImageFormat::OpenExr);
        assert_eq!(parse_format_token("PNG").unwrap(), image::ImageFormat::Png);
        assert!(parse_format_token("nope").is_err());
    }
}

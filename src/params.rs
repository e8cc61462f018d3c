use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Device {
    Cpu,
    Gpu,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Roi {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

/// Camera projection scale, either from a vertical field of view in degrees
/// or as the diagonal entries of the projection matrix.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Projection {
    Fov(f32),
    Matrix(f32, f32),
}

/// Where per-pixel scatter distances come from.
#[derive(Clone, Debug, PartialEq)]
pub enum ScatterSource {
    Image { path: PathBuf, scale: f32 },
    Uniform([f32; 3]),
}

#[derive(Debug, Clone)]
pub struct Params {
    pub diffuse_path: PathBuf,
    pub depth_path: PathBuf,
    pub scatter: ScatterSource,
    pub output_path: PathBuf,
    pub depth_scale: f32,
    pub projection: Projection,
    pub max_samples: u32,
    pub strength: Option<f32>,
    pub quality: Option<f32>,
    pub roi: Option<Roi>,
    pub dry_run: bool,
    pub explain: bool,
    pub device: Device,
    pub output_format: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParamsBuilder {
    pub diffuse_path: PathBuf,
    pub depth_path: PathBuf,
    pub scatter: ScatterSource,
    pub output_path: PathBuf,
    pub depth_scale: f32,
    pub projection: Projection,
    pub max_samples: u32,
    pub strength: Option<f32>,
    pub quality: Option<f32>,
    pub roi: Option<Roi>,
    pub dry_run: bool,
    pub explain: bool,
    pub device: Device,
    pub output_format: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub diffuse_path: PathBuf,
    pub depth_path: PathBuf,
    pub scatter_path: Option<PathBuf>,
    pub scatter_scale: f64,
    pub scatter_distance: Option<String>,
    pub output_path: PathBuf,
    pub depth_scale: f64,
    pub projection: String,
    pub max_samples: u32,
    pub strength: Option<f64>,
    pub quality: Option<f64>,
    pub roi: Option<String>,
    pub dry_run: bool,
    pub explain: bool,
    pub device: Device,
    pub output_format: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParamsError {
    pub field: &'static str,
    pub message: String,
}

impl ParamsError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub type ParamsResult<T> = Result<T, ParamsError>;

impl fmt::Display for ParamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ParamsError {}

impl ParamsBuilder {
    pub fn new(diffuse_path: PathBuf, depth_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            diffuse_path,
            depth_path,
            scatter: ScatterSource::Uniform(DEFAULT_SCATTER_MM),
            output_path,
            depth_scale: 1.0,
            projection: DEFAULT_PROJECTION,
            max_samples: DEFAULT_MAX_SAMPLES,
            strength: None,
            quality: None,
            roi: None,
            dry_run: false,
            explain: false,
            device: Device::Cpu,
            output_format: None,
        }
    }

    pub fn build(self) -> ParamsResult<Params> {
        let depth_scale = ensure_positive(self.depth_scale, "depth-scale")?;
        let scatter = ensure_scatter(self.scatter)?;
        let projection = ensure_projection(self.projection)?;
        let max_samples = ensure_max_samples(self.max_samples)?;
        let strength = ensure_unit(self.strength, "strength")?;
        let quality = ensure_unit(self.quality, "quality")?;
        let roi = ensure_roi(self.roi)?;

        Ok(Params {
            diffuse_path: self.diffuse_path,
            depth_path: self.depth_path,
            scatter,
            output_path: self.output_path,
            depth_scale,
            projection,
            max_samples,
            strength,
            quality,
            roi,
            dry_run: self.dry_run,
            explain: self.explain,
            device: self.device,
            output_format: self.output_format,
        })
    }
}

impl TryFrom<CliArgs> for ParamsBuilder {
    type Error = ParamsError;

    fn try_from(args: CliArgs) -> ParamsResult<Self> {
        let depth_scale = to_positive_f32(args.depth_scale, "depth-scale")?;
        let scatter = match (args.scatter_path, args.scatter_distance.as_deref()) {
            (Some(_), Some(_)) => {
                return Err(ParamsError::new(
                    "scatter",
                    "give either a scatter image or --scatter-distance, not both",
                ));
            }
            (Some(path), None) => ScatterSource::Image {
                path,
                scale: to_positive_f32(args.scatter_scale, "scatter-scale")?,
            },
            (None, Some(text)) => ScatterSource::Uniform(parse_rgb(text, "scatter-distance")?),
            (None, None) => ScatterSource::Uniform(DEFAULT_SCATTER_MM),
        };
        let projection = parse_projection(&args.projection)?;
        let strength = args
            .strength
            .map(|v| to_unit_f32(v, "strength"))
            .transpose()?;
        let quality = args
            .quality
            .map(|v| to_unit_f32(v, "quality"))
            .transpose()?;
        let roi = parse_roi(args.roi.as_deref())?;

        Ok(Self {
            diffuse_path: args.diffuse_path,
            depth_path: args.depth_path,
            scatter,
            output_path: args.output_path,
            depth_scale,
            projection,
            max_samples: args.max_samples,
            strength,
            quality,
            roi,
            dry_run: args.dry_run,
            explain: args.explain,
            device: args.device,
            output_format: args.output_format,
        })
    }
}

pub fn build_params(args: CliArgs) -> ParamsResult<Params> {
    ParamsBuilder::try_from(args)?.build()
}

pub const DEFAULT_MAX_SAMPLES: u32 = 200;
pub const DEFAULT_PROJECTION: Projection = Projection::Fov(60.0);
pub const DEFAULT_SCATTER_MM: [f32; 3] = [3.67, 1.37, 0.68];
const MAX_SAMPLE_BUDGET: u32 = 4096;

fn ensure_positive(value: f32, field: &'static str) -> ParamsResult<f32> {
    if !value.is_finite() {
        return Err(ParamsError::new(field, "value must be finite"));
    }
    if value <= 0.0 {
        return Err(ParamsError::new(field, "value must be greater than 0"));
    }
    Ok(value)
}

fn ensure_non_negative(value: f32, field: &'static str) -> ParamsResult<f32> {
    if !value.is_finite() {
        return Err(ParamsError::new(field, "value must be finite"));
    }
    if value < 0.0 {
        return Err(ParamsError::new(field, "value must be >= 0"));
    }
    Ok(value)
}

fn ensure_unit(value: Option<f32>, field: &'static str) -> ParamsResult<Option<f32>> {
    match value {
        Some(v) => {
            let v = ensure_non_negative(v, field)?;
            if v > 1.0 {
                return Err(ParamsError::new(field, "value must lie in [0,1]"));
            }
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

fn ensure_scatter(scatter: ScatterSource) -> ParamsResult<ScatterSource> {
    match scatter {
        ScatterSource::Image { path, scale } => Ok(ScatterSource::Image {
            path,
            scale: ensure_positive(scale, "scatter-scale")?,
        }),
        ScatterSource::Uniform(rgb) => {
            for value in rgb {
                ensure_non_negative(value, "scatter-distance")?;
            }
            Ok(ScatterSource::Uniform(rgb))
        }
    }
}

fn ensure_projection(projection: Projection) -> ParamsResult<Projection> {
    match projection {
        Projection::Fov(degrees) => {
            if !degrees.is_finite() || degrees <= 0.0 || degrees >= 180.0 {
                return Err(ParamsError::new(
                    "projection",
                    "field of view must lie in the open interval (0,180) degrees",
                ));
            }
            Ok(projection)
        }
        Projection::Matrix(x, y) => {
            ensure_positive(x, "projection")?;
            ensure_positive(y, "projection")?;
            Ok(projection)
        }
    }
}

fn ensure_max_samples(value: u32) -> ParamsResult<u32> {
    if value == 0 {
        return Err(ParamsError::new("max-samples", "sample budget must be >= 1"));
    }
    if value > MAX_SAMPLE_BUDGET {
        return Err(ParamsError::new(
            "max-samples",
            format!("sample budget must be <= {MAX_SAMPLE_BUDGET}"),
        ));
    }
    Ok(value)
}

fn ensure_roi(roi: Option<Roi>) -> ParamsResult<Option<Roi>> {
    if let Some(r) = roi {
        if r.x1 <= r.x0 || r.y1 <= r.y0 {
            return Err(ParamsError::new(
                "roi",
                "roi end must be greater than start (exclusive bounds)",
            ));
        }
        Ok(Some(r))
    } else {
        Ok(None)
    }
}

fn to_f32(value: f64, field: &'static str) -> ParamsResult<f32> {
    if !value.is_finite() {
        return Err(ParamsError::new(field, "value must be finite"));
    }
    if value.abs() > f32::MAX as f64 {
        return Err(ParamsError::new(
            field,
            "value is too large for single precision",
        ));
    }
    Ok(value as f32)
}

fn to_positive_f32(value: f64, field: &'static str) -> ParamsResult<f32> {
    ensure_positive(to_f32(value, field)?, field)
}

fn to_unit_f32(value: f64, field: &'static str) -> ParamsResult<f32> {
    let value = to_f32(value, field)?;
    ensure_unit(Some(value), field).map(|v| v.unwrap_or(value))
}

fn parse_projection(value: &str) -> ParamsResult<Projection> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(DEFAULT_PROJECTION);
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("fov") {
        let tail = trimmed[3..].trim();
        let tail = tail.trim_start_matches(['=', ':']).trim();
        if tail.is_empty() {
            return Ok(DEFAULT_PROJECTION);
        }
        let degrees: f32 = tail.parse().map_err(|_| {
            ParamsError::new("projection", "expected a field of view in degrees")
        })?;
        return ensure_projection(Projection::Fov(degrees));
    }
    let (x, y) = parse_f32_pair(trimmed, "projection")?;
    ensure_projection(Projection::Matrix(x, y))
}

fn parse_f32_pair(raw: &str, field: &'static str) -> ParamsResult<(f32, f32)> {
    let mut parts = raw.split(',');
    let first = parts
        .next()
        .ok_or_else(|| ParamsError::new(field, "expected two comma-separated numbers"))?;
    let second = parts
        .next()
        .ok_or_else(|| ParamsError::new(field, "expected two comma-separated numbers"))?;
    if parts.next().is_some() {
        return Err(ParamsError::new(field, "too many commas"));
    }
    Ok((parse_f32(first, field)?, parse_f32(second, field)?))
}

fn parse_rgb(raw: &str, field: &'static str) -> ParamsResult<[f32; 3]> {
    let values = raw
        .split(',')
        .map(|part| parse_f32(part, field))
        .collect::<ParamsResult<Vec<f32>>>()?;
    match values.as_slice() {
        [v] => Ok([*v; 3]),
        [r, g, b] => Ok([*r, *g, *b]),
        _ => Err(ParamsError::new(field, "expected R,G,B or a single value")),
    }
}

fn parse_f32(raw: &str, field: &'static str) -> ParamsResult<f32> {
    raw.trim()
        .parse()
        .map_err(|_| ParamsError::new(field, "expected a number"))
}

fn parse_roi(raw: Option<&str>) -> ParamsResult<Option<Roi>> {
    let Some(text) = raw else {
        return Ok(None);
    };
    let mut parts = text.split(':');
    let start = parts
        .next()
        .ok_or_else(|| ParamsError::new("roi", "expected X0,Y0:X1,Y1"))?;
    let end = parts
        .next()
        .ok_or_else(|| ParamsError::new("roi", "expected X0,Y0:X1,Y1"))?;
    if parts.next().is_some() {
        return Err(ParamsError::new("roi", "unexpected extra ':'"));
    }
    let (x0, y0) = parse_pair(start, "roi")?;
    let (x1, y1) = parse_pair(end, "roi")?;
    ensure_roi(Some(Roi { x0, y0, x1, y1 }))
}

fn parse_pair(raw: &str, field: &'static str) -> ParamsResult<(u32, u32)> {
    let mut parts = raw.split(',');
    let first = parts
        .next()
        .ok_or_else(|| ParamsError::new(field, "expected two comma-separated integers"))?;
    let second = parts
        .next()
        .ok_or_else(|| ParamsError::new(field, "expected two comma-separated integers"))?;
    if parts.next().is_some() {
        return Err(ParamsError::new(field, "too many commas"));
    }
    let a = parse_u32(first, field)?;
    let b = parse_u32(second, field)?;
    Ok((a, b))
}

fn parse_u32(raw: &str, field: &'static str) -> ParamsResult<u32> {
    raw.trim()
        .parse()
        .map_err(|_| ParamsError::new(field, "expected an unsigned integer without suffixes"))
}

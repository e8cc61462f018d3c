use clap::Parser;
use std::path::{Path, PathBuf};

use sss_diffusion::{CliArgs, Device, RenderStats};

fn main() {
    env_logger::init();
    let args = Cli::parse();
    handle_render(args);
}

fn handle_render(args: Cli) {
    if args.scatter.is_none() && args.scatter_scale != 1.0 {
        eprintln!("warning: --scatter-scale is ignored without a scatter image");
    }

    let cli_args = CliArgs {
        diffuse_path: args.diffuse.clone(),
        depth_path: args.depth.clone(),
        scatter_path: args.scatter.clone(),
        scatter_scale: args.scatter_scale,
        scatter_distance: args.scatter_distance.clone(),
        output_path: args.output.clone(),
        depth_scale: args.depth_scale,
        projection: args.projection.clone(),
        max_samples: args.max_samples,
        strength: args.strength,
        quality: args.quality,
        roi: args.roi.clone(),
        dry_run: args.dry_run,
        explain: args.explain,
        device: args.device,
        output_format: args.format.clone(),
    };

    let params = match sss_diffusion::build_params(cli_args) {
        Ok(params) => params,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    };

    if params.dry_run {
        match sss_diffusion::dry_run(&params) {
            Ok(stats) => {
                println!("{:#?}", params);
                print_stats(&stats, params.explain, true, &params.output_path);
            }
            Err(err) => {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        }
        return;
    }

    match sss_diffusion::render(&params) {
        Ok(stats) => {
            print_stats(&stats, params.explain, false, &params.output_path);
        }
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "sssblur",
    bin_name = "sssblur",
    version,
    about = "Screen-space subsurface scattering with Burley's normalized diffusion.",
    arg_required_else_help = true
)]
struct Cli {
    /// Diffuse lighting image (RGBA; alpha carries packed strength and quality)
    #[arg(value_name = "DIFFUSE", help_heading = "REQUIRED")]
    diffuse: PathBuf,

    /// Linear depth image (single channel)
    #[arg(value_name = "DEPTH", help_heading = "REQUIRED")]
    depth: PathBuf,

    /// Output path
    #[arg(
        short,
        long,
        value_name = "OUTPUT",
        required = true,
        help_heading = "REQUIRED"
    )]
    output: PathBuf,

    #[arg(
        long,
        value_name = "SCATTER",
        help_heading = "INPUTS",
        help = "Per-pixel scatter distance image (RGB, millimetres)"
    )]
    scatter: Option<PathBuf>,

    #[arg(
        long = "scatter-distance",
        value_name = "R,G,B",
        help_heading = "INPUTS",
        help = "Uniform scatter distance in millimetres when no scatter image is given [default: 3.67,1.37,0.68]"
    )]
    scatter_distance: Option<String>,

    #[arg(
        long = "scatter-scale",
        value_name = "MM",
        default_value = "1.0",
        value_parser = parse_positive_f64,
        help_heading = "INPUTS",
        help = "Millimetres per unit stored in the scatter image"
    )]
    scatter_scale: f64,

    #[arg(
        long = "depth-scale",
        value_name = "M",
        default_value = "1.0",
        value_parser = parse_positive_f64,
        help_heading = "INPUTS",
        help = "Meters per unit stored in the depth image"
    )]
    depth_scale: f64,

    #[arg(
        long,
        value_name = "P",
        default_value = "fov 60",
        help_heading = "CAMERA",
        help = "'fov DEG' (vertical) or 'PX,PY' projection matrix diagonal"
    )]
    projection: String,

    #[arg(
        long = "max-samples",
        value_name = "N",
        default_value = "200",
        value_parser = parse_samples,
        help_heading = "QUALITY",
        help = "Sample budget per pixel before quality and footprint scaling"
    )]
    max_samples: u32,

    #[arg(
        long,
        value_name = "F",
        value_parser = parse_unit_f64,
        help_heading = "QUALITY",
        help = "Override packed strength of every enabled pixel (0..=1)"
    )]
    strength: Option<f64>,

    #[arg(
        long,
        value_name = "Q",
        value_parser = parse_unit_f64,
        help_heading = "QUALITY",
        help = "Override packed quality of every enabled pixel (0..=1)"
    )]
    quality: Option<f64>,

    #[arg(
        long,
        value_name = "DEVICE",
        value_enum,
        default_value_t = Device::Cpu,
        help_heading = "DEVICE",
        help = "'cpu' | 'gpu'"
    )]
    device: Device,

    #[arg(
        long,
        value_name = "X0,Y0:X1,Y1",
        help_heading = "ROI & OUTPUT",
        help = "Crop region applied to every input"
    )]
    roi: Option<String>,

    #[arg(
        long,
        value_name = "EXT",
        help_heading = "ROI & OUTPUT",
        help = "Force output format by extension (exr/png/tif) [default: from path]"
    )]
    format: Option<String>,

    #[arg(
        long,
        help_heading = "I/O",
        help = "Validate inputs and print derived parameters; no rendering"
    )]
    dry_run: bool,

    #[arg(
        long,
        help_heading = "I/O",
        help = "Print per-pixel sample and fetch statistics"
    )]
    explain: bool,
}

fn print_stats(stats: &RenderStats, explain: bool, dry_run: bool, output: &Path) {
    if dry_run {
        println!(
            "dry-run: {}x{} pixels in {}x{} work-groups on {:?}, budget {} samples",
            stats.size.0,
            stats.size.1,
            stats.groups.0,
            stats.groups.1,
            stats.device,
            stats.max_samples
        );
    } else {
        println!(
            "rendered on {:?} → {} ({}x{})",
            stats.device,
            output.display(),
            stats.size.0,
            stats.size.1
        );
    }
    if explain {
        println!(
            "projection scale {:.3},{:.3}, budget {} samples",
            stats.proj_scale[0], stats.proj_scale[1], stats.max_samples
        );
        if !dry_run {
            println!("{}", stats.counters_line());
        }
    }
}

fn parse_positive_f64(arg: &str) -> Result<f64, String> {
    let value: f64 = arg
        .parse()
        .map_err(|err| format!("invalid number: {err}"))?;
    if value <= 0.0 {
        Err("value must be greater than 0".into())
    } else {
        Ok(value)
    }
}

fn parse_unit_f64(arg: &str) -> Result<f64, String> {
    let value: f64 = arg
        .parse()
        .map_err(|err| format!("invalid number: {err}"))?;
    if !(0.0..=1.0).contains(&value) {
        Err("value must lie in [0,1]".into())
    } else {
        Ok(value)
    }
}

fn parse_samples(arg: &str) -> Result<u32, String> {
    let value: u32 = arg
        .parse()
        .map_err(|err| format!("invalid integer: {err}"))?;
    if value < 1 {
        Err("samples must be >= 1".into())
    } else {
        Ok(value)
    }
}

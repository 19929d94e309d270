use std::path::PathBuf;

use clap::Parser;
use compositor::TintColor;

#[derive(Parser, Debug)]
#[command(
    name = "forgeview",
    author,
    version,
    about = "Tinted image viewer and generation progress host"
)]
pub struct Cli {
    /// Source image to display; omit to synthesise one with the stand-in
    /// generation engine.
    #[arg(value_name = "IMAGE")]
    pub image: Option<PathBuf>,

    /// Tint color as hex (`#rrggbb` or `#rgb`).
    #[arg(long, value_name = "HEX", value_parser = parse_tint)]
    pub tint: Option<TintColor>,

    /// Tint blend factor in [0,1]; 0 shows the source unmodified.
    #[arg(long, value_name = "VALUE")]
    pub intensity: Option<f32>,

    /// Number of generation steps for the stand-in engine.
    #[arg(long, value_name = "STEPS")]
    pub steps: Option<u32>,

    /// Seed the stand-in engine derives its image from.
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Generated image size (e.g. `512x512`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<(u32, u32)>,

    /// Where the presented frame is written.
    #[arg(long, value_name = "PATH", default_value = "forgeview.png")]
    pub output: PathBuf,

    /// Progress output: `human` (log lines) or `json` (one object per step).
    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "human",
        value_parser = parse_progress_format
    )]
    pub progress: ProgressFormat,

    /// Optional TOML session config; CLI flags override its values.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressFormat {
    Human,
    Json,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn parse_tint(value: &str) -> Result<TintColor, String> {
    TintColor::try_from_hex(value)
        .ok_or_else(|| format!("'{value}' is not a hex color (expected #rrggbb or #rgb)"))
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("'{value}' is not a size (expected WIDTHxHEIGHT)"))?;
    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| format!("'{width}' is not a valid width"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| format!("'{height}' is not a valid height"))?;
    if width == 0 || height == 0 {
        return Err(format!("size {width}x{height} must be non-zero"));
    }
    Ok((width, height))
}

fn parse_progress_format(value: &str) -> Result<ProgressFormat, String> {
    match value.to_ascii_lowercase().as_str() {
        "human" => Ok(ProgressFormat::Human),
        "json" => Ok(ProgressFormat::Json),
        other => Err(format!("unknown progress format '{other}' (expected human or json)")),
    }
}

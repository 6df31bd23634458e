use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use passconfig::{parse_duration, parse_size, DecodeErrorPolicy, SurfaceSize};

#[derive(Parser, Debug)]
#[command(
    name = "scenepass",
    author,
    version,
    about = "Procedural scene rendered at reduced resolution, finished by a film pass",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Configuration file; overrides `SCENEPASS_CONFIG` and the user config directory.
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Offscreen resolution as a fraction of the display width (e.g. `0.5`).
    #[arg(long, value_name = "SCALE", value_parser = parse_scale)]
    pub scale: Option<f32>,

    /// Fixed offscreen aspect ratio: a number, `W:H`, or `pi`.
    #[arg(long, value_name = "RATIO", value_parser = parse_aspect)]
    pub aspect: Option<f32>,

    /// Open a decorated window instead of borderless fullscreen.
    #[arg(long)]
    pub windowed: bool,

    /// Window size, also used when the monitor size cannot be queried.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<SurfaceSize>,

    /// Wait for vertical sync when presenting.
    #[arg(long)]
    pub vsync: bool,

    /// Seed for the per-frame random value.
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Close automatically after this long (seconds or e.g. `30s`, `2m`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub exit_after: Option<Duration>,

    /// Behaviour when the noise texture cannot be decoded: `fail` or `fallback`.
    #[arg(long, value_name = "POLICY", value_parser = parse_noise_policy)]
    pub noise_policy: Option<DecodeErrorPolicy>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile and link every program without opening a window.
    Check,
    /// Print the resolved configuration and asset locations.
    Where,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_scale(value: &str) -> Result<f32, String> {
    let scale: f32 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid scale '{value}'; expected a number such as 0.5"))?;
    if !scale.is_finite() || scale <= 0.0 || scale > 4.0 {
        return Err(format!("scale {scale} is out of range (0, 4]"));
    }
    Ok(scale)
}

pub fn parse_aspect(value: &str) -> Result<f32, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("aspect ratio must not be empty".to_string());
    }

    let ratio = match trimmed.to_ascii_lowercase().as_str() {
        "pi" | "π" => std::f32::consts::PI,
        normalized => match normalized.split_once(':') {
            Some((w, h)) => {
                let width = w
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| format!("invalid aspect width in '{trimmed}'"))?;
                let height = h
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| format!("invalid aspect height in '{trimmed}'"))?;
                if height == 0.0 {
                    return Err(format!("aspect '{trimmed}' has a zero height"));
                }
                width / height
            }
            None => normalized
                .parse::<f32>()
                .map_err(|_| format!("invalid aspect ratio '{trimmed}'"))?,
        },
    };

    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(format!("aspect ratio must be positive, got {ratio}"));
    }
    Ok(ratio)
}

pub fn parse_noise_policy(value: &str) -> Result<DecodeErrorPolicy, String> {
    value.parse()
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use renderer::{check_pipeline, Renderer, UniformName};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::bindings::{self, LoadedConfig};
use crate::cli::RunArgs;
use crate::paths::AppPaths;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load(args: &RunArgs) -> Result<(AppPaths, LoadedConfig)> {
    let paths = AppPaths::discover();
    let mut loaded = bindings::load_config(&paths, args.config.as_deref())?;
    bindings::apply_overrides(&mut loaded.config, args);
    loaded
        .config
        .validate()
        .context("configuration is invalid after applying command-line overrides")?;
    Ok((paths, loaded))
}

pub fn run(args: RunArgs) -> Result<()> {
    let (paths, loaded) = load(&args)?;
    let renderer_config = bindings::renderer_config(&loaded.config, paths.assets_dir())?;
    tracing::info!(
        config = %bindings::describe_origin(&loaded),
        passes = renderer_config.pipeline.passes.len(),
        scale = renderer_config.offscreen.scale,
        aspect = ?renderer_config.offscreen.aspect,
        vsync = renderer_config.vsync,
        "bootstrapping scenepass"
    );

    let renderer = Renderer::new(renderer_config).context("invalid pass pipeline")?;
    renderer.run().context("renderer stopped with a fatal error")
}

/// Compiles and links every program offline and prints the uniform slot
/// table of each.
pub fn check(args: RunArgs) -> Result<()> {
    let (_, loaded) = load(&args)?;
    let pipeline = bindings::pipeline_from_config(&loaded.config)?;
    let programs = check_pipeline(&pipeline).context("pipeline failed to compile")?;

    println!("Configuration: {}", bindings::describe_origin(&loaded));
    for (pass, program) in pipeline.passes.iter().zip(&programs) {
        println!(
            "Pass '{}' -> {} (channels {}, {})",
            pass.name, pass.target, pass.channels[0], pass.channels[1]
        );
        for name in UniformName::ALL {
            println!("  {:<12} {}", name.glsl_name(), program.slots.get(name));
        }
    }
    println!("{} program(s) compiled and linked.", programs.len());
    Ok(())
}

#[derive(Debug, Serialize)]
struct LocationReport {
    config_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    config_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_config_file: Option<PathBuf>,
    assets_dir: PathBuf,
}

pub fn print_locations(args: RunArgs) -> Result<()> {
    let (paths, loaded) = load(&args)?;
    let report = LocationReport {
        config_source: bindings::describe_origin(&loaded),
        config_dir: paths.config_dir().map(PathBuf::from),
        user_config_file: paths.user_config_file(),
        assets_dir: paths.assets_dir().to_path_buf(),
    };

    let locations =
        toml::to_string_pretty(&report).context("failed to render location report")?;
    let effective =
        toml::to_string_pretty(&loaded.config).context("failed to render configuration")?;
    println!("# Locations\n{locations}");
    println!("# Effective configuration\n{effective}");
    Ok(())
}

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use passconfig::{DecodeErrorPolicy, PassEntry, PassTargetSetting, SceneConfig};
use renderer::{
    NoiseDecodePolicy, OffscreenScale, PassDescription, PassTarget, PipelineDescription,
    ProgramSource, RendererConfig, TextureUnit, WindowMode,
};

use crate::cli::RunArgs;
use crate::paths::{AppPaths, ConfigLocation, ConfigOrigin};

/// Window size used when neither the config nor the monitor provides one.
pub const FALLBACK_SURFACE_SIZE: (u32, u32) = (1024, 640);

#[derive(Debug)]
pub struct LoadedConfig {
    pub location: ConfigLocation,
    pub config: SceneConfig,
}

pub fn load_config(paths: &AppPaths, flag: Option<&Path>) -> Result<LoadedConfig> {
    let location = paths.locate_config(flag);
    let mut config = match &location.path {
        Some(path) => SceneConfig::from_path(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => SceneConfig::default(),
    };
    fill_defaults(&mut config, paths.assets_dir());
    tracing::debug!(
        origin = %location.origin,
        path = ?location.path,
        passes = config.passes.len(),
        "resolved configuration"
    );
    Ok(LoadedConfig { location, config })
}

/// The stock pipeline: the dune scene offscreen, then the film pass on the
/// surface sampling it. The scene pass only sees the noise unit, so a fixed
/// clock always renders the same frame.
pub fn default_passes(assets_dir: &Path) -> Vec<PassEntry> {
    let shaders = assets_dir.join("shaders");
    vec![
        PassEntry {
            name: "scene".into(),
            vertex: shaders.join("quad.vert"),
            fragment: shaders.join("dunes.frag"),
            target: PassTargetSetting::Offscreen,
            channels: [0, 0],
        },
        PassEntry {
            name: "film".into(),
            vertex: shaders.join("quad.vert"),
            fragment: shaders.join("film.frag"),
            target: PassTargetSetting::Surface,
            channels: [1, 0],
        },
    ]
}

fn fill_defaults(config: &mut SceneConfig, assets_dir: &Path) {
    if config.passes.is_empty() {
        config.passes = default_passes(assets_dir);
    }
    if config.noise.path.is_none() {
        config.noise.path = Some(assets_dir.join("textures").join("noise.png"));
    }
}

pub fn apply_overrides(config: &mut SceneConfig, args: &RunArgs) {
    let display = &mut config.display;
    if let Some(scale) = args.scale {
        display.scale = scale;
    }
    if let Some(aspect) = args.aspect {
        display.aspect = Some(aspect);
    }
    if args.windowed {
        display.fullscreen = false;
    }
    if let Some(size) = args.size {
        display.size = Some(size);
    }
    if args.vsync {
        display.vsync = true;
    }
    if let Some(seed) = args.seed {
        config.runtime.seed = Some(seed);
    }
    if let Some(exit_after) = args.exit_after {
        config.runtime.exit_after = Some(exit_after);
    }
    if let Some(policy) = args.noise_policy {
        config.noise.on_decode_error = policy;
    }
}

/// Reads every shader file named by the config.
pub fn pipeline_from_config(config: &SceneConfig) -> Result<PipelineDescription> {
    let passes = config
        .passes
        .iter()
        .map(|pass| {
            let vertex = read_shader(&pass.name, "vertex", &pass.vertex)?;
            let fragment = read_shader(&pass.name, "fragment", &pass.fragment)?;
            Ok(PassDescription {
                name: pass.name.clone(),
                program: ProgramSource { vertex, fragment },
                target: map_target(pass.target),
                channels: pass.channels.map(TextureUnit),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(PipelineDescription::new(passes))
}

fn read_shader(pass: &str, stage: &str, path: &Path) -> Result<String> {
    tracing::debug!(pass, stage, path = %path.display(), "reading shader source");
    fs::read_to_string(path).with_context(|| {
        format!(
            "failed to read {stage} shader for pass '{pass}' at {}",
            path.display()
        )
    })
}

pub fn map_target(target: PassTargetSetting) -> PassTarget {
    match target {
        PassTargetSetting::Offscreen => PassTarget::Offscreen,
        PassTargetSetting::Surface => PassTarget::Surface,
    }
}

pub fn map_noise_policy(policy: DecodeErrorPolicy) -> NoiseDecodePolicy {
    match policy {
        DecodeErrorPolicy::Fail => NoiseDecodePolicy::Fail,
        DecodeErrorPolicy::Fallback => NoiseDecodePolicy::Fallback,
    }
}

pub fn renderer_config(config: &SceneConfig, assets_dir: &Path) -> Result<RendererConfig> {
    let pipeline = pipeline_from_config(config)?;
    let noise_path = config
        .noise
        .path
        .clone()
        .unwrap_or_else(|| assets_dir.join("textures").join("noise.png"));

    let mut renderer_config = RendererConfig::new(pipeline, noise_path);
    renderer_config.surface_size = config
        .display
        .size
        .map(|size| size.as_tuple())
        .unwrap_or(FALLBACK_SURFACE_SIZE);
    renderer_config.window_mode = if config.display.fullscreen {
        WindowMode::Fullscreen
    } else {
        WindowMode::Windowed
    };
    renderer_config.offscreen = OffscreenScale {
        scale: config.display.scale,
        aspect: config.display.aspect,
    };
    renderer_config.vsync = config.display.vsync;
    renderer_config.noise_policy = map_noise_policy(config.noise.on_decode_error);
    renderer_config.fps_report_frames = config.runtime.fps_report_frames;
    renderer_config.random_seed = config.runtime.seed;
    renderer_config.exit_after = config.exit_after().map(|after| after.as_secs_f32());
    Ok(renderer_config)
}

pub fn describe_origin(loaded: &LoadedConfig) -> String {
    match (&loaded.location.origin, &loaded.location.path) {
        (ConfigOrigin::BuiltIn, _) | (_, None) => loaded.location.origin.to_string(),
        (origin, Some(path)) => format!("{} ({origin})", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::UniformName;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_pack(root: &Path) {
        let shaders = root.join("shaders");
        fs::create_dir_all(&shaders).unwrap();
        fs::write(shaders.join("quad.vert"), "void main() {}").unwrap();
        fs::write(shaders.join("dunes.frag"), "// dunes").unwrap();
        fs::write(shaders.join("film.frag"), "// film").unwrap();
    }

    #[test]
    fn built_in_defaults_use_bundled_assets() {
        let root = TempDir::new().unwrap();
        write_pack(root.path());
        let mut config = SceneConfig::default();
        fill_defaults(&mut config, root.path());

        let renderer_config = renderer_config(&config, root.path()).unwrap();
        let passes = &renderer_config.pipeline.passes;
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].name, "scene");
        assert_eq!(passes[0].target, PassTarget::Offscreen);
        assert_eq!(passes[0].channels, [TextureUnit::NOISE, TextureUnit::NOISE]);
        assert_eq!(passes[1].program.fragment, "// film");
        assert_eq!(passes[1].channels, [TextureUnit(1), TextureUnit(0)]);
        assert_eq!(
            renderer_config.noise_path,
            root.path().join("textures").join("noise.png")
        );
        assert_eq!(renderer_config.surface_size, FALLBACK_SURFACE_SIZE);
        assert_eq!(renderer_config.window_mode, WindowMode::Fullscreen);
        assert!(renderer_config.pipeline.validate().is_ok());
    }

    #[test]
    fn cli_overrides_replace_file_values() {
        let mut config = SceneConfig::default();
        let args = RunArgs {
            scale: Some(0.25),
            aspect: Some(2.0),
            windowed: true,
            seed: Some(9),
            exit_after: Some(Duration::from_millis(1500)),
            noise_policy: Some(DecodeErrorPolicy::Fail),
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args);

        let root = TempDir::new().unwrap();
        write_pack(root.path());
        fill_defaults(&mut config, root.path());
        let renderer_config = renderer_config(&config, root.path()).unwrap();
        assert_eq!(renderer_config.offscreen.scale, 0.25);
        assert_eq!(renderer_config.offscreen.aspect, Some(2.0));
        assert_eq!(renderer_config.window_mode, WindowMode::Windowed);
        assert_eq!(renderer_config.random_seed, Some(9));
        assert_eq!(renderer_config.exit_after, Some(1.5));
        assert_eq!(renderer_config.noise_policy, NoiseDecodePolicy::Fail);
    }

    #[test]
    fn default_offscreen_pass_never_reads_offscreen_color() {
        let assets = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets");
        let mut config = SceneConfig::default();
        fill_defaults(&mut config, &assets);
        let pipeline = pipeline_from_config(&config).unwrap();
        let programs = renderer::check_pipeline(&pipeline).unwrap();

        for (pass, program) in pipeline.passes.iter().zip(&programs) {
            if pass.target != PassTarget::Offscreen {
                continue;
            }
            for (channel, name) in [UniformName::Channel0, UniformName::Channel1]
                .into_iter()
                .enumerate()
            {
                let reads_own_output = pass.channels[channel] == TextureUnit::OFFSCREEN_COLOR
                    && program.slots.get(name).is_bound();
                assert!(!reads_own_output, "pass '{}' samples {name}", pass.name);
            }
            assert!(!program.slots.get(UniformName::Channel1).is_bound());
        }
    }

    #[test]
    fn bundled_config_matches_default_pipeline() {
        let assets = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets");
        let config = SceneConfig::from_path(&assets.join("scenepass.toml")).unwrap();
        let defaults = default_passes(&assets);
        assert_eq!(config.passes.len(), defaults.len());
        for (file, default) in config.passes.iter().zip(&defaults) {
            assert_eq!(file.name, default.name);
            assert_eq!(file.target, default.target);
            assert_eq!(file.channels, default.channels);
        }
    }

    #[test]
    fn missing_shader_names_the_pass() {
        let root = TempDir::new().unwrap();
        let mut config = SceneConfig::default();
        fill_defaults(&mut config, root.path());
        let err = pipeline_from_config(&config).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("pass 'scene'"), "{message}");
    }
}

use std::fmt;
use std::path::PathBuf;

use crate::error::RenderError;

/// Passes expose two sampled input channels (`iChannel0`, `iChannel1`).
pub const CHANNEL_COUNT: usize = 2;

/// Number of texture units in the static binding table.
pub const TEXTURE_UNIT_COUNT: usize = 2;

/// Index into the fixed texture-unit table.
///
/// The table never changes during a run: unit 0 always holds the noise
/// texture and unit 1 always exposes the latest completed offscreen color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureUnit(pub u32);

impl TextureUnit {
    pub const NOISE: TextureUnit = TextureUnit(0);
    pub const OFFSCREEN_COLOR: TextureUnit = TextureUnit(1);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Value written into an `iChannelN` uniform for this unit.
    pub fn uniform_value(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for TextureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit {}", self.0)
    }
}

/// Index of a linked program in the registry. Pass `i` of a pipeline always
/// runs program `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub usize);

impl fmt::Display for ProgramHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program #{}", self.0)
    }
}

/// Where a pass draws to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTarget {
    /// The reduced-resolution framebuffer owned by the renderer.
    Offscreen,
    /// The host-owned visible surface.
    Surface,
}

impl fmt::Display for PassTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassTarget::Offscreen => f.write_str("offscreen"),
            PassTarget::Surface => f.write_str("surface"),
        }
    }
}

/// Vertex and fragment source text for one program, as supplied by the
/// caller. The renderer treats both as opaque strings.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    pub vertex: String,
    pub fragment: String,
}

/// One entry of the pipeline: a program drawn into a target with its
/// channel-to-unit assignment.
#[derive(Debug, Clone)]
pub struct PassDescription {
    pub name: String,
    pub program: ProgramSource,
    pub target: PassTarget,
    pub channels: [TextureUnit; CHANNEL_COUNT],
}

/// Ordered list of passes executed every frame.
#[derive(Debug, Clone)]
pub struct PipelineDescription {
    pub passes: Vec<PassDescription>,
}

impl PipelineDescription {
    pub fn new(passes: Vec<PassDescription>) -> Self {
        Self { passes }
    }

    pub fn has_offscreen_pass(&self) -> bool {
        self.passes
            .iter()
            .any(|pass| pass.target == PassTarget::Offscreen)
    }

    /// Checks the structural rules every pipeline must satisfy before any
    /// GPU resource is allocated for it.
    pub fn validate(&self) -> Result<(), RenderError> {
        let Some(last) = self.passes.last() else {
            return Err(RenderError::Pipeline(
                "pipeline must contain at least one pass".into(),
            ));
        };
        if last.target != PassTarget::Surface {
            return Err(RenderError::Pipeline(format!(
                "final pass '{}' must target the surface",
                last.name
            )));
        }

        let surface_passes = self
            .passes
            .iter()
            .filter(|pass| pass.target == PassTarget::Surface)
            .count();
        if surface_passes != 1 {
            return Err(RenderError::Pipeline(format!(
                "pipeline must contain exactly one surface pass, found {surface_passes}"
            )));
        }

        let has_offscreen = self.has_offscreen_pass();
        for (index, pass) in self.passes.iter().enumerate() {
            if pass.name.trim().is_empty() {
                return Err(RenderError::Pipeline(format!(
                    "pass #{index} has an empty name"
                )));
            }
            if self.passes[..index].iter().any(|other| other.name == pass.name) {
                return Err(RenderError::Pipeline(format!(
                    "pass name '{}' is used more than once",
                    pass.name
                )));
            }
            for unit in pass.channels {
                if unit.index() >= TEXTURE_UNIT_COUNT {
                    return Err(RenderError::Pipeline(format!(
                        "pass '{}' binds {unit}, but only {TEXTURE_UNIT_COUNT} units exist",
                        pass.name
                    )));
                }
                if unit == TextureUnit::OFFSCREEN_COLOR && !has_offscreen {
                    return Err(RenderError::Pipeline(format!(
                        "pass '{}' samples the offscreen color but no pass renders offscreen",
                        pass.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// What to do when the noise image cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoiseDecodePolicy {
    /// Abort start-up with the decode error.
    Fail,
    /// Warn and substitute a generated noise image.
    #[default]
    Fallback,
}

/// How the offscreen resolution is derived from the display resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffscreenScale {
    /// Fraction of the display width rendered offscreen.
    pub scale: f32,
    /// Optional fixed width/height ratio; `None` keeps the display aspect.
    pub aspect: Option<f32>,
}

impl Default for OffscreenScale {
    fn default() -> Self {
        Self {
            scale: 0.5,
            aspect: None,
        }
    }
}

impl OffscreenScale {
    /// Computes the offscreen size for a display. The result is fixed for
    /// the rest of the run; later surface resizes do not change it.
    pub fn resolve(&self, display: (u32, u32)) -> (u32, u32) {
        let scale = if self.scale.is_finite() && self.scale > 0.0 {
            self.scale
        } else {
            1.0
        };
        let width = ((display.0.max(1) as f32) * scale).round().max(1.0);
        let height = match self.aspect {
            Some(aspect) if aspect.is_finite() && aspect > 0.0 => width / aspect,
            _ => (display.1.max(1) as f32) * scale,
        };
        (width as u32, height.round().max(1.0) as u32)
    }
}

/// Presentation of the host window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// Borderless fullscreen on the primary monitor at its native size.
    Fullscreen,
    /// Decorated window at the configured size.
    Windowed,
}

/// Immutable configuration passed to the renderer at start-up.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window size, and display size when no monitor can be queried.
    pub surface_size: (u32, u32),
    pub window_mode: WindowMode,
    pub offscreen: OffscreenScale,
    pub vsync: bool,
    pub pipeline: PipelineDescription,
    pub noise_path: PathBuf,
    pub noise_policy: NoiseDecodePolicy,
    /// Frames averaged per FPS report.
    pub fps_report_frames: u32,
    /// Seed for the per-frame random scalar; `None` seeds from entropy.
    pub random_seed: Option<u64>,
    /// Sets the close signal once the clock passes this many seconds.
    pub exit_after: Option<f32>,
}

impl RendererConfig {
    pub fn new(pipeline: PipelineDescription, noise_path: PathBuf) -> Self {
        Self {
            surface_size: (1024, 640),
            window_mode: WindowMode::Fullscreen,
            offscreen: OffscreenScale::default(),
            vsync: false,
            pipeline,
            noise_path,
            noise_policy: NoiseDecodePolicy::default(),
            fps_report_frames: 30,
            random_seed: None,
            exit_after: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(name: &str, target: PassTarget, channels: [u32; 2]) -> PassDescription {
        PassDescription {
            name: name.to_string(),
            program: ProgramSource {
                vertex: String::new(),
                fragment: String::new(),
            },
            target,
            channels: channels.map(TextureUnit),
        }
    }

    #[test]
    fn two_pass_pipeline_is_valid() {
        let pipeline = PipelineDescription::new(vec![
            pass("scene", PassTarget::Offscreen, [0, 1]),
            pass("film", PassTarget::Surface, [1, 0]),
        ]);
        pipeline.validate().expect("valid pipeline");
        assert!(pipeline.has_offscreen_pass());
    }

    #[test]
    fn surface_pass_must_be_last() {
        let pipeline = PipelineDescription::new(vec![
            pass("film", PassTarget::Surface, [0, 0]),
            pass("scene", PassTarget::Offscreen, [0, 0]),
        ]);
        assert!(matches!(pipeline.validate(), Err(RenderError::Pipeline(_))));
    }

    #[test]
    fn offscreen_unit_requires_offscreen_pass() {
        let pipeline = PipelineDescription::new(vec![pass("only", PassTarget::Surface, [1, 0])]);
        assert!(pipeline.validate().is_err());

        let single = PipelineDescription::new(vec![pass("only", PassTarget::Surface, [0, 0])]);
        single.validate().expect("single surface pass");
    }

    #[test]
    fn rejects_unknown_units_and_duplicate_names() {
        let pipeline = PipelineDescription::new(vec![
            pass("scene", PassTarget::Offscreen, [2, 0]),
            pass("film", PassTarget::Surface, [1, 0]),
        ]);
        assert!(pipeline.validate().is_err());

        let duplicated = PipelineDescription::new(vec![
            pass("scene", PassTarget::Offscreen, [0, 0]),
            pass("scene", PassTarget::Surface, [1, 0]),
        ]);
        assert!(duplicated.validate().is_err());
    }

    #[test]
    fn empty_pipeline_is_rejected() {
        assert!(PipelineDescription::new(Vec::new()).validate().is_err());
    }

    #[test]
    fn offscreen_scale_halves_display() {
        let scale = OffscreenScale::default();
        assert_eq!(scale.resolve((1024, 640)), (512, 320));
    }

    #[test]
    fn offscreen_scale_applies_fixed_aspect() {
        let scale = OffscreenScale {
            scale: 0.5,
            aspect: Some(2.56),
        };
        assert_eq!(scale.resolve((1024, 640)), (512, 200));

        let pi = OffscreenScale {
            scale: 0.5,
            aspect: Some(3.141_592_7),
        };
        assert_eq!(pi.resolve((1024, 640)), (512, 163));
    }

    #[test]
    fn offscreen_scale_never_collapses_to_zero() {
        let tiny = OffscreenScale {
            scale: 0.001,
            aspect: None,
        };
        assert_eq!(tiny.resolve((100, 100)), (1, 1));
        let broken = OffscreenScale {
            scale: f32::NAN,
            aspect: Some(-1.0),
        };
        assert_eq!(broken.resolve((640, 480)), (640, 480));
    }
}

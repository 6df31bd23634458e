//! Renderer crate for scenepass.
//!
//! A fixed set of passes runs every frame: procedural passes draw into a
//! reduced-resolution offscreen framebuffer, and a final pass samples that
//! result while drawing to the window surface. The overall flow is:
//!
//! ```text
//!   CLI / scenepass
//!          │ RendererConfig
//!          ▼
//!   Renderer::run ──▶ GpuState::new ──▶ winit event loop ──▶ FrameDriver::run_frame
//!                                                               │
//!                              offscreen pass(es) ──▶ present pass ──▶ swap
//! ```
//!
//! Every program sees the same five inputs: `iResolution`, `iGlobalTime`,
//! `iRandom`, `iChannel0` and `iChannel1`. Texture unit 0 holds a static
//! noise texture and unit 1 the latest offscreen color. Any compile, link,
//! framebuffer or device error is returned as a [`RenderError`] and ends the
//! run.

mod compile;
mod error;
mod frame;
mod gpu;
mod runtime;
mod types;
mod window;

pub use compile::{compile_program, CompiledProgram, UniformName, UniformSlot, UniformSlots};
pub use error::{IncompleteTarget, RenderError, StageKind, TextureError};
pub use frame::{
    BindingState, BoundTarget, CloseSignal, FpsCounter, FrameDriver, FrameOutcome, FramePhase,
    FrameState, PassExecutor, PassInvocation, PassUniforms,
};
pub use runtime::{
    FixedTimeSource, SteppedTimeSource, SystemTimeSource, TimeSample, TimeSource,
};
pub use types::{
    NoiseDecodePolicy, OffscreenScale, PassDescription, PassTarget, PipelineDescription,
    ProgramHandle, ProgramSource, RendererConfig, TextureUnit, WindowMode, CHANNEL_COUNT,
    TEXTURE_UNIT_COUNT,
};

/// Entry point that owns the configuration for one run.
pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    /// Validates the pipeline structure. Nothing touches the GPU yet.
    pub fn new(config: RendererConfig) -> Result<Self, RenderError> {
        config.pipeline.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Runs until the window closes. Returns the first fatal error.
    pub fn run(self) -> Result<(), RenderError> {
        window::run_host(self.config)
    }
}

/// Compiles and links every program of a pipeline without a device or a
/// window. Used for offline validation.
pub fn check_pipeline(pipeline: &PipelineDescription) -> Result<Vec<CompiledProgram>, RenderError> {
    pipeline.validate()?;
    pipeline
        .passes
        .iter()
        .map(|pass| compile_program(&pass.name, &pass.program.vertex, &pass.program.fragment))
        .collect()
}

//! Per-frame pass sequencing.
//!
//! [`FrameDriver`] walks the pipeline once per frame, rebuilding the explicit
//! [`BindingState`] for every pass and handing it to a [`PassExecutor`]. The
//! GPU state is the production executor; tests substitute a recorder.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::RenderError;
use crate::runtime::TimeSample;
use crate::types::{
    PassTarget, PipelineDescription, ProgramHandle, TextureUnit, CHANNEL_COUNT,
};

/// Where the driver currently is within a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    /// Running the offscreen pass at this pipeline index.
    Offscreen(usize),
    Present,
    /// Terminal. No further passes are submitted.
    Shutdown,
}

/// Target bound for the pass in flight, with the viewport it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundTarget {
    pub target: PassTarget,
    pub viewport: (u32, u32),
}

/// The rendering context a pass sees. Every field is cleared before a pass
/// starts and set again by the driver, so nothing carries over between
/// passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingState {
    target: Option<BoundTarget>,
    program: Option<ProgramHandle>,
    units: [Option<TextureUnit>; CHANNEL_COUNT],
}

impl BindingState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn bind_target(&mut self, target: PassTarget, viewport: (u32, u32)) {
        self.target = Some(BoundTarget { target, viewport });
    }

    pub fn use_program(&mut self, program: ProgramHandle) {
        self.program = Some(program);
    }

    pub fn bind_channel(&mut self, channel: usize, unit: TextureUnit) {
        if let Some(slot) = self.units.get_mut(channel) {
            *slot = Some(unit);
        }
    }

    pub fn target(&self) -> Option<BoundTarget> {
        self.target
    }

    pub fn program(&self) -> Option<ProgramHandle> {
        self.program
    }

    pub fn channel_unit(&self, channel: usize) -> Option<TextureUnit> {
        self.units.get(channel).copied().flatten()
    }

    /// Unit per channel, or `None` while any channel is still unbound.
    pub fn channel_units(&self) -> Option<[TextureUnit; CHANNEL_COUNT]> {
        let [first, second] = self.units;
        Some([first?, second?])
    }

    pub fn is_complete(&self) -> bool {
        self.target.is_some() && self.program.is_some() && self.channel_units().is_some()
    }
}

/// Values written to a pass's uniform slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassUniforms {
    /// `(width, height, 1.0)` of the rendered image.
    pub resolution: [f32; 3],
    pub global_time: f32,
    pub random: f32,
    /// Texture unit index per channel.
    pub channels: [i32; CHANNEL_COUNT],
}

/// One pass as the executor receives it.
#[derive(Debug, Clone, PartialEq)]
pub struct PassInvocation {
    pub index: usize,
    pub name: String,
    pub uniforms: PassUniforms,
}

/// Runs passes against real resources.
pub trait PassExecutor {
    /// Encodes and submits one pass using exactly the bindings given.
    fn execute_pass(
        &mut self,
        invocation: &PassInvocation,
        bindings: &BindingState,
    ) -> Result<(), RenderError>;

    /// Presents the surface after the final pass of a frame.
    fn present(&mut self) -> Result<(), RenderError>;
}

/// Averages frame time over a fixed number of presented frames.
#[derive(Debug, Clone, Copy)]
pub struct FpsCounter {
    report_every: u32,
    frames: u32,
    accumulated: f32,
}

impl FpsCounter {
    pub const DEFAULT_REPORT_FRAMES: u32 = 30;

    pub fn new(report_every: u32) -> Self {
        Self {
            report_every: report_every.max(1),
            frames: 0,
            accumulated: 0.0,
        }
    }

    /// Records one presented frame that took `delta` seconds. Returns the
    /// average rate when the window is full, after which both accumulators
    /// restart from zero.
    pub fn record(&mut self, delta: f32) -> Option<f32> {
        self.frames += 1;
        if delta.is_finite() && delta > 0.0 {
            self.accumulated += delta;
        }
        if self.frames < self.report_every {
            return None;
        }

        let fps = if self.accumulated > 0.0 {
            self.frames as f32 / self.accumulated
        } else {
            f32::INFINITY
        };
        self.frames = 0;
        self.accumulated = 0.0;
        Some(fps)
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn accumulated(&self) -> f32 {
        self.accumulated
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_REPORT_FRAMES)
    }
}

/// Mutable per-frame values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameState {
    /// Seconds since start.
    pub elapsed: f32,
    /// Random scalar shared by every pass of the current frame.
    pub random: f32,
    /// Frames presented so far.
    pub frame_count: u64,
    previous_time: Option<f32>,
}

impl FrameState {
    fn advance(&mut self, sample: TimeSample, random: f32) -> f32 {
        let delta = match self.previous_time {
            Some(previous) => sample.seconds - previous,
            None => sample.seconds,
        };
        self.previous_time = Some(sample.seconds);
        self.elapsed = sample.seconds;
        self.random = random;
        delta.max(0.0)
    }
}

/// Latched shutdown request, set by the host on close input or when an
/// optional run duration elapses.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloseSignal {
    requested: bool,
    deadline: Option<f32>,
}

impl CloseSignal {
    pub fn new(deadline: Option<f32>) -> Self {
        Self {
            requested: false,
            deadline: deadline.filter(|seconds| seconds.is_finite() && *seconds >= 0.0),
        }
    }

    pub fn request(&mut self) {
        self.requested = true;
    }

    /// Returns whether a close was requested, latching the deadline first.
    pub fn poll(&mut self, elapsed: f32) -> bool {
        if let Some(deadline) = self.deadline {
            if elapsed >= deadline {
                self.requested = true;
            }
        }
        self.requested
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }
}

/// What happened when a frame was requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// Every pass ran and the surface was presented. Carries the FPS
    /// average when this frame completed a reporting window.
    Presented { fps: Option<f32> },
    /// The driver is shut down; nothing was submitted.
    Skipped,
}

#[derive(Debug, Clone)]
struct PassPlan {
    name: String,
    target: PassTarget,
    program: ProgramHandle,
    channels: [TextureUnit; CHANNEL_COUNT],
}

/// Sequences the passes of a validated pipeline every frame.
#[derive(Debug)]
pub struct FrameDriver {
    plan: Vec<PassPlan>,
    offscreen_size: (u32, u32),
    present_size: (u32, u32),
    resolution: [f32; 3],
    rng: StdRng,
    state: FrameState,
    fps: FpsCounter,
    phase: FramePhase,
    bindings: BindingState,
}

impl FrameDriver {
    pub fn new(
        pipeline: &PipelineDescription,
        offscreen_size: (u32, u32),
        present_size: (u32, u32),
        seed: Option<u64>,
        fps_report_frames: u32,
    ) -> Self {
        let plan = pipeline
            .passes
            .iter()
            .enumerate()
            .map(|(index, pass)| PassPlan {
                name: pass.name.clone(),
                target: pass.target,
                program: ProgramHandle(index),
                channels: pass.channels,
            })
            .collect();

        let rendered = if pipeline.has_offscreen_pass() {
            offscreen_size
        } else {
            present_size
        };
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            plan,
            offscreen_size,
            present_size,
            resolution: [rendered.0 as f32, rendered.1 as f32, 1.0],
            rng,
            state: FrameState::default(),
            fps: FpsCounter::new(fps_report_frames),
            phase: FramePhase::Idle,
            bindings: BindingState::default(),
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn state(&self) -> &FrameState {
        &self.state
    }

    pub fn fps(&self) -> &FpsCounter {
        &self.fps
    }

    pub fn offscreen_size(&self) -> (u32, u32) {
        self.offscreen_size
    }

    /// Tracks the host surface size. The offscreen size and the resolution
    /// uniform are left as they are.
    pub fn set_present_size(&mut self, size: (u32, u32)) {
        self.present_size = (size.0.max(1), size.1.max(1));
    }

    pub fn request_shutdown(&mut self) {
        self.phase = FramePhase::Shutdown;
    }

    pub fn is_shutdown(&self) -> bool {
        self.phase == FramePhase::Shutdown
    }

    /// Runs every pass in order, then presents. Any executor error moves the
    /// driver to [`FramePhase::Shutdown`] and is returned unchanged.
    pub fn run_frame<E>(
        &mut self,
        executor: &mut E,
        sample: TimeSample,
    ) -> Result<FrameOutcome, RenderError>
    where
        E: PassExecutor + ?Sized,
    {
        if self.is_shutdown() {
            return Ok(FrameOutcome::Skipped);
        }

        let random: f32 = self.rng.gen();
        let delta = self.state.advance(sample, random);

        if let Err(err) = self.submit_passes(executor) {
            self.phase = FramePhase::Shutdown;
            return Err(err);
        }

        self.phase = FramePhase::Idle;
        self.state.frame_count = self.state.frame_count.saturating_add(1);
        let fps = self.fps.record(delta);
        if let Some(fps) = fps {
            tracing::info!(
                fps = (fps * 10.0).round() / 10.0,
                frames = self.state.frame_count,
                "frame rate"
            );
        }
        Ok(FrameOutcome::Presented { fps })
    }

    fn submit_passes<E>(&mut self, executor: &mut E) -> Result<(), RenderError>
    where
        E: PassExecutor + ?Sized,
    {
        for (index, pass) in self.plan.iter().enumerate() {
            let viewport = match pass.target {
                PassTarget::Offscreen => {
                    self.phase = FramePhase::Offscreen(index);
                    self.offscreen_size
                }
                PassTarget::Surface => {
                    self.phase = FramePhase::Present;
                    self.present_size
                }
            };

            self.bindings.reset();
            self.bindings.bind_target(pass.target, viewport);
            self.bindings.use_program(pass.program);
            for (channel, unit) in pass.channels.iter().enumerate() {
                self.bindings.bind_channel(channel, *unit);
            }

            let invocation = PassInvocation {
                index,
                name: pass.name.clone(),
                uniforms: PassUniforms {
                    resolution: self.resolution,
                    global_time: self.state.elapsed,
                    random: self.state.random,
                    channels: pass.channels.map(TextureUnit::uniform_value),
                },
            };
            executor.execute_pass(&invocation, &self.bindings)?;
        }

        executor.present()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FixedTimeSource, SteppedTimeSource, TimeSource};
    use crate::types::{PassDescription, ProgramSource};

    #[derive(Default)]
    struct RecordingExecutor {
        passes: Vec<(PassInvocation, BindingState)>,
        presents: usize,
        fail_on: Option<usize>,
    }

    impl PassExecutor for RecordingExecutor {
        fn execute_pass(
            &mut self,
            invocation: &PassInvocation,
            bindings: &BindingState,
        ) -> Result<(), RenderError> {
            if self.fail_on == Some(invocation.index) {
                return Err(RenderError::Gpu {
                    checkpoint: "draw",
                    message: "device lost".into(),
                });
            }
            self.passes.push((invocation.clone(), bindings.clone()));
            Ok(())
        }

        fn present(&mut self) -> Result<(), RenderError> {
            self.presents += 1;
            Ok(())
        }
    }

    fn two_pass() -> PipelineDescription {
        let program = ProgramSource {
            vertex: String::new(),
            fragment: String::new(),
        };
        PipelineDescription::new(vec![
            PassDescription {
                name: "scene".into(),
                program: program.clone(),
                target: PassTarget::Offscreen,
                channels: [TextureUnit::NOISE, TextureUnit::OFFSCREEN_COLOR],
            },
            PassDescription {
                name: "film".into(),
                program,
                target: PassTarget::Surface,
                channels: [TextureUnit::OFFSCREEN_COLOR, TextureUnit::NOISE],
            },
        ])
    }

    fn driver() -> FrameDriver {
        FrameDriver::new(&two_pass(), (512, 200), (1024, 640), Some(7), 30)
    }

    #[test]
    fn present_pass_receives_offscreen_resolution() {
        let mut driver = driver();
        let mut executor = RecordingExecutor::default();
        driver
            .run_frame(&mut executor, TimeSample::new(0.5, 0))
            .expect("frame");

        assert_eq!(executor.passes.len(), 2);
        let (film, bindings) = &executor.passes[1];
        assert_eq!(film.name, "film");
        assert_eq!(film.uniforms.resolution, [512.0, 200.0, 1.0]);
        assert_eq!(
            bindings.target(),
            Some(BoundTarget {
                target: PassTarget::Surface,
                viewport: (1024, 640)
            })
        );
        assert_eq!(executor.presents, 1);
    }

    #[test]
    fn every_pass_starts_from_fully_populated_bindings() {
        let mut driver = driver();
        let mut executor = RecordingExecutor::default();
        driver
            .run_frame(&mut executor, TimeSample::new(0.0, 0))
            .expect("frame");

        let (scene, scene_bindings) = &executor.passes[0];
        assert!(scene_bindings.is_complete());
        assert_eq!(scene_bindings.program(), Some(ProgramHandle(0)));
        assert_eq!(
            scene_bindings.channel_units(),
            Some([TextureUnit::NOISE, TextureUnit::OFFSCREEN_COLOR])
        );
        assert_eq!(scene.uniforms.channels, [0, 1]);
        assert_eq!(scene_bindings.target().map(|bound| bound.viewport), Some((512, 200)));

        let (film, film_bindings) = &executor.passes[1];
        assert!(film_bindings.is_complete());
        assert_eq!(film_bindings.program(), Some(ProgramHandle(1)));
        assert_eq!(film.uniforms.channels, [1, 0]);
    }

    #[test]
    fn random_is_resampled_per_frame_and_shared_across_passes() {
        let mut driver = FrameDriver::new(&two_pass(), (512, 200), (1024, 640), None, 30);
        let mut executor = RecordingExecutor::default();
        let mut clock = FixedTimeSource::new(1.0);
        for _ in 0..8 {
            driver.run_frame(&mut executor, clock.sample()).expect("frame");
        }

        let per_frame: Vec<f32> = executor
            .passes
            .chunks(2)
            .map(|frame| {
                assert_eq!(frame[0].0.uniforms.random, frame[1].0.uniforms.random);
                frame[0].0.uniforms.random
            })
            .collect();
        assert!(per_frame.iter().all(|value| (0.0..1.0).contains(value)));
        assert!(per_frame.windows(2).all(|pair| pair[0] != pair[1]));
    }

    #[test]
    fn fixed_clock_yields_identical_non_random_uniforms() {
        let mut driver = driver();
        let mut executor = RecordingExecutor::default();
        let mut clock = FixedTimeSource::new(3.25);
        for _ in 0..3 {
            driver.run_frame(&mut executor, clock.sample()).expect("frame");
        }
        let first = executor.passes[1].0.uniforms;
        for (invocation, _) in executor.passes.iter().skip(3).step_by(2) {
            assert_eq!(invocation.uniforms.resolution, first.resolution);
            assert_eq!(invocation.uniforms.global_time, first.global_time);
            assert_eq!(invocation.uniforms.channels, first.channels);
        }
    }

    #[test]
    fn seeded_drivers_draw_the_same_sequence() {
        let mut a = driver();
        let mut b = driver();
        let mut left = RecordingExecutor::default();
        let mut right = RecordingExecutor::default();
        for frame in 0..4 {
            let sample = TimeSample::new(frame as f32, frame);
            a.run_frame(&mut left, sample).expect("frame");
            b.run_frame(&mut right, sample).expect("frame");
        }
        assert_eq!(left.passes, right.passes);
    }

    #[test]
    fn fps_counter_reports_and_resets() {
        let mut counter = FpsCounter::default();
        let dt = 1.0 / 60.0;
        for _ in 0..29 {
            assert_eq!(counter.record(dt), None);
        }
        let fps = counter.record(dt).expect("report after 30 frames");
        assert!((fps - 60.0).abs() < 0.01, "{fps}");
        assert_eq!(counter.frames(), 0);
        assert_eq!(counter.accumulated(), 0.0);
    }

    #[test]
    fn driver_reports_fps_every_window() {
        let mut driver = driver();
        let mut executor = RecordingExecutor::default();
        let mut clock = SteppedTimeSource::new(0.02);
        // First sample is at t=0, so skip it to keep every delta at 0.02.
        clock.sample();
        let mut reports = Vec::new();
        for _ in 0..60 {
            if let FrameOutcome::Presented { fps: Some(fps) } =
                driver.run_frame(&mut executor, clock.sample()).expect("frame")
            {
                reports.push(fps);
            }
        }
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|fps| (fps - 50.0).abs() < 0.1), "{reports:?}");
        assert_eq!(driver.state().frame_count, 60);
    }

    #[test]
    fn shutdown_stops_submission() {
        let mut driver = driver();
        let mut executor = RecordingExecutor::default();
        driver
            .run_frame(&mut executor, TimeSample::new(0.0, 0))
            .expect("frame");
        driver.request_shutdown();
        let outcome = driver
            .run_frame(&mut executor, TimeSample::new(0.1, 1))
            .expect("skipped frame");
        assert_eq!(outcome, FrameOutcome::Skipped);
        assert_eq!(executor.passes.len(), 2);
        assert_eq!(executor.presents, 1);
        assert_eq!(driver.phase(), FramePhase::Shutdown);
    }

    #[test]
    fn executor_failure_is_terminal() {
        let mut driver = driver();
        let mut executor = RecordingExecutor {
            fail_on: Some(1),
            ..Default::default()
        };
        let err = driver
            .run_frame(&mut executor, TimeSample::new(0.0, 0))
            .unwrap_err();
        assert!(matches!(err, RenderError::Gpu { checkpoint: "draw", .. }));
        assert_eq!(executor.presents, 0);
        assert!(driver.is_shutdown());
    }

    #[test]
    fn resize_keeps_offscreen_resolution() {
        let mut driver = driver();
        driver.set_present_size((1920, 1080));
        let mut executor = RecordingExecutor::default();
        driver
            .run_frame(&mut executor, TimeSample::new(0.0, 0))
            .expect("frame");
        assert_eq!(executor.passes[1].0.uniforms.resolution, [512.0, 200.0, 1.0]);
        assert_eq!(driver.offscreen_size(), (512, 200));
        assert_eq!(
            executor.passes[1].1.target().map(|bound| bound.viewport),
            Some((1920, 1080))
        );
    }

    #[test]
    fn close_signal_latches_on_request_or_deadline() {
        let mut signal = CloseSignal::new(None);
        assert!(!signal.poll(100.0));
        signal.request();
        assert!(signal.poll(0.0));

        let mut timed = CloseSignal::new(Some(2.0));
        assert!(!timed.poll(1.5));
        assert!(timed.poll(2.0));
        assert!(timed.poll(0.0));
        assert!(timed.is_requested());
    }
}

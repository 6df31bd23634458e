use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;

use crate::error::RenderError;
use crate::frame::{BindingState, PassExecutor, PassInvocation};
use crate::types::{PassTarget, ProgramHandle, RendererConfig};

use super::context::{checked, GpuContext};
use super::geometry::QuadGeometry;
use super::pipeline::{build_pass_pipeline, ChannelBindGroups, PipelineLayouts};
use super::programs::ProgramRegistry;
use super::targets::OffscreenTarget;
use super::textures::{load_noise, TextureUnits};
use super::uniforms::{uniform_writes, PassUniformBuffers};

const CLEAR_COLOR: wgpu::Color = wgpu::Color {
    r: 0.1,
    g: 0.1,
    b: 0.1,
    a: 1.0,
};

struct PassResources {
    program: ProgramHandle,
    pipeline: wgpu::RenderPipeline,
    uniforms: PassUniformBuffers,
}

/// Every GPU resource of a run. Built once before the first frame and never
/// reallocated; only the swapchain follows the window size.
pub(crate) struct GpuState {
    context: GpuContext,
    quad: QuadGeometry,
    programs: ProgramRegistry,
    passes: Vec<PassResources>,
    offscreen: OffscreenTarget,
    _units: TextureUnits,
    channel_groups: ChannelBindGroups,
    frame: Option<wgpu::SurfaceTexture>,
}

impl GpuState {
    pub(crate) fn new<T>(
        target: &T,
        initial_size: PhysicalSize<u32>,
        offscreen_size: (u32, u32),
        config: &RendererConfig,
    ) -> Result<Self, RenderError>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let context = GpuContext::new(target, initial_size, config.vsync)?;
        let device = &context.device;

        let programs = ProgramRegistry::build(device, &config.pipeline)?;
        let offscreen =
            OffscreenTarget::new(device, &context.limits, context.features, offscreen_size)?;
        let noise = load_noise(&config.noise_path, config.noise_policy)?;
        let units = TextureUnits::new(device, &context.queue, &noise)?;
        let quad = QuadGeometry::new(device)?;

        let layouts = PipelineLayouts::new(device);
        let mut passes = Vec::with_capacity(config.pipeline.passes.len());
        for (index, pass) in config.pipeline.passes.iter().enumerate() {
            let handle = ProgramHandle(index);
            let program = programs.get(handle).ok_or_else(|| {
                RenderError::Pipeline(format!("no program registered for pass '{}'", pass.name))
            })?;
            let pipeline = checked(device, "link", || {
                build_pass_pipeline(
                    device,
                    &layouts,
                    program,
                    pass.target,
                    context.surface_format,
                )
            })
            .map_err(|err| link_failure(&pass.name, err))?;
            let uniforms = PassUniformBuffers::new(device, &layouts.uniform_layout, &pass.name);
            passes.push(PassResources {
                program: handle,
                pipeline,
                uniforms,
            });
        }
        let channel_groups = checked(device, "link", || {
            ChannelBindGroups::new(device, &layouts, &units, &offscreen)
        })??;

        tracing::debug!(
            passes = passes.len(),
            offscreen_width = offscreen_size.0,
            offscreen_height = offscreen_size.1,
            "GPU resources ready"
        );

        Ok(Self {
            context,
            quad,
            programs,
            passes,
            offscreen,
            _units: units,
            channel_groups,
            frame: None,
        })
    }

    pub(crate) fn size(&self) -> PhysicalSize<u32> {
        self.context.size
    }

    pub(crate) fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.context.resize(new_size);
    }

    /// Gets the next swapchain image, reconfiguring and retrying once when
    /// the swapchain went stale.
    fn acquire_frame(&mut self) -> Result<wgpu::SurfaceTexture, RenderError> {
        match self.context.surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(err) if is_stale_surface(&err) => {
                tracing::warn!(error = %err, "surface unavailable; reconfiguring");
                self.context.reconfigure();
                Ok(self.context.surface.get_current_texture()?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn encode_pass(
        &self,
        label: &str,
        color: &wgpu::TextureView,
        depth: Option<&wgpu::TextureView>,
        viewport: (u32, u32),
        resources: &PassResources,
        channels: &wgpu::BindGroup,
    ) {
        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(label),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: depth.map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            render_pass.set_viewport(0.0, 0.0, viewport.0 as f32, viewport.1 as f32, 0.0, 1.0);
            render_pass.set_pipeline(&resources.pipeline);
            render_pass.set_bind_group(0, &resources.uniforms.bind_group, &[]);
            render_pass.set_bind_group(1, channels, &[]);
            render_pass.set_vertex_buffer(0, self.quad.buffer.slice(..));
            render_pass.draw(0..self.quad.vertex_count, 0..1);
        }
        self.context.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl PassExecutor for GpuState {
    fn execute_pass(
        &mut self,
        invocation: &PassInvocation,
        bindings: &BindingState,
    ) -> Result<(), RenderError> {
        let unbound = |what: &str| {
            RenderError::Pipeline(format!("pass '{}' has no {what} bound", invocation.name))
        };
        let bound = bindings.target().ok_or_else(|| unbound("target"))?;
        let program_handle = bindings.program().ok_or_else(|| unbound("program"))?;
        let assignment = bindings.channel_units().ok_or_else(|| unbound("channel"))?;

        let resources = find_pass(&self.passes, invocation.index, program_handle, |pass| {
            pass.program
        })
        .ok_or_else(|| unbound("pipeline"))?;
        let program = self
            .programs
            .get(program_handle)
            .ok_or_else(|| unbound("program"))?;
        let channels = self
            .channel_groups
            .get(assignment, self.offscreen.front())
            .ok_or_else(|| unbound("channel"))?;
        let writes = uniform_writes(&program.slots, &invocation.uniforms);

        match bound.target {
            PassTarget::Offscreen => {
                checked(&self.context.device, "draw", || {
                    resources.uniforms.apply(&self.context.queue, &writes);
                    self.encode_pass(
                        &invocation.name,
                        self.offscreen.back_view(),
                        Some(self.offscreen.depth_view()),
                        clamp_viewport(bound.viewport, self.offscreen.size()),
                        resources,
                        channels,
                    );
                })?;
                self.offscreen.swap();
            }
            PassTarget::Surface => {
                let frame = match self.frame.take() {
                    Some(frame) => frame,
                    None => self.acquire_frame()?,
                };
                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                let resources =
                    find_pass(&self.passes, invocation.index, program_handle, |pass| {
                        pass.program
                    })
                    .ok_or_else(|| unbound("pipeline"))?;
                let channels = self
                    .channel_groups
                    .get(assignment, self.offscreen.front())
                    .ok_or_else(|| unbound("channel"))?;
                let surface_size = (self.context.config.width, self.context.config.height);
                checked(&self.context.device, "draw2", || {
                    resources.uniforms.apply(&self.context.queue, &writes);
                    self.encode_pass(
                        &invocation.name,
                        &view,
                        None,
                        clamp_viewport(bound.viewport, surface_size),
                        resources,
                        channels,
                    );
                })?;
                self.frame = Some(frame);
            }
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), RenderError> {
        let frame = self.frame.take().ok_or_else(|| {
            RenderError::Pipeline("present requested before the surface pass ran".into())
        })?;
        checked(&self.context.device, "present", || frame.present())
    }
}

/// Lost and Outdated swapchains are reconfigured and retried once; every
/// other acquire error is fatal.
fn is_stale_surface(err: &wgpu::SurfaceError) -> bool {
    matches!(err, wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)
}

/// The resources of pass `index`, provided they were built for `program`.
fn find_pass<P>(
    passes: &[P],
    index: usize,
    program: ProgramHandle,
    program_of: impl Fn(&P) -> ProgramHandle,
) -> Option<&P> {
    passes.get(index).filter(|pass| program_of(pass) == program)
}

fn clamp_viewport(viewport: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    (
        viewport.0.clamp(1, target.0.max(1)),
        viewport.1.clamp(1, target.1.max(1)),
    )
}

fn link_failure(program: &str, err: RenderError) -> RenderError {
    match err {
        RenderError::Gpu { message, .. } => RenderError::Link {
            program: program.to_string(),
            log: message,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_never_exceeds_target() {
        assert_eq!(clamp_viewport((1024, 640), (800, 600)), (800, 600));
        assert_eq!(clamp_viewport((512, 200), (512, 200)), (512, 200));
        assert_eq!(clamp_viewport((0, 0), (0, 0)), (1, 1));
    }

    #[test]
    fn only_lost_or_outdated_surfaces_are_retried() {
        assert!(is_stale_surface(&wgpu::SurfaceError::Lost));
        assert!(is_stale_surface(&wgpu::SurfaceError::Outdated));
        assert!(!is_stale_surface(&wgpu::SurfaceError::Timeout));
        assert!(!is_stale_surface(&wgpu::SurfaceError::OutOfMemory));
    }

    #[test]
    fn pass_lookup_rejects_missing_or_mismatched_entries() {
        let passes = [ProgramHandle(0), ProgramHandle(1)];
        let program_of = |pass: &ProgramHandle| *pass;

        assert_eq!(
            find_pass(&passes, 1, ProgramHandle(1), program_of),
            Some(&ProgramHandle(1))
        );
        assert_eq!(find_pass(&passes, 1, ProgramHandle(0), program_of), None);
        assert_eq!(find_pass(&passes, 2, ProgramHandle(2), program_of), None);
    }

    #[test]
    fn pipeline_validation_errors_become_link_failures() {
        let err = link_failure(
            "film",
            RenderError::Gpu {
                checkpoint: "link",
                message: "location 1 not provided".into(),
            },
        );
        match err {
            RenderError::Link { program, log } => {
                assert_eq!(program, "film");
                assert!(log.contains("location 1"));
            }
            other => panic!("expected link failure, got {other:?}"),
        }
    }
}

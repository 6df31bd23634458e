use std::borrow::Cow;

use wgpu::naga::ShaderStage;

use crate::compile::{compile_program, CompiledProgram, UniformSlots};
use crate::error::RenderError;
use crate::types::{PipelineDescription, ProgramHandle};

use super::context::checked;

/// A linked program with its GPU shader modules.
pub(crate) struct ShaderProgram {
    pub label: String,
    pub vertex: wgpu::ShaderModule,
    pub fragment: wgpu::ShaderModule,
    pub slots: UniformSlots,
}

/// Every program of the pipeline, indexed by pass.
pub(crate) struct ProgramRegistry {
    programs: Vec<ShaderProgram>,
}

impl ProgramRegistry {
    /// Compiles and links each pass's sources, then creates the shader
    /// modules. The first failure aborts the whole registry.
    pub(crate) fn build(
        device: &wgpu::Device,
        pipeline: &PipelineDescription,
    ) -> Result<Self, RenderError> {
        let mut programs = Vec::with_capacity(pipeline.passes.len());
        for pass in &pipeline.passes {
            let compiled = compile_program(
                &pass.name,
                &pass.program.vertex,
                &pass.program.fragment,
            )?;
            programs.push(create_modules(device, compiled)?);
        }
        Ok(Self { programs })
    }

    pub(crate) fn get(&self, handle: ProgramHandle) -> Option<&ShaderProgram> {
        self.programs.get(handle.0)
    }
}

fn create_modules(
    device: &wgpu::Device,
    compiled: CompiledProgram,
) -> Result<ShaderProgram, RenderError> {
    let CompiledProgram {
        label,
        vertex_source,
        fragment_source,
        slots,
    } = compiled;

    let (vertex, fragment) = checked(device, "compile", || {
        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{label} vertex")),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(vertex_source),
                stage: ShaderStage::Vertex,
                defines: &[],
            },
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{label} fragment")),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(fragment_source),
                stage: ShaderStage::Fragment,
                defines: &[],
            },
        });
        (vertex, fragment)
    })?;

    tracing::debug!(program = %label, "created shader modules");
    Ok(ShaderProgram {
        label,
        vertex,
        fragment,
        slots,
    })
}

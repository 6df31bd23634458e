use crate::error::RenderError;
use crate::types::{PassTarget, TextureUnit, CHANNEL_COUNT, TEXTURE_UNIT_COUNT};

use super::geometry::QuadGeometry;
use super::programs::ShaderProgram;
use super::targets::{OffscreenTarget, OFFSCREEN_COLOR_FORMAT, OFFSCREEN_DEPTH_FORMAT};
use super::textures::TextureUnits;
use super::uniforms::uniform_layout_entries;

/// Layouts shared by every pass: group 0 for uniform blocks, group 1 for
/// the channel texture/sampler pairs.
pub(crate) struct PipelineLayouts {
    pub uniform_layout: wgpu::BindGroupLayout,
    pub channel_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
}

impl PipelineLayouts {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &uniform_layout_entries(),
        });
        let channel_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("channel layout"),
            entries: &build_channel_layout_entries(),
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pass pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &channel_layout],
            push_constant_ranges: &[],
        });
        Self {
            uniform_layout,
            channel_layout,
            pipeline_layout,
        }
    }
}

/// Creates the render pipeline for one pass. Offscreen passes depth-test
/// against the target's depth buffer; the surface pass has none.
pub(crate) fn build_pass_pipeline(
    device: &wgpu::Device,
    layouts: &PipelineLayouts,
    program: &ShaderProgram,
    target: PassTarget,
    surface_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let (format, depth_stencil) = match target {
        PassTarget::Offscreen => (
            OFFSCREEN_COLOR_FORMAT,
            Some(wgpu::DepthStencilState {
                format: OFFSCREEN_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
        ),
        PassTarget::Surface => (surface_format, None),
    };

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&format!("{} pipeline", program.label)),
        layout: Some(&layouts.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &program.vertex,
            entry_point: Some("main"),
            buffers: &[QuadGeometry::layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: Some(wgpu::Face::Back),
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &program.fragment,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}

/// Channel bind groups for every unit assignment and offscreen parity,
/// created once before the first frame.
pub(crate) struct ChannelBindGroups {
    groups: Vec<wgpu::BindGroup>,
}

impl ChannelBindGroups {
    pub(crate) fn new(
        device: &wgpu::Device,
        layouts: &PipelineLayouts,
        units: &TextureUnits,
        offscreen: &OffscreenTarget,
    ) -> Result<Self, RenderError> {
        let mut groups = Vec::with_capacity(TEXTURE_UNIT_COUNT * TEXTURE_UNIT_COUNT * 2);
        for first in 0..TEXTURE_UNIT_COUNT {
            for second in 0..TEXTURE_UNIT_COUNT {
                for front in 0..2 {
                    let assignment = [TextureUnit(first as u32), TextureUnit(second as u32)];
                    let mut resources = Vec::with_capacity(CHANNEL_COUNT);
                    for unit in assignment {
                        resources.push(units.resolve(unit, offscreen, front)?);
                    }
                    let entries = build_channel_entries(&resources);
                    groups.push(device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some(&format!(
                            "channels [{first}, {second}] front #{front}"
                        )),
                        layout: &layouts.channel_layout,
                        entries: &entries,
                    }));
                }
            }
        }
        Ok(Self { groups })
    }

    pub(crate) fn get(
        &self,
        assignment: [TextureUnit; CHANNEL_COUNT],
        front: usize,
    ) -> Option<&wgpu::BindGroup> {
        let [first, second] = assignment.map(TextureUnit::index);
        if first >= TEXTURE_UNIT_COUNT || second >= TEXTURE_UNIT_COUNT || front > 1 {
            return None;
        }
        self.groups
            .get((first * TEXTURE_UNIT_COUNT + second) * 2 + front)
    }
}

fn build_channel_entries<'a>(
    resources: &[(&'a wgpu::TextureView, &'a wgpu::Sampler)],
) -> Vec<wgpu::BindGroupEntry<'a>> {
    let mut entries = Vec::with_capacity(resources.len() * 2);
    for (index, (view, sampler)) in resources.iter().enumerate() {
        entries.push(wgpu::BindGroupEntry {
            binding: (index as u32) * 2,
            resource: wgpu::BindingResource::TextureView(view),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: (index as u32) * 2 + 1,
            resource: wgpu::BindingResource::Sampler(sampler),
        });
    }
    entries
}

fn build_channel_layout_entries() -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(CHANNEL_COUNT * 2);
    for index in 0..CHANNEL_COUNT as u32 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_layout_pairs_texture_with_sampler() {
        let entries = build_channel_layout_entries();
        assert_eq!(entries.len(), CHANNEL_COUNT * 2);
        for (index, entry) in entries.iter().enumerate() {
            assert_eq!(entry.binding, index as u32);
            let is_texture = matches!(entry.ty, wgpu::BindingType::Texture { .. });
            assert_eq!(is_texture, index % 2 == 0);
        }
    }
}

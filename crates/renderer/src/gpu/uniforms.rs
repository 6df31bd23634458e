use bytemuck::{Pod, Zeroable};

use crate::compile::{UniformName, UniformSlot, UniformSlots, UNIFORM_GROUP};
use crate::frame::PassUniforms;

/// Names backed by a uniform buffer. Channels are selected through bind
/// groups instead.
pub(crate) const BUFFER_UNIFORMS: [UniformName; 3] = [
    UniformName::Resolution,
    UniformName::GlobalTime,
    UniformName::Random,
];

/// One std140 uniform block. A `vec3` or a lone `float` both occupy a full
/// 16-byte slot.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub(crate) struct Std140Block {
    pub value: [f32; 4],
}

impl Std140Block {
    pub(crate) const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    fn scalar(value: f32) -> Self {
        Self {
            value: [value, 0.0, 0.0, 0.0],
        }
    }

    fn vec3(value: [f32; 3]) -> Self {
        Self {
            value: [value[0], value[1], value[2], 0.0],
        }
    }
}

/// A pending write to the block at `binding` of the uniform group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct UniformWrite {
    pub name: UniformName,
    pub binding: u32,
    pub block: Std140Block,
}

/// Blocks to upload for one pass. Names the program never reads are
/// dropped here.
pub(crate) fn uniform_writes(slots: &UniformSlots, uniforms: &PassUniforms) -> Vec<UniformWrite> {
    BUFFER_UNIFORMS
        .iter()
        .filter_map(|name| {
            let UniformSlot::Bound { group, binding } = slots.get(*name) else {
                return None;
            };
            debug_assert_eq!(group, UNIFORM_GROUP);
            let block = match name {
                UniformName::Resolution => Std140Block::vec3(uniforms.resolution),
                UniformName::GlobalTime => Std140Block::scalar(uniforms.global_time),
                UniformName::Random => Std140Block::scalar(uniforms.random),
                UniformName::Channel0 | UniformName::Channel1 => return None,
            };
            Some(UniformWrite {
                name: *name,
                binding,
                block,
            })
        })
        .collect()
}

/// Per-pass uniform buffers and the bind group exposing them.
pub(crate) struct PassUniformBuffers {
    buffers: Vec<wgpu::Buffer>,
    pub bind_group: wgpu::BindGroup,
}

impl PassUniformBuffers {
    pub(crate) fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, label: &str) -> Self {
        let buffers: Vec<wgpu::Buffer> = BUFFER_UNIFORMS
            .iter()
            .map(|name| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{label} {name}")),
                    size: Std140Block::SIZE,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();
        let entries: Vec<wgpu::BindGroupEntry<'_>> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label} uniforms")),
            layout,
            entries: &entries,
        });
        Self {
            buffers,
            bind_group,
        }
    }

    pub(crate) fn apply(&self, queue: &wgpu::Queue, writes: &[UniformWrite]) {
        for write in writes {
            if let Some(buffer) = self.buffers.get(write.binding as usize) {
                tracing::trace!(uniform = %write.name, value = ?write.block.value, "uniform write");
                queue.write_buffer(buffer, 0, bytemuck::bytes_of(&write.block));
            }
        }
    }
}

pub(crate) fn uniform_layout_entries() -> Vec<wgpu::BindGroupLayoutEntry> {
    (0..BUFFER_UNIFORMS.len() as u32)
        .map(|binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect()
}

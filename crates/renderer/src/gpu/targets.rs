use crate::error::{IncompleteTarget, RenderError};

use super::context::checked;

pub(crate) const OFFSCREEN_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub(crate) const OFFSCREEN_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth16Unorm;

/// Attachment point on a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttachmentSlot {
    Color(u32),
    Depth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AttachmentDesc {
    pub slot: AttachmentSlot,
    pub format: wgpu::TextureFormat,
    pub size: (u32, u32),
    pub usage: wgpu::TextureUsages,
}

/// Everything needed to decide whether a target can be drawn to, described
/// before any GPU memory is allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TargetLayout {
    pub size: (u32, u32),
    pub attachments: Vec<AttachmentDesc>,
}

impl TargetLayout {
    /// Two ping-pong color attachments plus depth, all at `size`.
    pub(crate) fn offscreen(size: (u32, u32)) -> Self {
        let color_usage =
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        let color = |index| AttachmentDesc {
            slot: AttachmentSlot::Color(index),
            format: OFFSCREEN_COLOR_FORMAT,
            size,
            usage: color_usage,
        };
        Self {
            size,
            attachments: vec![
                color(0),
                color(1),
                AttachmentDesc {
                    slot: AttachmentSlot::Depth,
                    format: OFFSCREEN_DEPTH_FORMAT,
                    size,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                },
            ],
        }
    }
}

/// Validates a target layout against the device. The first problem found
/// decides the reported kind.
pub(crate) fn check_completeness(
    layout: &TargetLayout,
    max_dimension: u32,
    features: wgpu::Features,
) -> Result<(), IncompleteTarget> {
    if !layout
        .attachments
        .iter()
        .any(|attachment| matches!(attachment.slot, AttachmentSlot::Color(_)))
    {
        return Err(IncompleteTarget::MissingAttachment(
            "no color attachment".into(),
        ));
    }

    for attachment in &layout.attachments {
        let name = match attachment.slot {
            AttachmentSlot::Color(index) => format!("color attachment {index}"),
            AttachmentSlot::Depth => "depth attachment".to_string(),
        };
        let (width, height) = attachment.size;

        if width == 0 || height == 0 {
            return Err(IncompleteTarget::IncompleteAttachment(format!(
                "{name} has zero size {width}x{height}"
            )));
        }
        if attachment.size != layout.size {
            return Err(IncompleteTarget::IncompleteAttachment(format!(
                "{name} is {width}x{height} but the target is {}x{}",
                layout.size.0, layout.size.1
            )));
        }

        let is_depth = attachment.format.is_depth_stencil_format();
        match attachment.slot {
            AttachmentSlot::Color(_) if is_depth => {
                return Err(IncompleteTarget::IncompleteAttachment(format!(
                    "{name} uses depth format {:?}",
                    attachment.format
                )));
            }
            AttachmentSlot::Depth if !is_depth => {
                return Err(IncompleteTarget::IncompleteAttachment(format!(
                    "{name} uses color format {:?}",
                    attachment.format
                )));
            }
            _ => {}
        }

        if width > max_dimension || height > max_dimension {
            return Err(IncompleteTarget::Unsupported(format!(
                "{name} is {width}x{height}, device limit is {max_dimension}"
            )));
        }
        let allowed = attachment
            .format
            .guaranteed_format_features(features)
            .allowed_usages;
        if !allowed.contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
            return Err(IncompleteTarget::Unsupported(format!(
                "{:?} cannot be rendered to",
                attachment.format
            )));
        }

        if !attachment
            .usage
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
        {
            return Err(IncompleteTarget::IncompleteDrawBuffer(format!(
                "{name} is not usable as a render attachment"
            )));
        }
        if matches!(attachment.slot, AttachmentSlot::Color(_))
            && !attachment
                .usage
                .contains(wgpu::TextureUsages::TEXTURE_BINDING)
        {
            return Err(IncompleteTarget::IncompleteReadBuffer(format!(
                "{name} cannot be sampled by later passes"
            )));
        }
    }

    Ok(())
}

struct ColorBuffer {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// The reduced-resolution framebuffer: two color textures that trade
/// places after each offscreen pass, plus a shared depth buffer.
pub(crate) struct OffscreenTarget {
    size: (u32, u32),
    colors: [ColorBuffer; 2],
    _depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
    front: usize,
}

impl OffscreenTarget {
    pub(crate) fn new(
        device: &wgpu::Device,
        limits: &wgpu::Limits,
        features: wgpu::Features,
        size: (u32, u32),
    ) -> Result<Self, RenderError> {
        let layout = TargetLayout::offscreen(size);
        check_completeness(&layout, limits.max_texture_dimension_2d, features)?;

        let allocated = checked(device, "FBO", || {
            let colors = [0, 1].map(|index| {
                let texture = device.create_texture(&texture_descriptor(
                    &layout.attachments[index],
                    &format!("offscreen color #{index}"),
                ));
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                ColorBuffer {
                    _texture: texture,
                    view,
                }
            });
            let depth = device.create_texture(&texture_descriptor(
                &layout.attachments[2],
                "offscreen depth",
            ));
            let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
            (colors, depth, depth_view)
        });
        let (colors, depth, depth_view) = allocated.map_err(|err| match err {
            RenderError::Gpu { message, .. } => RenderError::from(IncompleteTarget::Unknown(message)),
            other => other,
        })?;

        tracing::debug!(
            width = size.0,
            height = size.1,
            color = ?OFFSCREEN_COLOR_FORMAT,
            depth = ?OFFSCREEN_DEPTH_FORMAT,
            "created offscreen target"
        );

        Ok(Self {
            size,
            colors,
            _depth: depth,
            depth_view,
            front: 0,
        })
    }

    pub(crate) fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Index of the texture holding the most recent completed result.
    pub(crate) fn front(&self) -> usize {
        self.front
    }

    pub(crate) fn color_view(&self, index: usize) -> &wgpu::TextureView {
        &self.colors[index % 2].view
    }

    /// The texture the next offscreen pass writes.
    pub(crate) fn back_view(&self) -> &wgpu::TextureView {
        self.color_view(self.front + 1)
    }

    pub(crate) fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth_view
    }

    /// Publishes the back texture as the new front.
    pub(crate) fn swap(&mut self) {
        self.front = 1 - self.front;
    }
}

fn texture_descriptor<'a>(
    attachment: &AttachmentDesc,
    label: &'a str,
) -> wgpu::TextureDescriptor<'a> {
    wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: attachment.size.0,
            height: attachment.size.1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: attachment.format,
        usage: attachment.usage,
        view_formats: &[],
    }
}

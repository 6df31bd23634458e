use std::path::Path;

use image::imageops::flip_vertical_in_place;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::error::{RenderError, TextureError};
use crate::types::{NoiseDecodePolicy, TextureUnit, TEXTURE_UNIT_COUNT};

use super::context::checked;
use super::targets::OffscreenTarget;

pub(crate) const FALLBACK_NOISE_SIZE: u32 = 256;
const FALLBACK_NOISE_SEED: u64 = 0x5ce9_e9a5;

/// Single-channel 8-bit pixels, bottom row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NoiseImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub(crate) fn decode_noise(path: &Path) -> Result<NoiseImage, TextureError> {
    let image = image::open(path).map_err(|source| TextureError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let mut luma = image.to_luma8();
    if luma.width() == 0 || luma.height() == 0 {
        return Err(TextureError::Empty {
            path: path.to_path_buf(),
        });
    }
    flip_vertical_in_place(&mut luma);
    Ok(NoiseImage {
        width: luma.width(),
        height: luma.height(),
        pixels: luma.into_raw(),
    })
}

/// Deterministic white noise used when the configured image is unusable.
pub(crate) fn fallback_noise() -> NoiseImage {
    let mut rng = StdRng::seed_from_u64(FALLBACK_NOISE_SEED);
    let len = (FALLBACK_NOISE_SIZE * FALLBACK_NOISE_SIZE) as usize;
    let pixels = (0..len).map(|_| rng.gen::<u8>()).collect();
    NoiseImage {
        width: FALLBACK_NOISE_SIZE,
        height: FALLBACK_NOISE_SIZE,
        pixels,
    }
}

pub(crate) fn load_noise(
    path: &Path,
    policy: NoiseDecodePolicy,
) -> Result<NoiseImage, TextureError> {
    match decode_noise(path) {
        Ok(image) => {
            tracing::debug!(
                path = %path.display(),
                width = image.width,
                height = image.height,
                "decoded noise texture"
            );
            Ok(image)
        }
        Err(err) => match policy {
            NoiseDecodePolicy::Fail => Err(err),
            NoiseDecodePolicy::Fallback => {
                tracing::warn!(
                    error = %err,
                    "noise texture unusable; substituting generated noise"
                );
                Ok(fallback_noise())
            }
        },
    }
}

struct UnitTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// Resources behind the fixed texture-unit table.
///
/// Unit 0 owns the noise texture. Unit 1 has no texture of its own and
/// resolves to whichever offscreen color buffer is the front at bind time.
pub(crate) struct TextureUnits {
    noise: UnitTexture,
    noise_sampler: wgpu::Sampler,
    offscreen_sampler: wgpu::Sampler,
}

impl TextureUnits {
    pub(crate) fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &NoiseImage,
    ) -> Result<Self, RenderError> {
        let (noise, noise_sampler, offscreen_sampler) = checked(device, "noise", || {
            let texture = device.create_texture_with_data(
                queue,
                &wgpu::TextureDescriptor {
                    label: Some("noise texture"),
                    size: wgpu::Extent3d {
                        width: image.width,
                        height: image.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::R8Unorm,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                },
                TextureDataOrder::LayerMajor,
                &image.pixels,
            );
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let noise_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("noise sampler"),
                address_mode_u: wgpu::AddressMode::Repeat,
                address_mode_v: wgpu::AddressMode::Repeat,
                address_mode_w: wgpu::AddressMode::Repeat,
                mag_filter: wgpu::FilterMode::Nearest,
                min_filter: wgpu::FilterMode::Nearest,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            });
            let offscreen_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("offscreen color sampler"),
                address_mode_u: wgpu::AddressMode::Repeat,
                address_mode_v: wgpu::AddressMode::Repeat,
                address_mode_w: wgpu::AddressMode::Repeat,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            });
            (
                UnitTexture {
                    _texture: texture,
                    view,
                },
                noise_sampler,
                offscreen_sampler,
            )
        })?;

        tracing::debug!(unit = %TextureUnit::NOISE, "bound noise texture");
        Ok(Self {
            noise,
            noise_sampler,
            offscreen_sampler,
        })
    }

    /// View and sampler a unit exposes when the offscreen front buffer is
    /// `front`.
    pub(crate) fn resolve<'a>(
        &'a self,
        unit: TextureUnit,
        offscreen: &'a OffscreenTarget,
        front: usize,
    ) -> Result<(&'a wgpu::TextureView, &'a wgpu::Sampler), RenderError> {
        match unit {
            TextureUnit::NOISE => Ok((&self.noise.view, &self.noise_sampler)),
            TextureUnit::OFFSCREEN_COLOR => {
                Ok((offscreen.color_view(front), &self.offscreen_sampler))
            }
            other => Err(RenderError::Pipeline(format!(
                "{other} is outside the {TEXTURE_UNIT_COUNT}-unit table"
            ))),
        }
    }
}

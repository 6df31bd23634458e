//! GPU side of the pipeline.
//!
//! - `context` owns the wgpu instance, device and surface, and wraps fallible
//!   calls in labelled error-scope checkpoints.
//! - `programs` turns linked GLSL pairs into shader modules.
//! - `targets` checks and allocates the ping-pong offscreen framebuffer.
//! - `textures` loads the noise image and resolves the fixed unit table.
//! - `geometry` uploads the full-screen quad.
//! - `uniforms` packs std140 blocks and drops writes to absent slots.
//! - `pipeline` builds per-pass pipelines and the channel bind groups.
//! - `state` glues everything together and executes passes for the frame
//!   driver.

mod context;
mod geometry;
mod pipeline;
mod programs;
mod state;
mod targets;
mod textures;
mod uniforms;

pub(crate) use state::GpuState;

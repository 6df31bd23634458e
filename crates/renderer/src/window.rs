use std::sync::Arc;

use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Fullscreen, WindowBuilder};

use crate::error::RenderError;
use crate::frame::{CloseSignal, FrameDriver};
use crate::gpu::GpuState;
use crate::runtime::{SystemTimeSource, TimeSource};
use crate::types::{RendererConfig, WindowMode};

/// Whether a key event should raise the close signal.
pub(crate) fn is_close_key(key: &Key, state: ElementState) -> bool {
    state == ElementState::Pressed && matches!(key, Key::Named(NamedKey::Escape))
}

/// Opens the host window, builds every GPU resource and drives frames until
/// the close signal is observed or a fatal error occurs.
pub(crate) fn run_host(config: RendererConfig) -> Result<(), RenderError> {
    let event_loop = EventLoop::new()
        .map_err(|err| RenderError::Host(format!("failed to create event loop: {err}")))?;

    let monitor = event_loop.primary_monitor();
    let display_size = match (config.window_mode, monitor.as_ref()) {
        (WindowMode::Fullscreen, Some(monitor)) => {
            let size = monitor.size();
            (size.width, size.height)
        }
        (WindowMode::Fullscreen, None) => {
            tracing::warn!(
                width = config.surface_size.0,
                height = config.surface_size.1,
                "no monitor reported; using the configured size"
            );
            config.surface_size
        }
        (WindowMode::Windowed, _) => config.surface_size,
    };
    let display_size = (display_size.0.max(1), display_size.1.max(1));

    let mut builder = WindowBuilder::new()
        .with_title("scenepass")
        .with_inner_size(PhysicalSize::new(display_size.0, display_size.1));
    if config.window_mode == WindowMode::Fullscreen {
        builder = builder
            .with_decorations(false)
            .with_fullscreen(Some(Fullscreen::Borderless(monitor)));
    }
    let window = builder
        .build(&event_loop)
        .map_err(|err| RenderError::Host(format!("failed to create window: {err}")))?;
    let window = Arc::new(window);
    if config.window_mode == WindowMode::Fullscreen {
        window.set_cursor_visible(false);
    }

    let offscreen_size = config.offscreen.resolve(display_size);
    let mut initial_size = window.inner_size();
    if initial_size.width == 0 || initial_size.height == 0 {
        initial_size = PhysicalSize::new(display_size.0, display_size.1);
    }
    tracing::info!(
        display_width = display_size.0,
        display_height = display_size.1,
        offscreen_width = offscreen_size.0,
        offscreen_height = offscreen_size.1,
        passes = config.pipeline.passes.len(),
        "starting renderer"
    );

    let mut gpu = GpuState::new(window.as_ref(), initial_size, offscreen_size, &config)?;
    let surface_size = gpu.size();
    let mut driver = FrameDriver::new(
        &config.pipeline,
        offscreen_size,
        (surface_size.width, surface_size.height),
        config.random_seed,
        config.fps_report_frames,
    );
    let mut close = CloseSignal::new(config.exit_after);
    let mut clock = SystemTimeSource::new();
    let mut failure: Option<RenderError> = None;

    clock.reset();
    let run_result = event_loop.run(|event, elwt| {
        elwt.set_control_flow(ControlFlow::Poll);
        match event {
            Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                    close.request();
                }
                WindowEvent::KeyboardInput { event, .. } => {
                    if is_close_key(&event.logical_key, event.state) {
                        tracing::debug!("close key pressed");
                        close.request();
                    }
                }
                WindowEvent::Resized(new_size) => {
                    gpu.resize(new_size);
                    let size = gpu.size();
                    driver.set_present_size((size.width, size.height));
                }
                WindowEvent::RedrawRequested => {
                    let sample = clock.sample();
                    if close.poll(sample.seconds) {
                        driver.request_shutdown();
                        elwt.exit();
                        return;
                    }
                    if let Err(err) = driver.run_frame(&mut gpu, sample) {
                        failure = Some(err);
                        elwt.exit();
                    }
                }
                _ => {}
            },
            Event::AboutToWait => {
                if driver.is_shutdown() {
                    elwt.exit();
                } else {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    });

    if let Some(err) = failure {
        return Err(err);
    }
    run_result.map_err(|err| RenderError::Host(format!("window event loop error: {err}")))?;
    tracing::info!(frames = driver.state().frame_count, "renderer closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::keyboard::SmolStr;

    #[test]
    fn escape_press_closes() {
        assert!(is_close_key(
            &Key::Named(NamedKey::Escape),
            ElementState::Pressed
        ));
    }

    #[test]
    fn other_keys_and_releases_do_not_close() {
        assert!(!is_close_key(
            &Key::Named(NamedKey::Escape),
            ElementState::Released
        ));
        assert!(!is_close_key(
            &Key::Named(NamedKey::Space),
            ElementState::Pressed
        ));
        assert!(!is_close_key(
            &Key::Character(SmolStr::new("q")),
            ElementState::Pressed
        ));
    }
}

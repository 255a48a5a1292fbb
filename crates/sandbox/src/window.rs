//! Windowed front end: a winit event loop driving a [`Session`].

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, Event, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Fullscreen, Window, WindowBuilder, WindowLevel};

use crate::backend::GpuBackend;
use crate::gpu::WgpuBackend;
use crate::sandbox::ExitMode;
use crate::session::{Session, Tick};
use crate::types::{SandboxConfig, Size, WindowStyle};

#[derive(Default)]
struct PointerState {
    position: Option<PhysicalPosition<f64>>,
    dragging: bool,
}

fn build_window(event_loop: &EventLoop<()>, config: &SandboxConfig) -> Result<Window> {
    let mut builder = WindowBuilder::new()
        .with_title("shadebox")
        .with_inner_size(PhysicalSize::new(config.size.width, config.size.height));
    if let Some((x, y)) = config.position {
        builder = builder.with_position(PhysicalPosition::new(x, y));
    }
    builder = match config.style {
        WindowStyle::Fullscreen => builder.with_fullscreen(Some(Fullscreen::Borderless(None))),
        WindowStyle::AlwaysOnTop => builder
            .with_window_level(WindowLevel::AlwaysOnTop)
            .with_decorations(false),
        WindowStyle::Regular | WindowStyle::Headless => builder,
    };
    builder
        .build(event_loop)
        .map_err(|err| anyhow!("failed to create window: {err}"))
}

/// Opens the window, hands a presenting backend to `start`, and runs the session
/// it returns until the window closes or an exit is requested.
pub fn run_windowed<F>(config: &SandboxConfig, start: F) -> Result<()>
where
    F: FnOnce(Box<dyn GpuBackend>, Size) -> Result<Session>,
{
    let event_loop = EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = Arc::new(build_window(&event_loop, config)?);
    let inner = window.inner_size();
    let size = Size::new(inner.width.max(1), inner.height.max(1));

    let backend = WgpuBackend::windowed(window.as_ref(), size)?;
    let mut session = Some(start(Box::new(backend), size)?);
    if let Some(session) = session.as_mut() {
        session.sandbox_mut().set_pixel_density(window.scale_factor() as f32);
    }

    let mut pointer = PointerState::default();
    let window_id = window.id();

    let run_result = event_loop.run(|event, elwt| {
        let Some(active) = session.as_mut() else {
            return;
        };
        match event {
            Event::WindowEvent { window_id: id, event } if id == window_id => match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
                WindowEvent::KeyboardInput { event, .. } => {
                    if event.state != ElementState::Pressed || event.repeat {
                        return;
                    }
                    match event.logical_key {
                        Key::Named(NamedKey::Escape) => {
                            active.sandbox_mut().request_exit(ExitMode::Immediate);
                        }
                        Key::Character(ref value) if value.as_str() == "q" => {
                            active.sandbox_mut().request_exit(ExitMode::Immediate);
                        }
                        _ => {}
                    }
                }
                WindowEvent::CursorMoved { position, .. } => {
                    let height = window.inner_size().height as f64;
                    let sandbox = active.sandbox_mut();
                    if let (true, Some(previous)) = (pointer.dragging, pointer.position) {
                        sandbox.drag(
                            (position.x - previous.x) as f32,
                            (position.y - previous.y) as f32,
                        );
                    }
                    sandbox.set_mouse(position.x as f32, (height - position.y) as f32);
                    pointer.position = Some(position);
                }
                WindowEvent::CursorLeft { .. } => {
                    pointer.position = None;
                    active.sandbox_mut().mouse_left();
                }
                WindowEvent::MouseInput {
                    state,
                    button: MouseButton::Left,
                    ..
                } => {
                    pointer.dragging = state == ElementState::Pressed;
                }
                WindowEvent::MouseWheel { delta, .. } => {
                    let steps = match delta {
                        MouseScrollDelta::LineDelta(_, y) => y,
                        MouseScrollDelta::PixelDelta(offset) => (offset.y / 40.0) as f32,
                    };
                    active.sandbox_mut().scroll(steps);
                }
                WindowEvent::Resized(new_size) => {
                    let size = Size::new(new_size.width, new_size.height);
                    if let Err(err) = active.sandbox_mut().resize(size) {
                        tracing::error!(error = %err, "failed to resize render targets");
                    }
                }
                WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                    active.sandbox_mut().set_pixel_density(scale_factor as f32);
                }
                WindowEvent::RedrawRequested => {
                    active.sandbox_mut().uniforms.flag_change();
                }
                _ => {}
            },
            Event::AboutToWait => match active.tick(Instant::now()) {
                Tick::Exit => elwt.exit(),
                Tick::Rendered => elwt.set_control_flow(ControlFlow::Poll),
                Tick::Idle(wait) => {
                    elwt.set_control_flow(ControlFlow::WaitUntil(Instant::now() + wait));
                }
            },
            Event::LoopExiting => {
                if let Some(mut finished) = session.take() {
                    finished.finish();
                }
            }
            _ => {}
        }
    });

    if let Some(mut remaining) = session.take() {
        remaining.finish();
    }
    drop(window);
    run_result.map_err(|err| anyhow!("window event loop error: {err}"))
}

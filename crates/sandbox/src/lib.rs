//! Live-reloading GLSL sandbox engine.
//!
//! ```text
//!   files on disk ──▶ watch (poll thread) ──▶ change slot
//!                                                  │
//!   commands (stdin / OSC / -e) ──▶ Session::tick ─┼─▶ ReloadEngine ─▶ GpuBackend::compile_program
//!                                                  │
//!                                                  └─▶ Sandbox::render_frame
//!                                                        ├─ RenderGraph: buffers → main → pyramid → postprocessing
//!                                                        ├─ RecordingController ─▶ frame writer threads
//!                                                        └─ present + overlay
//! ```
//!
//! [`Sandbox`] owns the engine state and runs on the main thread. [`Session`]
//! adds the file watcher, the command queue, and frame pacing on top of it;
//! [`window::run_windowed`] and [`Session::run_headless`] drive a session.

pub mod backend;
pub mod camera;
pub mod command;
pub mod commands;
pub mod defaults;
pub mod error;
pub mod gpu;
pub mod graph;
pub mod interface;
pub mod preprocess;
pub mod record;
pub mod reload;
pub mod runtime;
pub mod sandbox;
pub mod session;
pub mod stream;
pub mod texture;
pub mod types;
pub mod uniforms;
pub mod watch;
pub mod window;

pub use backend::{DrawCall, GpuBackend, Overlay, ProgramId, ProgramSource, TargetId, TextureId, TextureRef};
pub use command::CommandRegistry;
pub use error::{CompileError, SandboxError, ShaderStage};
pub use gpu::WgpuBackend;
pub use record::{RecordError, RecordOptions, RecordingController};
pub use runtime::{EngineClock, FixedTimeSource, TimeSource};
pub use sandbox::{ExitMode, Output, Sandbox};
pub use session::{Session, Tick};
pub use texture::ImageData;
pub use types::{FileRole, SandboxConfig, Size, WindowStyle};
pub use uniforms::{Binding, UniformStore, UniformValue};
pub use watch::WatchedFileTable;

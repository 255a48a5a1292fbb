//! The engine context handed to every command handler.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::backend::{GpuBackend, Overlay};
use crate::command::CommandRegistry;
use crate::commands::builtin_commands;
use crate::defaults::{stub_for, SceneHint};
use crate::error::SandboxError;
use crate::graph::RenderGraph;
use crate::record::RecordingController;
use crate::reload::{ReloadEngine, ReloadOutcome};
use crate::runtime::{EngineClock, RenderWants};
use crate::stream::{is_sequence_pattern, ImageSequence, TextureStream};
use crate::texture::{load_image, save_png};
use crate::types::{FileRole, SandboxConfig, Size};
use crate::uniforms::{EngineState, StreamBinding, TextureBinding, UniformStore};
use crate::watch::{lock_table, SharedFileTable, WatchedFileTable};

pub type Output = Box<dyn Write + Send>;

/// How the loop should stop once asked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitMode {
    /// Stop before the next frame.
    Immediate,
    /// Finish the current frame, any recording and pending writes first.
    AfterFrame,
}

pub struct Sandbox {
    pub(crate) config: SandboxConfig,
    pub(crate) files: SharedFileTable,
    pub(crate) reload: ReloadEngine,
    pub(crate) uniforms: UniformStore,
    pub(crate) graph: RenderGraph,
    pub(crate) recorder: RecordingController,
    pub(crate) clock: EngineClock,
    pub(crate) state: EngineState,
    pub(crate) backend: Box<dyn GpuBackend>,
    pub(crate) size: Size,
    pub(crate) fps: f32,
    pub(crate) full_fps: bool,
    pub(crate) cursor: bool,
    pub(crate) mouse_inside: bool,
    pub(crate) exit: Option<ExitMode>,
    pub(crate) pending_screenshot: Option<PathBuf>,
    registry: Arc<CommandRegistry<Sandbox>>,
    out: Output,
    geometry: Option<usize>,
    texture_count: usize,
}

impl Sandbox {
    pub fn new(config: SandboxConfig, backend: Box<dyn GpuBackend>, out: Output) -> Self {
        let size = config.size;
        let mut state = EngineState {
            resolution: size.as_vec2(),
            ..EngineState::default()
        };
        state.camera.aspect = size.width as f32 / size.height.max(1) as f32;
        Self {
            files: Arc::new(std::sync::Mutex::new(WatchedFileTable::new())),
            reload: ReloadEngine::new(config.include_folders.clone(), &config.defines),
            uniforms: UniformStore::new(),
            graph: RenderGraph::new(size, config.pyramid_depth),
            recorder: RecordingController::new(config.record.clone()),
            clock: EngineClock::system(),
            state,
            backend,
            size,
            fps: config.fps,
            full_fps: config.full_fps,
            cursor: config.cursor,
            mouse_inside: false,
            exit: None,
            pending_screenshot: None,
            registry: Arc::new(builtin_commands()),
            out,
            geometry: None,
            texture_count: 0,
            config,
        }
    }

    /// Replaces the engine clock, e.g. with a fixed one for deterministic runs.
    pub fn with_clock(mut self, clock: EngineClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn files(&self) -> SharedFileTable {
        Arc::clone(&self.files)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn uniforms(&self) -> &UniformStore {
        &self.uniforms
    }

    pub fn reload_engine(&self) -> &ReloadEngine {
        &self.reload
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn recorder(&self) -> &RecordingController {
        &self.recorder
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn registry(&self) -> Arc<CommandRegistry<Sandbox>> {
        Arc::clone(&self.registry)
    }

    pub fn exit_requested(&self) -> Option<ExitMode> {
        self.exit
    }

    pub fn request_exit(&mut self, mode: ExitMode) {
        self.exit = Some(match (self.exit, mode) {
            (Some(ExitMode::Immediate), _) => ExitMode::Immediate,
            _ => mode,
        });
    }

    /// Writes one reply line to the protocol output.
    pub fn reply(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        let result = if text.ends_with('\n') {
            self.out.write_all(text.as_bytes())
        } else {
            writeln!(self.out, "{text}")
        };
        if let Err(err) = result.and_then(|()| self.out.flush()) {
            tracing::debug!(error = %err, "failed to write reply");
        }
    }

    /// Stub flavour for primaries that do not exist yet.
    pub fn scene_hint(paths: &[PathBuf]) -> SceneHint {
        let roles: Vec<Option<FileRole>> = paths.iter().map(|p| FileRole::from_path(p)).collect();
        if roles.contains(&Some(FileRole::Geometry)) {
            SceneHint::Geometry
        } else if roles.contains(&Some(FileRole::Image)) || paths.iter().any(|p| is_sequence_pattern(p)) {
            SceneHint::Texture
        } else {
            SceneHint::Bare
        }
    }

    /// Loads every file named on the command line, creating missing shaders from stubs.
    pub fn load_files(&mut self, paths: &[PathBuf]) -> Result<()> {
        let hint = Self::scene_hint(paths);
        for path in paths {
            if let Err(err) = self.load_file(path, hint) {
                tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "skipping file");
            }
        }
        Ok(())
    }

    /// Registers one input file under the role its extension implies.
    pub fn load_file(&mut self, path: &Path, hint: SceneHint) -> Result<()> {
        if is_sequence_pattern(path) {
            let name = format!("u_tex{}", self.texture_count);
            return self.add_stream(&name, path, 24.0);
        }
        let role = FileRole::from_path(path)
            .ok_or_else(|| SandboxError::missing(path, "unrecognised file type"))?;
        match role {
            FileRole::Fragment | FileRole::Vertex => {
                let taken = match role {
                    FileRole::Fragment => self.reload.fragment().is_some(),
                    _ => self.reload.vertex().is_some(),
                };
                if taken {
                    tracing::warn!(path = %path.display(), role = %role, "primary already loaded, ignoring");
                    return Ok(());
                }
                if !path.exists() {
                    if let Some(stub) = stub_for(role, hint) {
                        std::fs::write(path, stub)
                            .with_context(|| format!("failed to create {}", path.display()))?;
                        tracing::info!(path = %path.display(), "created shader from template");
                    }
                }
                let index = lock_table(&self.files).add(path, role);
                if let Err(err) = self.reload.set_primary(&self.files, index, role) {
                    tracing::error!(error = %err, "failed to read shader");
                }
            }
            FileRole::Image => {
                let name = format!("u_tex{}", self.texture_count);
                self.add_texture(&name, path)?;
            }
            FileRole::Geometry => {
                let index = lock_table(&self.files).add(path, role);
                self.geometry = Some(index);
                self.backend.load_geometry(path)?;
            }
            FileRole::Dependency => {
                lock_table(&self.files).add(path, role);
            }
        }
        Ok(())
    }

    /// Loads an image file as a watched texture bound to `name`.
    pub fn add_texture(&mut self, name: &str, path: &Path) -> Result<()> {
        let image = load_image(path, self.config.vflip)
            .map_err(|err| SandboxError::missing(path, format!("{err:#}")))?;
        let texture = self.backend.create_texture(name, &image)?;
        let watched = {
            let mut table = lock_table(&self.files);
            let index = table.add(path, FileRole::Image);
            table.get(index).map(|file| file.path().to_path_buf())
        };
        let binding = TextureBinding {
            name: name.to_string(),
            texture,
            size: image.size,
            path: watched.or_else(|| Some(path.to_path_buf())),
            flip: self.config.vflip,
        };
        if let Some(previous) = self.uniforms.add_texture(binding) {
            self.backend.release_texture(previous.texture);
        } else {
            self.texture_count += 1;
        }
        tracing::info!(name, path = %path.display(), size = %image.size, "loaded texture");
        Ok(())
    }

    /// Opens an image sequence as a streaming texture bound to `name`.
    pub fn add_stream(&mut self, name: &str, pattern: &Path, fps: f32) -> Result<()> {
        let stream = ImageSequence::open(pattern, fps, self.config.vflip)?;
        let texture = self.backend.create_texture(name, stream.first_frame())?;
        self.uniforms.add_stream(StreamBinding {
            name: name.to_string(),
            stream: Box::new(stream),
            texture,
        });
        self.texture_count += 1;
        Ok(())
    }

    /// Compiles the first program set. Fails only when no shader was given at all.
    pub fn init(&mut self) -> Result<()> {
        if self.reload.fragment().is_none() && self.reload.vertex().is_none() {
            return Err(SandboxError::FatalInit("no fragment or vertex shader to load".into()).into());
        }
        if let Err(err) = self.reload.rebuild_all(self.backend.as_mut(), &mut self.uniforms) {
            tracing::warn!(label = %err.label, "starting with the error screen");
        }
        if let Some(active) = self.reload.active() {
            self.graph.configure(self.backend.as_mut(), &active.layout)?;
        }
        self.graph.resize(self.backend.as_mut(), self.size)?;
        Ok(())
    }

    /// Reacts to a change reported by the file watcher.
    pub fn on_file_change(&mut self, index: usize) {
        let entry = lock_table(&self.files)
            .get(index)
            .map(|file| (file.role(), file.path().to_path_buf()));
        let Some((role, path)) = entry else {
            return;
        };
        tracing::info!(path = %path.display(), role = %role, "file changed");
        match role {
            FileRole::Image => self.reload_textures(&path),
            FileRole::Geometry => {
                if let Err(err) = self.backend.load_geometry(&path) {
                    tracing::warn!(error = %format!("{err:#}"), "geometry reload failed");
                }
            }
            FileRole::Fragment | FileRole::Vertex | FileRole::Dependency => {
                match self
                    .reload
                    .reload(index, &self.files, self.backend.as_mut(), &mut self.uniforms)
                {
                    Ok(ReloadOutcome::Rebuilt) | Ok(ReloadOutcome::Skipped) => {}
                    Err(err) => tracing::debug!(label = %err.label, "reload kept previous programs"),
                }
            }
        }
        self.uniforms.flag_change();
    }

    fn reload_textures(&mut self, path: &Path) {
        let bindings: Vec<TextureBinding> = self.uniforms.textures_from(path).cloned().collect();
        for binding in bindings {
            match load_image(path, binding.flip) {
                Ok(image) if image.size == binding.size => {
                    if let Err(err) = self.backend.update_texture(binding.texture, &image) {
                        tracing::warn!(error = %format!("{err:#}"), "texture upload failed");
                    }
                }
                Ok(_) => {
                    if let Err(err) = self.add_texture(&binding.name, path) {
                        tracing::warn!(error = %format!("{err:#}"), "texture reload failed");
                    }
                }
                Err(err) => tracing::warn!(error = %format!("{err:#}"), "texture reload failed"),
            }
        }
    }

    /// Recompiles every program with the current sources and defines.
    pub fn rebuild(&mut self) {
        if let Err(err) = self.reload.rebuild_all(self.backend.as_mut(), &mut self.uniforms) {
            tracing::debug!(label = %err.label, "rebuild kept previous programs");
        }
    }

    /// Runs one protocol line. Unknown commands fall back to uniform assignment.
    pub fn run_command(&mut self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() {
            return false;
        }
        let registry = Arc::clone(&self.registry);
        if registry.dispatch(self, line) {
            return true;
        }
        if self.uniforms.parse_line(line) {
            return true;
        }
        tracing::debug!(line, "ignoring unknown command");
        false
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn wants(&self, pending_command: bool) -> RenderWants {
        RenderWants {
            change: self.uniforms.have_change() || self.pending_screenshot.is_some(),
            full_fps: self.full_fps,
            pending_command: pending_command || self.exit == Some(ExitMode::AfterFrame),
            recording: self.recorder.is_recording(),
        }
    }

    /// Renders, captures and presents one frame.
    pub fn render_frame(&mut self) -> Result<()> {
        if let Some(head) = self.recorder.head_seconds() {
            self.clock.force(head);
        }
        let sample = self.clock.tick();
        self.state.time = sample.seconds;
        self.state.delta = match self.recorder.frame_delta() {
            Some(delta) => delta as f32,
            None => sample.delta,
        };
        self.state.frame = sample.frame;
        self.state.resolution = self.size.as_vec2();
        self.state.refresh_date();

        let recording = self.recorder.is_recording();
        self.uniforms
            .update_streams(self.backend.as_mut(), self.state.time, recording)?;

        let error_program = self
            .reload
            .error_screen()
            .then(|| self.reload.error_program().cloned())
            .flatten();
        if let Some(program) = error_program {
            self.graph
                .execute_single(self.backend.as_mut(), &program, &self.uniforms, &self.state)?;
        } else if let Some(set) = self.reload.active() {
            self.graph
                .execute(self.backend.as_mut(), set, &self.uniforms, &self.state)?;
        }

        let Some(output) = self.graph.output() else {
            return Ok(());
        };
        if self.recorder.is_recording() {
            let image = self.backend.read_pixels(output)?;
            if let Err(err) = self.recorder.capture(image) {
                tracing::error!(error = %err, "failed to capture frame");
            }
        }
        if let Some(path) = self.pending_screenshot.take() {
            let image = self.backend.read_pixels(output)?;
            match save_png(&path, image) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), "saved screenshot");
                    self.reply(path.display().to_string());
                }
                Err(err) => tracing::error!(error = %format!("{err:#}"), "failed to save screenshot"),
            }
        }

        let overlay = Overlay {
            cursor: (self.cursor && self.mouse_inside).then_some(self.state.mouse),
        };
        self.backend.present(output, &overlay)?;
        self.uniforms.clear_change();
        Ok(())
    }

    pub fn resize(&mut self, size: Size) -> Result<()> {
        if size.is_empty() || size == self.size {
            return Ok(());
        }
        self.size = size;
        self.state.resolution = size.as_vec2();
        self.state.camera.aspect = size.width as f32 / size.height.max(1) as f32;
        self.backend.resize_surface(size);
        self.graph.resize(self.backend.as_mut(), size)?;
        self.uniforms.flag_change();
        Ok(())
    }

    /// Cursor position in pixels, origin at the bottom-left corner.
    pub fn set_mouse(&mut self, x: f32, y: f32) {
        self.state.mouse = [x, y];
        self.mouse_inside = true;
        self.uniforms.flag_change();
    }

    pub fn mouse_left(&mut self) {
        self.mouse_inside = false;
    }

    /// Orbits the camera by a drag of `dx`, `dy` pixels.
    pub fn drag(&mut self, dx: f32, dy: f32) {
        let scale = 180.0 / self.size.height.max(1) as f32;
        self.state.camera.orbit(-dx * scale, dy * scale);
        self.uniforms.flag_change();
    }

    pub fn scroll(&mut self, steps: f32) {
        self.state.camera.zoom(steps);
        self.uniforms.flag_change();
    }

    pub fn set_pixel_density(&mut self, density: f32) {
        self.state.pixel_density = density;
    }

    /// Saves the next composited frame to `path`.
    pub fn screenshot(&mut self, path: PathBuf) {
        self.pending_screenshot = Some(path);
    }

    /// Waits for every queued recording frame to be written.
    pub fn flush(&self) {
        self.recorder.flush();
    }

    pub fn shutdown(&mut self) {
        self.recorder.flush();
        self.graph.release(self.backend.as_mut());
        self.reload.release(self.backend.as_mut());
    }
}

//! The narrow seam between the engine and a GPU API.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

use crate::error::{CompileError, SandboxError};
use crate::texture::ImageData;
use crate::types::Size;
use crate::uniforms::{Binding, UniformSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Something a sampler uniform can read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureRef {
    Texture(TextureId),
    Target(TargetId),
}

/// Final, include-resolved source text of one program plus the defines to inject.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramSource {
    pub label: String,
    pub vertex: String,
    pub fragment: String,
    pub defines: Vec<(String, Option<String>)>,
}

/// One full-target draw of `program` into `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub program: ProgramId,
    pub target: TargetId,
    pub bindings: BTreeMap<String, Binding>,
}

impl DrawCall {
    pub fn new(program: ProgramId, target: TargetId) -> Self {
        Self {
            program,
            target,
            bindings: BTreeMap::new(),
        }
    }
}

impl UniformSink for DrawCall {
    fn bind(&mut self, name: &str, binding: Binding) {
        self.bindings.insert(name.to_string(), binding);
    }
}

/// Drawn on top of the presented frame, after any capture.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Overlay {
    /// Cursor position in pixels, origin at the bottom-left corner.
    pub cursor: Option<[f32; 2]>,
}

/// GPU operations the engine needs. Everything here runs on the main thread.
pub trait GpuBackend {
    fn compile_program(&mut self, source: &ProgramSource) -> Result<ProgramId, CompileError>;
    fn release_program(&mut self, program: ProgramId);

    fn create_target(&mut self, label: &str, size: Size) -> Result<TargetId>;
    fn release_target(&mut self, target: TargetId);

    fn create_texture(&mut self, label: &str, image: &ImageData) -> Result<TextureId>;
    fn update_texture(&mut self, texture: TextureId, image: &ImageData) -> Result<()>;
    fn release_texture(&mut self, texture: TextureId);

    /// Uploads scene geometry. Backends without a mesh decoder report a missing resource.
    fn load_geometry(&mut self, path: &Path) -> Result<()> {
        Err(SandboxError::missing(path, "this backend cannot decode meshes").into())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()>;

    /// Reads a target back as RGBA8, bottom row first.
    fn read_pixels(&mut self, target: TargetId) -> Result<ImageData>;

    /// Blits `target` to the display surface and draws the overlay. No-op when headless.
    fn present(&mut self, target: TargetId, overlay: &Overlay) -> Result<()>;

    fn resize_surface(&mut self, _size: Size) {}
}

//! Multi-pass render graph: buffers, scene, convolution pyramid, postprocessing.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::Result;

use crate::backend::{DrawCall, GpuBackend, ProgramId, TargetId, TextureRef};
use crate::interface::ProgramInterface;
use crate::types::Size;
use crate::uniforms::{Binding, EngineState, UniformSink, UniformStore, UniformValue};

pub const SCENE_UNIFORM: &str = "u_scene";
pub const PYRAMID_UNIFORM: &str = "u_convolutionPyramid";
pub const PYRAMID_TEX0: &str = "u_convolutionPyramidTex0";
pub const PYRAMID_TEX1: &str = "u_convolutionPyramidTex1";
pub const PYRAMID_UPSCALING: &str = "u_convolutionPyramidUpscaling";
pub const MAX_PYRAMID_DEPTH: u32 = 12;

pub fn buffer_uniform(index: usize) -> String {
    format!("u_buffer{index}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Buffer(usize),
    Scene,
    PyramidDown(u32),
    PyramidUp(u32),
    Postprocess,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(index) => write!(f, "buffer{index}"),
            Self::Scene => f.write_str("scene"),
            Self::PyramidDown(level) => write!(f, "pyramid-down{level}"),
            Self::PyramidUp(level) => write!(f, "pyramid-up{level}"),
            Self::Postprocess => f.write_str("postprocessing"),
        }
    }
}

/// Pass structure derived from the fragment source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphLayout {
    pub buffers: usize,
    /// For each buffer, the buffers its section samples.
    pub buffer_deps: Vec<Vec<usize>>,
    pub postprocessing: bool,
    pub pyramid: bool,
}

impl GraphLayout {
    pub fn scene_offscreen(&self) -> bool {
        self.postprocessing || self.pyramid
    }
}

/// Buffers ordered so each renders after the buffers it reads.
///
/// Ties go by index. Buffers caught in a cycle are appended in index order.
pub fn buffer_order(deps: &[Vec<usize>]) -> Vec<usize> {
    let count = deps.len();
    let mut pending: Vec<BTreeSet<usize>> = deps
        .iter()
        .enumerate()
        .map(|(index, reads)| {
            reads
                .iter()
                .copied()
                .filter(|&dep| dep != index && dep < count)
                .collect()
        })
        .collect();
    let mut done = vec![false; count];
    let mut order = Vec::with_capacity(count);
    while let Some(next) = (0..count).find(|&index| !done[index] && pending[index].is_empty()) {
        done[next] = true;
        order.push(next);
        for reads in &mut pending {
            reads.remove(&next);
        }
    }
    if order.len() < count {
        tracing::debug!(?order, "buffer dependency cycle, falling back to index order");
        order.extend((0..count).filter(|&index| !done[index]));
    }
    order
}

/// Depth used when none is configured: as many halvings as the short side allows.
pub fn auto_pyramid_depth(size: Size) -> u32 {
    let short = size.width.min(size.height).max(1);
    short.ilog2().clamp(1, MAX_PYRAMID_DEPTH)
}

pub fn resolve_pyramid_depth(configured: u32, size: Size) -> u32 {
    if configured == 0 {
        auto_pyramid_depth(size)
    } else {
        configured.min(MAX_PYRAMID_DEPTH)
    }
}

/// Sizes of pyramid levels `0..=depth`; level 0 is the full resolution.
pub fn pyramid_level_sizes(size: Size, depth: u32) -> Vec<Size> {
    (0..=depth).map(|level| size.halved_n(level)).collect()
}

/// Pass order for one frame.
pub fn plan_passes(layout: &GraphLayout, depth: u32) -> Vec<PassKind> {
    let mut passes: Vec<PassKind> = buffer_order(&layout.buffer_deps)
        .into_iter()
        .map(PassKind::Buffer)
        .collect();
    passes.push(PassKind::Scene);
    if layout.pyramid {
        passes.extend((0..depth).map(PassKind::PyramidDown));
        passes.extend((0..depth).map(PassKind::PyramidUp));
    }
    if layout.scene_offscreen() {
        passes.push(PassKind::Postprocess);
    }
    passes
}

/// A compiled program and the uniforms it declares.
#[derive(Debug, Clone, PartialEq)]
pub struct PassProgram {
    pub id: ProgramId,
    pub interface: ProgramInterface,
}

/// Every program one frame of the graph needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramSet {
    pub main: PassProgram,
    pub buffers: Vec<PassProgram>,
    /// Present whenever the scene renders offscreen.
    pub postprocessing: Option<PassProgram>,
    /// Present whenever the pyramid is active.
    pub pyramid: Option<PassProgram>,
    pub layout: GraphLayout,
    /// Union of every stage's declarations.
    pub interface: ProgramInterface,
}

impl ProgramSet {
    pub fn ids(&self) -> Vec<ProgramId> {
        std::iter::once(self.main.id)
            .chain(self.buffers.iter().map(|p| p.id))
            .chain(self.postprocessing.iter().map(|p| p.id))
            .chain(self.pyramid.iter().map(|p| p.id))
            .collect()
    }
}

/// What one executed pass drew into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassRecord {
    pub kind: PassKind,
    pub target: TargetId,
    pub size: Size,
}

#[derive(Debug, Default)]
struct Targets {
    composite: Option<TargetId>,
    scene: Option<TargetId>,
    /// Double-buffered; `front[i]` holds the latest frame of buffer `i`.
    buffers: Vec<[TargetId; 2]>,
    front: Vec<usize>,
    down: Vec<TargetId>,
    up: Vec<TargetId>,
}

impl Targets {
    fn all(&self) -> Vec<TargetId> {
        self.composite
            .iter()
            .chain(self.scene.iter())
            .chain(self.buffers.iter().flatten())
            .chain(self.down.iter())
            .chain(self.up.iter())
            .copied()
            .collect()
    }
}

/// Owns the render targets and runs the passes of a [`ProgramSet`].
#[derive(Debug, Default)]
pub struct RenderGraph {
    size: Size,
    layout: GraphLayout,
    configured_depth: u32,
    depth: u32,
    targets: Targets,
}

impl RenderGraph {
    pub fn new(size: Size, configured_depth: u32) -> Self {
        Self {
            size,
            configured_depth,
            ..Self::default()
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn layout(&self) -> &GraphLayout {
        &self.layout
    }

    /// The target holding the finished frame.
    pub fn output(&self) -> Option<TargetId> {
        self.targets.composite
    }

    pub fn set_configured_depth(&mut self, depth: u32) {
        self.configured_depth = depth;
    }

    /// Allocates targets for `layout`, keeping existing ones when nothing changed.
    pub fn configure(&mut self, backend: &mut dyn GpuBackend, layout: &GraphLayout) -> Result<()> {
        if self.targets.composite.is_some() && *layout == self.layout {
            return Ok(());
        }
        self.layout = layout.clone();
        self.allocate(backend)
    }

    pub fn resize(&mut self, backend: &mut dyn GpuBackend, size: Size) -> Result<()> {
        if size == self.size && self.targets.composite.is_some() {
            return Ok(());
        }
        self.size = size;
        self.allocate(backend)
    }

    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        for target in self.targets.all() {
            backend.release_target(target);
        }
        self.targets = Targets::default();
    }

    fn allocate(&mut self, backend: &mut dyn GpuBackend) -> Result<()> {
        self.release(backend);
        let size = self.size;
        self.depth = if self.layout.pyramid {
            resolve_pyramid_depth(self.configured_depth, size)
        } else {
            0
        };
        let mut targets = Targets {
            composite: Some(backend.create_target("composite", size)?),
            ..Targets::default()
        };
        if self.layout.scene_offscreen() {
            targets.scene = Some(backend.create_target("scene", size)?);
        }
        for index in 0..self.layout.buffers {
            targets.buffers.push([
                backend.create_target(&format!("buffer{index}a"), size)?,
                backend.create_target(&format!("buffer{index}b"), size)?,
            ]);
            targets.front.push(0);
        }
        for level in 0..self.depth {
            targets
                .down
                .push(backend.create_target(&format!("pyramid-down{level}"), size.halved_n(level + 1))?);
        }
        for level in 0..self.depth {
            let out = size.halved_n(self.depth - 1 - level);
            targets
                .up
                .push(backend.create_target(&format!("pyramid-up{level}"), out)?);
        }
        tracing::debug!(size = %size, buffers = self.layout.buffers, depth = self.depth, "allocated render targets");
        self.targets = targets;
        Ok(())
    }

    /// Pyramid level `level`: 0 is the scene, `L` is the `L`-th downsample.
    fn pyramid_level(&self, level: u32) -> Option<TargetId> {
        match level {
            0 => self.targets.scene,
            _ => self.targets.down.get(level as usize - 1).copied(),
        }
    }

    fn pyramid_result(&self) -> Option<TargetId> {
        self.targets.up.last().copied()
    }

    fn target_for(&self, kind: PassKind) -> Option<(TargetId, Size)> {
        let depth = self.depth;
        match kind {
            PassKind::Buffer(index) => {
                let pair = self.targets.buffers.get(index)?;
                Some((pair[1 - self.targets.front[index]], self.size))
            }
            PassKind::Scene => Some((self.targets.scene.or(self.targets.composite)?, self.size)),
            PassKind::PyramidDown(level) => Some((
                *self.targets.down.get(level as usize)?,
                self.size.halved_n(level + 1),
            )),
            PassKind::PyramidUp(level) => Some((
                *self.targets.up.get(level as usize)?,
                self.size.halved_n(depth - 1 - level),
            )),
            PassKind::Postprocess => Some((self.targets.composite?, self.size)),
        }
    }

    fn bind_graph_inputs(&self, kind: PassKind, interface: &ProgramInterface, call: &mut DrawCall) {
        let mut bind = |name: &str, binding: Binding| {
            if interface.declares(name) {
                call.bind(name, binding);
            }
        };
        for (index, pair) in self.targets.buffers.iter().enumerate() {
            let latest = pair[self.targets.front[index]];
            bind(&buffer_uniform(index), Binding::Texture(TextureRef::Target(latest)));
        }
        if let Some(scene) = self.targets.scene {
            bind(SCENE_UNIFORM, Binding::Texture(TextureRef::Target(scene)));
        }
        if let Some(result) = self.pyramid_result() {
            bind(PYRAMID_UNIFORM, Binding::Texture(TextureRef::Target(result)));
        }
        let depth = self.depth;
        let (tex0, tex1, upscaling) = match kind {
            PassKind::PyramidDown(level) => (self.pyramid_level(level), None, 0),
            PassKind::PyramidUp(level) => {
                let coarse = if level == 0 {
                    self.pyramid_level(depth)
                } else {
                    self.targets.up.get(level as usize - 1).copied()
                };
                (coarse, self.pyramid_level(depth - 1 - level), 1)
            }
            _ => return,
        };
        if let Some(tex0) = tex0 {
            bind(PYRAMID_TEX0, Binding::Texture(TextureRef::Target(tex0)));
        }
        if let Some(tex1) = tex1 {
            bind(PYRAMID_TEX1, Binding::Texture(TextureRef::Target(tex1)));
        }
        bind(PYRAMID_UPSCALING, Binding::Value(UniformValue::Int1(upscaling)));
    }

    fn program_for<'a>(&self, kind: PassKind, programs: &'a ProgramSet) -> Option<&'a PassProgram> {
        match kind {
            PassKind::Buffer(index) => programs.buffers.get(index),
            PassKind::Scene => Some(&programs.main),
            PassKind::PyramidDown(_) | PassKind::PyramidUp(_) => programs.pyramid.as_ref(),
            PassKind::Postprocess => programs.postprocessing.as_ref(),
        }
    }

    /// Runs every pass of `programs` for one frame.
    pub fn execute(
        &mut self,
        backend: &mut dyn GpuBackend,
        programs: &ProgramSet,
        uniforms: &UniformStore,
        state: &EngineState,
    ) -> Result<Vec<PassRecord>> {
        self.configure(backend, &programs.layout)?;
        let mut records = Vec::new();
        for kind in plan_passes(&programs.layout, self.depth) {
            let Some(program) = self.program_for(kind, programs) else {
                tracing::warn!(pass = %kind, "no program for pass, skipping");
                continue;
            };
            let Some((target, size)) = self.target_for(kind) else {
                continue;
            };
            let mut pass_state = *state;
            pass_state.resolution = size.as_vec2();
            let mut call = DrawCall::new(program.id, target);
            uniforms.bind_engine(&program.interface, &pass_state, &mut call);
            self.bind_graph_inputs(kind, &program.interface, &mut call);
            uniforms.bind_manual(&program.interface, &mut call);
            backend.draw(&call)?;
            if let PassKind::Buffer(index) = kind {
                self.targets.front[index] = 1 - self.targets.front[index];
            }
            records.push(PassRecord { kind, target, size });
        }
        Ok(records)
    }

    /// Draws a single program into the composite target.
    pub fn execute_single(
        &mut self,
        backend: &mut dyn GpuBackend,
        program: &PassProgram,
        uniforms: &UniformStore,
        state: &EngineState,
    ) -> Result<PassRecord> {
        if self.targets.composite.is_none() {
            self.allocate(backend)?;
        }
        let target = self
            .targets
            .composite
            .ok_or_else(|| anyhow::anyhow!("composite target missing"))?;
        let mut pass_state = *state;
        pass_state.resolution = self.size.as_vec2();
        let mut call = DrawCall::new(program.id, target);
        uniforms.bind_to(&program.interface, &pass_state, &mut call);
        backend.draw(&call)?;
        Ok(PassRecord {
            kind: PassKind::Scene,
            target,
            size: self.size,
        })
    }

    /// Latest target of buffer `index`.
    pub fn buffer_target(&self, index: usize) -> Option<TargetId> {
        let pair = self.targets.buffers.get(index)?;
        Some(pair[self.targets.front[index]])
    }
}

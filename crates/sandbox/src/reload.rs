//! Recompiles programs when their sources or dependencies change.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::{GpuBackend, ProgramSource};
use crate::defaults::{
    DEFAULT_FRAGMENT, DEFAULT_VERTEX, ERROR_FRAGMENT, PASSTHROUGH_FRAGMENT, PYRAMID_FRAGMENT,
};
use crate::error::{CompileError, ShaderStage};
use crate::graph::{GraphLayout, PassProgram, ProgramSet, PYRAMID_UNIFORM};
use crate::interface::ProgramInterface;
use crate::preprocess::{
    buffer_dependencies, contains_word, count_buffers, resolve_includes, ResolvedSource,
};
use crate::types::FileRole;
use crate::uniforms::UniformStore;
use crate::watch::{lock_table, SharedFileTable};

pub const POSTPROCESSING_DEFINE: &str = "POSTPROCESSING";
pub const PYRAMID_DEFINE: &str = "CONVOLUTION_PYRAMID_ALGORITHM";

/// A primary shader file and its last resolved text.
#[derive(Debug, Clone)]
pub struct Primary {
    pub index: usize,
    pub path: PathBuf,
    pub source: String,
    pub resolved: ResolvedSource,
}

/// Outcome of a reload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Programs were rebuilt and swapped in.
    Rebuilt,
    /// The file is not a shader input, or a reload of it is already running.
    Skipped,
}

/// Owns the primary shader sources, the active [`ProgramSet`] and the built-in fallbacks.
pub struct ReloadEngine {
    fragment: Option<Primary>,
    vertex: Option<Primary>,
    include_folders: Vec<PathBuf>,
    defines: BTreeMap<String, Option<String>>,
    active: Option<ProgramSet>,
    error_program: Option<PassProgram>,
    error_screen: bool,
    last_error: Option<CompileError>,
    busy: HashSet<usize>,
}

impl ReloadEngine {
    pub fn new(include_folders: Vec<PathBuf>, defines: &[(String, Option<String>)]) -> Self {
        Self {
            fragment: None,
            vertex: None,
            include_folders,
            defines: defines.iter().cloned().collect(),
            active: None,
            error_program: None,
            error_screen: false,
            last_error: None,
            busy: HashSet::new(),
        }
    }

    pub fn fragment(&self) -> Option<&Primary> {
        self.fragment.as_ref()
    }

    pub fn vertex(&self) -> Option<&Primary> {
        self.vertex.as_ref()
    }

    pub fn active(&self) -> Option<&ProgramSet> {
        self.active.as_ref()
    }

    pub fn error_screen(&self) -> bool {
        self.error_screen
    }

    pub fn last_error(&self) -> Option<&CompileError> {
        self.last_error.as_ref()
    }

    pub fn error_program(&self) -> Option<&PassProgram> {
        self.error_program.as_ref()
    }

    pub fn defines(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.defines
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    pub fn define(&mut self, name: &str, value: Option<&str>) {
        self.defines
            .insert(name.to_string(), value.map(str::to_string));
    }

    pub fn undefine(&mut self, name: &str) -> bool {
        self.defines.remove(name).is_some()
    }

    pub fn include_folders(&self) -> &[PathBuf] {
        &self.include_folders
    }

    /// Makes the file at `index` the fragment or vertex primary and reads it.
    pub fn set_primary(
        &mut self,
        files: &SharedFileTable,
        index: usize,
        role: FileRole,
    ) -> Result<(), CompileError> {
        let path = lock_table(files)
            .get(index)
            .map(|file| file.path().to_path_buf())
            .unwrap_or_default();
        let primary = Primary {
            index,
            path,
            source: String::new(),
            resolved: ResolvedSource::default(),
        };
        match role {
            FileRole::Fragment => self.fragment = Some(primary),
            FileRole::Vertex => self.vertex = Some(primary),
            _ => return Ok(()),
        }
        self.reread(files, role)
    }

    fn primary_mut(&mut self, role: FileRole) -> Option<&mut Primary> {
        match role {
            FileRole::Fragment => self.fragment.as_mut(),
            FileRole::Vertex => self.vertex.as_mut(),
            _ => None,
        }
    }

    /// Reads a primary again, inlines its includes and registers new dependencies.
    fn reread(&mut self, files: &SharedFileTable, role: FileRole) -> Result<(), CompileError> {
        let folders = self.include_folders.clone();
        let Some(primary) = self.primary_mut(role) else {
            return Ok(());
        };
        let stage = stage_of(role);
        let source = fs::read_to_string(&primary.path).map_err(|err| {
            CompileError::new(
                stage,
                primary.path.display().to_string(),
                format!("failed to read source: {err}"),
            )
        })?;
        let resolved = resolve_includes(&source, &primary.path, &folders);
        {
            let mut table = lock_table(files);
            for include in resolved.includes.iter().chain(&resolved.missing) {
                table.add_dependency(primary.index, include);
            }
        }
        primary.source = source;
        primary.resolved = resolved;
        Ok(())
    }

    fn role_of(&self, index: usize) -> Option<FileRole> {
        if self.fragment.as_ref().is_some_and(|p| p.index == index) {
            Some(FileRole::Fragment)
        } else if self.vertex.as_ref().is_some_and(|p| p.index == index) {
            Some(FileRole::Vertex)
        } else {
            None
        }
    }

    /// Handles a change of the file at `index`.
    ///
    /// A primary is re-read; a dependency re-reads every primary that includes it,
    /// directly or not. On failure the active programs stay in place and the error
    /// screen is raised.
    pub fn reload(
        &mut self,
        index: usize,
        files: &SharedFileTable,
        backend: &mut dyn GpuBackend,
        uniforms: &mut UniformStore,
    ) -> Result<ReloadOutcome, CompileError> {
        if !self.busy.insert(index) {
            tracing::debug!(index, "reload already in progress");
            return Ok(ReloadOutcome::Skipped);
        }
        let result = self.reload_inner(index, files, backend, uniforms);
        self.busy.remove(&index);
        result
    }

    fn reload_inner(
        &mut self,
        index: usize,
        files: &SharedFileTable,
        backend: &mut dyn GpuBackend,
        uniforms: &mut UniformStore,
    ) -> Result<ReloadOutcome, CompileError> {
        let roles: Vec<FileRole> = match self.role_of(index) {
            Some(role) => vec![role],
            None => {
                let (role, dependents) = {
                    let table = lock_table(files);
                    let role = table.get(index).map(|file| file.role());
                    (role, table.transitive_dependents(index))
                };
                if role != Some(FileRole::Dependency) {
                    return Ok(ReloadOutcome::Skipped);
                }
                dependents
                    .into_iter()
                    .filter_map(|dependent| self.role_of(dependent))
                    .collect()
            }
        };
        if roles.is_empty() {
            return Ok(ReloadOutcome::Skipped);
        }
        for role in roles {
            if let Err(err) = self.reread(files, role) {
                self.fail(err.clone());
                return Err(err);
            }
        }
        self.rebuild_all(backend, uniforms)?;
        Ok(ReloadOutcome::Rebuilt)
    }

    fn fail(&mut self, err: CompileError) {
        tracing::error!(stage = %err.stage, label = %err.label, "{}", err.diagnostic);
        self.error_screen = true;
        self.last_error = Some(err);
    }

    /// Compiles a candidate set from the current sources and swaps it in on success.
    pub fn rebuild_all(
        &mut self,
        backend: &mut dyn GpuBackend,
        uniforms: &mut UniformStore,
    ) -> Result<(), CompileError> {
        self.ensure_error_program(backend);
        let mut compiled = Vec::new();
        let candidate = self.compile_candidate(backend, &mut compiled);
        match candidate {
            Ok(set) => {
                let previous = self.active.replace(set);
                if let Some(previous) = previous {
                    for id in previous.ids() {
                        backend.release_program(id);
                    }
                }
                if let Some(active) = &self.active {
                    uniforms.check_presence_in(&active.interface);
                    tracing::info!(
                        buffers = active.layout.buffers,
                        postprocessing = active.layout.postprocessing,
                        pyramid = active.layout.pyramid,
                        "shaders reloaded"
                    );
                }
                uniforms.flag_change();
                self.error_screen = false;
                self.last_error = None;
                Ok(())
            }
            Err(err) => {
                for id in compiled {
                    backend.release_program(id);
                }
                if self.active.is_none() {
                    if let Some(program) = &self.error_program {
                        uniforms.check_presence_in(&program.interface);
                    }
                }
                uniforms.flag_change();
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    fn ensure_error_program(&mut self, backend: &mut dyn GpuBackend) {
        if self.error_program.is_some() {
            return;
        }
        let source = ProgramSource {
            label: "error".into(),
            vertex: DEFAULT_VERTEX.into(),
            fragment: ERROR_FRAGMENT.into(),
            defines: Vec::new(),
        };
        match backend.compile_program(&source) {
            Ok(id) => {
                self.error_program = Some(PassProgram {
                    id,
                    interface: ProgramInterface::parse(ERROR_FRAGMENT),
                });
            }
            Err(err) => tracing::warn!(error = %err, "built-in error program failed to compile"),
        }
    }

    fn fragment_text(&self) -> &str {
        self.fragment
            .as_ref()
            .map_or(DEFAULT_FRAGMENT, |p| p.resolved.text.as_str())
    }

    fn vertex_text(&self) -> &str {
        self.vertex
            .as_ref()
            .map_or(DEFAULT_VERTEX, |p| p.resolved.text.as_str())
    }

    fn define_list(&self, extra: Option<&str>) -> Vec<(String, Option<String>)> {
        let mut defines: Vec<(String, Option<String>)> = self
            .defines
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if let Some(extra) = extra {
            defines.push((extra.to_string(), None));
        }
        defines
    }

    fn compile_candidate(
        &self,
        backend: &mut dyn GpuBackend,
        compiled: &mut Vec<crate::backend::ProgramId>,
    ) -> Result<ProgramSet, CompileError> {
        let fragment = self.fragment_text();
        let vertex = self.vertex_text();
        let fragment_interface = ProgramInterface::parse(fragment);
        let interface = ProgramInterface::merge(&ProgramInterface::parse(vertex), &fragment_interface);
        let buffers = count_buffers(fragment);
        let layout = GraphLayout {
            buffers,
            buffer_deps: buffer_dependencies(fragment, buffers),
            postprocessing: contains_word(fragment, POSTPROCESSING_DEFINE),
            pyramid: interface.declares(PYRAMID_UNIFORM),
        };
        let billboard_interface =
            ProgramInterface::merge(&ProgramInterface::parse(DEFAULT_VERTEX), &fragment_interface);

        let mut build = |label: String,
                         vertex: &str,
                         fragment: &str,
                         defines: Vec<(String, Option<String>)>,
                         interface: ProgramInterface|
         -> Result<PassProgram, CompileError> {
            let source = ProgramSource {
                label,
                vertex: vertex.to_string(),
                fragment: fragment.to_string(),
                defines,
            };
            let id = backend.compile_program(&source)?;
            compiled.push(id);
            Ok(PassProgram { id, interface })
        };

        let main = build(
            "main".into(),
            vertex,
            fragment,
            self.define_list(None),
            interface.clone(),
        )?;
        let mut buffer_programs = Vec::with_capacity(buffers);
        for index in 0..buffers {
            let define = format!("BUFFER_{index}");
            buffer_programs.push(build(
                format!("buffer{index}"),
                DEFAULT_VERTEX,
                fragment,
                self.define_list(Some(&define)),
                billboard_interface.clone(),
            )?);
        }
        let postprocessing = if layout.postprocessing {
            Some(build(
                "postprocessing".into(),
                DEFAULT_VERTEX,
                fragment,
                self.define_list(Some(POSTPROCESSING_DEFINE)),
                billboard_interface.clone(),
            )?)
        } else if layout.pyramid {
            Some(build(
                "passthrough".into(),
                DEFAULT_VERTEX,
                PASSTHROUGH_FRAGMENT,
                Vec::new(),
                ProgramInterface::parse(PASSTHROUGH_FRAGMENT),
            )?)
        } else {
            None
        };
        let pyramid = if !layout.pyramid {
            None
        } else if contains_word(fragment, PYRAMID_DEFINE) {
            Some(build(
                "pyramid".into(),
                DEFAULT_VERTEX,
                fragment,
                self.define_list(Some(PYRAMID_DEFINE)),
                billboard_interface.clone(),
            )?)
        } else {
            Some(build(
                "pyramid".into(),
                DEFAULT_VERTEX,
                PYRAMID_FRAGMENT,
                Vec::new(),
                ProgramInterface::parse(PYRAMID_FRAGMENT),
            )?)
        };

        Ok(ProgramSet {
            main,
            buffers: buffer_programs,
            postprocessing,
            pyramid,
            layout,
            interface,
        })
    }

    /// Files the primary of `role` pulls in through includes.
    pub fn dependencies(&self, role: FileRole) -> Vec<&Path> {
        let primary = match role {
            FileRole::Fragment => self.fragment.as_ref(),
            FileRole::Vertex => self.vertex.as_ref(),
            _ => None,
        };
        primary
            .map(|p| p.resolved.includes.iter().map(PathBuf::as_path).collect())
            .unwrap_or_default()
    }

    /// Releases every program this engine owns.
    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(set) = self.active.take() {
            for id in set.ids() {
                backend.release_program(id);
            }
        }
        if let Some(program) = self.error_program.take() {
            backend.release_program(program.id);
        }
    }
}

fn stage_of(role: FileRole) -> ShaderStage {
    match role {
        FileRole::Vertex => ShaderStage::Vertex,
        _ => ShaderStage::Fragment,
    }
}

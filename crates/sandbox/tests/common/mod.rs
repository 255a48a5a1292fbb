#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use sandbox::{
    CompileError, DrawCall, EngineClock, FixedTimeSource, GpuBackend, ImageData, Overlay, ProgramId,
    ProgramSource, RecordOptions, Sandbox, SandboxConfig, ShaderStage, Size, TargetId, TextureId,
};

#[derive(Debug, Clone)]
pub struct Draw {
    pub label: String,
    pub target: TargetId,
    pub size: Size,
    pub bindings: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MockLog {
    pub compiled: Vec<ProgramSource>,
    pub live_programs: HashMap<ProgramId, String>,
    pub targets: HashMap<TargetId, (String, Size)>,
    pub textures: HashMap<TextureId, Size>,
    pub texture_updates: usize,
    pub draws: Vec<Draw>,
    pub presents: usize,
    pub reads: usize,
    /// Number of upcoming draws that fail.
    pub failing_draws: usize,
}

impl MockLog {
    pub fn frame_draws(&self, start: usize) -> Vec<String> {
        self.draws[start..].iter().map(|d| d.label.clone()).collect()
    }
}

/// Backend that compiles anything without `#error` and records every call.
#[derive(Clone, Default)]
pub struct MockBackend {
    pub log: Arc<Mutex<MockLog>>,
    next_id: Arc<Mutex<u32>>,
}

impl MockBackend {
    fn id(&self) -> u32 {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        *next
    }
}

impl GpuBackend for MockBackend {
    fn compile_program(&mut self, source: &ProgramSource) -> Result<ProgramId, CompileError> {
        let mut log = self.log.lock().unwrap();
        log.compiled.push(source.clone());
        if source.fragment.contains("#error") {
            return Err(CompileError::new(ShaderStage::Fragment, &source.label, "#error directive"));
        }
        drop(log);
        let id = ProgramId(self.id());
        self.log
            .lock()
            .unwrap()
            .live_programs
            .insert(id, source.label.clone());
        Ok(id)
    }

    fn release_program(&mut self, program: ProgramId) {
        self.log.lock().unwrap().live_programs.remove(&program);
    }

    fn create_target(&mut self, label: &str, size: Size) -> Result<TargetId> {
        let id = TargetId(self.id());
        self.log
            .lock()
            .unwrap()
            .targets
            .insert(id, (label.to_string(), size));
        Ok(id)
    }

    fn release_target(&mut self, target: TargetId) {
        self.log.lock().unwrap().targets.remove(&target);
    }

    fn create_texture(&mut self, _label: &str, image: &ImageData) -> Result<TextureId> {
        let id = TextureId(self.id());
        self.log.lock().unwrap().textures.insert(id, image.size);
        Ok(id)
    }

    fn update_texture(&mut self, texture: TextureId, image: &ImageData) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.textures.insert(texture, image.size);
        log.texture_updates += 1;
        Ok(())
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.log.lock().unwrap().textures.remove(&texture);
    }

    fn load_geometry(&mut self, path: &Path) -> Result<()> {
        Err(anyhow!("no mesh support for {}", path.display()))
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.failing_draws > 0 {
            log.failing_draws -= 1;
            return Err(anyhow!("device lost"));
        }
        let label = log
            .live_programs
            .get(&call.program)
            .cloned()
            .ok_or_else(|| anyhow!("draw with released program"))?;
        let size = log
            .targets
            .get(&call.target)
            .map(|(_, size)| *size)
            .ok_or_else(|| anyhow!("draw into released target"))?;
        log.draws.push(Draw {
            label,
            target: call.target,
            size,
            bindings: call.bindings.keys().cloned().collect(),
        });
        Ok(())
    }

    fn read_pixels(&mut self, target: TargetId) -> Result<ImageData> {
        let mut log = self.log.lock().unwrap();
        log.reads += 1;
        let size = log
            .targets
            .get(&target)
            .map(|(_, size)| *size)
            .ok_or_else(|| anyhow!("unknown target"))?;
        Ok(ImageData::solid(size, [255, 0, 0, 255]))
    }

    fn present(&mut self, _target: TargetId, _overlay: &Overlay) -> Result<()> {
        self.log.lock().unwrap().presents += 1;
        Ok(())
    }
}

/// Protocol output captured for assertions.
#[derive(Clone, Default)]
pub struct Replies(pub Arc<Mutex<Vec<u8>>>);

impl Replies {
    pub fn take(&self) -> String {
        let mut buffer = self.0.lock().unwrap();
        let text = String::from_utf8_lossy(&buffer).into_owned();
        buffer.clear();
        text
    }
}

impl Write for Replies {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn test_config(record_dir: &Path) -> SandboxConfig {
    SandboxConfig {
        size: Size::new(64, 32),
        pyramid_depth: 3,
        record: RecordOptions {
            dir: record_dir.to_path_buf(),
            prefix: String::new(),
            workers: 2,
            max_queued_bytes: 1 << 20,
        },
        ..SandboxConfig::default()
    }
}

pub struct Harness {
    pub sandbox: Sandbox,
    pub backend: MockBackend,
    pub replies: Replies,
}

/// A sandbox over `files`, initialised, on a fixed clock.
pub fn harness(config: SandboxConfig, files: &[&Path]) -> Harness {
    let backend = MockBackend::default();
    let replies = Replies::default();
    let clock = EngineClock::new(Box::new(FixedTimeSource::new(0.0)));
    let mut sandbox = Sandbox::new(config, Box::new(backend.clone()), Box::new(replies.clone()))
        .with_clock(clock);
    let paths: Vec<_> = files.iter().map(|p| p.to_path_buf()).collect();
    sandbox.load_files(&paths).unwrap();
    sandbox.init().unwrap();
    Harness {
        sandbox,
        backend,
        replies,
    }
}

pub const PLAIN: &str = "uniform vec2 u_resolution;\nuniform float u_time;\nvoid main() { gl_FragColor = vec4(u_time); }\n";

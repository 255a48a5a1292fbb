use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use crossbeam_channel::Receiver;
use sandbox::stream::is_sequence_pattern;
use sandbox::window::run_windowed;
use sandbox::{
    FileRole, GpuBackend, Output, Sandbox, SandboxError, Session, Size, WgpuBackend, WindowStyle,
};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::{self, Launch};
use crate::cli::Cli;
use crate::console::spawn_stdin_reader;
use crate::remote::spawn_osc_listener;

const STREAM_FPS: f32 = 24.0;

/// Logs go to stderr; stdout carries protocol replies.
pub fn initialise_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

pub fn run(cli: Cli) -> Result<()> {
    let session_file = bootstrap::load_session(&cli)?;
    let launch = bootstrap::resolve(&cli, &session_file);
    tracing::debug!(
        size = %launch.config.size,
        style = ?launch.config.style,
        files = launch.files.len(),
        "resolved launch settings"
    );

    let has_primary = launch.files.iter().any(|path| {
        matches!(
            FileRole::from_path(path),
            Some(FileRole::Fragment | FileRole::Vertex)
        )
    });
    if !has_primary {
        return Err(SandboxError::FatalInit("no fragment or vertex shader given".into()).into());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let (commands, queue) = crossbeam_channel::unbounded();
    spawn_stdin_reader(commands.clone())?;
    let _remote = match launch.port {
        Some(port) => match spawn_osc_listener(port, commands.clone(), Arc::clone(&shutdown)) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "remote control disabled");
                None
            }
        },
        None => None,
    };
    drop(commands);

    if launch.config.style == WindowStyle::Headless {
        let backend = WgpuBackend::headless()?;
        let session = start_session(&launch, Box::new(backend), launch.config.size, queue, shutdown)?;
        session.run_headless();
        Ok(())
    } else {
        run_windowed(&launch.config, |backend, size| {
            start_session(&launch, backend, size, queue, shutdown)
        })
    }
}

fn start_session(
    launch: &Launch,
    backend: Box<dyn GpuBackend>,
    size: Size,
    queue: Receiver<String>,
    shutdown: Arc<AtomicBool>,
) -> Result<Session> {
    let mut config = launch.config.clone();
    config.size = size;
    let out: Output = Box::new(io::stdout());
    let mut sandbox = Sandbox::new(config, backend, out);

    sandbox.load_files(&launch.files)?;
    for (name, path) in &launch.textures {
        let result = if is_sequence_pattern(path) {
            sandbox.add_stream(name, path, STREAM_FPS)
        } else {
            sandbox.add_texture(name, path)
        };
        if let Err(err) = result {
            tracing::warn!(name = %name, path = %path.display(), error = %format!("{err:#}"), "skipping texture");
        }
    }
    sandbox.init()?;

    let mut session = Session::new(sandbox, queue, shutdown)?;
    session.run_startup(&launch.startup, launch.exit_after_startup);
    Ok(session)
}

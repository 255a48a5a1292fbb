//! Merges the command line over the session file over built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use sandbox::{RecordOptions, SandboxConfig, Size, WindowStyle};
use sessionconfig::{split_define, SessionConfig, WindowStyleSetting};

use crate::cli::Cli;
use crate::paths::AppPaths;

/// Everything needed to start a session.
#[derive(Debug, Clone)]
pub struct Launch {
    pub config: SandboxConfig,
    pub files: Vec<PathBuf>,
    pub textures: Vec<(String, PathBuf)>,
    pub startup: Vec<String>,
    pub exit_after_startup: bool,
    pub port: Option<u16>,
}

/// Loads the session file named by `--config`, or the default one if it exists.
pub fn load_session(cli: &Cli) -> Result<SessionConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => {
            let default = AppPaths::discover()?.session_file();
            if !default.exists() {
                return Ok(SessionConfig::default());
            }
            default
        }
    };
    let mut session = SessionConfig::load(&path)
        .with_context(|| format!("failed to load session file {}", path.display()))?;
    if let Some(base) = path.parent() {
        session.rebase(base);
    }
    tracing::info!(path = %path.display(), "loaded session file");
    Ok(session)
}

fn style_from(setting: WindowStyleSetting) -> WindowStyle {
    match setting {
        WindowStyleSetting::Regular => WindowStyle::Regular,
        WindowStyleSetting::Headless => WindowStyle::Headless,
        WindowStyleSetting::Fullscreen => WindowStyle::Fullscreen,
        WindowStyleSetting::AlwaysOnTop => WindowStyle::AlwaysOnTop,
    }
}

pub fn resolve(cli: &Cli, session: &SessionConfig) -> Launch {
    let defaults = SandboxConfig::default();

    let size = Size::new(
        cli.width.or(session.window.width).unwrap_or(defaults.size.width),
        cli.height.or(session.window.height).unwrap_or(defaults.size.height),
    );
    let position = match (cli.x.or(session.window.x), cli.y.or(session.window.y)) {
        (None, None) => None,
        (x, y) => Some((x.unwrap_or(0), y.unwrap_or(0))),
    };
    let style = if cli.headless {
        WindowStyle::Headless
    } else if cli.fullscreen {
        WindowStyle::Fullscreen
    } else if cli.life_coding {
        WindowStyle::AlwaysOnTop
    } else {
        session.window.style.map_or(defaults.style, style_from)
    };

    let mut include_folders = cli.include.clone();
    include_folders.extend(session.include.iter().cloned());

    let mut defines: Vec<(String, Option<String>)> =
        session.defines.iter().map(|raw| split_define(raw)).collect();
    for raw in &cli.define {
        let (name, value) = split_define(raw);
        defines.retain(|(existing, _)| existing != &name);
        defines.push((name, value));
    }

    let record_defaults = defaults.record.clone();
    let record = RecordOptions {
        dir: cli
            .record_dir
            .clone()
            .or_else(|| session.record.dir.clone())
            .unwrap_or(record_defaults.dir),
        prefix: session.record.prefix.clone().unwrap_or(record_defaults.prefix),
        workers: cli
            .record_workers
            .or(session.record.workers)
            .unwrap_or(record_defaults.workers),
        max_queued_bytes: session
            .record
            .max_queued_mib
            .map_or(record_defaults.max_queued_bytes, |mib| mib.saturating_mul(1024 * 1024)),
    };

    let config = SandboxConfig {
        size,
        position,
        style,
        fps: cli.fps.or(session.fps).unwrap_or(defaults.fps),
        full_fps: cli.full_fps || session.full_fps.unwrap_or(defaults.full_fps),
        cursor: !cli.nocursor && session.window.cursor.unwrap_or(defaults.cursor),
        vflip: !cli.no_vflip && session.vflip.unwrap_or(defaults.vflip),
        include_folders,
        defines,
        pyramid_depth: cli
            .pyramid_depth
            .or(session.pyramid_depth)
            .unwrap_or(defaults.pyramid_depth),
        watch_interval: session
            .watch_interval
            .unwrap_or(defaults.watch_interval)
            .max(Duration::from_millis(1)),
        record,
    };

    let mut textures: Vec<(String, PathBuf)> = session
        .textures
        .iter()
        .filter(|(name, _)| !cli.texture.iter().any(|(flag, _)| flag == *name))
        .map(|(name, path)| (name.clone(), path.clone()))
        .collect();
    textures.extend(cli.texture.iter().cloned());

    let mut startup = session.commands.clone();
    startup.extend(cli.execute.iter().cloned());
    startup.extend(cli.execute_and_exit.iter().cloned());

    Launch {
        config,
        files: cli.files.clone(),
        textures,
        startup,
        exit_after_startup: !cli.execute_and_exit.is_empty(),
        port: cli.port.or(session.remote.port),
    }
}

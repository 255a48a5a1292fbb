use std::path::PathBuf;

use clap::{CommandFactory, Parser};

#[derive(Parser, Debug, Default)]
#[command(
    name = "shadebox",
    author,
    version,
    about = "Live-reloading GLSL sandbox",
    long_about = "Loads fragment/vertex shaders, images and meshes, recompiles on every \
                  save, and listens for commands on stdin (and optionally OSC)."
)]
pub struct Cli {
    /// Shader, mesh and image files (`.frag`/`.fs`, `.vert`/`.vs`, `.ply`, `.png`, `name%03d.png`).
    #[arg(value_name = "FILE")]
    pub files: Vec<PathBuf>,

    /// Window width in pixels.
    #[arg(short = 'w', long, value_name = "PIXELS")]
    pub width: Option<u32>,

    /// Window height in pixels.
    #[arg(long, value_name = "PIXELS")]
    pub height: Option<u32>,

    /// Window X position.
    #[arg(short = 'x', value_name = "PIXELS", allow_negative_numbers = true)]
    pub x: Option<i32>,

    /// Window Y position.
    #[arg(short = 'y', value_name = "PIXELS", allow_negative_numbers = true)]
    pub y: Option<i32>,

    /// Frame-rate cap when nothing forces a redraw (0=uncapped).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Render offscreen without opening a window.
    #[arg(long, conflicts_with_all = ["fullscreen", "life_coding"])]
    pub headless: bool,

    /// Open the window fullscreen.
    #[arg(short = 'f', long)]
    pub fullscreen: bool,

    /// Borderless window that stays above other windows.
    #[arg(short = 'l', long = "life-coding")]
    pub life_coding: bool,

    /// Hide the cursor overlay.
    #[arg(long)]
    pub nocursor: bool,

    /// Log at debug level.
    #[arg(long)]
    pub verbose: bool,

    /// Run a command before the first frame; may be repeated.
    #[arg(short = 'e', value_name = "COMMAND")]
    pub execute: Vec<String>,

    /// Like `-e`, then exit once the commands and any recording finish.
    #[arg(short = 'E', value_name = "COMMAND")]
    pub execute_and_exit: Vec<String>,

    /// Render every frame even when nothing changed.
    #[arg(long = "fullFps")]
    pub full_fps: bool,

    /// Do not flip loaded textures vertically.
    #[arg(long = "vFlip")]
    pub no_vflip: bool,

    /// Extra folder searched by `#include`; may be repeated.
    #[arg(short = 'I', value_name = "FOLDER")]
    pub include: Vec<PathBuf>,

    /// Preprocessor define (`NAME` or `NAME=VALUE`); may be repeated.
    #[arg(short = 'D', value_name = "DEFINE")]
    pub define: Vec<String>,

    /// Bind an image or image sequence to a sampler uniform.
    #[arg(long, value_name = "NAME=PATH", value_parser = parse_texture)]
    pub texture: Vec<(String, PathBuf)>,

    /// Listen for OSC messages on this UDP port.
    #[arg(short = 'p', long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Session file; defaults to `<config dir>/shadebox/session.toml` when present.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Convolution pyramid depth (0 derives it from the resolution).
    #[arg(long, value_name = "LEVELS")]
    pub pyramid_depth: Option<u32>,

    /// Directory that recorded frames and screenshots are written to.
    #[arg(long, value_name = "DIR")]
    pub record_dir: Option<PathBuf>,

    /// Threads encoding recorded frames (0 encodes on the render thread).
    #[arg(long, value_name = "COUNT")]
    pub record_workers: Option<usize>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn usage() -> String {
    Cli::command().render_help().to_string()
}

fn parse_texture(raw: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got '{raw}'"));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attached_include_and_define_flags() {
        let cli = Cli::try_parse_from([
            "shadebox",
            "main.frag",
            "-Ilib",
            "-DSTEPS=4",
            "-DDEBUG",
            "-w",
            "320",
            "--fullFps",
            "--vFlip",
        ])
        .unwrap();
        assert_eq!(cli.files, vec![PathBuf::from("main.frag")]);
        assert_eq!(cli.include, vec![PathBuf::from("lib")]);
        assert_eq!(cli.define, vec!["STEPS=4".to_string(), "DEBUG".to_string()]);
        assert_eq!(cli.width, Some(320));
        assert!(cli.full_fps);
        assert!(cli.no_vflip);
    }

    #[test]
    fn collects_startup_commands_in_order() {
        let cli = Cli::try_parse_from([
            "shadebox", "a.frag", "-e", "u_gain,0.5", "-E", "screenshot,out.png",
        ])
        .unwrap();
        assert_eq!(cli.execute, vec!["u_gain,0.5".to_string()]);
        assert_eq!(cli.execute_and_exit, vec!["screenshot,out.png".to_string()]);
    }

    #[test]
    fn texture_flag_requires_name_and_path() {
        assert_eq!(
            parse_texture("u_noise=noise.png").unwrap(),
            ("u_noise".to_string(), PathBuf::from("noise.png"))
        );
        assert!(parse_texture("noise.png").is_err());
        assert!(parse_texture("=noise.png").is_err());
    }

    #[test]
    fn headless_conflicts_with_fullscreen() {
        assert!(Cli::try_parse_from(["shadebox", "--headless", "-f"]).is_err());
    }
}

//! Built-in protocol commands.

use std::path::{Path, PathBuf};

use chrono::Local;
use glam::Vec3;

use crate::command::{split_args, CommandRegistry};
use crate::graph::buffer_uniform;
use crate::sandbox::{ExitMode, Sandbox};
use crate::types::FileRole;
use crate::watch::lock_table;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

fn parse_switch(arg: &str) -> Option<bool> {
    match arg {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn define(sb: &mut Sandbox, line: &str) -> bool {
    let args = split_args(line);
    let (name, value) = match args.as_slice() {
        [single] => match single.split_once(' ') {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (*single, None),
        },
        [name, value] => (*name, Some(*value)),
        _ => return false,
    };
    if name.is_empty() {
        return false;
    }
    sb.reload.define(name, value);
    sb.rebuild();
    true
}

fn undefine(sb: &mut Sandbox, line: &str) -> bool {
    match split_args(line).as_slice() {
        [name] if !name.is_empty() => {
            if sb.reload.undefine(name) {
                sb.rebuild();
            }
            true
        }
        _ => false,
    }
}

fn defines(sb: &mut Sandbox, line: &str) -> bool {
    if line != "defines" {
        return false;
    }
    let lines: Vec<String> = sb
        .reload
        .defines()
        .map(|(name, value)| match value {
            Some(value) => format!("{name},{value}"),
            None => name.to_string(),
        })
        .collect();
    for text in lines {
        sb.reply(text);
    }
    true
}

fn reload(sb: &mut Sandbox, line: &str) -> bool {
    let args = split_args(line);
    if line == "reload" || args == ["all"] {
        let count = lock_table(&sb.files).len();
        for index in 0..count {
            let role = lock_table(&sb.files).get(index).map(|f| f.role());
            if matches!(role, Some(FileRole::Image | FileRole::Geometry)) {
                sb.on_file_change(index);
            }
        }
        let primaries: Vec<usize> = [sb.reload.fragment(), sb.reload.vertex()]
            .into_iter()
            .flatten()
            .map(|p| p.index)
            .collect();
        for index in primaries {
            sb.on_file_change(index);
        }
        return true;
    }
    let [target] = args.as_slice() else {
        return false;
    };
    let wanted = Path::new(target);
    let canonical = std::fs::canonicalize(wanted).ok();
    let found = {
        let table = lock_table(&sb.files);
        let found = table
            .iter()
            .find(|(_, file)| file.path() == wanted || Some(file.path()) == canonical.as_deref())
            .map(|(index, _)| index);
        found
    };
    match found {
        Some(index) => {
            sb.on_file_change(index);
            true
        }
        None => false,
    }
}

fn version(sb: &mut Sandbox, line: &str) -> bool {
    if line != "version" {
        return false;
    }
    sb.reply(VERSION);
    true
}

fn window_width(sb: &mut Sandbox, line: &str) -> bool {
    if line != "window_width" {
        return false;
    }
    let width = sb.size.width;
    sb.reply(width.to_string());
    true
}

fn window_height(sb: &mut Sandbox, line: &str) -> bool {
    if line != "window_height" {
        return false;
    }
    let height = sb.size.height;
    sb.reply(height.to_string());
    true
}

fn pixel_density(sb: &mut Sandbox, line: &str) -> bool {
    if line != "pixel_density" {
        return false;
    }
    let density = sb.state.pixel_density;
    sb.reply(density.to_string());
    true
}

fn viewport(sb: &mut Sandbox, line: &str) -> bool {
    if line != "viewport" {
        return false;
    }
    let size = sb.size;
    sb.reply(format!("0,0,{},{}", size.width, size.height));
    true
}

fn mouse(sb: &mut Sandbox, line: &str) -> bool {
    if line != "mouse" {
        return false;
    }
    let [x, y] = sb.state.mouse;
    sb.reply(format!("{x},{y}"));
    true
}

fn fps(sb: &mut Sandbox, line: &str) -> bool {
    if line == "fps" {
        let fps = sb.fps;
        sb.reply(format!("{fps:.6}"));
        return true;
    }
    match split_args(line).as_slice() {
        [value] => match value.parse::<f32>() {
            Ok(value) if value >= 0.0 && value.is_finite() => {
                sb.fps = value;
                true
            }
            _ => false,
        },
        _ => false,
    }
}

fn delta(sb: &mut Sandbox, line: &str) -> bool {
    if line != "delta" {
        return false;
    }
    let delta = sb.state.delta;
    sb.reply(format!("{delta:.6}"));
    true
}

fn date(sb: &mut Sandbox, line: &str) -> bool {
    if line != "date" {
        return false;
    }
    sb.state.refresh_date();
    let [year, month, day, seconds] = sb.state.date;
    sb.reply(format!("{year},{month},{day},{seconds}"));
    true
}

fn time(sb: &mut Sandbox, line: &str) -> bool {
    if line == "time" {
        let time = sb.state.time;
        sb.reply(format!("{time:.6}"));
        return true;
    }
    match split_args(line).as_slice() {
        [value] => match value.parse::<f64>() {
            Ok(seconds) if seconds.is_finite() => {
                sb.clock.set_time(seconds);
                sb.uniforms.flag_change();
                true
            }
            _ => false,
        },
        _ => false,
    }
}

fn frame(sb: &mut Sandbox, line: &str) -> bool {
    if line != "frame" {
        return false;
    }
    let frame = sb.state.frame;
    sb.reply(frame.to_string());
    true
}

fn full_fps(sb: &mut Sandbox, line: &str) -> bool {
    if line == "fullFps" {
        let value = on_off(sb.full_fps);
        sb.reply(value);
        return true;
    }
    match split_args(line).as_slice() {
        [value] => match parse_switch(value) {
            Some(on) => {
                sb.full_fps = on;
                true
            }
            None => false,
        },
        _ => false,
    }
}

fn cursor(sb: &mut Sandbox, line: &str) -> bool {
    if line == "cursor" {
        let value = on_off(sb.cursor);
        sb.reply(value);
        return true;
    }
    match split_args(line).as_slice() {
        [value] => match parse_switch(value) {
            Some(on) => {
                sb.cursor = on;
                sb.uniforms.flag_change();
                true
            }
            None => false,
        },
        _ => false,
    }
}

fn uniforms(sb: &mut Sandbox, line: &str) -> bool {
    let mode = match split_args(line).as_slice() {
        [] if line == "uniforms" => "active",
        ["all"] => "all",
        ["active"] => "active",
        _ => return false,
    };
    let mut lines = Vec::new();
    for entry in sb.uniforms.automatic() {
        if mode == "all" || entry.present {
            let state = if entry.present { "on" } else { "off" };
            lines.push(format!("{},{},{state}", entry.name, entry.ty.glsl_name()));
        }
    }
    for (name, entry) in sb.uniforms.manual() {
        lines.push(format!("{name},{},{}", entry.value.glsl_type().glsl_name(), entry.value));
    }
    for text in lines {
        sb.reply(text);
    }
    true
}

fn textures(sb: &mut Sandbox, line: &str) -> bool {
    if line != "textures" {
        return false;
    }
    let mut lines: Vec<String> = sb
        .uniforms
        .textures()
        .iter()
        .map(|t| {
            let path = t.path.as_deref().map(|p| p.display().to_string()).unwrap_or_default();
            format!("{},{},{},{}", t.name, t.size.width, t.size.height, path)
        })
        .collect();
    for stream in sb.uniforms.streams() {
        let size = stream.stream.size();
        let clock = stream.stream.clock();
        lines.push(format!(
            "{},{},{},{}/{}",
            stream.name, size.width, size.height, clock.current_frame, clock.total_frames
        ));
    }
    for text in lines {
        sb.reply(text);
    }
    true
}

fn buffers(sb: &mut Sandbox, line: &str) -> bool {
    if line != "buffers" {
        return false;
    }
    let layout = sb.reload.active().map(|set| set.layout.clone()).unwrap_or_default();
    let mut lines: Vec<String> = (0..layout.buffers).map(buffer_uniform).collect();
    if layout.pyramid {
        lines.push(format!("u_convolutionPyramid,{}", sb.graph.depth()));
    }
    if layout.postprocessing {
        lines.push("u_scene".into());
    }
    for text in lines {
        sb.reply(text);
    }
    true
}

fn files(sb: &mut Sandbox, line: &str) -> bool {
    if line != "files" {
        return false;
    }
    let lines: Vec<String> = lock_table(&sb.files)
        .iter()
        .map(|(index, file)| format!("{index},{},{}", file.role(), file.path().display()))
        .collect();
    for text in lines {
        sb.reply(text);
    }
    true
}

fn dependencies(sb: &mut Sandbox, line: &str) -> bool {
    let roles: &[FileRole] = match split_args(line).as_slice() {
        [] if line == "dependencies" => &[FileRole::Fragment, FileRole::Vertex],
        ["frag"] => &[FileRole::Fragment],
        ["vert"] => &[FileRole::Vertex],
        _ => return false,
    };
    let lines: Vec<String> = roles
        .iter()
        .flat_map(|role| sb.reload.dependencies(*role))
        .map(|path| path.display().to_string())
        .collect();
    for text in lines {
        sb.reply(text);
    }
    true
}

fn frag(sb: &mut Sandbox, line: &str) -> bool {
    if line != "frag" {
        return false;
    }
    let source = sb.reload.fragment().map(|p| p.source.clone()).unwrap_or_default();
    sb.reply(source);
    true
}

fn vert(sb: &mut Sandbox, line: &str) -> bool {
    if line != "vert" {
        return false;
    }
    let source = sb.reload.vertex().map(|p| p.source.clone()).unwrap_or_default();
    sb.reply(source);
    true
}

fn error(sb: &mut Sandbox, line: &str) -> bool {
    if line != "error" {
        return false;
    }
    if let Some(err) = sb.reload.last_error().cloned() {
        sb.reply(err.to_string());
    }
    true
}

fn camera_distance(sb: &mut Sandbox, line: &str) -> bool {
    if line == "camera_distance" {
        let distance = sb.state.camera.distance;
        sb.reply(distance.to_string());
        return true;
    }
    match split_args(line).as_slice() {
        [value] => match value.parse::<f32>() {
            Ok(distance) if distance.is_finite() && distance > 0.0 => {
                sb.state.camera.set_distance(distance);
                sb.uniforms.flag_change();
                true
            }
            _ => false,
        },
        _ => false,
    }
}

fn camera_position(sb: &mut Sandbox, line: &str) -> bool {
    if line == "camera_position" {
        let [x, y, z] = sb.state.camera.position().to_array();
        sb.reply(format!("{x},{y},{z}"));
        return true;
    }
    let args = split_args(line);
    let values: Option<Vec<f32>> = args.iter().map(|arg| arg.parse().ok()).collect();
    match values.as_deref() {
        Some(&[x, y, z]) => {
            sb.state.camera.set_position(Vec3::new(x, y, z));
            sb.uniforms.flag_change();
            true
        }
        _ => false,
    }
}

fn screenshot(sb: &mut Sandbox, line: &str) -> bool {
    let path = match split_args(line).as_slice() {
        [] if line == "screenshot" => {
            PathBuf::from(format!("screenshot_{}.png", Local::now().format("%Y%m%d-%H%M%S")))
        }
        [path] if !path.is_empty() => PathBuf::from(path),
        _ => return false,
    };
    sb.screenshot(path);
    true
}

fn sequence_args(line: &str) -> Option<(f64, f64, f64)> {
    let args = split_args(line);
    let numbers: Option<Vec<f64>> = args.iter().map(|arg| arg.parse().ok()).collect();
    match numbers?.as_slice() {
        [start, end] => Some((*start, *end, 24.0)),
        [start, end, fps] => Some((*start, *end, *fps)),
        _ => None,
    }
}

fn sequence_secs(sb: &mut Sandbox, line: &str) -> bool {
    let Some((start, end, fps)) = sequence_args(line) else {
        return false;
    };
    match sb.recorder.record_secs(start, end, fps) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "cannot start recording");
            false
        }
    }
}

fn sequence_frames(sb: &mut Sandbox, line: &str) -> bool {
    let Some((start, end, fps)) = sequence_args(line) else {
        return false;
    };
    if start < 0.0 || end < 0.0 || start.fract() != 0.0 || end.fract() != 0.0 {
        return false;
    }
    match sb.recorder.record_frames(start as u64, end as u64, fps) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "cannot start recording");
            false
        }
    }
}

fn help(sb: &mut Sandbox, line: &str) -> bool {
    let registry = sb.registry();
    if line == "help" {
        let text: String = registry.entries().map(|entry| entry.help_line()).collect();
        sb.reply(text);
        return true;
    }
    match split_args(line).as_slice() {
        [partial] => {
            let (_, text) = registry.suggest(partial);
            if !text.is_empty() {
                sb.reply(text);
            }
            true
        }
        _ => false,
    }
}

fn quit_now(sb: &mut Sandbox, line: &str) -> bool {
    if line != "q" {
        return false;
    }
    sb.request_exit(ExitMode::Immediate);
    true
}

fn quit(sb: &mut Sandbox, line: &str) -> bool {
    if line != "quit" && line != "exit" {
        return false;
    }
    sb.request_exit(ExitMode::AfterFrame);
    true
}

/// The command table every session starts with.
pub fn builtin_commands() -> CommandRegistry<Sandbox> {
    let mut registry = CommandRegistry::new();
    registry
        .register("help", "help[,<command>]", "print help for one or all commands", help)
        .register("version", "version", "return the version", version)
        .register("define,", "define,<KEYWORD>[,<VALUE>]", "add a define to the shaders", define)
        .register("undefine,", "undefine,<KEYWORD>", "remove a define from the shaders", undefine)
        .register("defines", "defines", "list the active defines", defines)
        .register("reload", "reload[,<filename>]", "reload one or all files", reload)
        .register("window_width", "window_width", "return the width of the window", window_width)
        .register("window_height", "window_height", "return the height of the window", window_height)
        .register("pixel_density", "pixel_density", "return the pixel density", pixel_density)
        .register("viewport", "viewport", "return the viewport as x,y,width,height", viewport)
        .register("mouse", "mouse", "return the mouse position", mouse)
        .register("fps", "fps[,<fps>]", "return or set the frames per second cap", fps)
        .register("delta", "delta", "return u_delta, the seconds between frames", delta)
        .register("date", "date", "return u_date as year,month,day,seconds", date)
        .register("time", "time[,<seconds>]", "return or set u_time", time)
        .register("frame", "frame", "return u_frame", frame)
        .register("fullFps", "fullFps[,on|off]", "render every frame or only on change", full_fps)
        .register("cursor", "cursor[,on|off]", "show or hide the cursor overlay", cursor)
        .register("uniforms", "uniforms[,all|active]", "list uniforms and their values", uniforms)
        .register("textures", "textures", "list the loaded textures", textures)
        .register("buffers", "buffers", "list the render buffers", buffers)
        .register("files", "files", "list the watched files", files)
        .register(
            "dependencies",
            "dependencies[,frag|vert]",
            "list the files included by the shaders",
            dependencies,
        )
        .register("frag", "frag", "print the fragment shader source", frag)
        .register("vert", "vert", "print the vertex shader source", vert)
        .register("error", "error", "print the last compile error", error)
        .register(
            "camera_distance",
            "camera_distance[,<dist>]",
            "return or set the camera distance",
            camera_distance,
        )
        .register(
            "camera_position",
            "camera_position[,<x>,<y>,<z>]",
            "return or set the camera position",
            camera_position,
        )
        .register("screenshot", "screenshot[,<filename>]", "save the next frame as a PNG", screenshot)
        .register(
            "sequence_secs",
            "sequence_secs,<A>,<B>[,<fps>]",
            "record seconds A to B as a PNG sequence",
            sequence_secs,
        )
        .register(
            "sequence_frames",
            "sequence_frames,<A>,<B>[,<fps>]",
            "record frames A to B as a PNG sequence",
            sequence_frames,
        )
        .register("q", "q", "close immediately", quit_now)
        .register("quit", "quit", "close after the current frame", quit)
        .register("exit", "exit", "close after the current frame", quit);
    registry
}

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::record::RecordOptions;

/// Pixel dimensions of a render target or surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Half the resolution on both axes, never collapsing below one pixel.
    pub fn halved(self) -> Self {
        Self {
            width: (self.width / 2).max(1),
            height: (self.height / 2).max(1),
        }
    }

    /// Applies [`Size::halved`] `times` times.
    pub fn halved_n(self, times: u32) -> Self {
        (0..times).fold(self, |size, _| size.halved())
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_vec2(&self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }
}

impl Default for Size {
    fn default() -> Self {
        Self::new(500, 500)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What a watched file contributes to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileRole {
    Fragment,
    Vertex,
    Geometry,
    Image,
    Dependency,
}

impl FileRole {
    /// Classifies a command-line argument by its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "frag" | "fs" => Some(Self::Fragment),
            "vert" | "vs" => Some(Self::Vertex),
            "ply" | "obj" | "stl" | "glb" | "gltf" => Some(Self::Geometry),
            "png" | "jpg" | "jpeg" | "bmp" | "gif" | "hdr" => Some(Self::Image),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fragment => "fragment",
            Self::Vertex => "vertex",
            Self::Geometry => "geometry",
            Self::Image => "image",
            Self::Dependency => "dependency",
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the session surfaces its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowStyle {
    #[default]
    Regular,
    Headless,
    Fullscreen,
    AlwaysOnTop,
}

/// Initial configuration for a [`crate::Sandbox`].
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub size: Size,
    pub position: Option<(i32, i32)>,
    pub style: WindowStyle,
    /// Frame-rate cap applied when nothing forces a redraw; `0` disables the cap.
    pub fps: f32,
    pub full_fps: bool,
    pub cursor: bool,
    pub vflip: bool,
    pub include_folders: Vec<PathBuf>,
    pub defines: Vec<(String, Option<String>)>,
    /// Convolution pyramid depth; `0` derives it from the output resolution.
    pub pyramid_depth: u32,
    pub watch_interval: Duration,
    pub record: RecordOptions,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            size: Size::default(),
            position: None,
            style: WindowStyle::Regular,
            fps: 60.0,
            full_fps: false,
            cursor: true,
            vflip: true,
            include_folders: Vec::new(),
            defines: Vec::new(),
            pyramid_depth: 0,
            watch_interval: Duration::from_millis(500),
            record: RecordOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halving_clamps_to_one_pixel() {
        let size = Size::new(5, 2);
        assert_eq!(size.halved(), Size::new(2, 1));
        assert_eq!(size.halved_n(4), Size::new(1, 1));
    }

    #[test]
    fn classifies_arguments_by_extension() {
        assert_eq!(FileRole::from_path(Path::new("a.FRAG")), Some(FileRole::Fragment));
        assert_eq!(FileRole::from_path(Path::new("a.vs")), Some(FileRole::Vertex));
        assert_eq!(FileRole::from_path(Path::new("mesh.ply")), Some(FileRole::Geometry));
        assert_eq!(FileRole::from_path(Path::new("tex.jpg")), Some(FileRole::Image));
        assert_eq!(FileRole::from_path(Path::new("notes.txt")), None);
    }
}

//! Uniform state: manual values set over the text protocol, automatic engine
//! uniforms, textures and streams.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{Datelike, Local, Timelike};
use glam::{Mat3, Mat4};

use crate::backend::{GpuBackend, TextureId, TextureRef};
use crate::camera::Camera;
use crate::interface::{is_identifier, GlslType, ProgramInterface};
use crate::stream::TextureStream;
use crate::types::Size;

/// Tagged value of a manual uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float1(f32),
    Float2([f32; 2]),
    Float3([f32; 3]),
    Float4([f32; 4]),
    Int1(i32),
    Int2([i32; 2]),
    Int3([i32; 3]),
    Int4([i32; 4]),
}

impl UniformValue {
    pub fn from_floats(values: &[f32]) -> Option<Self> {
        Some(match *values {
            [x] => Self::Float1(x),
            [x, y] => Self::Float2([x, y]),
            [x, y, z] => Self::Float3([x, y, z]),
            [x, y, z, w] => Self::Float4([x, y, z, w]),
            _ => return None,
        })
    }

    pub fn from_ints(values: &[i32]) -> Option<Self> {
        Some(match *values {
            [x] => Self::Int1(x),
            [x, y] => Self::Int2([x, y]),
            [x, y, z] => Self::Int3([x, y, z]),
            [x, y, z, w] => Self::Int4([x, y, z, w]),
            _ => return None,
        })
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Float1(_) | Self::Int1(_) => 1,
            Self::Float2(_) | Self::Int2(_) => 2,
            Self::Float3(_) | Self::Int3(_) => 3,
            Self::Float4(_) | Self::Int4(_) => 4,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(
            self,
            Self::Int1(_) | Self::Int2(_) | Self::Int3(_) | Self::Int4(_)
        )
    }

    /// Components widened to four floats, plus the number in use.
    pub fn as_f32_array(&self) -> ([f32; 4], usize) {
        let ints = self.as_i32_array();
        let mut out = [0.0; 4];
        match self {
            Self::Float1(x) => out[0] = *x,
            Self::Float2(v) => out[..2].copy_from_slice(v),
            Self::Float3(v) => out[..3].copy_from_slice(v),
            Self::Float4(v) => out = *v,
            _ => {
                for (slot, value) in out.iter_mut().zip(ints) {
                    *slot = value as f32;
                }
            }
        }
        (out, self.len())
    }

    pub fn as_i32_array(&self) -> [i32; 4] {
        let mut out = [0; 4];
        match self {
            Self::Int1(x) => out[0] = *x,
            Self::Int2(v) => out[..2].copy_from_slice(v),
            Self::Int3(v) => out[..3].copy_from_slice(v),
            Self::Int4(v) => out = *v,
            Self::Float1(x) => out[0] = *x as i32,
            Self::Float2(v) => out[..2].copy_from_slice(&v.map(|x| x as i32)),
            Self::Float3(v) => out[..3].copy_from_slice(&v.map(|x| x as i32)),
            Self::Float4(v) => out = v.map(|x| x as i32),
        }
        out
    }

    pub fn glsl_type(&self) -> GlslType {
        match self {
            Self::Float1(_) => GlslType::Float,
            Self::Float2(_) => GlslType::Vec2,
            Self::Float3(_) => GlslType::Vec3,
            Self::Float4(_) => GlslType::Vec4,
            Self::Int1(_) => GlslType::Int,
            Self::Int2(_) => GlslType::IVec2,
            Self::Int3(_) => GlslType::IVec3,
            Self::Int4(_) => GlslType::IVec4,
        }
    }
}

impl fmt::Display for UniformValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.len();
        if self.is_int() {
            let values = self.as_i32_array();
            write_joined(f, &values[..len])
        } else {
            let (values, _) = self.as_f32_array();
            let floats: Vec<FloatText> = values[..len].iter().copied().map(FloatText).collect();
            write_joined(f, &floats)
        }
    }
}

/// Float that keeps a decimal point when whole, so it parses back as a float.
struct FloatText(f32);

impl fmt::Display for FloatText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.0;
        if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e9 {
            write!(f, "{value:.1}")
        } else {
            write!(f, "{value}")
        }
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            f.write_str(",")?;
        }
        write!(f, "{value}")?;
    }
    Ok(())
}

/// What gets bound to a uniform name for one draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binding {
    Value(UniformValue),
    Mat3(Mat3),
    Mat4(Mat4),
    Texture(TextureRef),
}

impl From<UniformValue> for Binding {
    fn from(value: UniformValue) -> Self {
        Self::Value(value)
    }
}

/// Receiver of name → binding pairs.
pub trait UniformSink {
    fn bind(&mut self, name: &str, binding: Binding);
}

impl UniformSink for BTreeMap<String, Binding> {
    fn bind(&mut self, name: &str, binding: Binding) {
        self.insert(name.to_string(), binding);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualUniform {
    pub value: UniformValue,
    pub dirty: bool,
}

/// Engine values the automatic uniforms are computed from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineState {
    pub time: f32,
    pub delta: f32,
    pub frame: u64,
    /// Year, month, day, seconds since midnight.
    pub date: [f32; 4],
    pub resolution: [f32; 2],
    /// Pixels, origin at the bottom-left corner.
    pub mouse: [f32; 2],
    pub pixel_density: f32,
    pub camera: Camera,
}

impl Default for EngineState {
    fn default() -> Self {
        let mut state = Self {
            time: 0.0,
            delta: 0.0,
            frame: 0,
            date: [0.0; 4],
            resolution: Size::default().as_vec2(),
            mouse: [0.0; 2],
            pixel_density: 1.0,
            camera: Camera::default(),
        };
        state.refresh_date();
        state
    }
}

impl EngineState {
    pub fn refresh_date(&mut self) {
        let now = Local::now();
        let seconds = now.num_seconds_from_midnight() as f32 + now.nanosecond() as f32 / 1e9;
        self.date = [now.year() as f32, now.month() as f32, now.day() as f32, seconds];
    }
}

type Binder = fn(&EngineState) -> Binding;

/// Uniform computed by the engine every frame.
#[derive(Debug, Clone, Copy)]
pub struct AutoUniform {
    pub name: &'static str,
    pub ty: GlslType,
    pub binder: Binder,
    /// Declared by the active program.
    pub present: bool,
    /// Changes every frame, so its presence keeps the loop rendering.
    pub animated: bool,
}

fn float(value: f32) -> Binding {
    Binding::Value(UniformValue::Float1(value))
}

const BUILTINS: &[(&str, GlslType, Binder, bool)] = &[
    ("u_time", GlslType::Float, |s| float(s.time), true),
    ("u_delta", GlslType::Float, |s| float(s.delta), true),
    (
        "u_date",
        GlslType::Vec4,
        |s| Binding::Value(UniformValue::Float4(s.date)),
        true,
    ),
    (
        "u_frame",
        GlslType::Int,
        |s| Binding::Value(UniformValue::Int1(s.frame.min(i32::MAX as u64) as i32)),
        true,
    ),
    (
        "u_resolution",
        GlslType::Vec2,
        |s| Binding::Value(UniformValue::Float2(s.resolution)),
        false,
    ),
    (
        "u_mouse",
        GlslType::Vec2,
        |s| Binding::Value(UniformValue::Float2(s.mouse)),
        false,
    ),
    (
        "u_camera",
        GlslType::Vec3,
        |s| Binding::Value(UniformValue::Float3(s.camera.position().to_array())),
        false,
    ),
    ("u_cameraDistance", GlslType::Float, |s| float(s.camera.distance), false),
    ("u_cameraNearClip", GlslType::Float, |s| float(s.camera.near), false),
    ("u_cameraFarClip", GlslType::Float, |s| float(s.camera.far), false),
    ("u_viewMatrix", GlslType::Mat4, |s| Binding::Mat4(s.camera.view()), false),
    (
        "u_projectionMatrix",
        GlslType::Mat4,
        |s| Binding::Mat4(s.camera.projection()),
        false,
    ),
    (
        "u_modelViewProjectionMatrix",
        GlslType::Mat4,
        |s| Binding::Mat4(s.camera.view_projection()),
        false,
    ),
    (
        "u_normalMatrix",
        GlslType::Mat3,
        |s| Binding::Mat3(s.camera.normal_matrix()),
        false,
    ),
];

/// Names the engine computes itself.
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|(name, ..)| *name)
}

/// A static texture bound by name, plus its `<name>Resolution` uniform.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureBinding {
    pub name: String,
    pub texture: TextureId,
    pub size: Size,
    pub path: Option<PathBuf>,
    pub flip: bool,
}

/// A texture fed from a [`TextureStream`].
pub struct StreamBinding {
    pub name: String,
    pub stream: Box<dyn TextureStream>,
    pub texture: TextureId,
}

impl fmt::Debug for StreamBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBinding")
            .field("name", &self.name)
            .field("texture", &self.texture)
            .field("clock", &self.stream.clock())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct UniformStore {
    manual: BTreeMap<String, ManualUniform>,
    automatic: Vec<AutoUniform>,
    textures: Vec<TextureBinding>,
    streams: Vec<StreamBinding>,
    forced_change: bool,
}

impl UniformStore {
    pub fn new() -> Self {
        let mut store = Self::default();
        store.check_presence_in(&ProgramInterface::default());
        store
    }

    /// Parses `name,v1[,v2[,v3[,v4]]]` and stores it as a manual uniform.
    ///
    /// Integers become `IntN` when every value is an integer literal, otherwise
    /// `FloatN`. Anything malformed leaves the store untouched.
    pub fn parse_line(&mut self, line: &str) -> bool {
        let mut tokens = line.split(',').map(str::trim);
        let Some(name) = tokens.next().filter(|name| is_identifier(name)) else {
            return false;
        };
        let values: Vec<&str> = tokens.collect();
        if values.is_empty() || values.len() > 4 {
            return false;
        }
        let ints: Option<Vec<i32>> = values.iter().map(|token| token.parse().ok()).collect();
        let value = match ints {
            Some(ints) => UniformValue::from_ints(&ints),
            None => values
                .iter()
                .map(|token| token.parse::<f32>().ok().filter(|value| value.is_finite()))
                .collect::<Option<Vec<f32>>>()
                .and_then(|floats| UniformValue::from_floats(&floats)),
        };
        match value {
            Some(value) => {
                self.set(name, value);
                true
            }
            None => false,
        }
    }

    pub fn set(&mut self, name: &str, value: UniformValue) {
        self.manual
            .insert(name.to_string(), ManualUniform { value, dirty: true });
    }

    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.manual.get(name).map(|entry| &entry.value)
    }

    pub fn manual(&self) -> impl Iterator<Item = (&str, &ManualUniform)> {
        self.manual.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn automatic(&self) -> &[AutoUniform] {
        &self.automatic
    }

    /// Rebuilds the automatic entries with presence flags for `interface`.
    pub fn check_presence_in(&mut self, interface: &ProgramInterface) {
        self.automatic = BUILTINS
            .iter()
            .map(|&(name, ty, binder, animated)| AutoUniform {
                name,
                ty,
                binder,
                present: interface.declares(name),
                animated,
            })
            .collect();
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.automatic
            .iter()
            .any(|entry| entry.present && entry.name == name)
    }

    /// Adds or replaces the texture bound to `binding.name`. Returns the replaced one.
    pub fn add_texture(&mut self, binding: TextureBinding) -> Option<TextureBinding> {
        match self.textures.iter_mut().find(|t| t.name == binding.name) {
            Some(existing) => Some(std::mem::replace(existing, binding)),
            None => {
                self.textures.push(binding);
                None
            }
        }
    }

    pub fn textures(&self) -> &[TextureBinding] {
        &self.textures
    }

    pub fn texture(&self, name: &str) -> Option<&TextureBinding> {
        self.textures.iter().find(|t| t.name == name)
    }

    pub fn textures_from<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a TextureBinding> + 'a {
        self.textures
            .iter()
            .filter(move |t| t.path.as_deref() == Some(path))
    }

    pub fn add_stream(&mut self, binding: StreamBinding) {
        self.streams.retain(|s| s.name != binding.name);
        self.streams.push(binding);
    }

    pub fn streams(&self) -> &[StreamBinding] {
        &self.streams
    }

    /// Moves every stream to virtual time `seconds` and uploads frames that changed.
    /// `wait` blocks on the decoder, for recordings.
    pub fn update_streams(
        &mut self,
        backend: &mut dyn GpuBackend,
        seconds: f32,
        wait: bool,
    ) -> Result<()> {
        for stream in &mut self.streams {
            if let Some(frame) = stream.stream.update(seconds, wait) {
                backend.update_texture(stream.texture, &frame)?;
            }
        }
        Ok(())
    }

    /// Automatic (present only), then textures, then streams.
    pub fn bind_engine(
        &self,
        interface: &ProgramInterface,
        state: &EngineState,
        sink: &mut dyn UniformSink,
    ) {
        for entry in self.automatic.iter().filter(|entry| entry.present) {
            sink.bind(entry.name, (entry.binder)(state));
        }
        for texture in &self.textures {
            bind_declared(
                interface,
                sink,
                &texture.name,
                Binding::Texture(TextureRef::Texture(texture.texture)),
            );
            bind_declared(
                interface,
                sink,
                &format!("{}Resolution", texture.name),
                Binding::Value(UniformValue::Float2(texture.size.as_vec2())),
            );
        }
        for stream in &self.streams {
            let clock = stream.stream.clock();
            let name = &stream.name;
            let pairs = [
                (
                    format!("{name}Resolution"),
                    UniformValue::Float2(stream.stream.size().as_vec2()),
                ),
                (
                    format!("{name}CurrentFrame"),
                    UniformValue::Float1(clock.current_frame as f32),
                ),
                (
                    format!("{name}TotalFrames"),
                    UniformValue::Float1(clock.total_frames as f32),
                ),
                (format!("{name}Time"), UniformValue::Float1(clock.time())),
                (format!("{name}Duration"), UniformValue::Float1(clock.duration())),
                (format!("{name}Fps"), UniformValue::Float1(clock.fps)),
            ];
            bind_declared(
                interface,
                sink,
                name,
                Binding::Texture(TextureRef::Texture(stream.texture)),
            );
            for (uniform, value) in pairs {
                bind_declared(interface, sink, &uniform, Binding::Value(value));
            }
        }
    }

    /// Manual values the program declares.
    pub fn bind_manual(&self, interface: &ProgramInterface, sink: &mut dyn UniformSink) {
        for (name, entry) in &self.manual {
            bind_declared(interface, sink, name, Binding::Value(entry.value));
        }
    }

    /// Everything, manual last so it wins over engine values of the same name.
    pub fn bind_to(
        &self,
        interface: &ProgramInterface,
        state: &EngineState,
        sink: &mut dyn UniformSink,
    ) {
        self.bind_engine(interface, state, sink);
        self.bind_manual(interface, sink);
    }

    pub fn flag_change(&mut self) {
        self.forced_change = true;
    }

    /// Whether the next frame can differ from the last one.
    pub fn have_change(&self) -> bool {
        self.forced_change
            || self
                .automatic
                .iter()
                .any(|entry| entry.present && entry.animated)
            || self.streams.iter().any(|s| s.stream.is_playing())
            || self.manual.values().any(|entry| entry.dirty)
    }

    pub fn clear_change(&mut self) {
        self.forced_change = false;
        for entry in self.manual.values_mut() {
            entry.dirty = false;
        }
    }
}

fn bind_declared(
    interface: &ProgramInterface,
    sink: &mut dyn UniformSink,
    name: &str,
    binding: Binding,
) {
    if interface.declares(name) {
        sink.bind(name, binding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interface(source: &str) -> ProgramInterface {
        ProgramInterface::parse(source)
    }

    #[test]
    fn parse_line_picks_int_or_float() {
        let mut store = UniformStore::new();
        assert!(store.parse_line("u_count,3"));
        assert_eq!(store.get("u_count"), Some(&UniformValue::Int1(3)));
        assert!(store.parse_line("u_color, 1, 0.5, 0"));
        assert_eq!(store.get("u_color"), Some(&UniformValue::Float3([1.0, 0.5, 0.0])));
        assert!(store.parse_line("u_v,1,2,3,4"));
        assert_eq!(store.get("u_v"), Some(&UniformValue::Int4([1, 2, 3, 4])));
    }

    #[test]
    fn parse_line_rejects_malformed_without_mutation() {
        let mut store = UniformStore::new();
        assert!(store.parse_line("u_x,1.5"));
        for line in ["u_x", "u_x,1,2,3,4,5", ",1", "u_x,abc", "u_x,1,nan", "9x,1", "u_x,"] {
            assert!(!store.parse_line(line), "{line} should be rejected");
        }
        assert_eq!(store.get("u_x"), Some(&UniformValue::Float1(1.5)));
        assert_eq!(store.manual().count(), 1);
    }

    #[test]
    fn bind_to_reproduces_parsed_values() {
        let mut store = UniformStore::new();
        assert!(store.parse_line("u_amount,0.25,2"));
        assert!(store.parse_line("u_unused,1"));
        let iface = interface("uniform vec2 u_amount;\nuniform float u_time;\n");
        store.check_presence_in(&iface);
        let mut bound = BTreeMap::new();
        let state = EngineState {
            time: 3.0,
            ..Default::default()
        };
        store.bind_to(&iface, &state, &mut bound);
        assert_eq!(
            bound.get("u_amount"),
            Some(&Binding::Value(UniformValue::Float2([0.25, 2.0])))
        );
        assert_eq!(bound.get("u_time"), Some(&float(3.0)));
        assert!(!bound.contains_key("u_unused"));
        assert!(!bound.contains_key("u_resolution"));
    }

    #[test]
    fn manual_value_overrides_automatic() {
        let mut store = UniformStore::new();
        let iface = interface("uniform float u_time;\n");
        store.check_presence_in(&iface);
        store.set("u_time", UniformValue::Float1(42.0));
        let mut bound = BTreeMap::new();
        store.bind_to(&iface, &EngineState::default(), &mut bound);
        assert_eq!(bound.get("u_time"), Some(&float(42.0)));
    }

    #[test]
    fn presence_recheck_is_idempotent() {
        let mut store = UniformStore::new();
        let iface = interface("uniform float u_time;\nuniform vec2 u_mouse;\n");
        store.check_presence_in(&iface);
        let first: Vec<bool> = store.automatic().iter().map(|a| a.present).collect();
        store.check_presence_in(&iface);
        let second: Vec<bool> = store.automatic().iter().map(|a| a.present).collect();
        assert_eq!(first, second);
        assert!(store.is_present("u_time"));
        assert!(!store.is_present("u_delta"));
    }

    #[test]
    fn change_tracking() {
        let mut store = UniformStore::new();
        assert!(!store.have_change());
        store.parse_line("u_x,1");
        assert!(store.have_change());
        store.clear_change();
        assert!(!store.have_change());
        store.check_presence_in(&interface("uniform float u_time;"));
        assert!(store.have_change());
        store.check_presence_in(&interface("uniform vec2 u_mouse;"));
        assert!(!store.have_change());
        store.flag_change();
        assert!(store.have_change());
    }

    #[test]
    fn textures_bind_with_resolution() {
        let mut store = UniformStore::new();
        store.add_texture(TextureBinding {
            name: "u_tex0".into(),
            texture: TextureId(7),
            size: Size::new(64, 32),
            path: None,
            flip: true,
        });
        let iface = interface("uniform sampler2D u_tex0;\nuniform vec2 u_tex0Resolution;\n");
        let mut bound = BTreeMap::new();
        store.bind_to(&iface, &EngineState::default(), &mut bound);
        assert_eq!(
            bound.get("u_tex0"),
            Some(&Binding::Texture(TextureRef::Texture(TextureId(7))))
        );
        assert_eq!(
            bound.get("u_tex0Resolution"),
            Some(&Binding::Value(UniformValue::Float2([64.0, 32.0])))
        );
    }

    #[test]
    fn values_print_as_protocol_lines() {
        assert_eq!(UniformValue::Float3([1.0, 0.5, -2.0]).to_string(), "1.0,0.5,-2.0");
        assert_eq!(UniformValue::Int2([3, -4]).to_string(), "3,-4");
    }

    #[test]
    fn whole_floats_echo_back_as_floats() {
        let mut store = UniformStore::new();
        let value = UniformValue::Float2([1.0, 3.0]);
        assert!(store.parse_line(&format!("u_pair,{value}")));
        assert_eq!(store.get("u_pair"), Some(&value));
    }
}

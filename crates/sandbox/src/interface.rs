//! Declared uniform interface of a program and its std140 packing.

use std::sync::OnceLock;

use regex::Regex;

use crate::preprocess::strip_comments;
use crate::uniforms::Binding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlslType {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    Mat3,
    Mat4,
    Sampler2D,
}

impl GlslType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "float" => Self::Float,
            "int" => Self::Int,
            "bool" => Self::Bool,
            "vec2" => Self::Vec2,
            "vec3" => Self::Vec3,
            "vec4" => Self::Vec4,
            "ivec2" => Self::IVec2,
            "ivec3" => Self::IVec3,
            "ivec4" => Self::IVec4,
            "mat3" => Self::Mat3,
            "mat4" => Self::Mat4,
            "sampler2D" => Self::Sampler2D,
            _ => return None,
        })
    }

    pub fn glsl_name(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::IVec2 => "ivec2",
            Self::IVec3 => "ivec3",
            Self::IVec4 => "ivec4",
            Self::Mat3 => "mat3",
            Self::Mat4 => "mat4",
            Self::Sampler2D => "sampler2D",
        }
    }

    pub fn is_sampler(&self) -> bool {
        matches!(self, Self::Sampler2D)
    }

    fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::Int | Self::Bool | Self::IVec2 | Self::IVec3 | Self::IVec4
        )
    }

    fn components(&self) -> usize {
        match self {
            Self::Float | Self::Int | Self::Bool => 1,
            Self::Vec2 | Self::IVec2 => 2,
            Self::Vec3 | Self::IVec3 => 3,
            Self::Vec4 | Self::IVec4 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
            Self::Sampler2D => 0,
        }
    }

    /// `(size, alignment)` in bytes under std140.
    pub fn std140(&self) -> (usize, usize) {
        match self {
            Self::Float | Self::Int | Self::Bool => (4, 4),
            Self::Vec2 | Self::IVec2 => (8, 8),
            Self::Vec3 | Self::IVec3 => (12, 16),
            Self::Vec4 | Self::IVec4 => (16, 16),
            Self::Mat3 => (48, 16),
            Self::Mat4 => (64, 16),
            Self::Sampler2D => (0, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: String,
    pub ty: GlslType,
}

pub(crate) fn declaration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*uniform\s+(?:(?:lowp|mediump|highp)\s+)?(\w+)\s+([^;{]+);")
            .expect("valid uniform pattern")
    })
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|ch| ch.is_ascii_alphabetic() || ch == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Uniform declarations found in one or more shader stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramInterface {
    decls: Vec<UniformDecl>,
}

impl ProgramInterface {
    /// Collects `uniform <type> <name>[, <name>...];` declarations outside comments.
    ///
    /// Arrays and unknown types are skipped.
    pub fn parse(source: &str) -> Self {
        let stripped = strip_comments(source);
        let mut interface = Self::default();
        for captures in declaration_regex().captures_iter(&stripped) {
            let Some(ty) = GlslType::parse(&captures[1]) else {
                tracing::debug!(ty = &captures[1], "skipping uniform of unsupported type");
                continue;
            };
            for name in captures[2].split(',').map(str::trim) {
                if !is_identifier(name) {
                    tracing::debug!(name, "skipping unsupported uniform declarator");
                    continue;
                }
                interface.insert(UniformDecl {
                    name: name.to_string(),
                    ty,
                });
            }
        }
        interface
    }

    pub fn merge(vertex: &ProgramInterface, fragment: &ProgramInterface) -> Self {
        let mut merged = vertex.clone();
        for decl in &fragment.decls {
            merged.insert(decl.clone());
        }
        merged
    }

    fn insert(&mut self, decl: UniformDecl) {
        if !self.declares(&decl.name) {
            self.decls.push(decl);
        }
    }

    pub fn declares(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&UniformDecl> {
        self.decls.iter().find(|decl| decl.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UniformDecl> {
        self.decls.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &UniformDecl> {
        self.decls.iter().filter(|decl| !decl.ty.is_sampler())
    }

    pub fn samplers(&self) -> impl Iterator<Item = &UniformDecl> {
        self.decls.iter().filter(|decl| decl.ty.is_sampler())
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSlot {
    pub name: String,
    pub ty: GlslType,
    pub offset: usize,
}

/// Offsets of non-sampler uniforms packed into one std140 block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Std140Layout {
    fields: Vec<FieldSlot>,
    size: usize,
}

fn align_to(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

impl Std140Layout {
    pub fn new<'a>(decls: impl IntoIterator<Item = &'a UniformDecl>) -> Self {
        let mut offset = 0;
        let mut fields = Vec::new();
        for decl in decls.into_iter().filter(|decl| !decl.ty.is_sampler()) {
            let (size, align) = decl.ty.std140();
            offset = align_to(offset, align);
            fields.push(FieldSlot {
                name: decl.name.clone(),
                ty: decl.ty,
                offset,
            });
            offset += size;
        }
        Self {
            fields,
            size: align_to(offset.max(16), 16),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fields(&self) -> &[FieldSlot] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSlot> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Writes `binding` into `bytes` at the slot for `name`, converting scalar kinds.
    ///
    /// Returns false when the name is not part of the block or the binding cannot
    /// be represented by the declared type.
    pub fn write(&self, bytes: &mut [u8], name: &str, binding: &Binding) -> bool {
        let Some(field) = self.field(name) else {
            return false;
        };
        let Some(words) = encode(field.ty, binding) else {
            return false;
        };
        let end = field.offset + field.ty.std140().0;
        if end > bytes.len() {
            return false;
        }
        let slot = &mut bytes[field.offset..end];
        match field.ty {
            GlslType::Mat3 => {
                for column in 0..3 {
                    for row in 0..3 {
                        let at = column * 16 + row * 4;
                        slot[at..at + 4].copy_from_slice(&words[column * 3 + row]);
                    }
                }
            }
            _ => {
                for (index, word) in words.iter().enumerate() {
                    slot[index * 4..index * 4 + 4].copy_from_slice(word);
                }
            }
        }
        true
    }
}

fn encode(ty: GlslType, binding: &Binding) -> Option<Vec<[u8; 4]>> {
    match (ty, binding) {
        (GlslType::Mat3, Binding::Mat3(matrix)) => {
            Some(matrix.to_cols_array().iter().map(|v| v.to_ne_bytes()).collect())
        }
        (GlslType::Mat4, Binding::Mat4(matrix)) => {
            Some(matrix.to_cols_array().iter().map(|v| v.to_ne_bytes()).collect())
        }
        (GlslType::Mat3 | GlslType::Mat4 | GlslType::Sampler2D, _) => None,
        (_, Binding::Value(value)) => {
            let count = ty.components();
            let mut words = vec![[0u8; 4]; count];
            let (floats, len) = value.as_f32_array();
            let ints = value.as_i32_array();
            for (index, word) in words.iter_mut().enumerate().take(len.min(count)) {
                *word = if ty == GlslType::Bool {
                    i32::from(floats[index] != 0.0).to_ne_bytes()
                } else if ty.is_integer() {
                    ints[index].to_ne_bytes()
                } else {
                    floats[index].to_ne_bytes()
                };
            }
            Some(words)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniforms::UniformValue;

    const SOURCE: &str = r"
#ifdef GL_ES
precision mediump float;
#endif
uniform float u_time;
uniform vec2 u_resolution, u_mouse;
uniform highp vec3 u_camera;
// uniform float u_commented;
/* uniform float u_blocked; */
uniform sampler2D u_tex0;
uniform mat4 u_viewMatrix;
uniform float u_weights[4];
uniform Custom { float x; } custom;
";

    #[test]
    fn parses_declarations() {
        let interface = ProgramInterface::parse(SOURCE);
        let names: Vec<_> = interface.iter().map(|decl| decl.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["u_time", "u_resolution", "u_mouse", "u_camera", "u_tex0", "u_viewMatrix"]
        );
        assert_eq!(interface.get("u_camera").unwrap().ty, GlslType::Vec3);
        assert!(!interface.declares("u_commented"));
        assert!(!interface.declares("u_blocked"));
        assert_eq!(interface.samplers().count(), 1);
    }

    #[test]
    fn merge_keeps_each_name_once() {
        let vertex = ProgramInterface::parse("uniform float u_time;\nuniform mat4 u_model;\n");
        let fragment = ProgramInterface::parse("uniform float u_time;\nuniform vec2 u_mouse;\n");
        let merged = ProgramInterface::merge(&vertex, &fragment);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn std140_offsets_follow_alignment_rules() {
        let interface = ProgramInterface::parse(
            "uniform float a;\nuniform vec3 b;\nuniform vec2 c;\nuniform mat3 d;\nuniform int e;\n",
        );
        let layout = Std140Layout::new(interface.iter());
        let offsets: Vec<_> = layout.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 16, 32, 48, 96]);
        assert_eq!(layout.size(), 112);
    }

    #[test]
    fn writes_converted_values() {
        let interface = ProgramInterface::parse("uniform int count;\nuniform vec4 color;\n");
        let layout = Std140Layout::new(interface.iter());
        let mut bytes = vec![0u8; layout.size()];

        assert!(layout.write(&mut bytes, "count", &Binding::Value(UniformValue::Float1(3.7))));
        assert_eq!(i32::from_ne_bytes(bytes[0..4].try_into().unwrap()), 3);

        assert!(layout.write(
            &mut bytes,
            "color",
            &Binding::Value(UniformValue::Float2([0.5, 1.0]))
        ));
        assert_eq!(f32::from_ne_bytes(bytes[16..20].try_into().unwrap()), 0.5);
        assert_eq!(f32::from_ne_bytes(bytes[20..24].try_into().unwrap()), 1.0);
        assert_eq!(f32::from_ne_bytes(bytes[24..28].try_into().unwrap()), 0.0);

        assert!(!layout.write(&mut bytes, "missing", &Binding::Value(UniformValue::Int1(1))));
        assert!(!layout.write(&mut bytes, "color", &Binding::Mat4(glam::Mat4::IDENTITY)));
    }

    #[test]
    fn mat3_columns_are_padded() {
        let interface = ProgramInterface::parse("uniform mat3 m;\n");
        let layout = Std140Layout::new(interface.iter());
        let mut bytes = vec![0u8; layout.size()];
        assert!(layout.write(&mut bytes, "m", &Binding::Mat3(glam::Mat3::IDENTITY)));
        let read = |at: usize| f32::from_ne_bytes(bytes[at..at + 4].try_into().unwrap());
        assert_eq!(read(0), 1.0);
        assert_eq!(read(20), 1.0);
        assert_eq!(read(40), 1.0);
        assert_eq!(read(12), 0.0);
    }
}

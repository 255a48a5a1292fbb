//! Turns desktop/ES-style GLSL into the Vulkan-flavoured GLSL 450 naga accepts.
//!
//! Non-sampler uniforms move into one std140 block at set 0, samplers become
//! texture/sampler pairs at set 1, varyings and attributes get explicit
//! locations, and the vertex stage flips `gl_Position.y` so offscreen rows are
//! stored bottom-up like GL framebuffers.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::backend::ProgramSource;
use crate::interface::{declaration_regex, GlslType, ProgramInterface, Std140Layout};

pub const UNIFORM_BLOCK: &str = "sb_ubo";

/// Vertex attributes the quad buffer provides, by shader location.
pub const ATTRIBUTES: [(&str, u32); 4] = [
    ("a_position", 0),
    ("a_texcoord", 1),
    ("a_normal", 2),
    ("a_color", 3),
];

#[derive(Debug, Clone, PartialEq)]
pub struct WrappedProgram {
    pub vertex: String,
    pub fragment: String,
    /// Sampler uniforms in binding order; sampler `k` uses bindings `2k` and `2k + 1`.
    pub samplers: Vec<String>,
    pub layout: Std140Layout,
    pub interface: ProgramInterface,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Stage {
    Vertex,
    Fragment,
}

fn io_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(varying|attribute|in|out)\s+((?:(?:lowp|mediump|highp|flat|smooth|noperspective)\s+)*)(\w+)\s+(\w+)\s*;",
        )
        .expect("valid varying pattern")
    })
}

fn directive_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(#[ \t]*version\b.*|precision\s+\w+\s+\w+\s*;)[ \t]*$")
            .expect("valid directive pattern")
    })
}

fn texture2d_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\btexture2D\s*\(").expect("valid texture2D pattern"))
}

fn frag_color_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bgl_FragColor\b").expect("valid gl_FragColor pattern"))
}

fn tex_name(name: &str) -> String {
    format!("sb_tex_{name}")
}

fn sampler_name(name: &str) -> String {
    format!("sb_smp_{name}")
}

fn member_name(name: &str) -> String {
    format!("sb_{name}")
}

/// Varying names declared by either stage, sorted so both agree on locations.
fn varying_names(vertex: &str, fragment: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    for (source, stage) in [(vertex, Stage::Vertex), (fragment, Stage::Fragment)] {
        for captures in io_regex().captures_iter(source) {
            let qualifier = &captures[1];
            let is_varying = qualifier == "varying"
                || (stage == Stage::Vertex && qualifier == "out")
                || (stage == Stage::Fragment && qualifier == "in");
            if is_varying {
                names.insert(captures[4].to_string());
            }
        }
    }
    names.into_iter().collect()
}

fn header(defines: &[(String, Option<String>)], stage: Stage) -> String {
    let mut out = String::from("#version 450\n");
    let stage_define = match stage {
        Stage::Vertex => "VERTEX_SHADER",
        Stage::Fragment => "FRAGMENT_SHADER",
    };
    let _ = writeln!(out, "#define {stage_define} 1");
    for (name, value) in defines {
        match value {
            Some(value) => {
                let _ = writeln!(out, "#define {name} {value}");
            }
            None => {
                let _ = writeln!(out, "#define {name}");
            }
        }
    }
    out
}

fn uniform_block(layout: &Std140Layout, stage_decls: &ProgramInterface) -> String {
    let mut out = String::from("layout(std140, set = 0, binding = 0) uniform SandboxUniforms {\n");
    if layout.fields().is_empty() {
        out.push_str("    vec4 sb_unused;\n");
    }
    for field in layout.fields() {
        let ty = match field.ty {
            GlslType::Bool => "int",
            other => other.glsl_name(),
        };
        let _ = writeln!(out, "    {ty} {};", member_name(&field.name));
    }
    let _ = writeln!(out, "}} {UNIFORM_BLOCK};");
    for field in layout.fields() {
        if !stage_decls.declares(&field.name) {
            continue;
        }
        let member = format!("{UNIFORM_BLOCK}.{}", member_name(&field.name));
        if field.ty == GlslType::Bool {
            let _ = writeln!(out, "#define {} ({member} != 0)", field.name);
        } else {
            let _ = writeln!(out, "#define {} {member}", field.name);
        }
    }
    out
}

fn rewrite_uniforms(source: &str, samplers: &[String]) -> String {
    declaration_regex()
        .replace_all(source, |captures: &Captures| {
            let Some(ty) = GlslType::parse(&captures[1]) else {
                return captures[0].to_string();
            };
            let names: Vec<&str> = captures[2].split(',').map(str::trim).collect();
            if !ty.is_sampler() {
                return String::new();
            }
            let mut out = String::new();
            for name in names {
                let Some(slot) = samplers.iter().position(|s| s == name) else {
                    continue;
                };
                let binding = slot as u32 * 2;
                let _ = write!(
                    out,
                    "layout(set = 1, binding = {binding}) uniform texture2D {tex}; \
                     layout(set = 1, binding = {next}) uniform sampler {smp}; \
                     #define {name} sampler2D({tex}, {smp})\n",
                    next = binding + 1,
                    tex = tex_name(name),
                    smp = sampler_name(name),
                );
            }
            out
        })
        .into_owned()
}

fn rewrite_io(source: &str, stage: Stage, varyings: &[String]) -> String {
    io_regex()
        .replace_all(source, |captures: &Captures| {
            let qualifier = &captures[1];
            let ty = &captures[3];
            let name = &captures[4];
            let interpolation = captures[2]
                .split_whitespace()
                .find(|word| matches!(*word, "flat" | "smooth" | "noperspective"))
                .map(|word| format!("{word} "))
                .unwrap_or_default();
            let is_attribute = stage == Stage::Vertex && (qualifier == "attribute" || qualifier == "in");
            if is_attribute {
                return match ATTRIBUTES.iter().find(|(known, _)| *known == name) {
                    Some((_, location)) => format!("layout(location = {location}) in {ty} {name};"),
                    None => format!("{ty} {name} = {ty}(0.0);"),
                };
            }
            if stage == Stage::Fragment && qualifier == "out" {
                return format!("layout(location = 0) out {ty} {name};");
            }
            let Some(location) = varyings.iter().position(|v| v == name) else {
                return captures[0].to_string();
            };
            let direction = match stage {
                Stage::Vertex => "out",
                Stage::Fragment => "in",
            };
            format!("layout(location = {location}) {interpolation}{direction} {ty} {name};")
        })
        .into_owned()
}

fn strip_directives(source: &str) -> String {
    directive_regex().replace_all(source, "").into_owned()
}

fn wrap_stage(
    source: &str,
    stage: Stage,
    program: &ProgramSource,
    layout: &Std140Layout,
    samplers: &[String],
    varyings: &[String],
) -> String {
    let stage_decls = ProgramInterface::parse(source);
    let mut body = strip_directives(source);
    body = rewrite_uniforms(&body, samplers);
    body = rewrite_io(&body, stage, varyings);
    body = texture2d_regex().replace_all(&body, "texture(").into_owned();

    let mut out = header(&program.defines, stage);
    out.push_str(&uniform_block(layout, &stage_decls));
    match stage {
        Stage::Vertex => {
            out.push_str("#define main sb_user_main\n#line 1\n");
            out.push_str(&body);
            out.push_str(
                "\n#undef main\nvoid main() {\n    sb_user_main();\n    gl_Position.y = -gl_Position.y;\n}\n",
            );
        }
        Stage::Fragment => {
            if frag_color_regex().is_match(&body) {
                out.push_str("layout(location = 0) out vec4 sb_fragColor;\n");
                body = frag_color_regex().replace_all(&body, "sb_fragColor").into_owned();
            }
            out.push_str("#line 1\n");
            out.push_str(&body);
        }
    }
    out
}

/// Rewrites both stages of `program` so they share one uniform block and sampler set.
pub fn wrap_program(program: &ProgramSource) -> WrappedProgram {
    let interface = ProgramInterface::merge(
        &ProgramInterface::parse(&program.vertex),
        &ProgramInterface::parse(&program.fragment),
    );
    let layout = Std140Layout::new(interface.iter());
    let samplers: Vec<String> = interface.samplers().map(|decl| decl.name.clone()).collect();
    let varyings = varying_names(&program.vertex, &program.fragment);
    WrappedProgram {
        vertex: wrap_stage(&program.vertex, Stage::Vertex, program, &layout, &samplers, &varyings),
        fragment: wrap_stage(&program.fragment, Stage::Fragment, program, &layout, &samplers, &varyings),
        samplers,
        layout,
        interface,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::{DEFAULT_TEXTURE_FRAGMENT, DEFAULT_VERTEX};

    fn program(vertex: &str, fragment: &str) -> ProgramSource {
        ProgramSource {
            label: "test".into(),
            vertex: vertex.into(),
            fragment: fragment.into(),
            defines: vec![("BUFFER_0".into(), None), ("SCALE".into(), Some("2.0".into()))],
        }
    }

    #[test]
    fn moves_values_into_block_and_samplers_into_pairs() {
        let wrapped = wrap_program(&program(DEFAULT_VERTEX, DEFAULT_TEXTURE_FRAGMENT));
        assert_eq!(wrapped.samplers, vec!["u_tex0"]);
        let frag = &wrapped.fragment;
        assert!(frag.starts_with("#version 450\n"));
        assert!(frag.contains("#define BUFFER_0\n"));
        assert!(frag.contains("#define SCALE 2.0\n"));
        assert!(frag.contains("vec2 sb_u_resolution;"));
        assert!(frag.contains("#define u_resolution sb_ubo.sb_u_resolution"));
        assert!(frag.contains("uniform texture2D sb_tex_u_tex0;"));
        assert!(frag.contains("#define u_tex0 sampler2D(sb_tex_u_tex0, sb_smp_u_tex0)"));
        assert!(frag.contains("layout(location = 0) in vec2 v_texcoord;"));
        assert!(frag.contains("sb_fragColor = texture(u_tex0, v_texcoord);"));
        assert!(!frag.contains("uniform vec2 u_resolution;"));
        assert!(!frag.contains("precision mediump float;"));
    }

    #[test]
    fn vertex_gets_locations_and_flip() {
        let wrapped = wrap_program(&program(DEFAULT_VERTEX, DEFAULT_TEXTURE_FRAGMENT));
        let vert = &wrapped.vertex;
        assert!(vert.contains("layout(location = 0) in vec4 a_position;"));
        assert!(vert.contains("layout(location = 1) in vec2 a_texcoord;"));
        assert!(vert.contains("layout(location = 0) out vec2 v_texcoord;"));
        assert!(vert.contains("gl_Position.y = -gl_Position.y;"));
    }

    #[test]
    fn both_stages_share_one_block_layout() {
        let vertex = "uniform mat4 u_model;\nattribute vec4 a_position;\nvoid main() { gl_Position = u_model * a_position; }\n";
        let fragment = "uniform bool u_on;\nvoid main() { gl_FragColor = vec4(u_on ? 1.0 : 0.0); }\n";
        let wrapped = wrap_program(&program(vertex, fragment));
        for stage in [&wrapped.vertex, &wrapped.fragment] {
            assert!(stage.contains("mat4 sb_u_model;"));
            assert!(stage.contains("int sb_u_on;"));
        }
        assert!(wrapped.fragment.contains("#define u_on (sb_ubo.sb_u_on != 0)"));
        assert!(!wrapped.fragment.contains("#define u_model"));
        assert_eq!(wrapped.layout.size(), 80);
    }

    #[test]
    fn unknown_attributes_become_constants() {
        let vertex = "attribute vec3 a_tangent;\nvoid main() { gl_Position = vec4(a_tangent, 1.0); }\n";
        let wrapped = wrap_program(&program(vertex, "void main() {}\n"));
        assert!(wrapped.vertex.contains("vec3 a_tangent = vec3(0.0);"));
    }
}

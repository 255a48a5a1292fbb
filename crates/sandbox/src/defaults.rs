//! Built-in shader sources: stubs for newly created files and internal programs.

use crate::types::FileRole;

/// What the scene contains, which decides the stub written for a missing shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneHint {
    Geometry,
    Texture,
    Bare,
}

pub const DEFAULT_VERTEX: &str = r"#ifdef GL_ES
precision mediump float;
#endif

attribute vec4 a_position;
attribute vec2 a_texcoord;
varying vec2 v_texcoord;

void main() {
    v_texcoord = a_texcoord;
    gl_Position = a_position;
}
";

pub const DEFAULT_FRAGMENT: &str = r"#ifdef GL_ES
precision mediump float;
#endif

uniform vec2 u_resolution;
uniform float u_time;

void main() {
    vec2 st = gl_FragCoord.xy / u_resolution;
    vec3 color = vec3(st.x, st.y, abs(sin(u_time)));
    gl_FragColor = vec4(color, 1.0);
}
";

pub const DEFAULT_TEXTURE_FRAGMENT: &str = r"#ifdef GL_ES
precision mediump float;
#endif

uniform sampler2D u_tex0;
uniform vec2 u_resolution;

varying vec2 v_texcoord;

void main() {
    gl_FragColor = texture2D(u_tex0, v_texcoord);
}
";

pub const DEFAULT_SCENE_VERTEX: &str = r"#ifdef GL_ES
precision mediump float;
#endif

uniform mat4 u_modelViewProjectionMatrix;

attribute vec4 a_position;
attribute vec3 a_normal;
varying vec3 v_normal;

void main() {
    v_normal = a_normal;
    gl_Position = u_modelViewProjectionMatrix * a_position;
}
";

pub const DEFAULT_SCENE_FRAGMENT: &str = r"#ifdef GL_ES
precision mediump float;
#endif

uniform vec3 u_camera;
varying vec3 v_normal;

void main() {
    vec3 n = normalize(v_normal);
    float shade = dot(n, normalize(u_camera)) * 0.5 + 0.5;
    gl_FragColor = vec4(vec3(shade), 1.0);
}
";

/// Shown while the last compile failed and nothing valid is loaded.
pub const ERROR_FRAGMENT: &str = r"uniform vec2 u_resolution;

void main() {
    vec2 st = gl_FragCoord.xy / u_resolution;
    float stripe = step(0.5, fract((st.x + st.y) * 8.0));
    gl_FragColor = vec4(mix(vec3(0.6, 0.0, 0.0), vec3(0.1), stripe), 1.0);
}
";

/// Copies the offscreen scene when postprocessing is needed but not written.
pub const PASSTHROUGH_FRAGMENT: &str = r"uniform sampler2D u_scene;
uniform vec2 u_resolution;

void main() {
    gl_FragColor = texture2D(u_scene, gl_FragCoord.xy / u_resolution);
}
";

/// Fallback pyramid step: box downsample, blend on the way up.
pub const PYRAMID_FRAGMENT: &str = r"uniform sampler2D u_convolutionPyramidTex0;
uniform sampler2D u_convolutionPyramidTex1;
uniform int u_convolutionPyramidUpscaling;
uniform vec2 u_resolution;

void main() {
    vec2 st = gl_FragCoord.xy / u_resolution;
    vec2 px = 0.5 / u_resolution;
    if (u_convolutionPyramidUpscaling != 0) {
        vec4 coarse = texture2D(u_convolutionPyramidTex0, st);
        vec4 fine = texture2D(u_convolutionPyramidTex1, st);
        gl_FragColor = mix(fine, coarse, 0.5);
    } else {
        vec4 sum = texture2D(u_convolutionPyramidTex0, st + vec2(-px.x, -px.y));
        sum += texture2D(u_convolutionPyramidTex0, st + vec2(px.x, -px.y));
        sum += texture2D(u_convolutionPyramidTex0, st + vec2(-px.x, px.y));
        sum += texture2D(u_convolutionPyramidTex0, st + vec2(px.x, px.y));
        gl_FragColor = sum * 0.25;
    }
}
";

/// Stub written when a primary shader file does not exist yet.
pub fn stub_for(role: FileRole, hint: SceneHint) -> Option<&'static str> {
    match (role, hint) {
        (FileRole::Fragment, SceneHint::Geometry) => Some(DEFAULT_SCENE_FRAGMENT),
        (FileRole::Fragment, SceneHint::Texture) => Some(DEFAULT_TEXTURE_FRAGMENT),
        (FileRole::Fragment, SceneHint::Bare) => Some(DEFAULT_FRAGMENT),
        (FileRole::Vertex, SceneHint::Geometry) => Some(DEFAULT_SCENE_VERTEX),
        (FileRole::Vertex, _) => Some(DEFAULT_VERTEX),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::ProgramInterface;

    #[test]
    fn stubs_follow_scene_content() {
        let texture = stub_for(FileRole::Fragment, SceneHint::Texture).unwrap();
        assert!(ProgramInterface::parse(texture).declares("u_tex0"));
        let geometry = stub_for(FileRole::Vertex, SceneHint::Geometry).unwrap();
        assert!(ProgramInterface::parse(geometry).declares("u_modelViewProjectionMatrix"));
        assert!(stub_for(FileRole::Image, SceneHint::Bare).is_none());
    }
}

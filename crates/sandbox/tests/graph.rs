mod common;

use std::fs;

use common::{harness, test_config};
use sandbox::Size;
use tempfile::TempDir;

const PYRAMID: &str = r"
uniform sampler2D u_convolutionPyramid;
uniform vec2 u_resolution;
void main() { gl_FragColor = vec4(1.0); }
";

const BUFFERS: &str = r"
uniform sampler2D u_buffer0;
uniform sampler2D u_buffer1;
uniform vec2 u_resolution;
void main() {
#if defined(BUFFER_0)
    gl_FragColor = texture2D(u_buffer1, vec2(0.0));
#elif defined(BUFFER_1)
    gl_FragColor = vec4(1.0);
#elif defined(POSTPROCESSING)
    gl_FragColor = texture2D(u_buffer0, vec2(0.0));
#else
    gl_FragColor = vec4(0.0);
#endif
}
";

#[test]
fn pyramid_runs_two_passes_per_level_ending_at_full_size() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PYRAMID).unwrap();
    let mut h = harness(test_config(dir.path()), &[&frag]);
    assert_eq!(h.sandbox.graph().depth(), 3);

    h.sandbox.render_frame().unwrap();
    let log = h.backend.log.lock().unwrap();
    let labels = log.frame_draws(0);
    assert_eq!(labels.first().map(String::as_str), Some("main"));
    assert_eq!(labels.iter().filter(|l| *l == "pyramid").count(), 6);
    assert_eq!(labels.last().map(String::as_str), Some("passthrough"));

    let pyramid: Vec<Size> = log
        .draws
        .iter()
        .filter(|d| d.label == "pyramid")
        .map(|d| d.size)
        .collect();
    assert_eq!(pyramid[0], Size::new(32, 16));
    assert_eq!(pyramid[2], Size::new(8, 4));
    assert_eq!(*pyramid.last().unwrap(), Size::new(64, 32));
}

#[test]
fn buffers_render_in_dependency_order_before_the_scene() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, BUFFERS).unwrap();
    let mut h = harness(test_config(dir.path()), &[&frag]);

    h.sandbox.render_frame().unwrap();
    let log = h.backend.log.lock().unwrap();
    assert_eq!(
        log.frame_draws(0),
        vec!["buffer1", "buffer0", "main", "postprocessing"]
    );
    let post = log.draws.last().unwrap();
    assert!(post.bindings.contains(&"u_buffer0".to_string()));
    assert!(post.bindings.contains(&"u_resolution".to_string()));
}

#[test]
fn resize_reallocates_targets_at_the_new_size() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PYRAMID).unwrap();
    let mut h = harness(test_config(dir.path()), &[&frag]);

    h.sandbox.resize(Size::new(128, 128)).unwrap();
    let log = h.backend.log.lock().unwrap();
    assert!(log
        .targets
        .values()
        .any(|(label, size)| label == "composite" && *size == Size::new(128, 128)));
    assert!(log.targets.values().all(|(_, size)| size.width <= 128));
    drop(log);
    h.sandbox.render_frame().unwrap();
    let last = h.backend.log.lock().unwrap().draws.last().cloned().unwrap();
    assert_eq!(last.size, Size::new(128, 128));
}

mod common;

use std::fs;

use common::{harness, test_config, PLAIN};
use tempfile::TempDir;

#[test]
fn frame_range_writes_one_file_per_frame() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("frames");
    fs::create_dir_all(&out).unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PLAIN).unwrap();
    let mut h = harness(test_config(&out), &[&frag]);

    assert!(h.sandbox.run_command("sequence_frames,0,48"));
    assert!(h.sandbox.is_recording());
    let mut frames = 0;
    while h.sandbox.is_recording() {
        h.sandbox.render_frame().unwrap();
        frames += 1;
        assert!(frames <= 48, "recording did not stop");
    }
    h.sandbox.flush();

    assert_eq!(frames, 48);
    assert!((h.sandbox.state().time - 47.0 / 24.0).abs() < 1e-5);
    assert!((h.sandbox.state().delta - 1.0 / 24.0).abs() < 1e-6);
    let mut names: Vec<String> = fs::read_dir(&out)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 48);
    assert_eq!(names.first().unwrap(), "00000.png");
    assert_eq!(names.last().unwrap(), "00047.png");
}

#[test]
fn second_range_is_refused_while_recording() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PLAIN).unwrap();
    let mut h = harness(test_config(dir.path()), &[&frag]);

    assert!(h.sandbox.run_command("sequence_secs,1,2,10"));
    let armed = h.sandbox.recorder().state();
    h.sandbox.run_command("sequence_frames,0,5");
    assert_eq!(h.sandbox.recorder().state(), armed);
    h.sandbox.render_frame().unwrap();
    assert!((h.sandbox.state().time - 1.0).abs() < 1e-6);
    assert_eq!(h.sandbox.recorder().captured(), 1);
}

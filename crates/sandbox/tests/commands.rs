mod common;

use std::fs;

use common::{harness, test_config, PLAIN};
use sandbox::{ExitMode, UniformValue};
use tempfile::TempDir;

fn setup() -> (TempDir, common::Harness) {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PLAIN).unwrap();
    let h = harness(test_config(dir.path()), &[&frag]);
    (dir, h)
}

#[test]
fn queries_reply_on_the_protocol_output() {
    let (_dir, mut h) = setup();
    assert!(h.sandbox.run_command("window_width"));
    assert!(h.sandbox.run_command("window_height"));
    assert!(h.sandbox.run_command("viewport"));
    assert!(h.sandbox.run_command("fps"));
    assert_eq!(h.replies.take(), "64\n32\n0,0,64,32\n60.000000\n");

    assert!(h.sandbox.run_command("fps,30"));
    assert_eq!(h.sandbox.fps(), 30.0);
    assert!(h.sandbox.run_command("fullFps,on"));
    assert!(h.sandbox.run_command("fullFps"));
    assert_eq!(h.replies.take(), "on\n");
}

#[test]
fn unknown_commands_fall_back_to_uniform_assignment() {
    let (_dir, mut h) = setup();
    assert!(h.sandbox.run_command("u_amount,0.5"));
    assert_eq!(h.sandbox.uniforms().get("u_amount"), Some(&UniformValue::Float1(0.5)));
    assert!(!h.sandbox.run_command("not a command"));
    assert!(!h.sandbox.run_command("fps,fast"));
    assert_eq!(h.sandbox.fps(), 60.0);

    h.sandbox.run_command("uniforms");
    let listing = h.replies.take();
    assert!(listing.contains("u_time,float,on"));
    assert!(listing.contains("u_amount,float,0.5"));
    assert!(!listing.contains("u_mouse"));
    h.sandbox.run_command("uniforms,all");
    assert!(h.replies.take().contains("u_mouse,vec2,off"));
}

#[test]
fn help_lists_matching_commands() {
    let (_dir, mut h) = setup();
    assert!(h.sandbox.run_command("help,fp"));
    let text = h.replies.take();
    assert!(text.starts_with("fps[,<fps>]"));
    assert!(text.contains("fullFps[,on|off]"));

    h.sandbox.run_command("help");
    let all = h.replies.take();
    assert_eq!(all.lines().count(), h.sandbox.registry().len());
}

#[test]
fn time_can_be_set() {
    let (_dir, mut h) = setup();
    assert!(h.sandbox.run_command("time,10"));
    h.sandbox.render_frame().unwrap();
    h.sandbox.run_command("time");
    assert_eq!(h.replies.take(), "10.000000\n");
}

#[test]
fn quit_modes() {
    let (_dir, mut h) = setup();
    h.sandbox.run_command("quit");
    assert_eq!(h.sandbox.exit_requested(), Some(ExitMode::AfterFrame));
    h.sandbox.run_command("q");
    assert_eq!(h.sandbox.exit_requested(), Some(ExitMode::Immediate));
    h.sandbox.run_command("exit");
    assert_eq!(h.sandbox.exit_requested(), Some(ExitMode::Immediate));
}

#[test]
fn screenshot_writes_the_next_frame() {
    let (dir, mut h) = setup();
    let shot = dir.path().join("shot.png");
    assert!(h.sandbox.run_command(&format!("screenshot,{}", shot.display())));
    h.sandbox.render_frame().unwrap();
    assert!(shot.is_file());
    assert_eq!(h.replies.take().trim(), shot.display().to_string());
}

mod common;

use std::fs::{self, File};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use common::{harness, test_config, PLAIN};
use sandbox::{Session, Tick};
use tempfile::TempDir;

fn touch(path: &std::path::Path, contents: &str) {
    fs::write(path, contents).unwrap();
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();
}

fn run_until_exit(session: &mut Session, limit: usize) {
    for _ in 0..limit {
        match session.tick(Instant::now()) {
            Tick::Exit => return,
            Tick::Rendered => {}
            Tick::Idle(wait) => thread::sleep(wait.min(Duration::from_millis(5))),
        }
    }
    panic!("session did not exit after {limit} ticks");
}

#[test]
fn startup_commands_with_exit_render_once_then_stop() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PLAIN).unwrap();
    let h = harness(test_config(dir.path()), &[&frag]);
    let (_tx, rx) = crossbeam_channel::unbounded();
    let mut session = Session::new(h.sandbox, rx, Arc::new(AtomicBool::new(false))).unwrap();

    session.run_startup(&["u_gain,2".to_string()], true);
    run_until_exit(&mut session, 100);
    session.finish();
    assert_eq!(h.backend.log.lock().unwrap().presents, 1);
}

#[test]
fn exit_waits_for_recording_to_finish() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PLAIN).unwrap();
    let h = harness(test_config(dir.path()), &[&frag]);
    let (_tx, rx) = crossbeam_channel::unbounded();
    let mut session = Session::new(h.sandbox, rx, Arc::new(AtomicBool::new(false))).unwrap();

    session.run_startup(&["sequence_frames,0,5,10".to_string()], true);
    run_until_exit(&mut session, 100);
    session.finish();
    assert_eq!(h.backend.log.lock().unwrap().presents, 5);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 6);
}

#[test]
fn queued_commands_run_on_the_next_tick() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PLAIN).unwrap();
    let h = harness(test_config(dir.path()), &[&frag]);
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut session = Session::new(h.sandbox, rx, Arc::new(AtomicBool::new(false))).unwrap();

    tx.send("version".to_string()).unwrap();
    tx.send("q".to_string()).unwrap();
    assert_eq!(session.tick(Instant::now()), Tick::Exit);
    session.finish();
    assert_eq!(h.replies.take().trim(), sandbox::commands::VERSION);
}

#[test]
fn watcher_picks_up_an_edit() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PLAIN).unwrap();
    let mut config = test_config(dir.path());
    config.watch_interval = Duration::from_millis(10);
    let h = harness(config, &[&frag]);
    let (_tx, rx) = crossbeam_channel::unbounded();
    let mut session = Session::new(h.sandbox, rx, Arc::new(AtomicBool::new(false))).unwrap();
    let compiled = h.backend.log.lock().unwrap().compiled.len();

    touch(&frag, &format!("// edited\n{PLAIN}"));
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        session.tick(Instant::now());
        if h.backend.log.lock().unwrap().compiled.len() > compiled {
            break;
        }
        assert!(Instant::now() < deadline, "edit was never picked up");
        thread::sleep(Duration::from_millis(10));
    }
    session.finish();
    let log = h.backend.log.lock().unwrap();
    assert!(log.compiled.last().unwrap().fragment.starts_with("// edited"));
}

#[test]
fn failed_frame_is_logged_and_the_next_one_renders() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PLAIN).unwrap();
    let h = harness(test_config(dir.path()), &[&frag]);
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut session = Session::new(h.sandbox, rx, Arc::new(AtomicBool::new(false))).unwrap();

    h.backend.log.lock().unwrap().failing_draws = 1;
    tx.send("u_gain,1".to_string()).unwrap();
    assert_eq!(session.tick(Instant::now()), Tick::Rendered);
    assert_eq!(h.backend.log.lock().unwrap().presents, 0);

    tx.send("u_gain,2".to_string()).unwrap();
    let later = Instant::now() + Duration::from_secs(1);
    assert_eq!(session.tick(later), Tick::Rendered);
    session.finish();
    let log = h.backend.log.lock().unwrap();
    assert_eq!(log.presents, 1);
    assert!(!log.draws.is_empty());
}

#[test]
fn headless_run_flushes_recording_despite_failed_frames() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PLAIN).unwrap();
    let h = harness(test_config(dir.path()), &[&frag]);
    let (_tx, rx) = crossbeam_channel::unbounded();
    let mut session = Session::new(h.sandbox, rx, Arc::new(AtomicBool::new(false))).unwrap();

    h.backend.log.lock().unwrap().failing_draws = 2;
    session.run_startup(&["sequence_frames,0,3,10".to_string()], true);
    session.run_headless();
    assert_eq!(h.backend.log.lock().unwrap().presents, 3);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 4);
}

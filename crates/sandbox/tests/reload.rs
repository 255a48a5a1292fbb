mod common;

use std::fs;

use common::{harness, test_config, PLAIN};
use sandbox::FileRole;
use tempfile::TempDir;

#[test]
fn reloading_unchanged_sources_keeps_one_live_set() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PLAIN).unwrap();
    let mut h = harness(test_config(dir.path()), &[&frag]);

    let live_before = h.backend.log.lock().unwrap().live_programs.len();
    h.sandbox.run_command("reload");
    h.sandbox.run_command("reload");
    let log = h.backend.log.lock().unwrap();
    assert_eq!(log.live_programs.len(), live_before);
    assert!(!h.sandbox.reload_engine().error_screen());
}

#[test]
fn failed_compile_keeps_previous_program_and_raises_error_screen() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PLAIN).unwrap();
    let mut h = harness(test_config(dir.path()), &[&frag]);
    let active = h.sandbox.reload_engine().active().unwrap().main.id;

    fs::write(&frag, "#error broken\nvoid main() {}\n").unwrap();
    h.sandbox.on_file_change(0);

    let engine = h.sandbox.reload_engine();
    assert!(engine.error_screen());
    assert_eq!(engine.active().unwrap().main.id, active);
    assert_eq!(engine.last_error().unwrap().label, "main");

    h.sandbox.render_frame().unwrap();
    let last = h.backend.log.lock().unwrap().draws.last().cloned().unwrap();
    assert_eq!(last.label, "error");

    fs::write(&frag, PLAIN).unwrap();
    h.sandbox.on_file_change(0);
    assert!(!h.sandbox.reload_engine().error_screen());
    assert_ne!(h.sandbox.reload_engine().active().unwrap().main.id, active);
}

#[test]
fn include_change_rebuilds_the_including_primary() {
    let dir = TempDir::new().unwrap();
    let lib = dir.path().join("lib.glsl");
    fs::write(&lib, "float level() { return 0.5; }\n").unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, format!("#include \"lib.glsl\"\n{PLAIN}")).unwrap();
    let mut h = harness(test_config(dir.path()), &[&frag]);

    let index = {
        let files = h.sandbox.files();
        let table = files.lock().unwrap();
        let index = table.index_of(&lib.canonicalize().unwrap()).unwrap();
        assert_eq!(table.get(index).unwrap().role(), FileRole::Dependency);
        index
    };
    assert_eq!(h.sandbox.reload_engine().dependencies(FileRole::Fragment).len(), 1);

    fs::write(&lib, "float level() { return 0.75; }\n").unwrap();
    let compiled_before = h.backend.log.lock().unwrap().compiled.len();
    h.sandbox.on_file_change(index);

    let log = h.backend.log.lock().unwrap();
    let main = log.compiled[compiled_before..]
        .iter()
        .find(|source| source.label == "main")
        .unwrap();
    assert!(main.fragment.contains("return 0.75;"));
}

#[test]
fn include_created_after_load_triggers_a_rebuild() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, format!("#include \"later.glsl\"\n{PLAIN}")).unwrap();
    let mut h = harness(test_config(dir.path()), &[&frag]);
    let later = dir.path().join("later.glsl");

    let files = h.sandbox.files();
    let index = files.lock().unwrap().index_of(&later).unwrap();
    assert!(!files.lock().unwrap().check_staleness(index));

    fs::write(&later, "float later() { return 2.0; }\n").unwrap();
    assert!(files.lock().unwrap().check_staleness(index));
    let compiled_before = h.backend.log.lock().unwrap().compiled.len();
    h.sandbox.on_file_change(index);

    let log = h.backend.log.lock().unwrap();
    let main = log.compiled[compiled_before..]
        .iter()
        .find(|source| source.label == "main")
        .unwrap();
    assert!(main.fragment.contains("return 2.0;"));
}

#[test]
fn defines_reach_every_program() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("main.frag");
    fs::write(&frag, PLAIN).unwrap();
    let mut h = harness(test_config(dir.path()), &[&frag]);

    assert!(h.sandbox.run_command("define,SPEED,2.0"));
    {
        let log = h.backend.log.lock().unwrap();
        let last = log.compiled.last().unwrap();
        assert!(last
            .defines
            .contains(&("SPEED".to_string(), Some("2.0".to_string()))));
    }
    h.sandbox.run_command("defines");
    assert_eq!(h.replies.take(), "SPEED,2.0\n");

    assert!(h.sandbox.run_command("undefine,SPEED"));
    let log = h.backend.log.lock().unwrap();
    assert!(log.compiled.last().unwrap().defines.is_empty());
}

#[test]
fn missing_fragment_is_created_from_template() {
    let dir = TempDir::new().unwrap();
    let frag = dir.path().join("new.frag");
    let h = harness(test_config(dir.path()), &[&frag]);
    assert!(frag.exists());
    assert!(h.sandbox.reload_engine().active().is_some());
}

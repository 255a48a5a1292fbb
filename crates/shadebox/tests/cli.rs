use std::fs;
use std::process::Command;

use tempfile::TempDir;

fn shadebox(config_dir: &TempDir) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_shadebox"));
    command.env("SHADEBOX_CONFIG_DIR", config_dir.path());
    command
}

#[test]
fn help_lists_protocol_flags() {
    let config = TempDir::new().unwrap();
    let output = shadebox(&config)
        .arg("--help")
        .output()
        .expect("failed to run shadebox --help");
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    for flag in ["--fullFps", "--vFlip", "--headless", "--texture", "--record-dir"] {
        assert!(text.contains(flag), "missing {flag} in help");
    }
}

#[test]
fn missing_shader_prints_usage_and_fails() {
    let config = TempDir::new().unwrap();
    let output = shadebox(&config)
        .args(["--headless", "image.png"])
        .output()
        .expect("failed to run shadebox");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no fragment or vertex shader"));
    assert!(stderr.contains("Usage"));
    assert!(output.stdout.is_empty());
}

#[test]
fn invalid_session_file_is_reported() {
    let config = TempDir::new().unwrap();
    fs::write(config.path().join("session.toml"), "version = 7\n").unwrap();
    let output = shadebox(&config)
        .args(["--headless", "main.frag"])
        .output()
        .expect("failed to run shadebox");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("session file"), "{stderr}");
    assert!(stderr.contains("unsupported config version"), "{stderr}");
}

#[test]
fn rejects_malformed_texture_flag() {
    let config = TempDir::new().unwrap();
    let status = shadebox(&config)
        .args(["main.frag", "--texture", "noise.png"])
        .status()
        .expect("failed to run shadebox");
    assert!(!status.success());
}

//! Reads protocol lines from stdin on a background thread.

use std::io::{self, BufRead};
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;

/// Spawns the reader. The thread is never joined: it stays blocked on stdin
/// until input closes or the process exits.
pub fn spawn_stdin_reader(commands: Sender<String>) -> Result<()> {
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::debug!(error = %err, "stdin read failed");
                        break;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if commands.send(line.to_string()).is_err() {
                    break;
                }
            }
            tracing::debug!("stdin closed");
        })
        .context("failed to spawn stdin reader")?;
    Ok(())
}

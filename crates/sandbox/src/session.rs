//! The main loop: file changes, queued commands, pacing and rendering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{Receiver, TryRecvError};

use crate::runtime::{FrameDecision, FramePacer};
use crate::sandbox::{ExitMode, Sandbox};
use crate::watch::{change_slot, spawn_watcher, ChangeReceiver, WatcherHandle};

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// A frame was rendered.
    Rendered,
    /// Nothing to draw yet; come back after the duration.
    Idle(Duration),
    Exit,
}

pub struct Session {
    sandbox: Sandbox,
    changes: ChangeReceiver,
    watcher: Option<WatcherHandle>,
    commands: Receiver<String>,
    commands_open: bool,
    pacer: FramePacer,
    shutdown: Arc<AtomicBool>,
}

impl Session {
    /// Starts the file watcher for everything the sandbox has loaded.
    pub fn new(sandbox: Sandbox, commands: Receiver<String>, shutdown: Arc<AtomicBool>) -> Result<Self> {
        let (notifier, changes) = change_slot();
        let watcher = spawn_watcher(
            sandbox.files(),
            notifier,
            sandbox.config().watch_interval,
            Arc::clone(&shutdown),
        )?;
        let pacer = FramePacer::new(sandbox.fps());
        Ok(Self {
            sandbox,
            changes,
            watcher: Some(watcher),
            commands,
            commands_open: true,
            pacer,
            shutdown,
        })
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn sandbox_mut(&mut self) -> &mut Sandbox {
        &mut self.sandbox
    }

    /// Runs startup commands before the first frame. With `exit_after` the session
    /// ends once they and any recording they started have finished.
    pub fn run_startup(&mut self, commands: &[String], exit_after: bool) {
        for line in commands {
            tracing::debug!(command = %line, "startup command");
            self.sandbox.run_command(line);
        }
        if exit_after {
            self.sandbox.request_exit(ExitMode::AfterFrame);
        }
    }

    fn drain_commands(&mut self) -> bool {
        let mut ran = false;
        while self.commands_open {
            match self.commands.try_recv() {
                Ok(line) => {
                    ran = true;
                    self.sandbox.run_command(&line);
                    if self.sandbox.exit_requested() == Some(ExitMode::Immediate) {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::debug!("command input closed");
                    self.commands_open = false;
                }
            }
        }
        ran
    }

    /// One iteration: reload, commands, exit check, pacing, render. A frame that
    /// fails to render is logged and the loop carries on.
    pub fn tick(&mut self, now: Instant) -> Tick {
        if self.shutdown.load(Ordering::Relaxed) {
            return Tick::Exit;
        }
        if let Some(index) = self.changes.take() {
            self.sandbox.on_file_change(index);
        }
        let pending = self.drain_commands();
        if self.sandbox.exit_requested() == Some(ExitMode::Immediate) {
            return Tick::Exit;
        }

        self.pacer.set_fps(self.sandbox.fps());
        let tick = match self.pacer.decide(self.sandbox.wants(pending), now) {
            FrameDecision::Render => {
                if let Err(err) = self.sandbox.render_frame() {
                    tracing::error!(error = %format!("{err:#}"), "frame failed");
                }
                self.pacer.mark_rendered(now);
                Tick::Rendered
            }
            FrameDecision::Wait(wait) => Tick::Idle(wait),
        };

        if self.sandbox.exit_requested() == Some(ExitMode::AfterFrame)
            && tick == Tick::Rendered
            && !self.sandbox.is_recording()
        {
            self.sandbox.flush();
            return Tick::Exit;
        }
        tick
    }

    /// Drives the loop without a window until an exit is requested, then
    /// stops the watcher and flushes pending frame writes.
    pub fn run_headless(mut self) {
        loop {
            match self.tick(Instant::now()) {
                Tick::Exit => break,
                Tick::Rendered => {}
                Tick::Idle(wait) => thread::sleep(wait.min(Duration::from_millis(50))),
            }
        }
        self.finish();
    }

    /// Stops the background threads and waits for pending frame writes.
    pub fn finish(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        self.sandbox.shutdown();
    }
}

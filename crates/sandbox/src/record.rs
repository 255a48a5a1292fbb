//! Frame-accurate recording on a virtual clock, plus the PNG writer pool.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use thiserror::Error;

use crate::texture::{save_png, ImageData};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOptions {
    pub dir: PathBuf,
    pub prefix: String,
    /// Encoder threads; `0` writes on the calling thread.
    pub workers: usize,
    /// Ceiling on frame bytes waiting to be encoded.
    pub max_queued_bytes: usize,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prefix: String::new(),
            workers: thread::available_parallelism().map_or(2, |n| n.get().min(8)),
            max_queued_bytes: 512 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("invalid recording range {start}..{end} at {fps} fps")]
    InvalidRange { start: f64, end: f64, fps: f64 },
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("not recording")]
    Idle,
    #[error("failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordState {
    Idle,
    /// Start and end in seconds.
    ArmedByTime { start: f64, end: f64, fps: f64, step: u64 },
    /// Start and end in frames at `fps`.
    ArmedByFrame { start: u64, end: u64, fps: f64, step: u64 },
}

impl RecordState {
    /// Virtual time of the next capture, in seconds.
    pub fn head_seconds(&self) -> Option<f64> {
        match *self {
            Self::Idle => None,
            Self::ArmedByTime { start, fps, step, .. } => Some(start + step as f64 / fps),
            Self::ArmedByFrame { start, fps, step, .. } => Some((start + step) as f64 / fps),
        }
    }

    fn is_terminal(&self) -> bool {
        match *self {
            Self::Idle => true,
            Self::ArmedByTime { end, .. } => self.head_seconds().is_some_and(|head| head >= end),
            Self::ArmedByFrame { start, end, step, .. } => start + step >= end,
        }
    }

    /// Sequence number of the next file.
    pub fn frame_number(&self) -> u64 {
        match *self {
            Self::Idle => 0,
            Self::ArmedByTime { start, fps, step, .. } => (start * fps).round() as u64 + step,
            Self::ArmedByFrame { start, step, .. } => start + step,
        }
    }
}

fn check_range(start: f64, end: f64, fps: f64) -> Result<(), RecordError> {
    if fps > 0.0 && fps.is_finite() && start >= 0.0 && end > start {
        Ok(())
    } else {
        Err(RecordError::InvalidRange { start, end, fps })
    }
}

/// Drives the recording state machine and hands captured frames to a [`FrameWriter`].
pub struct RecordingController {
    options: RecordOptions,
    state: RecordState,
    writer: FrameWriter,
    captured: u64,
}

impl RecordingController {
    pub fn new(options: RecordOptions) -> Self {
        let writer = FrameWriter::new(options.workers, options.max_queued_bytes);
        Self {
            options,
            state: RecordState::Idle,
            writer,
            captured: 0,
        }
    }

    pub fn options(&self) -> &RecordOptions {
        &self.options
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        !matches!(self.state, RecordState::Idle)
    }

    pub fn record_secs(&mut self, start: f64, end: f64, fps: f64) -> Result<(), RecordError> {
        self.arm(start, end, fps)?;
        self.state = RecordState::ArmedByTime { start, end, fps, step: 0 };
        tracing::info!(start, end, fps, "recording seconds");
        Ok(())
    }

    pub fn record_frames(&mut self, start: u64, end: u64, fps: f64) -> Result<(), RecordError> {
        self.arm(start as f64, end as f64, fps)?;
        self.state = RecordState::ArmedByFrame { start, end, fps, step: 0 };
        tracing::info!(start, end, fps, "recording frames");
        Ok(())
    }

    fn arm(&mut self, start: f64, end: f64, fps: f64) -> Result<(), RecordError> {
        if self.is_recording() {
            return Err(RecordError::AlreadyRecording);
        }
        check_range(start, end, fps)?;
        self.captured = 0;
        Ok(())
    }

    /// Virtual time the engine clock must show for the next captured frame.
    pub fn head_seconds(&self) -> Option<f64> {
        self.state.head_seconds()
    }

    pub fn frame_delta(&self) -> Option<f64> {
        match self.state {
            RecordState::Idle => None,
            RecordState::ArmedByTime { fps, .. } | RecordState::ArmedByFrame { fps, .. } => {
                Some(1.0 / fps)
            }
        }
    }

    /// Progress through the armed range, in `[0, 1]`.
    pub fn recorded_percentage(&self) -> f64 {
        let (start, end) = match self.state {
            RecordState::Idle => return 0.0,
            RecordState::ArmedByTime { start, end, .. } => (start, end),
            RecordState::ArmedByFrame { start, end, fps, .. } => (start as f64 / fps, end as f64 / fps),
        };
        let head = self.state.head_seconds().unwrap_or(start);
        ((head - start) / (end - start)).clamp(0.0, 1.0)
    }

    pub fn next_path(&self) -> PathBuf {
        frame_path(&self.options.dir, &self.options.prefix, self.state.frame_number())
    }

    /// Queues `image` as the frame at the head and advances the cursor.
    ///
    /// Returns true when this was the last frame of the range.
    pub fn capture(&mut self, image: ImageData) -> Result<bool, RecordError> {
        if !self.is_recording() {
            return Err(RecordError::Idle);
        }
        let path = self.next_path();
        self.writer.submit(path, image)?;
        self.captured += 1;
        match &mut self.state {
            RecordState::ArmedByTime { step, .. } | RecordState::ArmedByFrame { step, .. } => {
                *step += 1;
            }
            RecordState::Idle => {}
        }
        if self.state.is_terminal() {
            tracing::info!(frames = self.captured, dir = %self.options.dir.display(), "recording finished");
            self.state = RecordState::Idle;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn captured(&self) -> u64 {
        self.captured
    }

    pub fn writer(&self) -> &FrameWriter {
        &self.writer
    }

    /// Blocks until every queued frame is on disk.
    pub fn flush(&self) {
        self.writer.flush();
    }
}

pub fn frame_path(dir: &Path, prefix: &str, number: u64) -> PathBuf {
    dir.join(format!("{prefix}{number:05}.png"))
}

struct Budget {
    queued: Mutex<usize>,
    drained: Condvar,
}

impl Budget {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.queued.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, bytes: usize) {
        let mut queued = self.lock();
        *queued = queued.saturating_sub(bytes);
        self.drained.notify_all();
    }
}

/// Bytes a worker holds against the budget, returned when dropped so an
/// unwinding encoder cannot stall `flush`.
struct Reservation<'a> {
    budget: &'a Budget,
    bytes: usize,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.budget.release(self.bytes);
    }
}

type Job = (PathBuf, ImageData);

/// PNG encoders fed through a byte-bounded queue.
pub struct FrameWriter {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    budget: Arc<Budget>,
    ceiling: usize,
    written: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

impl FrameWriter {
    pub fn new(workers: usize, ceiling: usize) -> Self {
        let budget = Arc::new(Budget {
            queued: Mutex::new(0),
            drained: Condvar::new(),
        });
        let written = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let (sender, receiver) = unbounded::<Job>();
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let budget = Arc::clone(&budget);
            let written = Arc::clone(&written);
            let failed = Arc::clone(&failed);
            let spawned = thread::Builder::new()
                .name(format!("frame-writer-{index}"))
                .spawn(move || {
                    for (path, image) in receiver.iter() {
                        let _reserved = Reservation {
                            budget: &budget,
                            bytes: image.byte_len(),
                        };
                        let encoded = panic::catch_unwind(AssertUnwindSafe(|| save_png(&path, image)));
                        match encoded {
                            Ok(Ok(())) => {
                                written.fetch_add(1, Ordering::SeqCst);
                            }
                            Ok(Err(err)) => {
                                failed.fetch_add(1, Ordering::SeqCst);
                                tracing::error!(path = %path.display(), error = %err, "failed to write frame");
                            }
                            Err(_) => {
                                failed.fetch_add(1, Ordering::SeqCst);
                                tracing::error!(path = %path.display(), "frame encoder panicked");
                            }
                        }
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => tracing::warn!(error = %err, "failed to spawn frame writer thread"),
            }
        }
        Self {
            sender: (!handles.is_empty()).then_some(sender),
            workers: handles,
            budget,
            ceiling,
            written,
            failed,
        }
    }

    /// Queues one frame, blocking while the queue is over its byte ceiling.
    ///
    /// A frame larger than the ceiling is still admitted once the queue is empty.
    pub fn submit(&self, path: PathBuf, image: ImageData) -> Result<(), RecordError> {
        let Some(sender) = &self.sender else {
            return self.write_now(path, image);
        };
        let bytes = image.byte_len();
        {
            let mut queued = self.budget.lock();
            while *queued > 0 && *queued + bytes > self.ceiling {
                queued = self
                    .budget
                    .drained
                    .wait(queued)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            *queued += bytes;
        }
        if let Err(err) = sender.send((path, image)) {
            let (path, image) = err.into_inner();
            self.budget.release(image.byte_len());
            return self.write_now(path, image);
        }
        Ok(())
    }

    fn write_now(&self, path: PathBuf, image: ImageData) -> Result<(), RecordError> {
        match save_png(&path, image) {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                Err(RecordError::Write {
                    path,
                    message: format!("{err:#}"),
                })
            }
        }
    }

    pub fn queued_bytes(&self) -> usize {
        *self.budget.lock()
    }

    /// Blocks until every submitted frame has been encoded.
    pub fn flush(&self) {
        let mut queued = self.budget.lock();
        while *queued > 0 {
            queued = self
                .budget
                .drained
                .wait(queued)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Size;
    use tempfile::TempDir;

    fn frame() -> ImageData {
        ImageData::solid(Size::new(4, 4), [255, 0, 0, 255])
    }

    #[test]
    fn reservation_is_returned_when_the_holder_unwinds() {
        let writer = FrameWriter::new(1, 1024);
        *writer.budget.lock() += 64;
        let budget = Arc::clone(&writer.budget);
        let outcome = thread::spawn(move || {
            let _reserved = Reservation {
                budget: &budget,
                bytes: 64,
            };
            panic!("encoder crashed");
        })
        .join();
        assert!(outcome.is_err());
        assert_eq!(writer.queued_bytes(), 0);
        writer.flush();
    }

    fn options(dir: &Path, workers: usize) -> RecordOptions {
        RecordOptions {
            dir: dir.to_path_buf(),
            prefix: "shot_".into(),
            workers,
            max_queued_bytes: 1024,
        }
    }

    #[test]
    fn frame_range_writes_every_frame() {
        let dir = TempDir::new().unwrap();
        let mut recorder = RecordingController::new(options(dir.path(), 3));
        recorder.record_frames(0, 48, 24.0).unwrap();
        let mut times = Vec::new();
        let mut finished = false;
        while recorder.is_recording() {
            times.push(recorder.head_seconds().unwrap());
            finished = recorder.capture(frame()).unwrap();
        }
        recorder.flush();
        assert!(finished);
        assert_eq!(times.len(), 48);
        assert_eq!(times[24], 1.0);
        assert_eq!(recorder.writer().written(), 48);
        assert!(dir.path().join("shot_00000.png").is_file());
        assert!(dir.path().join("shot_00047.png").is_file());
        assert!(!dir.path().join("shot_00048.png").exists());
    }

    #[test]
    fn time_range_numbers_from_start_frame() {
        let dir = TempDir::new().unwrap();
        let mut recorder = RecordingController::new(options(dir.path(), 0));
        recorder.record_secs(1.0, 1.5, 10.0).unwrap();
        assert_eq!(recorder.next_path(), dir.path().join("shot_00010.png"));
        assert_eq!(recorder.recorded_percentage(), 0.0);
        let mut count = 0;
        while recorder.is_recording() {
            recorder.capture(frame()).unwrap();
            count += 1;
            if count == 2 {
                assert!((recorder.recorded_percentage() - 0.4).abs() < 1e-9);
            }
        }
        assert_eq!(count, 5);
        assert!(dir.path().join("shot_00014.png").is_file());
    }

    #[test]
    fn rejects_bad_ranges_and_overlap() {
        let dir = TempDir::new().unwrap();
        let mut recorder = RecordingController::new(options(dir.path(), 0));
        assert!(matches!(
            recorder.record_secs(2.0, 1.0, 24.0),
            Err(RecordError::InvalidRange { .. })
        ));
        assert!(recorder.record_frames(0, 10, 0.0).is_err());
        assert_eq!(recorder.capture(frame()), Err(RecordError::Idle));
        recorder.record_frames(0, 2, 24.0).unwrap();
        assert_eq!(recorder.record_frames(0, 2, 24.0), Err(RecordError::AlreadyRecording));
    }

    #[test]
    fn oversized_frame_is_admitted_when_queue_is_empty() {
        let dir = TempDir::new().unwrap();
        let writer = FrameWriter::new(2, 8);
        for index in 0..4 {
            writer
                .submit(frame_path(dir.path(), "", index), frame())
                .unwrap();
        }
        writer.flush();
        assert_eq!(writer.queued_bytes(), 0);
        assert_eq!(writer.written(), 4);
    }
}

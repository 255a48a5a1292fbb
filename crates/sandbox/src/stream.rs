//! Streaming textures: image sequences decoded ahead of the render loop.

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

use crate::texture::{load_image, ImageData};
use crate::types::Size;

/// Playback position of a stream on the engine's virtual timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamClock {
    pub current_frame: u32,
    pub total_frames: u32,
    pub fps: f32,
    /// Seconds of virtual time seen by the last update. Does not wrap when
    /// playback loops.
    pub elapsed: f32,
}

impl StreamClock {
    pub fn time(&self) -> f32 {
        self.elapsed
    }

    pub fn duration(&self) -> f32 {
        if self.fps > 0.0 {
            self.total_frames as f32 / self.fps
        } else {
            0.0
        }
    }

    /// Frame shown at `seconds`, looping over the sequence.
    pub fn frame_at(&self, seconds: f32) -> u32 {
        if self.fps <= 0.0 || self.total_frames == 0 || seconds <= 0.0 {
            return 0;
        }
        let frame = (f64::from(seconds) * f64::from(self.fps)).floor() as u64;
        (frame % u64::from(self.total_frames)) as u32
    }
}

/// A texture whose contents change over time.
pub trait TextureStream: Send {
    fn size(&self) -> Size;
    fn clock(&self) -> StreamClock;
    /// First decoded frame, used to allocate the texture.
    fn first_frame(&self) -> &ImageData;
    /// Moves playback to virtual time `seconds`. Returns the frame to upload
    /// when it changed; `None` keeps the previously uploaded frame bound.
    /// With `wait` set the call blocks until the frame for `seconds` is
    /// decoded, so recordings do not depend on decode speed.
    fn update(&mut self, seconds: f32, wait: bool) -> Option<ImageData>;
    fn is_playing(&self) -> bool {
        self.clock().total_frames > 1
    }
}

/// Expands a printf-style `%0Nd` / `%d` pattern for `index`.
pub fn expand_pattern(pattern: &str, index: u32) -> Option<String> {
    let start = pattern.find('%')?;
    let rest = &pattern[start + 1..];
    let end = rest.find('d')?;
    let spec = &rest[..end];
    if !spec.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let width: usize = if spec.is_empty() { 0 } else { spec.parse().ok()? };
    Some(format!(
        "{}{:0width$}{}",
        &pattern[..start],
        index,
        &rest[end + 1..],
        width = width
    ))
}

pub fn is_sequence_pattern(path: &Path) -> bool {
    path.to_str()
        .and_then(|text| expand_pattern(text, 0))
        .is_some()
}

/// Frames of a numbered image sequence, starting at index 0 or 1.
pub fn sequence_frames(pattern: &Path) -> Result<Vec<PathBuf>> {
    let text = pattern
        .to_str()
        .ok_or_else(|| anyhow!("sequence pattern is not valid UTF-8"))?;
    for first in [0u32, 1] {
        let frames: Vec<PathBuf> = (first..)
            .map_while(|index| expand_pattern(text, index).map(PathBuf::from))
            .take_while(|path| path.is_file())
            .collect();
        if !frames.is_empty() {
            return Ok(frames);
        }
    }
    Err(anyhow!("no frames match {}", pattern.display()))
}

type Decoded = (u32, Option<ImageData>);

/// Decoding thread answering one frame request at a time.
struct Decoder {
    requests: Sender<u32>,
    frames: Receiver<Decoded>,
    worker: Option<JoinHandle<()>>,
}

impl Decoder {
    fn spawn(paths: Vec<PathBuf>, vflip: bool) -> Result<Self> {
        let (requests, jobs) = bounded::<u32>(1);
        let (done, frames) = bounded::<Decoded>(2);
        let worker = thread::Builder::new()
            .name("sequence-decoder".into())
            .spawn(move || {
                for index in jobs {
                    let image = paths.get(index as usize).and_then(|path| {
                        load_image(path, vflip)
                            .map_err(|err| {
                                tracing::warn!(path = %path.display(), error = %err, "skipping undecodable frame");
                            })
                            .ok()
                    });
                    if done.send((index, image)).is_err() {
                        break;
                    }
                }
            })
            .context("failed to spawn sequence decoder")?;
        Ok(Self {
            requests,
            frames,
            worker: Some(worker),
        })
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        // Closing both channels ends the worker loop.
        let (closed, _) = bounded(0);
        self.requests = closed;
        let (_, drained) = bounded(0);
        self.frames = drained;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Image sequence played back through a decoding thread.
pub struct ImageSequence {
    first: ImageData,
    clock: StreamClock,
    decoder: Option<Decoder>,
    pending: Option<u32>,
    ready: Option<Decoded>,
}

impl ImageSequence {
    pub fn open(pattern: &Path, fps: f32, vflip: bool) -> Result<Self> {
        let paths = sequence_frames(pattern)?;
        let first = load_image(&paths[0], vflip)
            .with_context(|| format!("failed to decode first frame of {}", pattern.display()))?;
        let total = paths.len() as u32;
        let decoder = if total > 1 {
            Some(Decoder::spawn(paths, vflip)?)
        } else {
            None
        };
        tracing::info!(pattern = %pattern.display(), frames = total, fps, "opened image sequence");
        let mut sequence = Self {
            first,
            clock: StreamClock {
                current_frame: 0,
                total_frames: total,
                fps,
                elapsed: 0.0,
            },
            decoder,
            pending: None,
            ready: None,
        };
        sequence.request(1 % total.max(1));
        Ok(sequence)
    }

    /// Queues `index` unless a request is already in flight.
    fn request(&mut self, index: u32) {
        let Some(decoder) = self.decoder.as_ref() else {
            return;
        };
        if self.pending.is_some() || index == self.clock.current_frame {
            return;
        }
        match decoder.requests.try_send(index) {
            Ok(()) => self.pending = Some(index),
            Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => self.decoder = None,
        }
    }

    fn accept(&mut self, decoded: Decoded) {
        if self.pending == Some(decoded.0) {
            self.pending = None;
        }
        self.ready = Some(decoded);
    }

    fn take_ready(&mut self, target: u32) -> Option<Option<ImageData>> {
        match self.ready.take() {
            Some((index, image)) if index == target => Some(image),
            other => {
                self.ready = other;
                None
            }
        }
    }

    fn poll(&mut self) {
        let mut received = Vec::new();
        let mut disconnected = false;
        if let Some(decoder) = self.decoder.as_ref() {
            loop {
                match decoder.frames.try_recv() {
                    Ok(decoded) => received.push(decoded),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }
        }
        if disconnected {
            self.decoder = None;
        }
        for decoded in received {
            self.accept(decoded);
        }
    }

    /// Blocks until `target` is decoded. `None` when the decoder is gone.
    fn wait_for(&mut self, target: u32) -> Option<Option<ImageData>> {
        loop {
            if let Some(image) = self.take_ready(target) {
                return Some(image);
            }
            let decoder = self.decoder.as_ref()?;
            let outcome = match self.pending {
                Some(_) => decoder.frames.recv().map(Some).map_err(|_| ()),
                None => decoder.requests.send(target).map(|()| None).map_err(|_| ()),
            };
            match outcome {
                Ok(Some(decoded)) => self.accept(decoded),
                Ok(None) => self.pending = Some(target),
                Err(()) => {
                    self.decoder = None;
                    return None;
                }
            }
        }
    }
}

impl TextureStream for ImageSequence {
    fn size(&self) -> Size {
        self.first.size
    }

    fn clock(&self) -> StreamClock {
        self.clock
    }

    fn first_frame(&self) -> &ImageData {
        &self.first
    }

    fn update(&mut self, seconds: f32, wait: bool) -> Option<ImageData> {
        self.clock.elapsed = seconds.max(0.0);
        let target = self.clock.frame_at(seconds);
        if target == self.clock.current_frame {
            return None;
        }
        if target == 0 {
            self.clock.current_frame = 0;
            self.request(1 % self.clock.total_frames);
            return Some(self.first.clone());
        }

        let delivered = if wait {
            self.wait_for(target)
        } else {
            self.poll();
            let ready = self.take_ready(target);
            if ready.is_none() {
                tracing::trace!(frame = target, "sequence decoder underrun");
                self.request(target);
            }
            ready
        };
        let image = delivered?;
        self.clock.current_frame = target;
        self.request((target + 1) % self.clock.total_frames);
        image
    }
}

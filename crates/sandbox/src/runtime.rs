use std::time::{Duration, Instant};

/// Snapshot of the time state supplied to the shader uniforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Elapsed wall-clock or virtual time in seconds.
    pub seconds: f32,
    /// Seconds since the previous sample.
    pub delta: f32,
    /// Monotonic frame counter for the running session.
    pub frame: u64,
}

/// Abstraction over where time values originate from.
pub trait TimeSource: Send {
    /// Resets the source to its initial state.
    fn reset(&mut self);
    /// Seconds elapsed since the source started.
    fn now(&self) -> f64;
}

/// Time source backed by the system monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.origin = Instant::now();
    }

    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Time source that always reports a fixed timestamp.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    time: f64,
}

impl FixedTimeSource {
    pub fn new(time: f64) -> Self {
        Self { time }
    }

    pub fn set(&mut self, time: f64) {
        self.time = time;
    }
}

impl TimeSource for FixedTimeSource {
    fn reset(&mut self) {}

    fn now(&self) -> f64 {
        self.time
    }
}

pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

/// Engine clock: wall time plus a user offset, or a forced virtual time while recording.
pub struct EngineClock {
    source: BoxedTimeSource,
    offset: f64,
    forced: Option<f64>,
    last: Option<f64>,
    current: TimeSample,
}

impl EngineClock {
    pub fn new(source: BoxedTimeSource) -> Self {
        Self {
            source,
            offset: 0.0,
            forced: None,
            last: None,
            current: TimeSample {
                seconds: 0.0,
                delta: 0.0,
                frame: 0,
            },
        }
    }

    pub fn system() -> Self {
        Self::new(Box::new(SystemTimeSource::new()))
    }

    /// Pins the next sample to `seconds` regardless of wall time.
    pub fn force(&mut self, seconds: f64) {
        self.forced = Some(seconds);
    }

    /// Shifts the wall-clock timeline so the current time reads `seconds`.
    pub fn set_time(&mut self, seconds: f64) {
        self.offset = seconds - self.source.now();
    }

    pub fn reset(&mut self) {
        self.source.reset();
        self.offset = 0.0;
        self.last = None;
    }

    /// Advances to the next frame.
    pub fn tick(&mut self) -> TimeSample {
        let seconds = self
            .forced
            .take()
            .unwrap_or_else(|| self.source.now() + self.offset);
        let delta = self.last.map_or(0.0, |last| (seconds - last).max(0.0));
        let frame = if self.last.is_some() {
            self.current.frame + 1
        } else {
            0
        };
        self.last = Some(seconds);
        self.current = TimeSample {
            seconds: seconds as f32,
            delta: delta as f32,
            frame,
        };
        self.current
    }

    pub fn current(&self) -> TimeSample {
        self.current
    }
}

/// Reasons the loop may want a frame this iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderWants {
    pub change: bool,
    pub full_fps: bool,
    pub pending_command: bool,
    pub recording: bool,
}

impl RenderWants {
    pub fn any(&self) -> bool {
        self.change || self.full_fps || self.pending_command || self.recording
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecision {
    Render,
    Wait(Duration),
}

/// Frame-skip policy: render only when something asks for it, capped to a target rate.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Option<Duration>,
    last_frame: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: f32) -> Self {
        let mut pacer = Self {
            interval: None,
            last_frame: None,
        };
        pacer.set_fps(fps);
        pacer
    }

    pub fn set_fps(&mut self, fps: f32) {
        self.interval = (fps > 0.0 && fps.is_finite()).then(|| Duration::from_secs_f32(1.0 / fps));
    }

    pub fn fps(&self) -> f32 {
        self.interval.map_or(0.0, |interval| 1.0 / interval.as_secs_f32())
    }

    pub fn decide(&self, wants: RenderWants, now: Instant) -> FrameDecision {
        if wants.recording {
            return FrameDecision::Render;
        }
        let remaining = match (self.interval, self.last_frame) {
            (Some(interval), Some(last)) => interval.saturating_sub(now.saturating_duration_since(last)),
            _ => Duration::ZERO,
        };
        if wants.any() && remaining.is_zero() {
            return FrameDecision::Render;
        }
        if remaining.is_zero() {
            FrameDecision::Wait(self.interval.unwrap_or(Duration::from_millis(16)))
        } else {
            FrameDecision::Wait(remaining)
        }
    }

    pub fn mark_rendered(&mut self, now: Instant) {
        self.last_frame = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_time_overrides_wall_clock() {
        let mut clock = EngineClock::new(Box::new(FixedTimeSource::new(10.0)));
        assert_eq!(clock.tick().seconds, 10.0);
        clock.force(2.5);
        let sample = clock.tick();
        assert_eq!(sample.seconds, 2.5);
        assert_eq!(clock.tick().seconds, 10.0);
    }

    #[test]
    fn set_time_offsets_timeline() {
        let mut clock = EngineClock::new(Box::new(FixedTimeSource::new(4.0)));
        clock.set_time(1.0);
        assert_eq!(clock.tick().seconds, 1.0);
    }

    #[test]
    fn frames_and_deltas_advance() {
        let mut clock = EngineClock::new(Box::new(FixedTimeSource::new(0.0)));
        clock.force(0.0);
        let first = clock.tick();
        clock.force(0.5);
        let second = clock.tick();
        assert_eq!(first.delta, 0.0);
        assert_eq!(second.delta, 0.5);
        assert_eq!(second.frame, first.frame + 1);
    }

    #[test]
    fn pacer_waits_without_reasons() {
        let pacer = FramePacer::new(50.0);
        let now = Instant::now();
        assert!(matches!(pacer.decide(RenderWants::default(), now), FrameDecision::Wait(_)));
        let wants = RenderWants {
            pending_command: true,
            ..Default::default()
        };
        assert_eq!(pacer.decide(wants, now), FrameDecision::Render);
    }

    #[test]
    fn pacer_caps_rate_but_never_skips_recording() {
        let mut pacer = FramePacer::new(10.0);
        let now = Instant::now();
        pacer.mark_rendered(now);
        let change = RenderWants {
            change: true,
            ..Default::default()
        };
        assert!(matches!(pacer.decide(change, now), FrameDecision::Wait(_)));
        let recording = RenderWants {
            recording: true,
            ..Default::default()
        };
        assert_eq!(pacer.decide(recording, now), FrameDecision::Render);
        let later = now + Duration::from_millis(150);
        assert_eq!(pacer.decide(change, later), FrameDecision::Render);
    }
}

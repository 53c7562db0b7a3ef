//! Clock and timing utilities for timeline playback.
//!
//! The real-time preview is driven by a single shared timeline clock. Every
//! pooled media handle is kept within a small drift of that clock, and the
//! frame loop is paced by a [`RateController`].

use std::time::Instant;

/// Timeline position in milliseconds.
pub type TimeMs = u64;

/// The shared timeline clock of the real-time preview.
///
/// While playing, the position advances with wall time scaled by `rate`.
/// Seeking re-anchors the clock without changing the play state.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    /// Wall instant the current anchor was taken.
    anchor: Instant,

    /// Timeline position at `anchor` (ms, fractional).
    anchor_position_ms: f64,

    /// Whether the clock is advancing.
    playing: bool,

    /// Playback speed multiplier.
    rate: f64,
}

impl PlaybackClock {
    /// Create a paused clock at timeline position zero.
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            anchor_position_ms: 0.0,
            playing: false,
            rate: 1.0,
        }
    }

    /// Start advancing from the current position.
    pub fn play(&mut self) {
        self.play_at(Instant::now());
    }

    /// Stop advancing, freezing the current position.
    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    /// Jump to `position_ms`.
    pub fn seek(&mut self, position_ms: TimeMs) {
        self.anchor = Instant::now();
        self.anchor_position_ms = position_ms as f64;
    }

    /// Change the playback speed, keeping the current position.
    pub fn set_rate(&mut self, rate: f64) {
        let now = Instant::now();
        self.anchor_position_ms = self.position_ms_f64_at(now);
        self.anchor = now;
        self.rate = rate.max(0.0);
    }

    /// Whether the clock is advancing.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Current playback speed.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Current timeline position in whole milliseconds.
    pub fn position_ms(&self) -> TimeMs {
        self.position_ms_at(Instant::now())
    }

    /// Timeline position at an arbitrary instant.
    pub fn position_ms_at(&self, now: Instant) -> TimeMs {
        self.position_ms_f64_at(now).max(0.0).floor() as TimeMs
    }

    /// Start advancing as of `now`.
    pub fn play_at(&mut self, now: Instant) {
        if self.playing {
            return;
        }
        self.anchor = now;
        self.playing = true;
    }

    /// Freeze the position reached at `now`.
    pub fn pause_at(&mut self, now: Instant) {
        if !self.playing {
            return;
        }
        self.anchor_position_ms = self.position_ms_f64_at(now);
        self.anchor = now;
        self.playing = false;
    }

    fn position_ms_f64_at(&self, now: Instant) -> f64 {
        if !self.playing {
            return self.anchor_position_ms;
        }
        let elapsed_ms = now.saturating_duration_since(self.anchor).as_secs_f64() * 1000.0;
        self.anchor_position_ms + elapsed_ms * self.rate
    }

    /// Convert a millisecond value to seconds.
    pub fn ms_to_secs(ms: TimeMs) -> f64 {
        ms as f64 / 1000.0
    }

    /// Convert seconds to whole milliseconds (rounded).
    pub fn secs_to_ms(secs: f64) -> TimeMs {
        (secs.max(0.0) * 1000.0).round() as TimeMs
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Drift between where a media handle is and where the clock wants it.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Position requested by the timeline clock (seconds).
    pub expected_secs: f64,
    /// Position reported by the media handle (seconds).
    pub actual_secs: f64,
}

impl DriftMeasurement {
    /// Drift in milliseconds (positive = handle is ahead).
    pub fn drift_ms(&self) -> f64 {
        (self.actual_secs - self.expected_secs) * 1000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}

/// Frame rate controller for the presentation loop.
#[derive(Debug)]
pub struct RateController {
    target_interval_ns: u64,
    last_tick_ns: Option<u64>,
}

impl RateController {
    /// Create a controller targeting the given Hz rate.
    pub fn new(target_hz: u32) -> Self {
        Self {
            target_interval_ns: 1_000_000_000 / target_hz.max(1) as u64,
            last_tick_ns: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_ns: u64) -> bool {
        match self.last_tick_ns {
            None => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            Some(last) if current_ns >= last + self.target_interval_ns => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            _ => false,
        }
    }
}

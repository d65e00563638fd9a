//! Playback position bookkeeping
//!
//! The position is `now - start_time`. Pausing records when the pause began;
//! resuming shifts `start_time` forward by the paused gap so the position
//! continues where it stopped.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    start_time: Duration,
    pause_start: Option<Duration>,
}

impl Timeline {
    pub fn new(now: Duration) -> Self {
        Self {
            start_time: now,
            pause_start: None,
        }
    }

    /// Playback position in seconds. Frozen while paused.
    pub fn elapsed(&self, now: Duration) -> f64 {
        let reference = self.pause_start.unwrap_or(now);
        reference.saturating_sub(self.start_time).as_secs_f64()
    }

    pub fn pause(&mut self, now: Duration) {
        if self.pause_start.is_none() {
            self.pause_start = Some(now);
        }
    }

    /// Leave the paused state, returning how long the pause lasted
    pub fn resume(&mut self, now: Duration) -> Duration {
        let Some(pause_start) = self.pause_start.take() else {
            return Duration::ZERO;
        };
        let gap = now.saturating_sub(pause_start);
        self.start_time += gap;
        gap
    }

    /// Restart at position zero. A pause in progress continues from `now`.
    pub fn reset(&mut self, now: Duration) {
        self.start_time = now;
        if self.pause_start.is_some() {
            self.pause_start = Some(now);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause_start.is_some()
    }

    pub fn start_time(&self) -> Duration {
        self.start_time
    }
}

/// Seconds to wait before presenting a frame stamped `pts`.
///
/// When the audio clock says the audible position is further along than the
/// wall clock, the wait is pulled toward the audio-implied value by
/// `correction` (0 keeps the wall-clock wait, 1 adopts the audio wait). The
/// audio clock never lengthens a wait.
pub fn presentation_wait(pts: f64, elapsed: f64, audio_position: Option<f64>, correction: f64) -> f64 {
    let wait = pts - elapsed;
    match audio_position {
        Some(audio) => {
            let audio_wait = pts - audio;
            if audio_wait < wait {
                wait - (wait - audio_wait) * correction.clamp(0.0, 1.0)
            } else {
                wait
            }
        }
        None => wait,
    }
}
